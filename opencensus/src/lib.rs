//! A census-style telemetry pipeline: distributed traces and metrics with a
//! pluggable exporter architecture.
//!
//! The crate is organised around two recording engines and the transport that
//! drains them:
//!
//! * [`trace`] — span lifecycle, sampling, and the tracer that routes finished
//!   spans to a [`trace::SpanExporter`].
//! * [`metrics`] — gauge and cumulative instruments aggregated into
//!   time series, enumerated through [`metrics::MetricProducer`]s and pushed
//!   to a [`metrics::MetricExporter`] by the [`metrics::PeriodicExporter`]
//!   background transport.
//! * [`propagation`] — wire carriers (W3C trace-context, B3 multi-header,
//!   Cloud Trace single-header) for [`trace::SpanContext`].
//! * [`context`] — the task-local execution context that carries the active
//!   tracer across thread and async boundaries.
//! * [`spool`] — the durable envelope queue contract consulted by exporters
//!   on retryable transmission failures.
//! * [`resource`] — monitored-resource identification with environment
//!   variable overrides.
//!
//! Telemetry failure must never affect the program being observed: exporter
//! and parse errors are logged through the internal diagnostics macros and
//! swallowed, never surfaced to instrumented code.
//!
//! # Getting started with tracing
//!
//! ```
//! use opencensus::trace::{InMemorySpanExporter, Sampler, SpanScope, TracerBuilder};
//! use std::sync::Arc;
//!
//! let exporter = Arc::new(InMemorySpanExporter::default());
//! let tracer = TracerBuilder::new(exporter.clone())
//!     .with_sampler(Sampler::AlwaysOn)
//!     .build();
//!
//! {
//!     let _scope = SpanScope::enter(tracer.as_ref(), "load-config");
//!     // traced work happens here; the span ends when the scope drops
//! }
//! tracer.finish();
//!
//! assert_eq!(exporter.emitted_spans().len(), 1);
//! ```
#![warn(missing_debug_implementations, missing_docs, unreachable_pub)]
#![cfg_attr(docsrs, feature(doc_cfg))]

#[macro_use]
mod macros;

pub mod context;
#[cfg(feature = "metrics")]
#[cfg_attr(docsrs, doc(cfg(feature = "metrics")))]
pub mod metrics;
#[cfg(feature = "trace")]
#[cfg_attr(docsrs, doc(cfg(feature = "trace")))]
pub mod propagation;
pub mod resource;
pub mod spool;
#[cfg(feature = "trace")]
#[cfg_attr(docsrs, doc(cfg(feature = "trace")))]
pub mod trace;

#[doc(hidden)]
#[cfg(feature = "internal-logs")]
pub mod _private {
    pub use tracing::{debug, error, info, warn};
}
