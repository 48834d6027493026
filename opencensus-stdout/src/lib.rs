//! Line-delimited JSON exporters for the opencensus pipeline.
//!
//! Each finished span and each exported metric becomes one JSON object on
//! its own line, written to stdout by default or to any [`std::io::Write`]
//! sink. Useful for local development and as the reference implementation of
//! the exporter seams.
//!
//! # Examples
//!
//! ```no_run
//! # #[cfg(all(feature = "trace", feature = "metrics"))]
//! # {
//! use std::sync::Arc;
//!
//! use opencensus::metrics::{MetricProducerManager, PeriodicExporter};
//! use opencensus::trace::{SpanScope, TracerBuilder};
//!
//! let span_exporter = Arc::new(opencensus_stdout::SpanExporter::default());
//! let tracer = TracerBuilder::new(span_exporter).build();
//! {
//!     let _scope = SpanScope::enter(tracer.as_ref(), "handle-request");
//! }
//! tracer.finish();
//!
//! let manager = Arc::new(MetricProducerManager::new());
//! let metrics_exporter = Arc::new(opencensus_stdout::MetricsExporter::default());
//! let worker = PeriodicExporter::new(&manager, metrics_exporter);
//!
//! // finished spans and metric snapshots now appear on stdout:
//! // {"traceId":"6e0c63257de34c92bf9efcd03927272e","spanId":"00f067aa0ba902b7",...
//! // {"descriptor":{"name":"rpc_count","unit":"1",...
//! # worker.stop();
//! # }
//! ```
#![warn(missing_debug_implementations, missing_docs, unreachable_pub)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub(crate) mod common;

#[cfg(feature = "metrics")]
mod metrics;
#[cfg_attr(docsrs, doc(cfg(feature = "metrics")))]
#[cfg(feature = "metrics")]
pub use metrics::*;

#[cfg(feature = "trace")]
mod trace;
#[cfg_attr(docsrs, doc(cfg(feature = "trace")))]
#[cfg(feature = "trace")]
pub use trace::*;
