//! Distributed tracing: span recording, sampling, and export.
//!
//! A [`Tracer`] is built per unit of work by [`TracerBuilder`], usually from
//! a [`SpanContext`] extracted by one of the [`propagation`] formats. The
//! tracer keeps a stack of open spans; each finished span is snapshotted into
//! an immutable [`SpanData`] and handed to a [`SpanExporter`]. Production
//! exporters sit behind [`AsyncQueueExporter`] so recording never blocks on
//! export IO.
//!
//! [`propagation`]: crate::propagation

mod export;
mod in_memory_exporter;
mod sampler;
mod span;
mod span_context;
mod tracer;

pub use export::{
    AsyncQueueExporter, AsyncQueueExporterBuilder, SpanExporter, TraceError,
    DEFAULT_MAX_EXPORT_BATCH_SIZE, DEFAULT_MAX_QUEUE_SIZE, DEFAULT_SCHEDULED_DELAY,
};
pub use in_memory_exporter::InMemorySpanExporter;
pub use sampler::{Sampler, ShouldSample};
pub use span::{
    Annotation, AttributeValue, Attributes, BoundedList, Link, LinkType, MessageEvent, SpanData,
    SpanKind, StackFrame, StackTrace, Status, TruncatableString, MAX_ATTRIBUTE_STRING_LEN,
    MAX_SPAN_ANNOTATIONS, MAX_SPAN_ATTRIBUTES, MAX_SPAN_LINKS, MAX_SPAN_MESSAGE_EVENTS,
};
pub use span_context::{
    SpanContext, SpanId, TraceFlags, TraceId, TraceState, TraceStateError,
};
pub use tracer::{ContextTracer, NoopTracer, SpanScope, Tracer, TracerBuilder};
