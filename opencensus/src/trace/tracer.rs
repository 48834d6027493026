use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use crate::context::ExecutionContext;
use crate::trace::export::SpanExporter;
use crate::trace::sampler::{Sampler, ShouldSample};
use crate::trace::span::{
    Annotation, AttributeValue, Attributes, Link, MessageEvent, Span, SpanKind, StackTrace, Status,
};
use crate::trace::span_context::{SpanContext, SpanId};

/// Records spans for one trace.
///
/// A tracer owns a [`SpanContext`] and a stack of open spans; all recording
/// operations act on the span at the top of the stack. Tracers are built per
/// unit of work (typically per inbound request) by [`TracerBuilder`], which
/// consults the sampler once and hands back either a recording tracer or a
/// structural no-op.
pub trait Tracer: Send + Sync + fmt::Debug {
    /// A snapshot of the tracer's span context, reflecting the currently
    /// active span.
    fn span_context(&self) -> SpanContext;

    /// Opens a new span as a child of the currently active span (or of the
    /// propagated remote parent for the first span) and makes it active.
    fn start_span(&self, name: &str) -> SpanId;

    /// Closes the active span, restores its parent as active, and hands the
    /// finished span to the exporter. Without an open span this logs and does
    /// nothing.
    fn end_span(&self);

    /// The id of the currently active span, if any.
    fn current_span_id(&self) -> Option<SpanId>;

    /// Sets an attribute on the active span.
    fn add_attribute(&self, key: &str, value: AttributeValue);

    /// Records a time-stamped annotation on the active span.
    fn add_annotation(&self, description: &str, attributes: Attributes);

    /// Records a message event on the active span.
    fn add_message_event(&self, event: MessageEvent);

    /// Records a link on the active span.
    fn add_link(&self, link: Link);

    /// Sets the status of the active span.
    fn set_status(&self, status: Status);

    /// Sets the kind of the active span.
    fn set_span_kind(&self, kind: SpanKind);

    /// Attaches a captured call stack to the active span.
    fn set_stack_trace(&self, stack_trace: StackTrace);

    /// Closes every span still open, logging how many were left behind.
    /// Called when the unit of work completes.
    fn finish(&self);
}

/// The recording tracer: keeps the open-span stack and exports each span as
/// it ends.
pub struct ContextTracer {
    exporter: Arc<dyn SpanExporter>,
    inner: Mutex<TracerInner>,
    remote_parent: bool,
}

struct TracerInner {
    span_context: SpanContext,
    stack: Vec<Span>,
}

impl ContextTracer {
    fn new(exporter: Arc<dyn SpanExporter>, span_context: SpanContext) -> Self {
        let remote_parent = span_context.from_header() && span_context.span_id().is_some();
        ContextTracer {
            exporter,
            inner: Mutex::new(TracerInner {
                span_context,
                stack: Vec::new(),
            }),
            remote_parent,
        }
    }

    fn lock(&self) -> MutexGuard<'_, TracerInner> {
        // A panic while the lock is held leaves only span bookkeeping behind;
        // recover the data rather than propagating the poison.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_current_span(&self, op_name: &'static str, f: impl FnOnce(&mut Span)) {
        let mut inner = self.lock();
        match inner.stack.last_mut() {
            Some(span) => f(span),
            None => {
                oc_warn!(name: "ContextTracer.NoActiveSpan", operation = op_name);
            }
        }
    }
}

impl fmt::Debug for ContextTracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("ContextTracer")
            .field("trace_id", &inner.span_context.trace_id())
            .field("open_spans", &inner.stack.len())
            .field("remote_parent", &self.remote_parent)
            .finish()
    }
}

impl Tracer for ContextTracer {
    fn span_context(&self) -> SpanContext {
        self.lock().span_context.clone()
    }

    fn start_span(&self, name: &str) -> SpanId {
        let mut inner = self.lock();
        let parent_span_id = inner
            .stack
            .last()
            .map(Span::span_id)
            .or_else(|| inner.span_context.span_id());
        let span_id = SpanId::random();
        let mut span = Span::new(name, span_id, parent_span_id);
        span.same_process_as_parent_span = match parent_span_id {
            None => None,
            // Only the first local span can have the remote parent.
            Some(_) => Some(!(inner.stack.is_empty() && self.remote_parent)),
        };
        if let Some(parent) = inner.stack.last_mut() {
            parent.child_span_count = parent.child_span_count.saturating_add(1);
        }
        inner.span_context.set_span_id(Some(span_id));
        inner.stack.push(span);
        span_id
    }

    fn end_span(&self) {
        let mut inner = self.lock();
        let Some(mut span) = inner.stack.pop() else {
            oc_warn!(name: "ContextTracer.EndSpanWithoutStart");
            return;
        };
        span.end();
        let data = span.snapshot(inner.span_context.trace_id(), inner.span_context.trace_state());
        // The parent is active again; for the first local span this restores
        // the propagated remote span id.
        inner.span_context.set_span_id(span.parent_span_id());
        drop(inner);
        self.exporter.emit(vec![data]);
    }

    fn current_span_id(&self) -> Option<SpanId> {
        self.lock().stack.last().map(Span::span_id)
    }

    fn add_attribute(&self, key: &str, value: AttributeValue) {
        self.with_current_span("add_attribute", |span| span.attributes.set(key, value));
    }

    fn add_annotation(&self, description: &str, attributes: Attributes) {
        self.with_current_span("add_annotation", |span| {
            span.annotations.push(Annotation {
                description: description.into(),
                attributes,
                timestamp: SystemTime::now(),
            });
        });
    }

    fn add_message_event(&self, event: MessageEvent) {
        self.with_current_span("add_message_event", |span| span.message_events.push(event));
    }

    fn add_link(&self, link: Link) {
        self.with_current_span("add_link", |span| span.links.push(link));
    }

    fn set_status(&self, status: Status) {
        self.with_current_span("set_status", |span| span.status = Some(status));
    }

    fn set_span_kind(&self, kind: SpanKind) {
        self.with_current_span("set_span_kind", |span| span.span_kind = kind);
    }

    fn set_stack_trace(&self, stack_trace: StackTrace) {
        self.with_current_span("set_stack_trace", |span| span.stack_trace = Some(stack_trace));
    }

    fn finish(&self) {
        let open = self.lock().stack.len();
        if open > 0 {
            oc_warn!(name: "ContextTracer.FinishWithOpenSpans", open_spans = open);
        }
        for _ in 0..open {
            self.end_span();
        }
    }
}

/// A tracer that records nothing but still tracks structural span nesting, so
/// code written against [`Tracer`] behaves identically whether or not the
/// trace is sampled.
#[derive(Debug)]
pub struct NoopTracer {
    span_context: SpanContext,
    depth: AtomicUsize,
}

impl NoopTracer {
    /// A no-op tracer carrying the given (unsampled) span context, so that
    /// outbound propagation still emits the trace identity.
    pub fn new(span_context: SpanContext) -> Self {
        NoopTracer {
            span_context,
            depth: AtomicUsize::new(0),
        }
    }
}

impl Default for NoopTracer {
    fn default() -> Self {
        NoopTracer::new(SpanContext::generate())
    }
}

impl Tracer for NoopTracer {
    fn span_context(&self) -> SpanContext {
        self.span_context.clone()
    }

    fn start_span(&self, _name: &str) -> SpanId {
        self.depth.fetch_add(1, Ordering::Relaxed);
        SpanId::INVALID
    }

    fn end_span(&self) {
        let _ = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| d.checked_sub(1));
    }

    fn current_span_id(&self) -> Option<SpanId> {
        None
    }

    fn add_attribute(&self, _key: &str, _value: AttributeValue) {}

    fn add_annotation(&self, _description: &str, _attributes: Attributes) {}

    fn add_message_event(&self, _event: MessageEvent) {}

    fn add_link(&self, _link: Link) {}

    fn set_status(&self, _status: Status) {}

    fn set_span_kind(&self, _kind: SpanKind) {}

    fn set_stack_trace(&self, _stack_trace: StackTrace) {}

    fn finish(&self) {
        self.depth.store(0, Ordering::Relaxed);
    }
}

/// Builds a tracer for one unit of work, consulting the sampler exactly once.
#[derive(Debug)]
pub struct TracerBuilder {
    exporter: Arc<dyn SpanExporter>,
    sampler: Arc<dyn ShouldSample>,
    span_context: Option<SpanContext>,
}

impl TracerBuilder {
    /// Starts a builder sending finished spans to `exporter`, with the
    /// default probability sampler.
    pub fn new(exporter: Arc<dyn SpanExporter>) -> Self {
        TracerBuilder {
            exporter,
            sampler: Arc::new(Sampler::default()),
            span_context: None,
        }
    }

    /// Replaces the sampling policy.
    pub fn with_sampler(mut self, sampler: impl ShouldSample + 'static) -> Self {
        self.sampler = Arc::new(sampler);
        self
    }

    /// Uses a propagated span context instead of generating a fresh one.
    pub fn with_span_context(mut self, span_context: SpanContext) -> Self {
        self.span_context = Some(span_context);
        self
    }

    /// Builds the tracer.
    ///
    /// A sampled inbound context forces recording on regardless of the local
    /// sampler. When the calling context is an exporter's own transmission
    /// work, a no-op tracer is returned unconditionally so export traffic is
    /// never traced.
    pub fn build(self) -> Arc<dyn Tracer> {
        let mut span_context = self.span_context.unwrap_or_default();
        if ExecutionContext::is_current_exporter() {
            span_context.set_sampled(false);
            return Arc::new(NoopTracer::new(span_context));
        }
        let forced = span_context.from_header() && span_context.is_sampled();
        let sampled = forced
            || self
                .sampler
                .should_sample(span_context.trace_id(), span_context.is_sampled());
        span_context.set_sampled(sampled);
        if sampled {
            Arc::new(ContextTracer::new(self.exporter, span_context))
        } else {
            Arc::new(NoopTracer::new(span_context))
        }
    }
}

/// Guard that opens a span on creation and ends it when dropped.
#[derive(Debug)]
pub struct SpanScope<'a> {
    tracer: &'a dyn Tracer,
    span_id: SpanId,
}

impl<'a> SpanScope<'a> {
    /// Opens a span named `name` on `tracer` and returns the guard ending it.
    pub fn enter(tracer: &'a dyn Tracer, name: &str) -> Self {
        let span_id = tracer.start_span(name);
        SpanScope { tracer, span_id }
    }

    /// The id of the span this scope opened.
    pub fn span_id(&self) -> SpanId {
        self.span_id
    }
}

impl Drop for SpanScope<'_> {
    fn drop(&mut self) {
        self.tracer.end_span();
    }
}
