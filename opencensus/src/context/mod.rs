//! Task-local execution context.
//!
//! The execution context is the slot that carries the currently active
//! [`Tracer`] and a small bag of ad-hoc attributes across API boundaries.
//! Adapters that cross task boundaries (thread pools, async tasks, worker
//! queues) capture the current snapshot at submission time and restore it at
//! task start via [`ExecutionContext::wrap`] or the [`FutureContextExt`]
//! wrapper; the restored context is cleared again when the wrapped unit of
//! work completes.
//!
//! Exporters run their transmissions inside
//! [`ExecutionContext::enter_exporter_scope`] so that instrumented HTTP or
//! gRPC clients used for the export itself do not recursively create spans.
//!
//! [`Tracer`]: crate::trace::Tracer

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

#[cfg(feature = "trace")]
use crate::trace::Tracer;

mod future_ext;

pub use future_ext::{FutureContextExt, SinkContextExt, StreamContextExt, WithContext};

thread_local! {
    static CURRENT_CONTEXT: RefCell<ContextStack> = RefCell::new(ContextStack::default());
}

/// Host names that middleware adapters should not trace, stored as a
/// comma-separated attribute value.
pub const BLACKLIST_HOSTNAMES_ATTR: &str = "blacklist_hostnames";

/// An immutable snapshot of the values scoped to the current execution unit.
///
/// Snapshots are cheap to clone; write operations return a new snapshot with
/// the requested change, leaving the original untouched. A snapshot becomes
/// the current context for a scope via [`attach`], and the previous context
/// is restored when the returned [`ContextGuard`] drops.
///
/// [`attach`]: ExecutionContext::attach
#[derive(Clone, Default)]
pub struct ExecutionContext {
    #[cfg(feature = "trace")]
    tracer: Option<Arc<dyn Tracer>>,
    attrs: Option<Arc<HashMap<String, String>>>,
    is_exporter: bool,
}

impl ExecutionContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        ExecutionContext::default()
    }

    /// Returns a snapshot of the current thread's context.
    pub fn current() -> Self {
        Self::map_current(|cx| cx.clone())
    }

    /// Applies a function to the current context without cloning it.
    pub fn map_current<T>(f: impl FnOnce(&ExecutionContext) -> T) -> T {
        CURRENT_CONTEXT.with(|cx| cx.borrow().map_current_cx(f))
    }

    /// The tracer installed in this context, if any.
    #[cfg(feature = "trace")]
    #[cfg_attr(docsrs, doc(cfg(feature = "trace")))]
    pub fn tracer(&self) -> Option<Arc<dyn Tracer>> {
        self.tracer.clone()
    }

    /// Returns the tracer installed in the current thread's context.
    #[cfg(feature = "trace")]
    #[cfg_attr(docsrs, doc(cfg(feature = "trace")))]
    pub fn current_tracer() -> Option<Arc<dyn Tracer>> {
        Self::map_current(|cx| cx.tracer.clone())
    }

    /// Returns a copy of this context with the given tracer installed.
    #[cfg(feature = "trace")]
    #[cfg_attr(docsrs, doc(cfg(feature = "trace")))]
    pub fn with_tracer(&self, tracer: Arc<dyn Tracer>) -> Self {
        ExecutionContext {
            tracer: Some(tracer),
            attrs: self.attrs.clone(),
            is_exporter: self.is_exporter,
        }
    }

    /// Returns a copy of this context with the given attribute set.
    pub fn with_attr(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut attrs = self
            .attrs
            .as_deref()
            .cloned()
            .unwrap_or_default();
        attrs.insert(key.into(), value.into());
        ExecutionContext {
            #[cfg(feature = "trace")]
            tracer: self.tracer.clone(),
            attrs: Some(Arc::new(attrs)),
            is_exporter: self.is_exporter,
        }
    }

    /// Looks up an ad-hoc attribute by key.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.as_ref()?.get(key).map(String::as_str)
    }

    /// Returns whether this context belongs to an exporter's own transmission
    /// work, in which case instrumentation should be suppressed.
    #[inline]
    pub fn is_exporter(&self) -> bool {
        self.is_exporter
    }

    /// Returns whether the current thread's context suppresses
    /// instrumentation.
    #[inline]
    pub fn is_current_exporter() -> bool {
        Self::map_current(|cx| cx.is_exporter)
    }

    /// Returns a copy of this context flagged as exporter-internal.
    pub fn with_exporter_flag(&self) -> Self {
        ExecutionContext {
            #[cfg(feature = "trace")]
            tracer: self.tracer.clone(),
            attrs: self.attrs.clone(),
            is_exporter: true,
        }
    }

    /// Enters a scope in which instrumentation is suppressed.
    ///
    /// Export workers wrap each transmission in this scope so that clients
    /// they use internally skip creating spans for the export traffic itself,
    /// which would otherwise feed back into the pipeline indefinitely.
    pub fn enter_exporter_scope() -> ContextGuard {
        Self::map_current(|cx| cx.with_exporter_flag()).attach()
    }

    /// Replaces the current context on this thread with this snapshot.
    ///
    /// Dropping the returned [`ContextGuard`] restores the previous context.
    pub fn attach(self) -> ContextGuard {
        let pos = CURRENT_CONTEXT.with(|cx| cx.borrow_mut().push(self));

        ContextGuard {
            cx_pos: pos,
            _marker: PhantomData,
        }
    }

    /// Captures the current context and returns a closure that installs it
    /// for the duration of `f`, clearing it again afterwards.
    ///
    /// This is the submission-side half of crossing a task boundary: wrap the
    /// callable before handing it to a thread pool or worker queue.
    ///
    /// ```
    /// use opencensus::context::ExecutionContext;
    ///
    /// let cx = ExecutionContext::current().with_attr("component", "worker");
    /// let task = {
    ///     let _guard = cx.attach();
    ///     ExecutionContext::wrap(|| ExecutionContext::current().attr("component").is_some())
    /// };
    /// assert!(std::thread::spawn(task).join().unwrap());
    /// ```
    pub fn wrap<F, R>(f: F) -> impl FnOnce() -> R
    where
        F: FnOnce() -> R,
    {
        let captured = ExecutionContext::current();
        move || {
            let _guard = captured.attach();
            f()
        }
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("ExecutionContext");

        #[cfg(feature = "trace")]
        dbg.field("has_tracer", &self.tracer.is_some());

        dbg.field("attrs", &self.attrs.as_ref().map_or(0, |a| a.len()))
            .field("is_exporter", &self.is_exporter)
            .finish()
    }
}

/// A guard that resets the current context to the prior context when dropped.
#[derive(Debug)]
pub struct ContextGuard {
    // Position of the replaced context in the stack, used to pop it.
    cx_pos: u16,
    // Relies on thread locals, so must not be Send.
    _marker: PhantomData<*const ()>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let pos = self.cx_pos;
        if pos > ContextStack::BASE_POS && pos < ContextStack::MAX_POS {
            CURRENT_CONTEXT.with(|stack| stack.borrow_mut().pop_pos(pos));
        }
    }
}

/// Stack of contexts attached to the current thread.
///
/// Guards may be dropped out of order; only popping the top of the stack
/// actually restores a previous context, earlier positions are tombstoned
/// until the stack shrinks past them.
struct ContextStack {
    current_cx: ExecutionContext,
    stack: Vec<Option<ExecutionContext>>,
    _marker: PhantomData<*const ()>,
}

impl ContextStack {
    const BASE_POS: u16 = 0;
    const MAX_POS: u16 = u16::MAX;
    const INITIAL_CAPACITY: usize = 8;

    #[inline(always)]
    fn push(&mut self, cx: ExecutionContext) -> u16 {
        let next_pos = self.stack.len() + 1;
        if next_pos < ContextStack::MAX_POS.into() {
            let current_cx = std::mem::replace(&mut self.current_cx, cx);
            self.stack.push(Some(current_cx));
            next_pos as u16
        } else {
            oc_warn!(
                name: "ExecutionContext.AttachFailed",
                message = format!(
                    "Too many attached contexts, max is {}. The current context is unchanged \
                     and dropping the returned guard will have no effect.",
                    ContextStack::MAX_POS
                )
            );
            ContextStack::MAX_POS
        }
    }

    #[inline(always)]
    fn pop_pos(&mut self, pos: u16) {
        if pos == ContextStack::BASE_POS || pos == ContextStack::MAX_POS {
            return;
        }
        let len: u16 = self.stack.len() as u16;
        if pos == len {
            // Shrink past any out of order pops before restoring.
            while let Some(None) = self.stack.last() {
                _ = self.stack.pop();
            }
            if let Some(Some(next_cx)) = self.stack.pop() {
                self.current_cx = next_cx;
            }
        } else {
            if pos >= len {
                oc_warn!(
                    name: "ExecutionContext.PopOutOfBounds",
                    position = pos,
                    stack_length = len
                );
                return;
            }
            _ = self.stack[pos as usize].take();
        }
    }

    #[inline(always)]
    fn map_current_cx<T>(&self, f: impl FnOnce(&ExecutionContext) -> T) -> T {
        f(&self.current_cx)
    }
}

impl Default for ContextStack {
    fn default() -> Self {
        ContextStack {
            current_cx: ExecutionContext::default(),
            stack: Vec::with_capacity(ContextStack::INITIAL_CAPACITY),
            _marker: PhantomData,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_and_restore() {
        assert!(ExecutionContext::current().attr("k").is_none());
        {
            let _guard = ExecutionContext::current().with_attr("k", "v").attach();
            assert_eq!(ExecutionContext::current().attr("k"), Some("v"));
            {
                let _inner = ExecutionContext::current().with_attr("k2", "v2").attach();
                assert_eq!(ExecutionContext::current().attr("k"), Some("v"));
                assert_eq!(ExecutionContext::current().attr("k2"), Some("v2"));
            }
            assert!(ExecutionContext::current().attr("k2").is_none());
        }
        assert!(ExecutionContext::current().attr("k").is_none());
    }

    #[test]
    fn out_of_order_guard_drop() {
        let outer = ExecutionContext::current().with_attr("pos", "outer").attach();
        let inner = ExecutionContext::current().with_attr("pos", "inner").attach();
        drop(outer);
        // Inner is still the current context even though outer dropped first.
        assert_eq!(ExecutionContext::current().attr("pos"), Some("inner"));
        drop(inner);
        assert!(ExecutionContext::current().attr("pos").is_none());
    }

    #[test]
    fn exporter_scope_suppresses() {
        assert!(!ExecutionContext::is_current_exporter());
        {
            let _guard = ExecutionContext::enter_exporter_scope();
            assert!(ExecutionContext::is_current_exporter());
        }
        assert!(!ExecutionContext::is_current_exporter());
    }

    #[test]
    fn wrap_carries_context_across_threads() {
        let _guard = ExecutionContext::current()
            .with_attr(BLACKLIST_HOSTNAMES_ATTR, "localhost:8080")
            .attach();
        let task = ExecutionContext::wrap(|| {
            ExecutionContext::current()
                .attr(BLACKLIST_HOSTNAMES_ATTR)
                .map(str::to_owned)
        });
        let seen = std::thread::spawn(task).join().unwrap();
        assert_eq!(seen.as_deref(), Some("localhost:8080"));
    }

    #[test]
    fn wrapped_task_clears_context_at_end() {
        let task = {
            let _guard = ExecutionContext::current().with_attr("k", "v").attach();
            ExecutionContext::wrap(|| assert_eq!(ExecutionContext::current().attr("k"), Some("v")))
        };
        std::thread::spawn(move || {
            task();
            // The captured context does not leak past the wrapped call.
            assert!(ExecutionContext::current().attr("k").is_none());
        })
        .join()
        .unwrap();
    }
}
