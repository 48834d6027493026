use crate::context::ExecutionContext;
use futures_core::Stream;
use futures_sink::Sink;
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::Context as TaskContext;
use std::task::Poll;

pin_project! {
    /// A future, stream, or sink with an associated [`ExecutionContext`] that
    /// is attached on every poll.
    #[derive(Clone, Debug)]
    pub struct WithContext<T> {
        #[pin]
        inner: T,
        cx: ExecutionContext,
    }
}

impl<T: std::future::Future> std::future::Future for WithContext<T> {
    type Output = T::Output;

    fn poll(self: Pin<&mut Self>, task_cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let _guard = this.cx.clone().attach();

        this.inner.poll(task_cx)
    }
}

impl<T: Stream> Stream for WithContext<T> {
    type Item = T::Item;

    fn poll_next(self: Pin<&mut Self>, task_cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        let _guard = this.cx.clone().attach();
        T::poll_next(this.inner, task_cx)
    }
}

impl<I, T: Sink<I>> Sink<I> for WithContext<T> {
    type Error = T::Error;

    fn poll_ready(
        self: Pin<&mut Self>,
        task_cx: &mut TaskContext<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        let this = self.project();
        let _guard = this.cx.clone().attach();
        T::poll_ready(this.inner, task_cx)
    }

    fn start_send(self: Pin<&mut Self>, item: I) -> Result<(), Self::Error> {
        let this = self.project();
        let _guard = this.cx.clone().attach();
        T::start_send(this.inner, item)
    }

    fn poll_flush(
        self: Pin<&mut Self>,
        task_cx: &mut TaskContext<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        let this = self.project();
        let _guard = this.cx.clone().attach();
        T::poll_flush(this.inner, task_cx)
    }

    fn poll_close(
        self: Pin<&mut Self>,
        task_cx: &mut TaskContext<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        let this = self.project();
        let _guard = this.cx.clone().attach();
        T::poll_close(this.inner, task_cx)
    }
}

impl<F: std::future::Future> FutureContextExt for F {}
/// Extension trait attaching an execution context to futures.
pub trait FutureContextExt: Sized {
    /// Attaches the provided context to this future; it becomes the current
    /// context whenever the future is polled.
    fn with_context(self, cx: ExecutionContext) -> WithContext<Self> {
        WithContext { inner: self, cx }
    }

    /// Attaches the current context to this future.
    ///
    /// This is the async half of capture-and-restore: call at submission time
    /// so the task observes the submitter's tracer and attributes.
    fn with_current_context(self) -> WithContext<Self> {
        let cx = ExecutionContext::current();
        self.with_context(cx)
    }
}

impl<S: Stream> StreamContextExt for S {}
/// Extension trait attaching an execution context to streams.
pub trait StreamContextExt: Sized {
    /// Attaches the provided context to this stream; it becomes the current
    /// context whenever the stream is polled.
    fn with_context(self, cx: ExecutionContext) -> WithContext<Self> {
        WithContext { inner: self, cx }
    }

    /// Attaches the current context to this stream.
    fn with_current_context(self) -> WithContext<Self> {
        let cx = ExecutionContext::current();
        self.with_context(cx)
    }
}

impl<_I, S: Sink<_I>> SinkContextExt<_I> for S {}
/// Extension trait attaching an execution context to sinks.
///
/// The generic argument is unused.
pub trait SinkContextExt<_I>: Sized {
    /// Attaches the provided context to this sink; it becomes the current
    /// context whenever the sink is polled.
    fn with_context(self, cx: ExecutionContext) -> WithContext<Self> {
        WithContext { inner: self, cx }
    }

    /// Attaches the current context to this sink.
    fn with_current_context(self) -> WithContext<Self> {
        let cx = ExecutionContext::current();
        self.with_context(cx)
    }
}
