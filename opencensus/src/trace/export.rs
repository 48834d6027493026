use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{sync_channel, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::context::ExecutionContext;
use crate::trace::span::SpanData;

/// Default bound on spans buffered ahead of the worker.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 2048;
/// Default bound on spans handed to the wrapped exporter at once.
pub const DEFAULT_MAX_EXPORT_BATCH_SIZE: usize = 512;
/// Default interval between exports of a partially filled batch.
pub const DEFAULT_SCHEDULED_DELAY: Duration = Duration::from_secs(5);

const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors from the span export pipeline.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TraceError {
    /// The exporter was already shut down.
    #[error("span exporter already shut down")]
    AlreadyShutdown,

    /// The worker thread is gone or its queue rejected the message.
    #[error("span export worker unavailable")]
    ChannelClosed,

    /// The worker did not acknowledge within the timeout.
    #[error("span export timed out after {0:?}")]
    Timeout(Duration),
}

/// Receives batches of finished spans.
///
/// `emit` must not block the caller for long; implementations doing network
/// IO should sit behind [`AsyncQueueExporter`].
pub trait SpanExporter: Send + Sync + fmt::Debug {
    /// Accepts a batch of finished spans. Errors are the implementation's to
    /// log; emitting never fails the instrumented application.
    fn emit(&self, batch: Vec<SpanData>);

    /// Releases any resources held by the exporter. Called at most once.
    fn shutdown(&self) {}
}

enum QueueMessage {
    Export(Vec<SpanData>),
    Flush(SyncSender<Result<(), TraceError>>),
    Shutdown(SyncSender<Result<(), TraceError>>),
}

/// Decorates a [`SpanExporter`] with a bounded queue and a dedicated worker
/// thread, so span recording never blocks on the wrapped exporter's IO.
///
/// Spans are delivered in batches of at most the configured batch size, at
/// least once per scheduled delay. When the queue is full, new spans are
/// dropped and counted; the first drop is logged and the total is logged at
/// shutdown. The worker wraps every delivery in an exporter scope so the
/// wrapped exporter's own clients are not instrumented.
pub struct AsyncQueueExporter {
    message_sender: SyncSender<QueueMessage>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
    is_shutdown: AtomicBool,
    dropped_span_count: Arc<AtomicUsize>,
}

impl AsyncQueueExporter {
    /// Wraps `exporter` with the default queue configuration.
    pub fn new(exporter: Arc<dyn SpanExporter>) -> Self {
        AsyncQueueExporter::builder(exporter).build()
    }

    /// Starts configuring the queue around `exporter`.
    pub fn builder(exporter: Arc<dyn SpanExporter>) -> AsyncQueueExporterBuilder {
        AsyncQueueExporterBuilder {
            exporter,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            max_export_batch_size: DEFAULT_MAX_EXPORT_BATCH_SIZE,
            scheduled_delay: DEFAULT_SCHEDULED_DELAY,
        }
    }

    /// Delivers everything buffered so far and waits for the worker's
    /// acknowledgement.
    pub fn flush(&self) -> Result<(), TraceError> {
        if self.is_shutdown.load(Ordering::Relaxed) {
            return Err(TraceError::AlreadyShutdown);
        }
        let (sender, receiver) = sync_channel(1);
        self.message_sender
            .try_send(QueueMessage::Flush(sender))
            .map_err(|_| TraceError::ChannelClosed)?;
        receiver
            .recv_timeout(WAIT_TIMEOUT)
            .map_err(|_| TraceError::Timeout(WAIT_TIMEOUT))?
    }

    fn shutdown_inner(&self) -> Result<(), TraceError> {
        if self.is_shutdown.swap(true, Ordering::Relaxed) {
            return Err(TraceError::AlreadyShutdown);
        }
        let dropped = self.dropped_span_count.load(Ordering::Relaxed);
        if dropped > 0 {
            oc_warn!(
                name: "AsyncQueueExporter.SpansDropped",
                dropped_spans = dropped
            );
        }
        let (sender, receiver) = sync_channel(1);
        self.message_sender
            .try_send(QueueMessage::Shutdown(sender))
            .map_err(|_| TraceError::ChannelClosed)?;
        let result = receiver
            .recv_timeout(WAIT_TIMEOUT)
            .map_err(|_| TraceError::Timeout(WAIT_TIMEOUT))?;
        if let Some(handle) = self
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            if handle.join().is_err() {
                return Err(TraceError::ChannelClosed);
            }
        }
        result
    }
}

impl fmt::Debug for AsyncQueueExporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncQueueExporter")
            .field("is_shutdown", &self.is_shutdown.load(Ordering::Relaxed))
            .field(
                "dropped_span_count",
                &self.dropped_span_count.load(Ordering::Relaxed),
            )
            .finish()
    }
}

impl SpanExporter for AsyncQueueExporter {
    fn emit(&self, batch: Vec<SpanData>) {
        if batch.is_empty() {
            return;
        }
        if self.is_shutdown.load(Ordering::Relaxed) {
            return;
        }
        match self.message_sender.try_send(QueueMessage::Export(batch)) {
            Ok(()) => {}
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => {
                // Log on the first drop only; the total is reported once at
                // shutdown.
                if self.dropped_span_count.fetch_add(1, Ordering::Relaxed) == 0 {
                    oc_warn!(
                        name: "AsyncQueueExporter.SpanDroppingStarted",
                        message = "span queue full, dropping spans until shutdown"
                    );
                }
            }
        }
    }

    fn shutdown(&self) {
        if let Err(err) = self.shutdown_inner() {
            oc_debug!(
                name: "AsyncQueueExporter.ShutdownFailed",
                reason = format!("{err}")
            );
        }
    }
}

/// Configures an [`AsyncQueueExporter`].
pub struct AsyncQueueExporterBuilder {
    exporter: Arc<dyn SpanExporter>,
    max_queue_size: usize,
    max_export_batch_size: usize,
    scheduled_delay: Duration,
}

impl AsyncQueueExporterBuilder {
    /// Bound on queued span batches awaiting the worker.
    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size.max(1);
        self
    }

    /// Bound on spans per delivery to the wrapped exporter.
    pub fn with_max_export_batch_size(mut self, size: usize) -> Self {
        self.max_export_batch_size = size.max(1);
        self
    }

    /// Interval after which a partially filled batch is delivered anyway.
    pub fn with_scheduled_delay(mut self, delay: Duration) -> Self {
        self.scheduled_delay = delay;
        self
    }

    /// Spawns the worker thread and returns the running queue.
    pub fn build(self) -> AsyncQueueExporter {
        let AsyncQueueExporterBuilder {
            exporter,
            max_queue_size,
            max_export_batch_size,
            scheduled_delay,
        } = self;
        let (message_sender, message_receiver) = sync_channel(max_queue_size);

        let handle = thread::Builder::new()
            .name("OpencensusSpanQueue".to_string())
            .spawn(move || {
                let mut buffer: Vec<SpanData> = Vec::new();
                let mut last_export_time = Instant::now();

                let deliver = |buffer: &mut Vec<SpanData>| {
                    while !buffer.is_empty() {
                        let take = buffer.len().min(max_export_batch_size);
                        let batch: Vec<SpanData> = buffer.drain(..take).collect();
                        let _scope = ExecutionContext::enter_exporter_scope();
                        exporter.emit(batch);
                    }
                };

                loop {
                    let timeout = scheduled_delay.saturating_sub(last_export_time.elapsed());
                    match message_receiver.recv_timeout(timeout) {
                        Ok(QueueMessage::Export(batch)) => {
                            buffer.extend(batch);
                            if buffer.len() >= max_export_batch_size
                                || last_export_time.elapsed() >= scheduled_delay
                            {
                                deliver(&mut buffer);
                                last_export_time = Instant::now();
                            }
                        }
                        Ok(QueueMessage::Flush(sender)) => {
                            deliver(&mut buffer);
                            last_export_time = Instant::now();
                            let _ = sender.send(Ok(()));
                        }
                        Ok(QueueMessage::Shutdown(sender)) => {
                            deliver(&mut buffer);
                            exporter.shutdown();
                            let _ = sender.send(Ok(()));
                            break;
                        }
                        Err(RecvTimeoutError::Timeout) => {
                            if last_export_time.elapsed() >= scheduled_delay {
                                deliver(&mut buffer);
                                last_export_time = Instant::now();
                            }
                        }
                        Err(RecvTimeoutError::Disconnected) => {
                            deliver(&mut buffer);
                            break;
                        }
                    }
                }
            });

        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(err) => {
                oc_error!(
                    name: "AsyncQueueExporter.SpawnFailed",
                    reason = format!("{err}")
                );
                None
            }
        };

        AsyncQueueExporter {
            message_sender,
            handle: Mutex::new(handle),
            is_shutdown: AtomicBool::new(false),
            dropped_span_count: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::in_memory_exporter::InMemorySpanExporter;
    use crate::trace::span::Span;
    use crate::trace::span_context::{SpanId, TraceId, TraceState};

    fn span_data(name: &str) -> SpanData {
        let mut span = Span::new(name, SpanId::random(), None);
        span.end();
        span.snapshot(TraceId::random(), &TraceState::NONE)
    }

    #[test]
    fn flush_delivers_buffered_spans() {
        let inner = Arc::new(InMemorySpanExporter::default());
        let queue = AsyncQueueExporter::builder(inner.clone())
            .with_scheduled_delay(Duration::from_secs(60))
            .build();
        queue.emit(vec![span_data("a"), span_data("b")]);
        queue.flush().unwrap();
        assert_eq!(inner.emitted_spans().len(), 2);
        queue.shutdown();
    }

    #[test]
    fn shutdown_delivers_and_is_idempotent() {
        let inner = Arc::new(InMemorySpanExporter::default());
        let queue = AsyncQueueExporter::builder(inner.clone())
            .with_scheduled_delay(Duration::from_secs(60))
            .build();
        queue.emit(vec![span_data("a")]);
        queue.shutdown_inner().unwrap();
        assert_eq!(inner.emitted_spans().len(), 1);
        assert!(matches!(
            queue.shutdown_inner(),
            Err(TraceError::AlreadyShutdown)
        ));
        // Emitting after shutdown drops silently.
        queue.emit(vec![span_data("late")]);
        assert_eq!(inner.emitted_spans().len(), 1);
    }

    #[test]
    fn full_batch_is_delivered_without_waiting_for_the_timer() {
        let inner = Arc::new(InMemorySpanExporter::default());
        let queue = AsyncQueueExporter::builder(inner.clone())
            .with_max_export_batch_size(2)
            .with_scheduled_delay(Duration::from_secs(60))
            .build();
        queue.emit(vec![span_data("a"), span_data("b"), span_data("c")]);
        let deadline = Instant::now() + Duration::from_secs(2);
        while inner.emitted_spans().len() < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(inner.emitted_spans().len() >= 2);
        queue.shutdown();
    }
}
