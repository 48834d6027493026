//! Durable envelope queue for retryable export failures.
//!
//! An exporter that fails to transmit a batch hands its envelopes to a
//! [`LocalSpool`] with a retry-after delay. A [`SpoolDrain`] worker later
//! leases each stored blob, retries transmission through a [`Transmitter`],
//! and deletes the blob on success or on a non-retryable verdict. The spool
//! storage itself (disk layout, encryption) is an implementation concern
//! behind the trait; [`InMemorySpool`] backs tests.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::context::ExecutionContext;

/// Default interval between drain cycles.
pub const DEFAULT_DRAIN_INTERVAL: Duration = Duration::from_secs(30);

/// Default lease taken on a blob while retrying it.
pub const DEFAULT_LEASE_PERIOD: Duration = Duration::from_secs(60);

const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Result type for spool operations.
pub type SpoolResult<T> = Result<T, SpoolError>;

/// Errors from spool storage.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SpoolError {
    /// The blob is gone, deleted by another worker or expired.
    #[error("spooled blob no longer exists")]
    Missing,

    /// The underlying storage failed.
    #[error("spool storage failed: {0}")]
    Storage(String),
}

/// One serialized telemetry item awaiting (re)transmission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    /// Item type name, telling the backend how to decode the payload.
    pub name: String,
    /// Serialized payload bytes.
    pub payload: Vec<u8>,
}

/// Outcome of one transmission attempt.
///
/// Replaces the loose integer convention (zero success, positive
/// seconds-to-retry, negative failure code) with an explicit sum type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transmission {
    /// The batch was accepted; delete the blob.
    Success,
    /// Transient failure; leave the blob and retry after the delay.
    Retry(Duration),
    /// Permanent failure with a status code; delete the blob and count it.
    Drop(i32),
}

/// Sends a batch of envelopes to a backend.
pub trait Transmitter: Send + Sync + fmt::Debug {
    /// Attempts one transmission, returning the verdict.
    fn transmit(&self, envelopes: &[Envelope]) -> Transmission;
}

/// A stored batch of envelopes, leased while a worker retries it.
pub trait Blob: Send + Sync + fmt::Debug {
    /// Takes an exclusive lease for `period`. Returns `false` when another
    /// worker holds the lease.
    fn lease(&self, period: Duration) -> bool;

    /// Reads the stored envelopes.
    fn get(&self) -> SpoolResult<Vec<Envelope>>;

    /// Deletes the blob. Deleting an already-deleted blob is a no-op.
    fn delete(&self);
}

/// Persisted envelope queue consulted by exporters on retryable failure.
pub trait LocalSpool: Send + Sync + fmt::Debug {
    /// Stores a batch, to become available for draining after `retry_after`.
    fn put(&self, envelopes: Vec<Envelope>, retry_after: Duration) -> SpoolResult<()>;

    /// The blobs currently available for draining: ready and unleased.
    fn gets(&self) -> Vec<Box<dyn Blob>>;
}

enum DrainMessage {
    Drain(SyncSender<()>),
    Stop(SyncSender<()>),
}

/// Background worker that retries spooled envelopes.
///
/// Holds weak references to the spool and the transmitter, like the metric
/// export worker: when either is dropped, the drain stops on its next cycle.
#[derive(Debug)]
pub struct SpoolDrain {
    message_sender: SyncSender<DrainMessage>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
    is_stopped: AtomicBool,
}

impl SpoolDrain {
    /// Starts a drain worker with the default interval and lease period.
    pub fn new(spool: &Arc<dyn LocalSpool>, transmitter: &Arc<dyn Transmitter>) -> Self {
        SpoolDrain::builder(spool, transmitter).build()
    }

    /// Starts configuring a drain worker.
    pub fn builder(
        spool: &Arc<dyn LocalSpool>,
        transmitter: &Arc<dyn Transmitter>,
    ) -> SpoolDrainBuilder {
        SpoolDrainBuilder {
            spool: Arc::downgrade(spool),
            transmitter: Arc::downgrade(transmitter),
            interval: DEFAULT_DRAIN_INTERVAL,
            lease_period: DEFAULT_LEASE_PERIOD,
        }
    }

    /// Runs one drain cycle now and waits for it to complete.
    pub fn drain(&self) {
        if self.is_stopped.load(Ordering::Relaxed) {
            return;
        }
        let (ack, done) = sync_channel(1);
        if self.message_sender.try_send(DrainMessage::Drain(ack)).is_ok() {
            let _ = done.recv_timeout(WAIT_TIMEOUT);
        }
    }

    /// Stops the worker after the current cycle and joins its thread.
    /// Idempotent.
    pub fn stop(&self) {
        if self.is_stopped.swap(true, Ordering::Relaxed) {
            return;
        }
        let (ack, done) = sync_channel(1);
        if self.message_sender.try_send(DrainMessage::Stop(ack)).is_ok() {
            let _ = done.recv_timeout(WAIT_TIMEOUT);
        }
        if let Some(handle) = self
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            let _ = handle.join();
        }
    }
}

/// Configures a [`SpoolDrain`].
#[derive(Debug)]
pub struct SpoolDrainBuilder {
    spool: Weak<dyn LocalSpool>,
    transmitter: Weak<dyn Transmitter>,
    interval: Duration,
    lease_period: Duration,
}

impl SpoolDrainBuilder {
    /// Interval between drain cycles.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Lease taken on each blob while it is being retried.
    pub fn with_lease_period(mut self, lease_period: Duration) -> Self {
        self.lease_period = lease_period;
        self
    }

    /// Spawns the worker thread and returns the running drain.
    pub fn build(self) -> SpoolDrain {
        let SpoolDrainBuilder {
            spool,
            transmitter,
            interval,
            lease_period,
        } = self;
        let (message_sender, message_receiver) = sync_channel(8);

        let handle = thread::Builder::new()
            .name("OpencensusSpoolDrain".to_string())
            .spawn(move || loop {
                match message_receiver.recv_timeout(interval) {
                    Ok(DrainMessage::Drain(ack)) => {
                        let keep_running = drain_cycle(&spool, &transmitter, lease_period);
                        let _ = ack.send(());
                        if !keep_running {
                            break;
                        }
                    }
                    Ok(DrainMessage::Stop(ack)) => {
                        let _ = ack.send(());
                        break;
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        if !drain_cycle(&spool, &transmitter, lease_period) {
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            });

        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(err) => {
                oc_error!(
                    name: "SpoolDrain.SpawnFailed",
                    reason = format!("{err}")
                );
                None
            }
        };

        SpoolDrain {
            message_sender,
            handle: Mutex::new(handle),
            is_stopped: AtomicBool::new(false),
        }
    }
}

impl fmt::Debug for DrainMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DrainMessage::Drain(_) => f.write_str("Drain"),
            DrainMessage::Stop(_) => f.write_str("Stop"),
        }
    }
}

/// Returns false when the worker should stop.
fn drain_cycle(
    spool: &Weak<dyn LocalSpool>,
    transmitter: &Weak<dyn Transmitter>,
    lease_period: Duration,
) -> bool {
    let Some(spool) = spool.upgrade() else {
        oc_info!(
            name: "SpoolDrain.SpoolDropped",
            message = "spool dropped, stopping drain worker"
        );
        return false;
    };
    let Some(transmitter) = transmitter.upgrade() else {
        oc_info!(
            name: "SpoolDrain.TransmitterDropped",
            message = "transmitter dropped, stopping drain worker"
        );
        return false;
    };

    let _scope = ExecutionContext::enter_exporter_scope();
    for blob in spool.gets() {
        if !blob.lease(lease_period) {
            continue;
        }
        let envelopes = match blob.get() {
            Ok(envelopes) => envelopes,
            Err(err) => {
                oc_warn!(
                    name: "SpoolDrain.BlobReadFailed",
                    reason = format!("{err}")
                );
                continue;
            }
        };
        match transmitter.transmit(&envelopes) {
            Transmission::Success => blob.delete(),
            Transmission::Retry(delay) => {
                // Leave the blob; it becomes available again when the lease
                // runs out.
                oc_debug!(
                    name: "SpoolDrain.RetryLater",
                    retry_after_ms = delay.as_millis()
                );
            }
            Transmission::Drop(code) => {
                oc_warn!(
                    name: "SpoolDrain.DroppingBlob",
                    status_code = code
                );
                blob.delete();
            }
        }
    }
    true
}

/// A [`LocalSpool`] kept in process memory, for tests and as a reference
/// implementation of the lease protocol.
#[derive(Clone, Debug, Default)]
pub struct InMemorySpool {
    store: Arc<Mutex<SpoolStore>>,
}

#[derive(Debug, Default)]
struct SpoolStore {
    next_id: u64,
    blobs: Vec<StoredBlob>,
}

#[derive(Debug)]
struct StoredBlob {
    id: u64,
    envelopes: Vec<Envelope>,
    ready_at: Instant,
    leased_until: Option<Instant>,
}

impl InMemorySpool {
    /// Creates an empty spool.
    pub fn new() -> Self {
        InMemorySpool::default()
    }

    /// Number of blobs currently stored.
    pub fn len(&self) -> usize {
        self.store
            .lock()
            .map(|store| store.blobs.len())
            .unwrap_or(0)
    }

    /// Whether the spool holds no blobs.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LocalSpool for InMemorySpool {
    fn put(&self, envelopes: Vec<Envelope>, retry_after: Duration) -> SpoolResult<()> {
        let mut store = self
            .store
            .lock()
            .map_err(|_| SpoolError::Storage("spool store poisoned".to_string()))?;
        let id = store.next_id;
        store.next_id += 1;
        store.blobs.push(StoredBlob {
            id,
            envelopes,
            ready_at: Instant::now() + retry_after,
            leased_until: None,
        });
        Ok(())
    }

    fn gets(&self) -> Vec<Box<dyn Blob>> {
        let Ok(store) = self.store.lock() else {
            return Vec::new();
        };
        let now = Instant::now();
        store
            .blobs
            .iter()
            .filter(|blob| {
                blob.ready_at <= now && blob.leased_until.map_or(true, |until| until <= now)
            })
            .map(|blob| {
                Box::new(MemoryBlob {
                    store: self.store.clone(),
                    id: blob.id,
                }) as Box<dyn Blob>
            })
            .collect()
    }
}

#[derive(Debug)]
struct MemoryBlob {
    store: Arc<Mutex<SpoolStore>>,
    id: u64,
}

impl Blob for MemoryBlob {
    fn lease(&self, period: Duration) -> bool {
        let Ok(mut store) = self.store.lock() else {
            return false;
        };
        let now = Instant::now();
        let Some(blob) = store.blobs.iter_mut().find(|b| b.id == self.id) else {
            return false;
        };
        if blob.leased_until.is_some_and(|until| until > now) {
            return false;
        }
        blob.leased_until = Some(now + period);
        true
    }

    fn get(&self) -> SpoolResult<Vec<Envelope>> {
        let store = self
            .store
            .lock()
            .map_err(|_| SpoolError::Storage("spool store poisoned".to_string()))?;
        store
            .blobs
            .iter()
            .find(|b| b.id == self.id)
            .map(|b| b.envelopes.clone())
            .ok_or(SpoolError::Missing)
    }

    fn delete(&self) {
        if let Ok(mut store) = self.store.lock() {
            store.blobs.retain(|b| b.id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn envelopes() -> Vec<Envelope> {
        vec![Envelope {
            name: "Span".to_string(),
            payload: b"payload".to_vec(),
        }]
    }

    #[derive(Debug)]
    struct ScriptedTransmitter {
        verdicts: Mutex<Vec<Transmission>>,
        calls: AtomicUsize,
    }

    impl ScriptedTransmitter {
        fn new(verdicts: Vec<Transmission>) -> Self {
            ScriptedTransmitter {
                verdicts: Mutex::new(verdicts),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Transmitter for ScriptedTransmitter {
        fn transmit(&self, _envelopes: &[Envelope]) -> Transmission {
            self.calls.fetch_add(1, Ordering::Relaxed);
            let mut verdicts = self.verdicts.lock().unwrap();
            if verdicts.is_empty() {
                Transmission::Success
            } else {
                verdicts.remove(0)
            }
        }
    }

    #[test]
    fn put_makes_blobs_available_after_retry_delay() {
        let spool = InMemorySpool::new();
        spool.put(envelopes(), Duration::from_secs(60)).unwrap();
        assert!(spool.gets().is_empty());
        spool.put(envelopes(), Duration::ZERO).unwrap();
        assert_eq!(spool.gets().len(), 1);
    }

    #[test]
    fn lease_is_exclusive_until_it_expires() {
        let spool = InMemorySpool::new();
        spool.put(envelopes(), Duration::ZERO).unwrap();
        let blobs = spool.gets();
        assert!(blobs[0].lease(Duration::from_secs(60)));
        assert!(!blobs[0].lease(Duration::from_secs(60)));
        // A leased blob is not offered again.
        assert!(spool.gets().is_empty());
    }

    #[test]
    fn deleted_blob_reads_as_missing() {
        let spool = InMemorySpool::new();
        spool.put(envelopes(), Duration::ZERO).unwrap();
        let blobs = spool.gets();
        blobs[0].delete();
        blobs[0].delete();
        assert!(matches!(blobs[0].get(), Err(SpoolError::Missing)));
        assert!(spool.is_empty());
    }

    #[test]
    fn drain_deletes_on_success() {
        let spool: Arc<dyn LocalSpool> = Arc::new(InMemorySpool::new());
        spool.put(envelopes(), Duration::ZERO).unwrap();
        let transmitter: Arc<dyn Transmitter> =
            Arc::new(ScriptedTransmitter::new(vec![Transmission::Success]));
        assert!(drain_cycle(
            &Arc::downgrade(&spool),
            &Arc::downgrade(&transmitter),
            Duration::from_secs(60),
        ));
        assert!(spool.gets().is_empty());
    }

    #[test]
    fn drain_keeps_blob_on_retry_and_deletes_on_drop_verdict() {
        let memory = InMemorySpool::new();
        let spool: Arc<dyn LocalSpool> = Arc::new(memory.clone());
        spool.put(envelopes(), Duration::ZERO).unwrap();

        let transmitter: Arc<dyn Transmitter> = Arc::new(ScriptedTransmitter::new(vec![
            Transmission::Retry(Duration::from_secs(1)),
            Transmission::Drop(400),
        ]));
        let spool_ref = Arc::downgrade(&spool);
        let transmitter_ref = Arc::downgrade(&transmitter);

        // Retry verdict: the blob stays, still leased.
        assert!(drain_cycle(&spool_ref, &transmitter_ref, Duration::ZERO));
        assert_eq!(memory.len(), 1);

        // Zero-length lease has expired; drop verdict deletes.
        assert!(drain_cycle(&spool_ref, &transmitter_ref, Duration::ZERO));
        assert!(memory.is_empty());
    }

    #[test]
    fn drain_stops_when_spool_is_dropped() {
        let spool: Arc<dyn LocalSpool> = Arc::new(InMemorySpool::new());
        let transmitter: Arc<dyn Transmitter> = Arc::new(ScriptedTransmitter::new(vec![]));
        let spool_ref = Arc::downgrade(&spool);
        drop(spool);
        assert!(!drain_cycle(
            &spool_ref,
            &Arc::downgrade(&transmitter),
            Duration::from_secs(60),
        ));
    }

    #[test]
    fn drain_worker_stop_is_idempotent() {
        let spool: Arc<dyn LocalSpool> = Arc::new(InMemorySpool::new());
        let transmitter: Arc<dyn Transmitter> = Arc::new(ScriptedTransmitter::new(vec![]));
        let drain = SpoolDrain::builder(&spool, &transmitter)
            .with_interval(Duration::from_secs(60))
            .build();
        drain.drain();
        drain.stop();
        drain.stop();
    }
}
