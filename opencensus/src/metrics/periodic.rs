use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::Duration;

use crate::context::ExecutionContext;
use crate::metrics::data::Metric;
use crate::metrics::export::{MetricError, MetricExporter};
use crate::metrics::registry::MetricProducerManager;

/// Interval between export cycles when nothing else is configured.
pub const DEFAULT_EXPORT_INTERVAL: Duration = Duration::from_secs(60);

/// Environment variable overriding the export interval, in milliseconds.
pub const OC_METRIC_EXPORT_INTERVAL: &str = "OC_METRIC_EXPORT_INTERVAL";

const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

enum ControlMessage {
    Flush(SyncSender<()>),
    Stop(SyncSender<()>),
}

/// Background worker that, on a fixed interval, snapshots every producer in
/// a [`MetricProducerManager`] and hands the combined batch to a
/// [`MetricExporter`].
///
/// The worker holds only weak references to the manager and the exporter:
/// when either is dropped elsewhere, the worker logs and stops on its next
/// cycle, so short-lived programs exit cleanly without an explicit stop.
/// Producer and export errors are logged and the worker keeps running;
/// a [`MetricError::Transport`] return is terminal.
///
/// Every cycle runs inside an exporter scope, so clients the exporter uses
/// for its own transmission never record telemetry about the export itself.
#[derive(Debug)]
pub struct PeriodicExporter {
    message_sender: SyncSender<ControlMessage>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
    is_stopped: AtomicBool,
}

impl std::fmt::Debug for ControlMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlMessage::Flush(_) => f.write_str("Flush"),
            ControlMessage::Stop(_) => f.write_str("Stop"),
        }
    }
}

impl PeriodicExporter {
    /// Starts a worker with the default interval (or the
    /// `OC_METRIC_EXPORT_INTERVAL` override).
    pub fn new(manager: &Arc<MetricProducerManager>, exporter: Arc<dyn MetricExporter>) -> Self {
        PeriodicExporter::builder(manager, exporter).build()
    }

    /// Starts configuring a worker.
    pub fn builder(
        manager: &Arc<MetricProducerManager>,
        exporter: Arc<dyn MetricExporter>,
    ) -> PeriodicExporterBuilder {
        PeriodicExporterBuilder {
            manager: Arc::downgrade(manager),
            exporter: Arc::downgrade(&exporter),
            interval: None,
        }
    }

    /// Runs one export cycle now and waits for it to complete.
    pub fn flush(&self) {
        if self.is_stopped.load(Ordering::Relaxed) {
            return;
        }
        let (ack, done) = sync_channel(1);
        if self.message_sender.try_send(ControlMessage::Flush(ack)).is_ok() {
            let _ = done.recv_timeout(WAIT_TIMEOUT);
        }
    }

    /// Stops the worker after the current cycle, if one is running, and
    /// joins its thread. Idempotent.
    pub fn stop(&self) {
        if self.is_stopped.swap(true, Ordering::Relaxed) {
            return;
        }
        let (ack, done) = sync_channel(1);
        if self.message_sender.try_send(ControlMessage::Stop(ack)).is_ok() {
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

/// Configures a [`PeriodicExporter`].
#[derive(Debug)]
pub struct PeriodicExporterBuilder {
    manager: Weak<MetricProducerManager>,
    exporter: Weak<dyn MetricExporter>,
    interval: Option<Duration>,
}

impl PeriodicExporterBuilder {
    /// Overrides the export interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Spawns the worker thread and returns the running exporter.
    pub fn build(self) -> PeriodicExporter {
        let PeriodicExporterBuilder {
            manager,
            exporter,
            interval,
        } = self;
        let interval = interval
            .or_else(interval_from_env)
            .unwrap_or(DEFAULT_EXPORT_INTERVAL);
        let (message_sender, message_receiver) = sync_channel(8);

        let handle = thread::Builder::new()
            .name("OpencensusMetricsExport".to_string())
            .spawn(move || loop {
                match message_receiver.recv_timeout(interval) {
                    Ok(ControlMessage::Flush(ack)) => {
                        let keep_running = run_cycle(&manager, &exporter);
                        let _ = ack.send(());
                        if !keep_running {
                            break;
                        }
                    }
                    Ok(ControlMessage::Stop(ack)) => {
                        let _ = ack.send(());
                        break;
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        if !run_cycle(&manager, &exporter) {
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
                    name: "PeriodicExporter.SpawnFailed",
                    reason = format!("{err}")
                );
                None
            }
        };

        PeriodicExporter {
            message_sender,
            handle: Mutex::new(handle),
            is_stopped: AtomicBool::new(false),
        }
    }
}

fn interval_from_env() -> Option<Duration> {
    let raw = env::var(OC_METRIC_EXPORT_INTERVAL).ok()?;
    match raw.parse::<u64>() {
        Ok(millis) if millis > 0 => Some(Duration::from_millis(millis)),
        _ => {
            oc_warn!(
                name: "PeriodicExporter.InvalidIntervalEnv",
                value = raw
            );
            None
        }
    }
}

/// Returns false when the worker should stop.
fn run_cycle(manager: &Weak<MetricProducerManager>, exporter: &Weak<dyn MetricExporter>) -> bool {
    let Some(manager) = manager.upgrade() else {
        oc_info!(
            name: "PeriodicExporter.ManagerDropped",
            message = "producer manager dropped, stopping export worker"
        );
        return false;
    };
    let Some(exporter) = exporter.upgrade() else {
        oc_info!(
            name: "PeriodicExporter.ExporterDropped",
            message = "exporter dropped, stopping export worker"
        );
        return false;
    };

    let _scope = ExecutionContext::enter_exporter_scope();
    let mut batch: Vec<Metric> = Vec::new();
    for producer in manager.get_all() {
        match producer.get_metrics() {
            Ok(metrics) => batch.extend(metrics),
            Err(err) => {
                oc_warn!(
                    name: "PeriodicExporter.ProducerFailed",
                    reason = format!("{err}")
                );
            }
        }
    }
    if batch.is_empty() {
        return true;
    }
    match exporter.export_metrics(batch) {
        Ok(()) => true,
        Err(err @ MetricError::Transport(_)) => {
            oc_error!(
                name: "PeriodicExporter.TransportFailed",
                reason = format!("{err}")
            );
            false
        }
        Err(err) => {
            oc_warn!(
                name: "PeriodicExporter.ExportFailed",
                reason = format!("{err}")
            );
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::in_memory_exporter::InMemoryMetricExporter;
    use crate::metrics::instruments::LongGauge;
    use crate::metrics::registry::Registry;

    fn populated_manager() -> Arc<MetricProducerManager> {
        let registry = Registry::new();
        let gauge = Arc::new(LongGauge::new("g", "d", "1", vec![]));
        gauge.get_default_time_series().set(1);
        registry.add(gauge).unwrap();
        let manager = Arc::new(MetricProducerManager::new());
        manager.add(Arc::new(registry));
        manager
    }

    #[test]
    fn flush_runs_a_cycle() {
        let manager = populated_manager();
        let exporter = Arc::new(InMemoryMetricExporter::default());
        let worker = PeriodicExporter::builder(&manager, exporter.clone())
            .with_interval(Duration::from_secs(60))
            .build();
        worker.flush();
        let batches = exporter.exported_batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][0].descriptor.name(), "g");
        worker.stop();
    }

    #[test]
    fn stop_is_idempotent() {
        let manager = populated_manager();
        let exporter = Arc::new(InMemoryMetricExporter::default());
        let worker = PeriodicExporter::new(&manager, exporter);
        worker.stop();
        worker.stop();
    }

    #[test]
    fn worker_stops_when_manager_is_dropped() {
        let manager = populated_manager();
        let exporter = Arc::new(InMemoryMetricExporter::default());
        let worker = PeriodicExporter::builder(&manager, exporter.clone())
            .with_interval(Duration::from_millis(10))
            .build();
        drop(manager);
        std::thread::sleep(Duration::from_millis(100));
        let handle = worker
            .handle
            .lock()
            .unwrap()
            .take()
            .expect("worker thread handle");
        // The thread exits on its own once the weak upgrade fails.
        handle.join().unwrap();
        assert!(exporter.exported_batches().is_empty());
    }

    #[test]
    fn env_interval_must_be_positive_millis() {
        temp_env::with_var(OC_METRIC_EXPORT_INTERVAL, Some("250"), || {
            assert_eq!(interval_from_env(), Some(Duration::from_millis(250)));
        });
        temp_env::with_var(OC_METRIC_EXPORT_INTERVAL, Some("0"), || {
            assert_eq!(interval_from_env(), None);
        });
        temp_env::with_var(OC_METRIC_EXPORT_INTERVAL, Some("soon"), || {
            assert_eq!(interval_from_env(), None);
        });
        temp_env::with_var_unset(OC_METRIC_EXPORT_INTERVAL, || {
            assert_eq!(interval_from_env(), None);
        });
    }
}
