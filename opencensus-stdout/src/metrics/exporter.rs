use core::fmt;
use std::io::{stdout, Write};
use std::sync::Mutex;

use opencensus::metrics::{Metric, MetricError, MetricResult};

use crate::metrics::transform;

/// Writes each exported metric as one JSON line, to stdout by default.
pub struct MetricsExporter {
    writer: Mutex<Option<Box<dyn Write + Send>>>,
}

impl MetricsExporter {
    /// Start configuring an exporter.
    pub fn builder() -> MetricsExporterBuilder {
        MetricsExporterBuilder::default()
    }

    /// Drops the sink; subsequent exports fail.
    pub fn shutdown(&self) {
        if let Ok(mut writer) = self.writer.lock() {
            writer.take();
        }
    }
}

impl Default for MetricsExporter {
    fn default() -> Self {
        MetricsExporterBuilder::default().build()
    }
}

impl fmt::Debug for MetricsExporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MetricsExporter")
    }
}

impl opencensus::metrics::MetricExporter for MetricsExporter {
    fn export_metrics(&self, metrics: Vec<Metric>) -> MetricResult<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| MetricError::Export("writer lock poisoned".to_string()))?;
        let writer = writer
            .as_mut()
            .ok_or_else(|| MetricError::Export("exporter is shut down".to_string()))?;
        for metric in &metrics {
            serde_json::to_writer(&mut *writer, &transform::Metric::from(metric))
                .map_err(|err| MetricError::Export(err.to_string()))?;
            writer
                .write_all(b"\n")
                .map_err(|err| MetricError::Export(err.to_string()))?;
        }
        writer
            .flush()
            .map_err(|err| MetricError::Export(err.to_string()))
    }
}

/// Configuration for the JSON-lines metrics exporter.
#[derive(Default)]
pub struct MetricsExporterBuilder {
    writer: Option<Box<dyn Write + Send>>,
}

impl MetricsExporterBuilder {
    /// Set the sink the exporter writes to.
    pub fn with_writer(mut self, writer: impl Write + Send + 'static) -> Self {
        self.writer = Some(Box::new(writer));
        self
    }

    /// Build the exporter.
    pub fn build(self) -> MetricsExporter {
        MetricsExporter {
            writer: Mutex::new(Some(self.writer.unwrap_or_else(|| Box::new(stdout())))),
        }
    }
}

impl fmt::Debug for MetricsExporterBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MetricsExporterBuilder")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencensus::metrics::{LongCumulative, MetricExporter as _, MetricProducer, Registry};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn exports_one_json_line_per_metric() {
        let registry = Registry::new();
        let requests = Arc::new(LongCumulative::new(
            "rpc_count",
            "completed RPCs",
            "1",
            vec!["method".into()],
        ));
        requests
            .get_or_create_time_series(&["get".into()])
            .unwrap()
            .add(5);
        registry.add(requests).unwrap();

        let buffer = SharedBuffer::default();
        let exporter = MetricsExporter::builder()
            .with_writer(buffer.clone())
            .build();
        exporter
            .export_metrics(registry.get_metrics().unwrap())
            .unwrap();

        let contents = buffer.contents();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 1);
        let metric: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(metric["descriptor"]["name"], "rpc_count");
        assert_eq!(metric["descriptor"]["type"], "CUMULATIVE_INT64");
        assert_eq!(metric["timeseries"][0]["labelValues"][0], "get");
        assert_eq!(metric["timeseries"][0]["points"][0]["value"]["long"], 5);
        assert!(metric["timeseries"][0]["startTimestampUnixNano"].is_u64());
    }

    #[test]
    fn shutdown_makes_exports_fail() {
        let buffer = SharedBuffer::default();
        let exporter = MetricsExporter::builder()
            .with_writer(buffer.clone())
            .build();
        exporter.shutdown();
        let err = exporter.export_metrics(Vec::new()).unwrap_err();
        assert!(matches!(err, MetricError::Export(_)));
    }
}
