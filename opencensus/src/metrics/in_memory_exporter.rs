use std::sync::Mutex;

use crate::metrics::data::Metric;
use crate::metrics::export::{MetricExporter, MetricResult};

/// A [`MetricExporter`] that stores batches in memory for inspection,
/// intended for tests and examples.
#[derive(Debug, Default)]
pub struct InMemoryMetricExporter {
    batches: Mutex<Vec<Vec<Metric>>>,
}

impl InMemoryMetricExporter {
    /// All batches exported so far, in export order.
    pub fn exported_batches(&self) -> Vec<Vec<Metric>> {
        self.batches
            .lock()
            .map(|batches| batches.clone())
            .unwrap_or_default()
    }

    /// Discards the stored batches.
    pub fn reset(&self) {
        if let Ok(mut batches) = self.batches.lock() {
            batches.clear();
        }
    }
}

impl MetricExporter for InMemoryMetricExporter {
    fn export_metrics(&self, metrics: Vec<Metric>) -> MetricResult<()> {
        if let Ok(mut batches) = self.batches.lock() {
            batches.push(metrics);
        }
        Ok(())
    }
}
