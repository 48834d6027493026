mod exporter;
mod transform;

pub use exporter::{MetricsExporter, MetricsExporterBuilder};
