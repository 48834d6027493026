mod exporter;
mod transform;

pub use exporter::{SpanExporter, SpanExporterBuilder};
