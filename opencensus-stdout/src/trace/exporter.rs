use core::fmt;
use std::io::{stdout, Write};
use std::sync::Mutex;

use opencensus::trace::SpanData;

use crate::trace::transform;

/// Writes each finished span as one JSON line, to stdout by default.
pub struct SpanExporter {
    writer: Mutex<Option<Box<dyn Write + Send>>>,
}

impl SpanExporter {
    /// Start configuring an exporter.
    pub fn builder() -> SpanExporterBuilder {
        SpanExporterBuilder::default()
    }
}

impl Default for SpanExporter {
    fn default() -> Self {
        SpanExporterBuilder::default().build()
    }
}

impl fmt::Debug for SpanExporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SpanExporter")
    }
}

impl opencensus::trace::SpanExporter for SpanExporter {
    fn emit(&self, batch: Vec<SpanData>) {
        let Ok(mut writer) = self.writer.lock() else {
            return;
        };
        let Some(writer) = writer.as_mut() else {
            return;
        };
        for span in &batch {
            // An unwritable sink means telemetry is lost, never an error
            // surfaced to the instrumented program.
            if serde_json::to_writer(&mut *writer, &transform::Span::from(span)).is_err() {
                return;
            }
            if writer.write_all(b"\n").is_err() {
                return;
            }
        }
        let _ = writer.flush();
    }

    fn shutdown(&self) {
        if let Ok(mut writer) = self.writer.lock() {
            writer.take();
        }
    }
}

/// Configuration for the JSON-lines span exporter.
#[derive(Default)]
pub struct SpanExporterBuilder {
    writer: Option<Box<dyn Write + Send>>,
}

impl SpanExporterBuilder {
    /// Set the sink the exporter writes to.
    ///
    /// ```
    /// use opencensus_stdout::SpanExporterBuilder;
    ///
    /// let buffer = Vec::new(); // any type that implements `Write`
    /// let exporter = SpanExporterBuilder::default().with_writer(buffer).build();
    /// ```
    pub fn with_writer(mut self, writer: impl Write + Send + 'static) -> Self {
        self.writer = Some(Box::new(writer));
        self
    }

    /// Build the exporter.
    pub fn build(self) -> SpanExporter {
        SpanExporter {
            writer: Mutex::new(Some(self.writer.unwrap_or_else(|| Box::new(stdout())))),
        }
    }
}

impl fmt::Debug for SpanExporterBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SpanExporterBuilder")
    }
}
