use std::sync::Mutex;

use crate::trace::export::SpanExporter;
use crate::trace::span::SpanData;

/// A [`SpanExporter`] that stores finished spans in memory for inspection,
/// intended for tests and examples.
#[derive(Debug, Default)]
pub struct InMemorySpanExporter {
    spans: Mutex<Vec<SpanData>>,
}

impl InMemorySpanExporter {
    /// All spans emitted so far, in emission order.
    pub fn emitted_spans(&self) -> Vec<SpanData> {
        self.spans
            .lock()
            .map(|spans| spans.clone())
            .unwrap_or_default()
    }

    /// Discards the stored spans.
    pub fn reset(&self) {
        if let Ok(mut spans) = self.spans.lock() {
            spans.clear();
        }
    }
}

impl SpanExporter for InMemorySpanExporter {
    fn emit(&self, batch: Vec<SpanData>) {
        if let Ok(mut spans) = self.spans.lock() {
            spans.extend(batch);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::span::Span;
    use crate::trace::span_context::{SpanId, TraceId, TraceState};

    #[test]
    fn stores_and_resets() {
        let exporter = InMemorySpanExporter::default();
        let mut span = Span::new("op", SpanId::from_u64(1), None);
        span.end();
        exporter.emit(vec![span.snapshot(TraceId::from_u128(1), &TraceState::NONE)]);
        assert_eq!(exporter.emitted_spans().len(), 1);
        exporter.reset();
        assert!(exporter.emitted_spans().is_empty());
    }
}
