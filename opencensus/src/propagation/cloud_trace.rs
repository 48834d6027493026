use crate::propagation::{Extractor, FieldIter, Injector, SpanContextPropagator};
use crate::trace::{SpanContext, SpanId, TraceFlags, TraceId, TraceState};

const CLOUD_TRACE_HEADER: &str = "x-cloud-trace-context";

const CLOUD_TRACE_HEADER_FIELDS: [&str; 1] = [CLOUD_TRACE_HEADER];

/// Propagates span contexts in the Google [Cloud Trace] single-header format:
///
/// `X-Cloud-Trace-Context: <32 hex trace id>[/<span id>][;o=<options>]`
///
/// The span id section is historically a decimal `u64`; both decimal and 16
/// lowercase hex digits are accepted on ingress, and egress always emits the
/// hex form. The `o` options value is decimal; its low bit is the sampled
/// flag.
///
/// [Cloud Trace]: https://cloud.google.com/trace/docs/trace-context
#[derive(Clone, Debug, Default)]
pub struct CloudTraceContextPropagator {
    _private: (),
}

impl CloudTraceContextPropagator {
    /// Create a new `CloudTraceContextPropagator`.
    pub fn new() -> Self {
        CloudTraceContextPropagator { _private: () }
    }

    fn parse_span_id(section: &str) -> Result<SpanId, ()> {
        if section.bytes().all(|b| b.is_ascii_digit()) && section.len() < 16 {
            // Unambiguously decimal: hex span ids are exactly 16 digits.
            return section.parse::<u64>().map(SpanId::from_u64).map_err(|_| ());
        }
        if section.len() == 16 {
            return SpanId::from_hex(section).map_err(|_| ());
        }
        section.parse::<u64>().map(SpanId::from_u64).map_err(|_| ())
    }

    fn try_extract(&self, extractor: &dyn Extractor) -> Result<SpanContext, ()> {
        let header = extractor.get(CLOUD_TRACE_HEADER).ok_or(())?;
        let header = header.trim();

        let (main, options) = match header.split_once(";o=") {
            Some((main, options)) => (main, Some(options)),
            None => (header, None),
        };
        let sampled = match options {
            Some(options) => options.parse::<u32>().map_err(|_| ())? & 1 == 1,
            None => false,
        };

        let (trace_part, span_part) = match main.split_once('/') {
            Some((trace_part, span_part)) => (trace_part, Some(span_part)),
            None => (main, None),
        };
        let trace_id = TraceId::from_hex(trace_part).map_err(|_| ())?;
        let span_id = match span_part {
            Some(span_part) => Some(Self::parse_span_id(span_part)?),
            None => None,
        };

        let span_context = SpanContext::new(
            trace_id,
            span_id,
            TraceFlags::default().with_sampled(sampled),
            TraceState::NONE,
            true,
        );
        if !span_context.is_valid() {
            return Err(());
        }
        Ok(span_context)
    }
}

impl SpanContextPropagator for CloudTraceContextPropagator {
    fn extract(&self, extractor: &dyn Extractor) -> SpanContext {
        self.try_extract(extractor).unwrap_or_else(|()| {
            if extractor.get(CLOUD_TRACE_HEADER).is_some() {
                oc_warn!(
                    name: "CloudTraceContextPropagator.InvalidHeader",
                    message = "ignoring malformed x-cloud-trace-context header"
                );
            }
            SpanContext::generate()
        })
    }

    fn inject(&self, span_context: &SpanContext, injector: &mut dyn Injector) {
        let Some(span_id) = span_context.span_id() else {
            return;
        };
        if !span_context.is_valid() || !span_id.is_valid() {
            return;
        }
        let options = u32::from(span_context.is_sampled());
        injector.set(
            CLOUD_TRACE_HEADER,
            format!("{}/{};o={}", span_context.trace_id(), span_id, options),
        );
    }

    fn fields(&self) -> FieldIter<'_> {
        FieldIter::new(&CLOUD_TRACE_HEADER_FIELDS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn extract(header: &str) -> SpanContext {
        let mut carrier = HashMap::new();
        carrier.insert(CLOUD_TRACE_HEADER.to_string(), header.to_string());
        CloudTraceContextPropagator::new().extract(&carrier)
    }

    #[test]
    fn extract_decimal_span_id() {
        let cx = extract("4bf92f3577b34da6a3ce929d0e0e4736/255;o=1");
        assert_eq!(
            cx.trace_id(),
            TraceId::from_u128(0x4bf9_2f35_77b3_4da6_a3ce_929d_0e0e_4736)
        );
        assert_eq!(cx.span_id(), Some(SpanId::from_u64(255)));
        assert!(cx.is_sampled());
        assert!(cx.from_header());
    }

    #[test]
    fn extract_hex_span_id() {
        let cx = extract("4bf92f3577b34da6a3ce929d0e0e4736/00f067aa0ba902b7;o=0");
        assert_eq!(cx.span_id(), Some(SpanId::from_u64(0x00f0_67aa_0ba9_02b7)));
        assert!(!cx.is_sampled());
    }

    #[test]
    fn extract_without_span_or_options() {
        let cx = extract("4bf92f3577b34da6a3ce929d0e0e4736");
        assert!(cx.from_header());
        assert_eq!(cx.span_id(), None);
        assert!(!cx.is_sampled());
    }

    #[test]
    fn options_low_bit_is_sampled() {
        assert!(extract("4bf92f3577b34da6a3ce929d0e0e4736/1;o=3").is_sampled());
        assert!(!extract("4bf92f3577b34da6a3ce929d0e0e4736/1;o=2").is_sampled());
    }

    #[test]
    fn malformed_headers_yield_fresh_context() {
        for header in [
            "",
            "not-a-trace-id/1;o=1",
            "4bf92f3577b34da6a3ce929d0e0e4736/not-a-span;o=1",
            "4bf92f3577b34da6a3ce929d0e0e4736/1;o=maybe",
            "00000000000000000000000000000000/1;o=1",
        ] {
            let cx = extract(header);
            assert!(!cx.from_header(), "{header}");
            assert!(cx.is_valid(), "{header}");
        }
    }

    #[test]
    fn inject_emits_hex_span_id() {
        let cx = SpanContext::new(
            TraceId::from_u128(0x4bf9_2f35_77b3_4da6_a3ce_929d_0e0e_4736),
            Some(SpanId::from_u64(255)),
            TraceFlags::SAMPLED,
            TraceState::NONE,
            false,
        );
        let mut carrier: HashMap<String, String> = HashMap::new();
        CloudTraceContextPropagator::new().inject(&cx, &mut carrier);
        assert_eq!(
            carrier.get(CLOUD_TRACE_HEADER).map(String::as_str),
            Some("4bf92f3577b34da6a3ce929d0e0e4736/00000000000000ff;o=1")
        );
    }

    #[test]
    fn egress_parses_on_ingress() {
        let cx = SpanContext::new(
            TraceId::from_u128(7),
            Some(SpanId::from_u64(42)),
            TraceFlags::SAMPLED,
            TraceState::NONE,
            false,
        );
        let propagator = CloudTraceContextPropagator::new();
        let mut carrier: HashMap<String, String> = HashMap::new();
        propagator.inject(&cx, &mut carrier);
        let parsed = propagator.extract(&carrier);
        assert_eq!(parsed.trace_id(), cx.trace_id());
        assert_eq!(parsed.span_id(), cx.span_id());
        assert_eq!(parsed.is_sampled(), cx.is_sampled());
    }
}
