use crate::propagation::{Extractor, FieldIter, Injector, SpanContextPropagator};
use crate::trace::{SpanContext, SpanId, TraceFlags, TraceId, TraceState};

const B3_TRACE_ID_HEADER: &str = "x-b3-traceid";
const B3_SPAN_ID_HEADER: &str = "x-b3-spanid";
const B3_SAMPLED_HEADER: &str = "x-b3-sampled";

const B3_HEADER_FIELDS: [&str; 3] = [B3_TRACE_ID_HEADER, B3_SPAN_ID_HEADER, B3_SAMPLED_HEADER];

/// Propagates span contexts in the Zipkin [B3 multi-header] format.
///
/// `x-b3-traceid` carries 16 or 32 lowercase hex digits; the short form is
/// left-padded with zeros to 128 bits. `x-b3-spanid` carries 16 hex digits
/// and `x-b3-sampled` is `1`/`0` (with `true`/`false` accepted leniently on
/// ingress). Missing trace or span id yields a fresh local context.
///
/// [B3 multi-header]: https://github.com/openzipkin/b3-propagation
#[derive(Clone, Debug, Default)]
pub struct B3Propagator {
    _private: (),
}

impl B3Propagator {
    /// Create a new `B3Propagator`.
    pub fn new() -> Self {
        B3Propagator { _private: () }
    }

    fn try_extract(&self, extractor: &dyn Extractor) -> Result<SpanContext, ()> {
        let trace_id_hex = extractor.get(B3_TRACE_ID_HEADER).ok_or(())?;
        let trace_id_hex = trace_id_hex.trim();
        let padded;
        let trace_id_hex = if trace_id_hex.len() == 16 {
            padded = format!("{:0>32}", trace_id_hex);
            padded.as_str()
        } else {
            trace_id_hex
        };
        let trace_id = TraceId::from_hex(trace_id_hex).map_err(|_| ())?;

        let span_id_hex = extractor.get(B3_SPAN_ID_HEADER).ok_or(())?;
        let span_id = SpanId::from_hex(span_id_hex.trim()).map_err(|_| ())?;

        let sampled = match extractor.get(B3_SAMPLED_HEADER).as_deref().map(str::trim) {
            Some("1") | Some("true") => true,
            Some("0") | Some("false") | None => false,
            Some(_) => return Err(()),
        };

        let span_context = SpanContext::new(
            trace_id,
            Some(span_id),
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

impl SpanContextPropagator for B3Propagator {
    fn extract(&self, extractor: &dyn Extractor) -> SpanContext {
        self.try_extract(extractor).unwrap_or_else(|()| {
            if extractor.get(B3_TRACE_ID_HEADER).is_some()
                || extractor.get(B3_SPAN_ID_HEADER).is_some()
            {
                oc_warn!(
                    name: "B3Propagator.InvalidHeaders",
                    message = "ignoring malformed b3 headers"
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
        injector.set(B3_TRACE_ID_HEADER, span_context.trace_id().to_string());
        injector.set(B3_SPAN_ID_HEADER, span_id.to_string());
        let sampled = if span_context.is_sampled() { "1" } else { "0" };
        injector.set(B3_SAMPLED_HEADER, sampled.to_string());
    }

    fn fields(&self) -> FieldIter<'_> {
        FieldIter::new(&B3_HEADER_FIELDS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn carrier(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn extract_full_headers() {
        let carrier = carrier(&[
            (B3_TRACE_ID_HEADER, "4bf92f3577b34da6a3ce929d0e0e4736"),
            (B3_SPAN_ID_HEADER, "00f067aa0ba902b7"),
            (B3_SAMPLED_HEADER, "1"),
        ]);
        let cx = B3Propagator::new().extract(&carrier);
        assert_eq!(
            cx.trace_id(),
            TraceId::from_u128(0x4bf9_2f35_77b3_4da6_a3ce_929d_0e0e_4736)
        );
        assert_eq!(cx.span_id(), Some(SpanId::from_u64(0x00f0_67aa_0ba9_02b7)));
        assert!(cx.is_sampled());
        assert!(cx.from_header());
    }

    #[test]
    fn extract_left_pads_short_trace_id() {
        let carrier = carrier(&[
            (B3_TRACE_ID_HEADER, "a3ce929d0e0e4736"),
            (B3_SPAN_ID_HEADER, "00f067aa0ba902b7"),
        ]);
        let cx = B3Propagator::new().extract(&carrier);
        assert_eq!(cx.trace_id(), TraceId::from_u128(0xa3ce_929d_0e0e_4736));
        assert!(!cx.is_sampled());
        assert!(cx.from_header());
    }

    #[test]
    fn extract_lenient_sampled_values() {
        for (value, expected) in [("true", true), ("false", false), ("0", false)] {
            let carrier = carrier(&[
                (B3_TRACE_ID_HEADER, "4bf92f3577b34da6a3ce929d0e0e4736"),
                (B3_SPAN_ID_HEADER, "00f067aa0ba902b7"),
                (B3_SAMPLED_HEADER, value),
            ]);
            let cx = B3Propagator::new().extract(&carrier);
            assert_eq!(cx.is_sampled(), expected, "sampled={value}");
            assert!(cx.from_header());
        }
    }

    #[test]
    fn missing_or_bad_ids_yield_fresh_context() {
        let cases = vec![
            carrier(&[(B3_SPAN_ID_HEADER, "00f067aa0ba902b7")]),
            carrier(&[(B3_TRACE_ID_HEADER, "4bf92f3577b34da6a3ce929d0e0e4736")]),
            carrier(&[
                (B3_TRACE_ID_HEADER, "not-hex"),
                (B3_SPAN_ID_HEADER, "00f067aa0ba902b7"),
            ]),
            carrier(&[
                (B3_TRACE_ID_HEADER, "4bf92f3577b34da6a3ce929d0e0e4736"),
                (B3_SPAN_ID_HEADER, "00f067aa0ba902b7"),
                (B3_SAMPLED_HEADER, "maybe"),
            ]),
            carrier(&[
                (B3_TRACE_ID_HEADER, "00000000000000000000000000000000"),
                (B3_SPAN_ID_HEADER, "00f067aa0ba902b7"),
            ]),
        ];
        for carrier in cases {
            let cx = B3Propagator::new().extract(&carrier);
            assert!(!cx.from_header());
            assert!(cx.is_valid());
        }
    }

    #[test]
    fn inject_writes_all_three_headers() {
        let cx = SpanContext::new(
            TraceId::from_u128(0x4bf9_2f35_77b3_4da6_a3ce_929d_0e0e_4736),
            Some(SpanId::from_u64(0x00f0_67aa_0ba9_02b7)),
            TraceFlags::SAMPLED,
            TraceState::NONE,
            false,
        );
        let mut carrier: HashMap<String, String> = HashMap::new();
        B3Propagator::new().inject(&cx, &mut carrier);
        assert_eq!(
            carrier.get(B3_TRACE_ID_HEADER).map(String::as_str),
            Some("4bf92f3577b34da6a3ce929d0e0e4736")
        );
        assert_eq!(
            carrier.get(B3_SPAN_ID_HEADER).map(String::as_str),
            Some("00f067aa0ba902b7")
        );
        assert_eq!(carrier.get(B3_SAMPLED_HEADER).map(String::as_str), Some("1"));
    }
}
