use std::str::FromStr;

use crate::propagation::{Extractor, FieldIter, Injector, SpanContextPropagator};
use crate::trace::{SpanContext, SpanId, TraceFlags, TraceId, TraceState};

const SUPPORTED_VERSION: u8 = 0;
const TRACEPARENT_HEADER: &str = "traceparent";
const TRACESTATE_HEADER: &str = "tracestate";

const TRACE_CONTEXT_HEADER_FIELDS: [&str; 2] = [TRACEPARENT_HEADER, TRACESTATE_HEADER];

/// Propagates span contexts in [W3C trace-context] format under the
/// `traceparent` and `tracestate` headers.
///
/// A `traceparent` looks like
///
/// `traceparent: 00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01`
///
/// with four dash-separated sections: version, trace id, parent span id, and
/// trace flags. Only version `00` is accepted, and a version-`00` header with
/// trailing sections is rejected. The optional `tracestate` header carries
/// the vendor list; an invalid list is dropped without affecting the
/// `traceparent`.
///
/// [W3C trace-context]: https://www.w3.org/TR/trace-context/
#[derive(Clone, Debug, Default)]
pub struct TraceContextPropagator {
    _private: (),
}

impl TraceContextPropagator {
    /// Create a new `TraceContextPropagator`.
    pub fn new() -> Self {
        TraceContextPropagator { _private: () }
    }

    fn try_extract(&self, extractor: &dyn Extractor) -> Result<SpanContext, ()> {
        let header = extractor.get(TRACEPARENT_HEADER).ok_or(())?;
        let header = header.trim();
        let parts = header.split('-').collect::<Vec<&str>>();
        // Version 00 has exactly four sections; trailing sections reject.
        if parts.len() != 4 {
            return Err(());
        }

        if parts[0].len() != 2 || parts[0].bytes().any(|b| b.is_ascii_uppercase()) {
            return Err(());
        }
        let version = u8::from_str_radix(parts[0], 16).map_err(|_| ())?;
        if version != SUPPORTED_VERSION {
            return Err(());
        }

        let trace_id = TraceId::from_hex(parts[1]).map_err(|_| ())?;
        let span_id = SpanId::from_hex(parts[2]).map_err(|_| ())?;

        if parts[3].len() != 2 || parts[3].bytes().any(|b| b.is_ascii_uppercase()) {
            return Err(());
        }
        let opts = u8::from_str_radix(parts[3], 16).map_err(|_| ())?;
        if opts > 2 {
            return Err(());
        }
        // Only the sampled bit is meaningful here.
        let trace_flags = TraceFlags::new(opts) & TraceFlags::SAMPLED;

        let trace_state = match extractor.get(TRACESTATE_HEADER) {
            Some(trace_state_str) => {
                TraceState::from_str(trace_state_str.as_ref()).unwrap_or_else(|err| {
                    oc_debug!(
                        name: "TraceContextPropagator.InvalidTraceState",
                        reason = format!("{err}")
                    );
                    TraceState::NONE
                })
            }
            None => TraceState::NONE,
        };

        let span_context =
            SpanContext::new(trace_id, Some(span_id), trace_flags, trace_state, true);
        if !span_context.is_valid() {
            return Err(());
        }
        Ok(span_context)
    }
}

impl SpanContextPropagator for TraceContextPropagator {
    fn extract(&self, extractor: &dyn Extractor) -> SpanContext {
        self.try_extract(extractor).unwrap_or_else(|()| {
            if extractor.get(TRACEPARENT_HEADER).is_some() {
                oc_warn!(
                    name: "TraceContextPropagator.InvalidTraceparent",
                    message = "ignoring malformed traceparent header"
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
        let header_value = format!(
            "{:02x}-{}-{}-{:02x}",
            SUPPORTED_VERSION,
            span_context.trace_id(),
            span_id,
            span_context.trace_flags() & TraceFlags::SAMPLED
        );
        injector.set(TRACEPARENT_HEADER, header_value);
        if !span_context.trace_state().is_empty() {
            injector.set(TRACESTATE_HEADER, span_context.trace_state().header());
        }
    }

    fn fields(&self) -> FieldIter<'_> {
        FieldIter::new(&TRACE_CONTEXT_HEADER_FIELDS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn extract(header: &str) -> SpanContext {
        let mut carrier = HashMap::new();
        carrier.insert(TRACEPARENT_HEADER.to_string(), header.to_string());
        TraceContextPropagator::new().extract(&carrier)
    }

    #[rustfmt::skip]
    fn valid_extract_data() -> Vec<(&'static str, u128, u64, bool)> {
        vec![
            ("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-00", 0x4bf9_2f35_77b3_4da6_a3ce_929d_0e0e_4736, 0x00f0_67aa_0ba9_02b7, false),
            ("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01", 0x4bf9_2f35_77b3_4da6_a3ce_929d_0e0e_4736, 0x00f0_67aa_0ba9_02b7, true),
            ("00-00000000000000000000000000000001-0000000000000001-01", 1, 1, true),
        ]
    }

    #[rustfmt::skip]
    fn invalid_extract_data() -> Vec<(&'static str, &'static str)> {
        vec![
            ("0000-00000000000000000000000000000000-0000000000000000-01", "wrong version length"),
            ("01-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",   "unsupported version"),
            ("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01-",  "trailing section"),
            ("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01-x", "extra section"),
            ("00-ab00000000000000000000000000000000-cd00000000000000-01", "wrong trace id length"),
            ("00-ab000000000000000000000000000000-cd0000000000000000-01", "wrong span id length"),
            ("00-AB000000000000000000000000000000-cd00000000000000-01",   "upper case trace id"),
            ("00-ab000000000000000000000000000000-CD00000000000000-01",   "upper case span id"),
            ("00-00000000000000000000000000000000-cd00000000000000-01",   "zero trace id"),
            ("00-ab000000000000000000000000000000-0000000000000000-01",   "zero span id"),
            ("00-ab000000000000000000000000000000-cd00000000000000-09",   "unused flag bits"),
            ("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7",      "missing options"),
            ("",                                                          "empty header"),
        ]
    }

    #[test]
    fn extract_valid_traceparent() {
        for (header, trace_id, span_id, sampled) in valid_extract_data() {
            let cx = extract(header);
            assert_eq!(cx.trace_id(), TraceId::from_u128(trace_id), "{header}");
            assert_eq!(cx.span_id(), Some(SpanId::from_u64(span_id)), "{header}");
            assert_eq!(cx.is_sampled(), sampled, "{header}");
            assert!(cx.from_header(), "{header}");
        }
    }

    #[test]
    fn extract_invalid_yields_fresh_context() {
        for (header, reason) in invalid_extract_data() {
            let cx = extract(header);
            assert!(!cx.from_header(), "{reason}");
            assert!(cx.is_valid(), "{reason}");
        }
    }

    #[test]
    fn extract_without_header_yields_fresh_context() {
        let carrier: HashMap<String, String> = HashMap::new();
        let cx = TraceContextPropagator::new().extract(&carrier);
        assert!(!cx.from_header());
        assert!(cx.is_valid());
    }

    #[test]
    fn extract_reads_tracestate() {
        let mut carrier = HashMap::new();
        carrier.insert(
            TRACEPARENT_HEADER.to_string(),
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01".to_string(),
        );
        carrier.insert(TRACESTATE_HEADER.to_string(), "foo=bar,baz=qux".to_string());
        let cx = TraceContextPropagator::new().extract(&carrier);
        assert_eq!(cx.trace_state().header(), "foo=bar,baz=qux");
    }

    #[test]
    fn invalid_tracestate_drops_list_but_keeps_traceparent() {
        let mut carrier = HashMap::new();
        carrier.insert(
            TRACEPARENT_HEADER.to_string(),
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01".to_string(),
        );
        carrier.insert(TRACESTATE_HEADER.to_string(), "foo=bar,foo=dup".to_string());
        let cx = TraceContextPropagator::new().extract(&carrier);
        assert!(cx.from_header());
        assert!(cx.trace_state().is_empty());
    }

    #[test]
    fn inject_writes_canonical_header() {
        let cx = SpanContext::new(
            TraceId::from_u128(0x4bf9_2f35_77b3_4da6_a3ce_929d_0e0e_4736),
            Some(SpanId::from_u64(0x00f0_67aa_0ba9_02b7)),
            TraceFlags::SAMPLED,
            TraceState::from_key_value(vec![("foo", "bar")]).unwrap(),
            false,
        );
        let mut carrier: HashMap<String, String> = HashMap::new();
        TraceContextPropagator::new().inject(&cx, &mut carrier);
        assert_eq!(
            carrier.get(TRACEPARENT_HEADER).map(String::as_str),
            Some("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01")
        );
        assert_eq!(
            carrier.get(TRACESTATE_HEADER).map(String::as_str),
            Some("foo=bar")
        );
    }

    #[test]
    fn inject_skips_contexts_without_span_id() {
        let cx = SpanContext::generate();
        let mut carrier: HashMap<String, String> = HashMap::new();
        TraceContextPropagator::new().inject(&cx, &mut carrier);
        assert!(carrier.is_empty());
    }

    #[test]
    fn fields_lists_both_headers() {
        let propagator = TraceContextPropagator::new();
        let fields: Vec<&str> = propagator.fields().collect();
        assert_eq!(fields, vec![TRACEPARENT_HEADER, TRACESTATE_HEADER]);
    }
}
