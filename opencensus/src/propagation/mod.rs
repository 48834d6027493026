//! Wire carriers for [`SpanContext`].
//!
//! A [`SpanContextPropagator`] reads a span context out of an inbound carrier
//! (an HTTP header map, usually) and writes one into an outbound carrier.
//! Three formats are provided: W3C trace-context
//! ([`TraceContextPropagator`]), B3 multi-header ([`B3Propagator`]), and the
//! Google Cloud Trace single header ([`CloudTraceContextPropagator`]). Each
//! propagator emits exactly the format it parses; there is no translation
//! between formats.
//!
//! Extraction never fails: a missing or ill-formed carrier yields a fresh
//! local [`SpanContext`] and a structured warning, so a malformed caller can
//! never break the handling of its request.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::slice;

use crate::trace::SpanContext;

mod b3;
mod cloud_trace;
mod trace_context;

pub use b3::B3Propagator;
pub use cloud_trace::CloudTraceContextPropagator;
pub use trace_context::TraceContextPropagator;

/// Writes key/value pairs into an outbound carrier.
pub trait Injector {
    /// Add a key and value to the underlying data.
    fn set(&mut self, key: &str, value: String);
}

/// Reads values out of an inbound carrier.
pub trait Extractor {
    /// Get a value for a key from the underlying data.
    fn get(&self, key: &str) -> Option<Cow<'_, str>>;

    /// Collect all the keys from the underlying data.
    fn keys(&self) -> Vec<Cow<'_, str>>;
}

impl<S: std::hash::BuildHasher> Injector for HashMap<String, String, S> {
    /// Set a key and value in the HashMap. Keys are lowercased, matching the
    /// case-insensitivity of HTTP headers.
    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_lowercase(), value);
    }
}

impl<S: std::hash::BuildHasher> Extractor for HashMap<String, String, S> {
    /// Get a value for a key from the HashMap, case-insensitively.
    fn get(&self, key: &str) -> Option<Cow<'_, str>> {
        self.get(&key.to_lowercase())
            .map(|v| Cow::Borrowed(v.as_str()))
    }

    /// Collect all the keys from the HashMap.
    fn keys(&self) -> Vec<Cow<'_, str>> {
        self.keys()
            .map(|k| Cow::Borrowed(k.as_str()))
            .collect::<Vec<_>>()
    }
}

/// An iterator over the carrier fields a propagator reads and writes.
#[derive(Debug)]
pub struct FieldIter<'a>(slice::Iter<'a, &'static str>);

impl<'a> FieldIter<'a> {
    fn new(fields: &'a [&'static str]) -> Self {
        FieldIter(fields.iter())
    }
}

impl<'a> Iterator for FieldIter<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().copied()
    }
}

/// Moves a [`SpanContext`] in and out of a carrier in one wire format.
pub trait SpanContextPropagator: Send + Sync + fmt::Debug {
    /// Reads a span context from the carrier.
    ///
    /// Never fails: a missing or ill-formed carrier produces a fresh local
    /// context (and a warning for the ill-formed case).
    fn extract(&self, extractor: &dyn Extractor) -> SpanContext;

    /// Writes `span_context` into the carrier. Contexts without a valid trace
    /// and span id are not injected.
    fn inject(&self, span_context: &SpanContext, injector: &mut dyn Injector);

    /// The carrier fields this propagator touches.
    fn fields(&self) -> FieldIter<'_>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_map_carrier_is_case_insensitive() {
        let mut carrier = HashMap::new();
        carrier.set("Header-Name", "value".to_string());
        assert_eq!(
            Extractor::get(&carrier, "HEADER-NAME"),
            Some(Cow::Borrowed("value"))
        );
        assert_eq!(Extractor::keys(&carrier), vec![Cow::Borrowed("header-name")]);
    }
}
