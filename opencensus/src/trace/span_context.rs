use std::collections::VecDeque;
use std::fmt;
use std::num::ParseIntError;
use std::ops::{BitAnd, BitOr};
use std::str::FromStr;
use thiserror::Error;

/// A 128-bit trace identifier, rendered as 32 lowercase hex digits on the
/// wire. The all-zero value is invalid.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TraceId(u128);

impl TraceId {
    /// The invalid (all-zero) trace id.
    pub const INVALID: TraceId = TraceId(0);

    /// Construct from its u128 representation.
    pub const fn from_u128(value: u128) -> Self {
        TraceId(value)
    }

    /// The u128 representation of this trace id.
    pub const fn to_u128(self) -> u128 {
        self.0
    }

    /// The low 64 bits of this trace id, used for deterministic sampling.
    pub const fn low_u64(self) -> u64 {
        self.0 as u64
    }

    /// Parse 32 lowercase hex digits. Uppercase input is rejected so wire
    /// forms stay canonical.
    pub fn from_hex(hex: &str) -> Result<Self, ParseIntError> {
        if hex.len() != 32 || hex.bytes().any(|b| b.is_ascii_uppercase()) {
            // Force a uniform error through a failed parse.
            return u128::from_str_radix("", 16).map(TraceId);
        }
        u128::from_str_radix(hex, 16).map(TraceId)
    }

    /// Generate a fresh non-zero trace id.
    pub fn random() -> Self {
        loop {
            let id = rand::random::<u128>();
            if id != 0 {
                return TraceId(id);
            }
        }
    }

    /// Whether this id is non-zero.
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Debug for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{:032x}", self.0))
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{:032x}", self.0))
    }
}

impl fmt::LowerHex for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// A 64-bit span identifier, rendered as 16 lowercase hex digits on the wire.
/// The zero value is invalid.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpanId(u64);

impl SpanId {
    /// The invalid (zero) span id.
    pub const INVALID: SpanId = SpanId(0);

    /// Construct from its u64 representation.
    pub const fn from_u64(value: u64) -> Self {
        SpanId(value)
    }

    /// The u64 representation of this span id.
    pub const fn to_u64(self) -> u64 {
        self.0
    }

    /// Parse 16 lowercase hex digits.
    pub fn from_hex(hex: &str) -> Result<Self, ParseIntError> {
        if hex.len() != 16 || hex.bytes().any(|b| b.is_ascii_uppercase()) {
            return u64::from_str_radix("", 16).map(SpanId);
        }
        u64::from_str_radix(hex, 16).map(SpanId)
    }

    /// Generate a fresh non-zero span id.
    pub fn random() -> Self {
        loop {
            let id = rand::random::<u64>();
            if id != 0 {
                return SpanId(id);
            }
        }
    }

    /// Whether this id is non-zero.
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Debug for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{:016x}", self.0))
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{:016x}", self.0))
    }
}

impl fmt::LowerHex for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// Trace options carried with a span context; the low bit is the sampled
/// flag.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TraceFlags(u8);

impl TraceFlags {
    /// No flags set.
    pub const NOT_SAMPLED: TraceFlags = TraceFlags(0x00);
    /// The sampled bit.
    pub const SAMPLED: TraceFlags = TraceFlags(0x01);

    /// Construct from the raw byte.
    pub const fn new(flags: u8) -> Self {
        TraceFlags(flags)
    }

    /// The raw byte.
    pub const fn to_u8(self) -> u8 {
        self.0
    }

    /// Whether the sampled bit is set.
    pub const fn is_sampled(self) -> bool {
        self.0 & TraceFlags::SAMPLED.0 != 0
    }

    /// This set of flags with the sampled bit set.
    pub const fn with_sampled(self, sampled: bool) -> Self {
        if sampled {
            TraceFlags(self.0 | TraceFlags::SAMPLED.0)
        } else {
            TraceFlags(self.0 & !TraceFlags::SAMPLED.0)
        }
    }
}

impl BitAnd for TraceFlags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        TraceFlags(self.0 & rhs.0)
    }
}

impl BitOr for TraceFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        TraceFlags(self.0 | rhs.0)
    }
}

impl fmt::LowerHex for TraceFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// Vendor-specific configuration carried alongside a trace, represented as an
/// ordered list of up to 32 unique `key=value` entries.
///
/// A list with more than [`TraceState::MAX_ENTRIES`] members or any duplicate
/// key is dropped entirely; partial retention would change the meaning of the
/// remaining entries for downstream vendors.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct TraceState(Option<VecDeque<(String, String)>>);

impl TraceState {
    /// The empty `TraceState`.
    pub const NONE: TraceState = TraceState(None);

    /// Maximum number of list members.
    pub const MAX_ENTRIES: usize = 32;

    fn valid_key(key: &str) -> bool {
        if key.is_empty() || key.len() > 256 {
            return false;
        }

        let allowed_special = |b: u8| (b == b'_' || b == b'-' || b == b'*' || b == b'/');
        let mut vendor_start = None;
        for (i, &b) in key.as_bytes().iter().enumerate() {
            if !(b.is_ascii_lowercase() || b.is_ascii_digit() || allowed_special(b) || b == b'@') {
                return false;
            }

            if i == 0 && (!b.is_ascii_lowercase() && !b.is_ascii_digit()) {
                return false;
            } else if b == b'@' {
                if vendor_start.is_some() || i + 14 < key.len() {
                    return false;
                }
                vendor_start = Some(i);
            } else if let Some(start) = vendor_start {
                if i == start + 1 && !(b.is_ascii_lowercase() || b.is_ascii_digit()) {
                    return false;
                }
            }
        }

        true
    }

    fn valid_value(value: &str) -> bool {
        if value.len() > 256 {
            return false;
        }

        !(value.contains(',') || value.contains('='))
    }

    /// Creates a new `TraceState` from the given key-value collection.
    ///
    /// Fails on invalid keys or values, duplicate keys, or more than
    /// [`TraceState::MAX_ENTRIES`] entries.
    pub fn from_key_value<T, K, V>(entries: T) -> Result<Self, TraceStateError>
    where
        T: IntoIterator<Item = (K, V)>,
        K: ToString,
        V: ToString,
    {
        let mut ordered: VecDeque<(String, String)> = VecDeque::new();
        for (key, value) in entries {
            let (key, value) = (key.to_string(), value.to_string());
            if !TraceState::valid_key(key.as_str()) {
                return Err(TraceStateError::Key(key));
            }
            if !TraceState::valid_value(value.as_str()) {
                return Err(TraceStateError::Value(value));
            }
            if ordered.iter().any(|(k, _)| *k == key) {
                return Err(TraceStateError::DuplicateKey(key));
            }
            ordered.push_back((key, value));
            if ordered.len() > TraceState::MAX_ENTRIES {
                return Err(TraceStateError::TooManyEntries);
            }
        }

        if ordered.is_empty() {
            Ok(TraceState(None))
        } else {
            Ok(TraceState(Some(ordered)))
        }
    }

    /// Retrieves the value for a key, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.as_ref().and_then(|kvs| {
            kvs.iter()
                .find_map(|(k, v)| if k == key { Some(v.as_str()) } else { None })
        })
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.as_ref().map_or(0, VecDeque::len)
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serializes to the `key=value,key=value` header form.
    pub fn header(&self) -> String {
        self.0
            .as_ref()
            .map(|kvs| {
                kvs.iter()
                    .map(|(key, value)| format!("{key}={value}"))
                    .collect::<Vec<String>>()
                    .join(",")
            })
            .unwrap_or_default()
    }
}

impl FromStr for TraceState {
    type Err = TraceStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let list_members: Vec<&str> = s.split_terminator(',').collect();
        let mut key_value_pairs: Vec<(String, String)> = Vec::with_capacity(list_members.len());

        for member in list_members {
            match member.find('=') {
                None => return Err(TraceStateError::List(member.to_string())),
                Some(separator_index) => {
                    let (key, value) = member.split_at(separator_index);
                    key_value_pairs
                        .push((key.to_string(), value.trim_start_matches('=').to_string()));
                }
            }
        }

        TraceState::from_key_value(key_value_pairs)
    }
}

/// Error returned by `TraceState` operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TraceStateError {
    /// The key is invalid per the trace-context list-member grammar.
    #[error("{0} is not a valid trace state key")]
    Key(String),

    /// The value is invalid per the trace-context list-member grammar.
    #[error("{0} is not a valid trace state value")]
    Value(String),

    /// The list member could not be split into a key and a value.
    #[error("{0} is not a valid trace state list member")]
    List(String),

    /// The same key appeared more than once.
    #[error("duplicate trace state key {0}")]
    DuplicateKey(String),

    /// More than the allowed number of entries.
    #[error("trace state has more than {} entries", TraceState::MAX_ENTRIES)]
    TooManyEntries,
}

/// The propagation identifier set for a trace: `(trace_id, span_id, trace
/// options, trace state)` plus whether it was parsed from an inbound carrier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SpanContext {
    trace_id: TraceId,
    span_id: Option<SpanId>,
    trace_flags: TraceFlags,
    trace_state: TraceState,
    from_header: bool,
}

impl SpanContext {
    /// Construct a new `SpanContext`.
    pub fn new(
        trace_id: TraceId,
        span_id: Option<SpanId>,
        trace_flags: TraceFlags,
        trace_state: TraceState,
        from_header: bool,
    ) -> Self {
        SpanContext {
            trace_id,
            span_id,
            trace_flags,
            trace_state,
            from_header,
        }
    }

    /// Generate a fresh local context with a random trace id, no span id, and
    /// default options. Used whenever an inbound carrier is absent or
    /// malformed.
    pub fn generate() -> Self {
        SpanContext {
            trace_id: TraceId::random(),
            span_id: None,
            trace_flags: TraceFlags::default(),
            trace_state: TraceState::NONE,
            from_header: false,
        }
    }

    /// The trace id.
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    /// The span id, when one is set.
    pub fn span_id(&self) -> Option<SpanId> {
        self.span_id
    }

    /// Replace the span id. Used by the tracer as spans start and end.
    pub fn set_span_id(&mut self, span_id: Option<SpanId>) {
        self.span_id = span_id;
    }

    /// The trace options byte.
    pub fn trace_flags(&self) -> TraceFlags {
        self.trace_flags
    }

    /// Set or clear the sampled bit.
    pub fn set_sampled(&mut self, sampled: bool) {
        self.trace_flags = self.trace_flags.with_sampled(sampled);
    }

    /// Whether the sampled bit is set.
    pub fn is_sampled(&self) -> bool {
        self.trace_flags.is_sampled()
    }

    /// The vendor trace state.
    pub fn trace_state(&self) -> &TraceState {
        &self.trace_state
    }

    /// True iff this context was parsed from an inbound carrier.
    pub fn from_header(&self) -> bool {
        self.from_header
    }

    /// Whether the trace id and any present span id are non-zero.
    pub fn is_valid(&self) -> bool {
        self.trace_id.is_valid() && self.span_id.map_or(true, |id| id.is_valid())
    }
}

impl Default for SpanContext {
    fn default() -> Self {
        SpanContext::generate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_id_hex_round_trip() {
        let id = TraceId::from_hex("12345678901234567890123456789012").unwrap();
        assert_eq!(format!("{id}"), "12345678901234567890123456789012");
        assert!(TraceId::from_hex("12345678901234567890123456789012AB").is_err());
        assert!(TraceId::from_hex("123456789012345678901234567890GG").is_err());
        assert!(TraceId::from_hex("AB345678901234567890123456789012").is_err());
    }

    #[test]
    fn span_id_hex_round_trip() {
        let id = SpanId::from_hex("00f067aa0ba902b7").unwrap();
        assert_eq!(format!("{id}"), "00f067aa0ba902b7");
        assert_eq!(id.to_u64(), 0x00f0_67aa_0ba9_02b7);
        assert!(SpanId::from_hex("00f067aa0ba902").is_err());
    }

    #[test]
    fn random_ids_are_nonzero() {
        for _ in 0..64 {
            assert!(TraceId::random().is_valid());
            assert!(SpanId::random().is_valid());
        }
    }

    #[test]
    fn trace_state_rejects_duplicates() {
        let err = TraceState::from_key_value(vec![("foo", "1"), ("foo", "2")]).unwrap_err();
        assert!(matches!(err, TraceStateError::DuplicateKey(_)));
    }

    #[test]
    fn trace_state_rejects_more_than_32_entries() {
        let entries: Vec<(String, String)> = (0..33)
            .map(|i| (format!("key{i}"), format!("value{i}")))
            .collect();
        let err = TraceState::from_key_value(entries).unwrap_err();
        assert!(matches!(err, TraceStateError::TooManyEntries));
    }

    #[test]
    fn trace_state_preserves_order() {
        let state = TraceState::from_key_value(vec![("foo", "bar"), ("apple", "banana")]).unwrap();
        assert_eq!(state.header(), "foo=bar,apple=banana");
        assert_eq!(state.get("apple"), Some("banana"));
        assert_eq!(state.len(), 2);
    }

    #[test]
    fn generated_context_is_local() {
        let cx = SpanContext::generate();
        assert!(cx.is_valid());
        assert!(!cx.from_header());
        assert!(cx.span_id().is_none());
        assert!(!cx.is_sampled());
    }

    #[test]
    fn sampled_flag_round_trip() {
        let mut cx = SpanContext::generate();
        cx.set_sampled(true);
        assert!(cx.is_sampled());
        cx.set_sampled(false);
        assert!(!cx.is_sampled());
    }
}
