use std::fmt;
use std::time::SystemTime;

use crate::trace::{SpanId, TraceId, TraceState};

/// Maximum byte length of an attribute string value before truncation.
pub const MAX_ATTRIBUTE_STRING_LEN: usize = 256;
/// Maximum number of attributes per span.
pub const MAX_SPAN_ATTRIBUTES: usize = 32;
/// Maximum number of annotations per span.
pub const MAX_SPAN_ANNOTATIONS: usize = 32;
/// Maximum number of message events per span.
pub const MAX_SPAN_MESSAGE_EVENTS: usize = 128;
/// Maximum number of links per span.
pub const MAX_SPAN_LINKS: usize = 32;

/// The kind of operation a span describes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SpanKind {
    /// Not specified.
    #[default]
    Unspecified,
    /// The span covers the server side handling of a remote call.
    Server,
    /// The span covers the client side of a remote call.
    Client,
}

/// A string value bounded at [`MAX_ATTRIBUTE_STRING_LEN`] bytes, retaining
/// the number of bytes removed so backends can surface the truncation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TruncatableString {
    value: String,
    truncated_byte_count: usize,
}

impl TruncatableString {
    /// Create a possibly truncated string. Truncation happens on a char
    /// boundary at or below the byte limit.
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        if value.len() <= MAX_ATTRIBUTE_STRING_LEN {
            return TruncatableString {
                value,
                truncated_byte_count: 0,
            };
        }
        let mut cut = MAX_ATTRIBUTE_STRING_LEN;
        while !value.is_char_boundary(cut) {
            cut -= 1;
        }
        let truncated_byte_count = value.len() - cut;
        let mut value = value;
        value.truncate(cut);
        TruncatableString {
            value,
            truncated_byte_count,
        }
    }

    /// The retained value.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Number of bytes removed by truncation, zero when intact.
    pub fn truncated_byte_count(&self) -> usize {
        self.truncated_byte_count
    }
}

impl fmt::Display for TruncatableString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl<T: Into<String>> From<T> for TruncatableString {
    fn from(value: T) -> Self {
        TruncatableString::new(value)
    }
}

/// A scalar attribute value. Unsupported types are rejected at the API
/// boundary by construction.
#[derive(Clone, Debug, PartialEq)]
pub enum AttributeValue {
    /// Boolean.
    Bool(bool),
    /// Signed 64-bit integer.
    I64(i64),
    /// 64-bit float.
    F64(f64),
    /// String, truncated at the attribute byte limit.
    String(TruncatableString),
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::I64(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::F64(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(TruncatableString::new(value))
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(TruncatableString::new(value))
    }
}

/// An insertion-ordered attribute map bounded at a fixed capacity, counting
/// the entries it had to drop.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Attributes {
    entries: Vec<(String, AttributeValue)>,
    dropped_count: u32,
    capacity: usize,
}

impl Attributes {
    /// An empty map bounded at [`MAX_SPAN_ATTRIBUTES`].
    pub fn new() -> Self {
        Attributes::with_capacity(MAX_SPAN_ATTRIBUTES)
    }

    /// An empty map with an explicit bound.
    pub fn with_capacity(capacity: usize) -> Self {
        Attributes {
            entries: Vec::new(),
            dropped_count: 0,
            capacity,
        }
    }

    /// Insert or replace a value. New keys beyond the capacity are dropped
    /// and counted.
    pub fn set(&mut self, key: impl Into<String>, value: AttributeValue) {
        let key = key.into();
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
            return;
        }
        if self.entries.len() < self.capacity {
            self.entries.push((key, value));
        } else {
            self.dropped_count = self.dropped_count.saturating_add(1);
        }
    }

    /// Look up a value by key.
    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.entries
            .iter()
            .find_map(|(k, v)| if k == key { Some(v) } else { None })
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries are retained.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of entries dropped at the capacity bound.
    pub fn dropped_count(&self) -> u32 {
        self.dropped_count
    }
}

impl FromIterator<(String, AttributeValue)> for Attributes {
    fn from_iter<T: IntoIterator<Item = (String, AttributeValue)>>(iter: T) -> Self {
        let mut attributes = Attributes::new();
        for (k, v) in iter {
            attributes.set(k, v);
        }
        attributes
    }
}

/// A list bounded at a fixed capacity, counting dropped items.
#[derive(Clone, Debug, PartialEq)]
pub struct BoundedList<T> {
    items: Vec<T>,
    dropped_count: u32,
    capacity: usize,
}

impl<T> BoundedList<T> {
    /// An empty list with the given bound.
    pub fn with_capacity(capacity: usize) -> Self {
        BoundedList {
            items: Vec::new(),
            dropped_count: 0,
            capacity,
        }
    }

    /// Append an item, dropping and counting it when at capacity.
    pub fn push(&mut self, item: T) {
        if self.items.len() < self.capacity {
            self.items.push(item);
        } else {
            self.dropped_count = self.dropped_count.saturating_add(1);
        }
    }

    /// The retained items.
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Number of retained items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether no items are retained.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of items dropped at the capacity bound.
    pub fn dropped_count(&self) -> u32 {
        self.dropped_count
    }
}

/// A time-stamped text annotation on a span.
#[derive(Clone, Debug, PartialEq)]
pub struct Annotation {
    /// Human readable description of the event.
    pub description: TruncatableString,
    /// Attributes qualifying the annotation.
    pub attributes: Attributes,
    /// When the annotation was recorded.
    pub timestamp: SystemTime,
}

/// A message sent or received over a span's operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageEvent {
    /// Caller-assigned message identifier.
    pub id: i64,
    /// When the event was recorded.
    pub timestamp: SystemTime,
    /// Uncompressed payload size in bytes.
    pub uncompressed_size: i64,
    /// Compressed payload size in bytes, zero when not compressed.
    pub compressed_size: i64,
}

/// The relationship of a linked span to the linking span.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LinkType {
    /// Unknown relationship.
    #[default]
    Unspecified,
    /// The linked span is a child of the linking span.
    ChildLinkedSpan,
    /// The linked span is a parent of the linking span.
    ParentLinkedSpan,
}

/// A pointer to a span in the same or another trace.
#[derive(Clone, Debug, PartialEq)]
pub struct Link {
    /// Trace id of the linked span.
    pub trace_id: TraceId,
    /// Span id of the linked span.
    pub span_id: SpanId,
    /// The relationship of the linked span.
    pub link_type: LinkType,
    /// Attributes qualifying the link.
    pub attributes: Attributes,
}

/// Canonical completion status of a span.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Status {
    /// Canonical status code; zero is OK.
    pub canonical_code: i32,
    /// Developer-facing message.
    pub message: String,
}

impl Status {
    /// The OK status.
    pub fn ok() -> Self {
        Status::default()
    }

    /// A non-OK status with a code and message.
    pub fn new(canonical_code: i32, message: impl Into<String>) -> Self {
        Status {
            canonical_code,
            message: message.into(),
        }
    }

    /// Whether the code signals success.
    pub fn is_ok(&self) -> bool {
        self.canonical_code == 0
    }
}

/// A single frame of a captured call stack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StackFrame {
    /// Fully-qualified function name.
    pub function_name: String,
    /// Source file name.
    pub file_name: String,
    /// Line number, zero when unavailable.
    pub line_number: i64,
    /// Column number, zero when unavailable.
    pub column_number: i64,
}

/// A captured call stack with a hashable identity so backends can dedupe
/// repeated stacks.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StackTrace {
    /// The frames, outermost last.
    pub frames: Vec<StackFrame>,
    /// Caller-computed hash identifying this stack, zero when unset.
    pub stack_trace_hash_id: u64,
}

/// Mutable recording state for a single timed operation.
///
/// A span is created by the tracer with its start time, mutated only by the
/// task that owns it, and finalized exactly once into an immutable
/// [`SpanData`] snapshot.
#[derive(Debug)]
pub(crate) struct Span {
    pub(crate) name: TruncatableString,
    pub(crate) span_id: SpanId,
    pub(crate) parent_span_id: Option<SpanId>,
    pub(crate) span_kind: SpanKind,
    pub(crate) start_time: SystemTime,
    pub(crate) end_time: Option<SystemTime>,
    pub(crate) attributes: Attributes,
    pub(crate) annotations: BoundedList<Annotation>,
    pub(crate) message_events: BoundedList<MessageEvent>,
    pub(crate) links: BoundedList<Link>,
    pub(crate) status: Option<Status>,
    pub(crate) stack_trace: Option<StackTrace>,
    pub(crate) same_process_as_parent_span: Option<bool>,
    pub(crate) child_span_count: u32,
}

impl Span {
    pub(crate) fn new(name: &str, span_id: SpanId, parent_span_id: Option<SpanId>) -> Self {
        Span {
            name: TruncatableString::new(name),
            span_id,
            parent_span_id,
            span_kind: SpanKind::Unspecified,
            start_time: SystemTime::now(),
            end_time: None,
            attributes: Attributes::new(),
            annotations: BoundedList::with_capacity(MAX_SPAN_ANNOTATIONS),
            message_events: BoundedList::with_capacity(MAX_SPAN_MESSAGE_EVENTS),
            links: BoundedList::with_capacity(MAX_SPAN_LINKS),
            status: None,
            stack_trace: None,
            same_process_as_parent_span: None,
            child_span_count: 0,
        }
    }

    pub(crate) fn span_id(&self) -> SpanId {
        self.span_id
    }

    pub(crate) fn parent_span_id(&self) -> Option<SpanId> {
        self.parent_span_id
    }

    pub(crate) fn end(&mut self) {
        self.end_time = Some(SystemTime::now());
    }

    pub(crate) fn snapshot(&self, trace_id: TraceId, trace_state: &TraceState) -> SpanData {
        SpanData {
            trace_id,
            span_id: self.span_id,
            parent_span_id: self.parent_span_id,
            trace_state: trace_state.clone(),
            name: self.name.clone(),
            span_kind: self.span_kind,
            start_time: self.start_time,
            end_time: self.end_time.unwrap_or(self.start_time),
            attributes: self.attributes.clone(),
            annotations: self.annotations.clone(),
            message_events: self.message_events.clone(),
            links: self.links.clone(),
            status: self.status.clone(),
            stack_trace: self.stack_trace.clone(),
            same_process_as_parent_span: self.same_process_as_parent_span,
            child_span_count: self.child_span_count,
        }
    }
}

/// Immutable snapshot of a finished span, handed to exporters.
#[derive(Clone, Debug)]
pub struct SpanData {
    /// Trace id shared by all spans in the trace.
    pub trace_id: TraceId,
    /// Id of this span.
    pub span_id: SpanId,
    /// Id of the parent span, `None` for roots.
    pub parent_span_id: Option<SpanId>,
    /// Vendor trace state inherited from propagation.
    pub trace_state: TraceState,
    /// Operation name.
    pub name: TruncatableString,
    /// Kind of operation.
    pub span_kind: SpanKind,
    /// When the operation started.
    pub start_time: SystemTime,
    /// When the operation finished.
    pub end_time: SystemTime,
    /// Recorded attributes.
    pub attributes: Attributes,
    /// Recorded annotations.
    pub annotations: BoundedList<Annotation>,
    /// Recorded message events.
    pub message_events: BoundedList<MessageEvent>,
    /// Recorded links.
    pub links: BoundedList<Link>,
    /// Completion status, when set.
    pub status: Option<Status>,
    /// Captured call stack, when set.
    pub stack_trace: Option<StackTrace>,
    /// Whether the parent span ran in this process.
    pub same_process_as_parent_span: Option<bool>,
    /// Number of child spans started under this span.
    pub child_span_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_preserves_dropped_byte_count() {
        let long = "x".repeat(MAX_ATTRIBUTE_STRING_LEN + 40);
        let truncated = TruncatableString::new(long);
        assert_eq!(truncated.value().len(), MAX_ATTRIBUTE_STRING_LEN);
        assert_eq!(truncated.truncated_byte_count(), 40);

        let intact = TruncatableString::new("short");
        assert_eq!(intact.truncated_byte_count(), 0);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        // Multi-byte character straddling the limit is removed whole.
        let mut value = "a".repeat(MAX_ATTRIBUTE_STRING_LEN - 1);
        value.push('é');
        let truncated = TruncatableString::new(value);
        assert!(truncated.value().len() <= MAX_ATTRIBUTE_STRING_LEN);
        assert!(truncated.value().chars().all(|c| c == 'a'));
    }

    #[test]
    fn attributes_replace_and_drop() {
        let mut attributes = Attributes::with_capacity(2);
        attributes.set("a", AttributeValue::from(1i64));
        attributes.set("b", AttributeValue::from(true));
        attributes.set("c", AttributeValue::from("dropped"));
        attributes.set("a", AttributeValue::from(2i64));
        assert_eq!(attributes.len(), 2);
        assert_eq!(attributes.dropped_count(), 1);
        assert_eq!(attributes.get("a"), Some(&AttributeValue::I64(2)));
        assert!(attributes.get("c").is_none());
    }

    #[test]
    fn bounded_list_counts_drops() {
        let mut list = BoundedList::with_capacity(1);
        list.push(1);
        list.push(2);
        assert_eq!(list.items(), &[1]);
        assert_eq!(list.dropped_count(), 1);
    }

    #[test]
    fn snapshot_copies_span_state() {
        let mut span = Span::new("op", SpanId::from_u64(7), Some(SpanId::from_u64(3)));
        span.attributes.set("k", AttributeValue::from("v"));
        span.status = Some(Status::new(13, "internal"));
        span.end();

        let data = span.snapshot(TraceId::from_u128(1), &TraceState::NONE);
        assert_eq!(data.span_id, SpanId::from_u64(7));
        assert_eq!(data.parent_span_id, Some(SpanId::from_u64(3)));
        assert_eq!(data.name.value(), "op");
        assert!(data.end_time >= data.start_time);
        assert!(!data.status.as_ref().unwrap().is_ok());
    }
}
