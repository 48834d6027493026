use std::time::SystemTime;

use serde::Serialize;

use crate::common::as_unix_nano;

fn is_zero(v: &u32) -> bool {
    *v == 0
}

/// A finished span flattened into a serializable shape.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Span {
    trace_id: String,
    span_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_span_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trace_state: Option<String>,
    name: String,
    #[serde(skip_serializing_if = "is_zero")]
    name_truncated_byte_count: u32,
    kind: &'static str,
    #[serde(serialize_with = "as_unix_nano")]
    start_time_unix_nano: SystemTime,
    #[serde(serialize_with = "as_unix_nano")]
    end_time_unix_nano: SystemTime,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attributes: Vec<KeyValue>,
    #[serde(skip_serializing_if = "is_zero")]
    dropped_attributes_count: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    annotations: Vec<Annotation>,
    #[serde(skip_serializing_if = "is_zero")]
    dropped_annotations_count: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    message_events: Vec<MessageEvent>,
    #[serde(skip_serializing_if = "is_zero")]
    dropped_message_events_count: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    links: Vec<Link>,
    #[serde(skip_serializing_if = "is_zero")]
    dropped_links_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<Status>,
    #[serde(skip_serializing_if = "Option::is_none")]
    same_process_as_parent_span: Option<bool>,
    #[serde(skip_serializing_if = "is_zero")]
    child_span_count: u32,
}

impl From<&opencensus::trace::SpanData> for Span {
    fn from(data: &opencensus::trace::SpanData) -> Self {
        Span {
            trace_id: data.trace_id.to_string(),
            span_id: data.span_id.to_string(),
            parent_span_id: data.parent_span_id.map(|id| id.to_string()),
            trace_state: Some(data.trace_state.header()).filter(|header| !header.is_empty()),
            name: data.name.value().to_string(),
            name_truncated_byte_count: data.name.truncated_byte_count() as u32,
            kind: span_kind(data.span_kind),
            start_time_unix_nano: data.start_time,
            end_time_unix_nano: data.end_time,
            attributes: data
                .attributes
                .iter()
                .map(|(key, value)| KeyValue::new(key, value))
                .collect(),
            dropped_attributes_count: data.attributes.dropped_count(),
            annotations: data.annotations.items().iter().map(Into::into).collect(),
            dropped_annotations_count: data.annotations.dropped_count(),
            message_events: data
                .message_events
                .items()
                .iter()
                .map(Into::into)
                .collect(),
            dropped_message_events_count: data.message_events.dropped_count(),
            links: data.links.items().iter().map(Into::into).collect(),
            dropped_links_count: data.links.dropped_count(),
            status: data.status.as_ref().map(Into::into),
            same_process_as_parent_span: data.same_process_as_parent_span,
            child_span_count: data.child_span_count,
        }
    }
}

fn span_kind(kind: opencensus::trace::SpanKind) -> &'static str {
    match kind {
        opencensus::trace::SpanKind::Unspecified => "SPAN_KIND_UNSPECIFIED",
        opencensus::trace::SpanKind::Server => "SERVER",
        opencensus::trace::SpanKind::Client => "CLIENT",
    }
}

#[derive(Debug, Serialize)]
struct KeyValue {
    key: String,
    value: Value,
}

impl KeyValue {
    fn new(key: &str, value: &opencensus::trace::AttributeValue) -> Self {
        KeyValue {
            key: key.to_string(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum Value {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
}

impl From<&opencensus::trace::AttributeValue> for Value {
    fn from(value: &opencensus::trace::AttributeValue) -> Self {
        match value {
            opencensus::trace::AttributeValue::Bool(v) => Value::Bool(*v),
            opencensus::trace::AttributeValue::I64(v) => Value::Int(*v),
            opencensus::trace::AttributeValue::F64(v) => Value::Double(*v),
            opencensus::trace::AttributeValue::String(v) => Value::String(v.value().to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Annotation {
    description: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attributes: Vec<KeyValue>,
    #[serde(serialize_with = "as_unix_nano")]
    timestamp_unix_nano: SystemTime,
}

impl From<&opencensus::trace::Annotation> for Annotation {
    fn from(annotation: &opencensus::trace::Annotation) -> Self {
        Annotation {
            description: annotation.description.value().to_string(),
            attributes: annotation
                .attributes
                .iter()
                .map(|(key, value)| KeyValue::new(key, value))
                .collect(),
            timestamp_unix_nano: annotation.timestamp,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MessageEvent {
    id: i64,
    #[serde(serialize_with = "as_unix_nano")]
    timestamp_unix_nano: SystemTime,
    uncompressed_size: i64,
    compressed_size: i64,
}

impl From<&opencensus::trace::MessageEvent> for MessageEvent {
    fn from(event: &opencensus::trace::MessageEvent) -> Self {
        MessageEvent {
            id: event.id,
            timestamp_unix_nano: event.timestamp,
            uncompressed_size: event.uncompressed_size,
            compressed_size: event.compressed_size,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Link {
    trace_id: String,
    span_id: String,
    #[serde(rename = "type")]
    link_type: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attributes: Vec<KeyValue>,
}

impl From<&opencensus::trace::Link> for Link {
    fn from(link: &opencensus::trace::Link) -> Self {
        Link {
            trace_id: link.trace_id.to_string(),
            span_id: link.span_id.to_string(),
            link_type: match link.link_type {
                opencensus::trace::LinkType::Unspecified => "TYPE_UNSPECIFIED",
                opencensus::trace::LinkType::ChildLinkedSpan => "CHILD_LINKED_SPAN",
                opencensus::trace::LinkType::ParentLinkedSpan => "PARENT_LINKED_SPAN",
            },
            attributes: link
                .attributes
                .iter()
                .map(|(key, value)| KeyValue::new(key, value))
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Status {
    code: i32,
    #[serde(skip_serializing_if = "String::is_empty")]
    message: String,
}

impl From<&opencensus::trace::Status> for Status {
    fn from(status: &opencensus::trace::Status) -> Self {
        Status {
            code: status.canonical_code,
            message: status.message.clone(),
        }
    }
}
