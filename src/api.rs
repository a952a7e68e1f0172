use crate::{
    error::{Error, Result},
    model::{Endpoint, Kind},
};
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Annotation in the v2 shape: the endpoint is implied by `localEndpoint`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct V2Annotation {
    pub timestamp: i64,
    pub value: String,
}

/// Span as reported by the `/api/v2` endpoints.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct V2Span {
    pub trace_id: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<Kind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_endpoint: Option<Endpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_endpoint: Option<Endpoint>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub annotations: Vec<V2Annotation>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub debug: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub shared: bool,
}

/// Annotation in the v1 shape, which carries its own endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct V1Annotation {
    pub timestamp: i64,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<Endpoint>,
}

/// v1 key/value pair. Values may be strings, booleans (addresses) or numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct V1BinaryAnnotation {
    pub key: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<Endpoint>,
}

impl V1BinaryAnnotation {
    pub fn value_string(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

/// Span as reported by the legacy `/api/v1` endpoints.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct V1Span {
    pub trace_id: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub annotations: Vec<V1Annotation>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub binary_annotations: Vec<V1BinaryAnnotation>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub debug: bool,
}

/// A span in either historical wire shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RawSpan {
    V1(V1Span),
    V2(V2Span),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    V1,
    V2,
}

const V2_ONLY_FIELDS: [&str; 5] = ["localEndpoint", "remoteEndpoint", "kind", "tags", "shared"];

/// Decides the wire shape of one JSON span object.
///
/// Fields only v2 has win; otherwise `binaryAnnotations` or annotations with
/// an embedded endpoint mark v1. Objects carrying neither are read as v2,
/// where both shapes mean the same thing.
pub fn detect(span: &Value) -> Result<Encoding> {
    let obj = span
        .as_object()
        .ok_or_else(|| Error::MalformedInput(format!("expected a span object, found {}", span)))?;
    if V2_ONLY_FIELDS.iter().any(|f| obj.contains_key(*f)) {
        return Ok(Encoding::V2);
    }
    let v1_annotations = obj
        .get("annotations")
        .and_then(Value::as_array)
        .map(|anns| anns.iter().any(|a| a.get("endpoint").is_some()))
        .unwrap_or(false);
    if obj.contains_key("binaryAnnotations") || v1_annotations {
        Ok(Encoding::V1)
    } else {
        Ok(Encoding::V2)
    }
}

impl RawSpan {
    pub fn from_value(value: Value) -> Result<RawSpan> {
        match detect(&value)? {
            Encoding::V1 => Ok(RawSpan::V1(serde_json::from_value(value)?)),
            Encoding::V2 => Ok(RawSpan::V2(serde_json::from_value(value)?)),
        }
    }

    pub fn trace_id(&self) -> &str {
        match self {
            RawSpan::V1(s) => &s.trace_id,
            RawSpan::V2(s) => &s.trace_id,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            RawSpan::V1(s) => &s.id,
            RawSpan::V2(s) => &s.id,
        }
    }
}

impl<'de> Deserialize<'de> for RawSpan {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        RawSpan::from_value(value).map_err(de::Error::custom)
    }
}

impl From<V1Span> for RawSpan {
    fn from(span: V1Span) -> Self {
        RawSpan::V1(span)
    }
}

impl From<V2Span> for RawSpan {
    fn from(span: V2Span) -> Self {
        RawSpan::V2(span)
    }
}

/// Decodes a JSON array of spans, accepting either shape per element.
pub fn decode_spans(bytes: &[u8]) -> Result<Vec<RawSpan>> {
    let values: Vec<Value> = serde_json::from_slice(bytes)?;
    values.into_iter().map(RawSpan::from_value).collect()
}

/// Decodes a JSON array of traces, each an array of spans.
pub fn decode_traces(bytes: &[u8]) -> Result<Vec<Vec<RawSpan>>> {
    let traces: Vec<Vec<Value>> = serde_json::from_slice(bytes)?;
    traces
        .into_iter()
        .map(|trace| trace.into_iter().map(RawSpan::from_value).collect())
        .collect()
}

/// Strict entry point: every element must be a v2 span.
pub fn decode_v2_spans(bytes: &[u8]) -> Result<Vec<V2Span>> {
    let values: Vec<Value> = serde_json::from_slice(bytes)?;
    values
        .into_iter()
        .enumerate()
        .map(|(i, value)| match detect(&value)? {
            Encoding::V2 => Ok(serde_json::from_value(value)?),
            Encoding::V1 => Err(Error::MalformedInput(format!(
                "span at index {} is not in the v2 format",
                i
            ))),
        })
        .collect()
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn is_false(b: &bool) -> bool {
    !*b
}
