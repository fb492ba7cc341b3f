use serde::{Deserialize, Deserializer, de};
use serde_json::{Map, Value};
use tracing::warn;

use crate::point::json_kind;
use crate::{Error, Result};

const DEFAULT_SOURCE: &str = "unknown";

/// One analysis record as published by the upstream producers.
///
/// Only the envelope is typed. `analysis` is kept as raw JSON and validated when the point is
/// built, so a malformed record can be rejected on its own without failing the whole message.
/// Tag values are lenient: `null` counts as missing and numbers or booleans are stringified.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Record {
    #[serde(default, deserialize_with = "tag_value")]
    pub symbol: Option<String>,
    #[serde(default = "default_source", deserialize_with = "source_tag")]
    pub source: String,
    #[serde(default)]
    pub timestamp: Option<Value>,
    #[serde(default = "empty_analysis")]
    pub analysis: Value,
}

fn default_source() -> String {
    DEFAULT_SOURCE.to_string()
}

fn empty_analysis() -> Value {
    Value::Object(Map::new())
}

fn tag_value<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(de::Error::custom(format!(
            "tag value must be a scalar, got {}",
            json_kind(&other)
        ))),
    }
}

fn source_tag<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(tag_value(deserializer)?.unwrap_or_else(default_source))
}

/// Ordered records handed to a single sink write.
pub type Batch = Vec<Record>;

/// Decodes a message body holding either a single record or an array of records.
///
/// Only a body that is not JSON, or not an object or array, fails the message. An array element
/// that is not a valid record is logged and skipped, its siblings are kept.
pub fn decode_batch(payload: &[u8]) -> Result<Batch> {
    let payload: Value = serde_json::from_slice(payload)
        .map_err(|e| Error::Record(format!("Decoding message payload: {e}")))?;
    let elements = match payload {
        Value::Array(elements) => elements,
        Value::Object(_) => vec![payload],
        other => {
            return Err(Error::Record(format!(
                "Message payload must be a record or an array of records, got {}",
                json_kind(&other)
            )));
        }
    };

    Ok(elements
        .into_iter()
        .enumerate()
        .filter_map(|(index, element)| {
            serde_json::from_value::<Record>(element)
                .inspect_err(|e| warn!(index, error = %e, "Skipping malformed record"))
                .ok()
        })
        .collect())
}
