//! Turns decoded [`Record`]s into validated InfluxDB [`Point`]s.
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;
use stockdb_influx::{FieldValue, Point};
use thiserror::Error;

use crate::message::Record;

const TAG_SYMBOL: &str = "symbol";
const TAG_SOURCE: &str = "source";

/// Offset-less layouts, read as UTC.
const NAIVE_DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Why a record could not be turned into a point.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RejectReason {
    #[error("analysis must be a mapping, got {0}")]
    AnalysisNotMapping(&'static str),

    #[error("field {field} has unsupported value type {kind}")]
    UnsupportedField { field: String, kind: &'static str },

    #[error("invalid timestamp {0}")]
    InvalidTimestamp(String),

    #[error("analysis has no fields")]
    NoFields,

    #[error("analysis has a field with an empty name")]
    EmptyFieldKey,
}

/// A record that was refused by the [`PointBuilder`], kept together with the reason so the
/// caller can log both.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Rejected record (symbol: {:?}) - {reason}", .record.symbol)]
pub struct Rejected {
    pub record: Record,
    pub reason: RejectReason,
}

#[derive(Debug, Clone)]
pub struct PointBuilder {
    measurement: String,
}

impl PointBuilder {
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
        }
    }

    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    /// Builds the point for a record. Any invalid part rejects the whole record, a point is never
    /// built from a subset of the fields.
    pub fn build(&self, record: &Record) -> Result<Point, Rejected> {
        self.try_build(record).map_err(|reason| Rejected {
            record: record.clone(),
            reason,
        })
    }

    fn try_build(&self, record: &Record) -> Result<Point, RejectReason> {
        let analysis = record
            .analysis
            .as_object()
            .ok_or_else(|| RejectReason::AnalysisNotMapping(json_kind(&record.analysis)))?;

        let mut point =
            Point::new(self.measurement.as_str()).tag(TAG_SOURCE, record.source.as_str());
        if let Some(symbol) = record.symbol.as_deref() {
            point = point.tag(TAG_SYMBOL, symbol);
        }

        for (key, value) in analysis {
            if key.is_empty() {
                return Err(RejectReason::EmptyFieldKey);
            }
            if let Some(field) = field_value(key, value)? {
                point = point.field(key.as_str(), field);
            }
        }
        if point.fields().is_empty() {
            return Err(RejectReason::NoFields);
        }

        if let Some(ts) = record.timestamp.as_ref() {
            point = point.timestamp(timestamp_ns(ts)?);
        }
        Ok(point)
    }
}

/// `null` values are skipped, nested values are not storable.
fn field_value(key: &str, value: &Value) -> Result<Option<FieldValue>, RejectReason> {
    let field = match value {
        Value::Null => return Ok(None),
        Value::Bool(b) => FieldValue::Boolean(*b),
        Value::String(s) => FieldValue::String(s.clone()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                FieldValue::Integer(i)
            } else if let Some(u) = n.as_u64() {
                FieldValue::UInteger(u)
            } else if let Some(f) = n.as_f64() {
                FieldValue::Float(f)
            } else {
                return Err(RejectReason::UnsupportedField {
                    field: key.to_string(),
                    kind: "number",
                });
            }
        }
        Value::Array(_) | Value::Object(_) => {
            return Err(RejectReason::UnsupportedField {
                field: key.to_string(),
                kind: json_kind(value),
            });
        }
    };
    Ok(Some(field))
}

/// ISO 8601 strings and epoch nanoseconds (integer or float) are accepted. Strings without an
/// offset are taken as UTC.
fn timestamp_ns(value: &Value) -> Result<i64, RejectReason> {
    let invalid = || RejectReason::InvalidTimestamp(value.to_string());
    match value {
        Value::String(s) => parse_datetime_ns(s.trim()).ok_or_else(invalid),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(i)
            } else if n.is_u64() {
                Err(invalid())
            } else {
                match n.as_f64() {
                    Some(f) if f.is_finite() && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
                        Ok(f.trunc() as i64)
                    }
                    _ => Err(invalid()),
                }
            }
        }
        _ => Err(invalid()),
    }
}

fn parse_datetime_ns(s: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.timestamp_nanos_opt();
    }
    let naive = NAIVE_DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })?;
    naive.and_utc().timestamp_nanos_opt()
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
