//! InfluxDB line protocol.
//!
//! ```text
//! measurement,tag1=val1,tag2=val2 field1=val1,field2=val2 timestamp_ns
//! ```
//!
//! See: <https://docs.influxdata.com/influxdb/v2/reference/syntax/line-protocol/>

use std::collections::BTreeMap;
use std::fmt;

use crate::{Error, Result};

/// A value that can be stored in an InfluxDB field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    /// Unsigned values that do not fit into an `i64`.
    UInteger(u64),
    String(String),
    Boolean(bool),
}

impl FieldValue {
    /// - Float: written as-is (`3.14`)
    /// - Integer: suffixed with `i` (`42i`)
    /// - UInteger: suffixed with `u` (`42u`)
    /// - String: double quoted, inner quotes and backslashes escaped
    /// - Boolean: `true` or `false`
    pub fn to_line_protocol(&self) -> String {
        match self {
            FieldValue::Float(v) => format!("{v}"),
            FieldValue::Integer(v) => format!("{v}i"),
            FieldValue::UInteger(v) => format!("{v}u"),
            FieldValue::String(v) => {
                let escaped = v.replace('\\', "\\\\").replace('"', "\\\"");
                format!("\"{escaped}\"")
            }
            FieldValue::Boolean(v) => v.to_string(),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_line_protocol())
    }
}

/// A single time-series point: one measurement, a tag set, at least one field and an optional
/// timestamp in nanoseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    measurement: String,
    tags: BTreeMap<String, String>,
    fields: Vec<(String, FieldValue)>,
    timestamp_ns: Option<i64>,
}

impl Point {
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            fields: Vec::new(),
            timestamp_ns: None,
        }
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Adds a field. A field with the same key replaces the earlier one.
    pub fn field(mut self, key: impl Into<String>, value: FieldValue) -> Self {
        let key = key.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(existing) => existing.1 = value,
            None => self.fields.push((key, value)),
        }
        self
    }

    pub fn timestamp(mut self, timestamp_ns: i64) -> Self {
        self.timestamp_ns = Some(timestamp_ns);
        self
    }

    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn fields(&self) -> &[(String, FieldValue)] {
        &self.fields
    }

    pub fn timestamp_ns(&self) -> Option<i64> {
        self.timestamp_ns
    }

    pub fn get_tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn get_field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Encodes the point as one line. Tags come out sorted by key; tags with an empty value are
    /// left out since InfluxDB refuses them.
    pub fn to_line_protocol(&self) -> Result<String> {
        if self.measurement.is_empty() {
            return Err(Error::InvalidPoint("measurement name is empty".to_string()));
        }
        if self.fields.is_empty() {
            return Err(Error::InvalidPoint(format!(
                "point for measurement {} has no fields",
                self.measurement
            )));
        }
        if self.tags.keys().any(String::is_empty) {
            return Err(Error::InvalidPoint(format!(
                "point for measurement {} has an empty tag key",
                self.measurement
            )));
        }
        if self.fields.iter().any(|(k, _)| k.is_empty()) {
            return Err(Error::InvalidPoint(format!(
                "point for measurement {} has an empty field key",
                self.measurement
            )));
        }

        let mut line = escape_measurement(&self.measurement);

        for (key, value) in self.tags.iter().filter(|(_, v)| !v.is_empty()) {
            line.push(',');
            line.push_str(&escape_key(key));
            line.push('=');
            line.push_str(&escape_key(value));
        }

        line.push(' ');
        for (i, (key, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                line.push(',');
            }
            line.push_str(&escape_key(key));
            line.push('=');
            line.push_str(&value.to_line_protocol());
        }

        if let Some(ts) = self.timestamp_ns {
            line.push(' ');
            line.push_str(&ts.to_string());
        }

        Ok(line)
    }
}

/// Encodes a set of points as a newline separated write body.
pub fn encode(points: &[Point]) -> Result<String> {
    let lines = points
        .iter()
        .map(Point::to_line_protocol)
        .collect::<Result<Vec<_>>>()?;
    Ok(lines.join("\n"))
}

/// Measurement names escape the same characters as keys except `=`.
fn escape_measurement(s: &str) -> String {
    escape(s, &[',', ' '])
}

/// Tag keys, tag values and field keys share the same escaping rules.
fn escape_key(s: &str) -> String {
    escape(s, &[',', '=', ' '])
}

/// Backslashes and control characters are always escaped, a raw newline would end the line.
fn escape(s: &str, special: &[char]) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            c if special.contains(&c) => {
                escaped.push('\\');
                escaped.push(c);
            }
            c => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_value_encoding() {
        assert_eq!(FieldValue::Float(3.15).to_line_protocol(), "3.15");
        assert_eq!(FieldValue::Integer(42).to_line_protocol(), "42i");
        assert_eq!(FieldValue::UInteger(u64::MAX).to_line_protocol(), "18446744073709551615u");
        assert_eq!(FieldValue::Boolean(false).to_line_protocol(), "false");
        assert_eq!(
            FieldValue::String("say \"hi\"".to_string()).to_line_protocol(),
            "\"say \\\"hi\\\"\""
        );
    }

    #[test]
    fn test_point_with_tags_and_timestamp() {
        let point = Point::new("stock_prices")
            .tag("symbol", "AAPL")
            .tag("source", "poller")
            .field("price", FieldValue::Float(150.2))
            .timestamp(1_704_067_200_000_000_000);

        // tags are sorted alphabetically by key
        assert_eq!(
            point.to_line_protocol().unwrap(),
            "stock_prices,source=poller,symbol=AAPL price=150.2 1704067200000000000"
        );
    }

    #[test]
    fn test_point_without_timestamp() {
        let point = Point::new("m")
            .field("a", FieldValue::Integer(1))
            .field("b", FieldValue::Boolean(true));
        assert_eq!(point.to_line_protocol().unwrap(), "m a=1i,b=true");
    }

    #[test]
    fn test_field_replaced_on_duplicate_key() {
        let point = Point::new("m")
            .field("a", FieldValue::Integer(1))
            .field("a", FieldValue::Integer(2));
        assert_eq!(point.fields().len(), 1);
        assert_eq!(point.get_field("a"), Some(&FieldValue::Integer(2)));
    }

    #[test]
    fn test_empty_tag_value_is_skipped() {
        let point = Point::new("m")
            .tag("symbol", "")
            .field("a", FieldValue::Float(1.5));
        assert_eq!(point.to_line_protocol().unwrap(), "m a=1.5");
    }

    #[test]
    fn test_point_without_fields_is_rejected() {
        let point = Point::new("m").tag("symbol", "AAPL");
        let err = point.to_line_protocol().unwrap_err();
        assert!(matches!(err, Error::InvalidPoint(_)));
    }

    #[test]
    fn test_escape_special_chars() {
        let point = Point::new("my measurement")
            .tag("tag key", "tag,value")
            .field("field=key", FieldValue::String("hello \"world\"".to_string()))
            .timestamp(3_000_000_000);

        assert_eq!(
            point.to_line_protocol().unwrap(),
            "my\\ measurement,tag\\ key=tag\\,value field\\=key=\"hello \\\"world\\\"\" 3000000000"
        );
    }

    #[test]
    fn test_escape_backslash_and_control_chars() {
        let point = Point::new("m\tx")
            .tag("symbol", "AA\nPL")
            .tag("source", "BRK\\")
            .field("a\rb", FieldValue::Float(1.0));

        let line = point.to_line_protocol().unwrap();
        assert_eq!(line, "m\\tx,source=BRK\\\\,symbol=AA\\nPL a\\rb=1");
        assert!(!line.contains('\n'));
    }

    #[test]
    fn test_empty_names_are_rejected() {
        let points = [
            Point::new("").field("a", FieldValue::Integer(1)),
            Point::new("m").tag("", "v").field("a", FieldValue::Integer(1)),
            Point::new("m").field("", FieldValue::Integer(1)),
        ];
        for point in points {
            assert!(
                matches!(point.to_line_protocol(), Err(Error::InvalidPoint(_))),
                "{point:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_encode_joins_lines() {
        let points = vec![
            Point::new("m").field("a", FieldValue::Integer(1)).timestamp(1),
            Point::new("m").field("a", FieldValue::Integer(2)).timestamp(2),
        ];
        assert_eq!(encode(&points).unwrap(), "m a=1i 1\nm a=2i 2");
    }
}
