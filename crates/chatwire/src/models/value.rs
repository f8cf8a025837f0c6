use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S %:z %A";

/// The value a tool produced, as a closed set of shapes with fixed text formatting.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ToolValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<FixedOffset>),
    Json(Value),
}

impl ToolValue {
    /// Formats the value for vendors that carry tool output as plain text.
    ///
    /// Scalars are written directly, floats in their shortest round-trip form,
    /// timestamps as `YYYY-MM-DD HH:MM:SS ±HH:MM Weekday` (empty for the zero
    /// timestamp) and anything else as JSON.
    pub fn to_text(&self) -> String {
        match self {
            ToolValue::Null => String::new(),
            ToolValue::Bool(b) => b.to_string(),
            ToolValue::Int(i) => i.to_string(),
            ToolValue::UInt(u) => u.to_string(),
            ToolValue::Float(f) => f.to_string(),
            ToolValue::Text(s) => s.clone(),
            ToolValue::Timestamp(ts) if is_zero_timestamp(ts) => String::new(),
            ToolValue::Timestamp(ts) => ts.format(TIMESTAMP_FORMAT).to_string(),
            ToolValue::Json(value) => value.to_string(),
        }
    }

    /// Embeds the value in a JSON document: structured values stay structured,
    /// everything else becomes its text form.
    pub fn to_output(&self) -> Value {
        match self {
            ToolValue::Json(value) => value.clone(),
            other => Value::String(other.to_text()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ToolValue::Null | ToolValue::Json(Value::Null))
    }
}

/// `0001-01-01 00:00:00 UTC`, the conventional "unset" timestamp.
fn is_zero_timestamp(ts: &DateTime<FixedOffset>) -> bool {
    NaiveDate::from_ymd_opt(1, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|zero| ts.naive_utc() == zero)
        .unwrap_or(false)
}

impl From<Value> for ToolValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => ToolValue::Null,
            Value::Bool(b) => ToolValue::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    ToolValue::Int(i)
                } else if let Some(u) = n.as_u64() {
                    ToolValue::UInt(u)
                } else {
                    ToolValue::Float(n.as_f64().unwrap_or_default())
                }
            }
            Value::String(s) => ToolValue::Text(s),
            other => ToolValue::Json(other),
        }
    }
}

impl From<bool> for ToolValue {
    fn from(b: bool) -> Self {
        ToolValue::Bool(b)
    }
}

impl From<i64> for ToolValue {
    fn from(i: i64) -> Self {
        ToolValue::Int(i)
    }
}

impl From<i32> for ToolValue {
    fn from(i: i32) -> Self {
        ToolValue::Int(i.into())
    }
}

impl From<u64> for ToolValue {
    fn from(u: u64) -> Self {
        ToolValue::UInt(u)
    }
}

impl From<usize> for ToolValue {
    fn from(u: usize) -> Self {
        ToolValue::UInt(u as u64)
    }
}

impl From<f64> for ToolValue {
    fn from(f: f64) -> Self {
        ToolValue::Float(f)
    }
}

impl From<&str> for ToolValue {
    fn from(s: &str) -> Self {
        ToolValue::Text(s.to_string())
    }
}

impl From<String> for ToolValue {
    fn from(s: String) -> Self {
        ToolValue::Text(s)
    }
}

impl From<DateTime<FixedOffset>> for ToolValue {
    fn from(ts: DateTime<FixedOffset>) -> Self {
        ToolValue::Timestamp(ts)
    }
}

impl From<DateTime<Utc>> for ToolValue {
    fn from(ts: DateTime<Utc>) -> Self {
        ToolValue::Timestamp(ts.fixed_offset())
    }
}

impl Serialize for ToolValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ToolValue::Null => serializer.serialize_unit(),
            ToolValue::Bool(b) => serializer.serialize_bool(*b),
            ToolValue::Int(i) => serializer.serialize_i64(*i),
            ToolValue::UInt(u) => serializer.serialize_u64(*u),
            ToolValue::Float(f) => serializer.serialize_f64(*f),
            ToolValue::Text(s) => serializer.serialize_str(s),
            ToolValue::Timestamp(ts) => serializer.serialize_str(&ts.to_rfc3339()),
            ToolValue::Json(value) => value.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for ToolValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(ToolValue::from)
    }
}
