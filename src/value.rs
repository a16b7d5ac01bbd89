use std::cmp::Ordering;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Map, Value as JsonValue};

/// 2^63 as a float; integral floats in `[-2^63, 2^63)` are exact `i64`s.
const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;

// ---------------------------------------------------------------------------
// Numbers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

/// Exact, total ordering form of a number shared by the comparator and the
/// key encoder: NaN first, then by nearest `f64`, ties broken by the exact
/// integer remainder `i - (i as f64)`.
#[derive(Debug, Clone, Copy)]
pub(crate) enum CanonicalNumber {
    NaN,
    Ordered { approx: f64, remainder: i64 },
}

impl Number {
    pub fn from_json(n: &serde_json::Number) -> Self {
        if let Some(i) = n.as_i64() {
            Number::Int(i)
        } else if let Some(u) = n.as_u64() {
            Number::Float(u as f64)
        } else {
            Number::Float(n.as_f64().unwrap_or(f64::NAN))
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Number::Int(i) => JsonValue::Number((*i).into()),
            Number::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
        }
    }

    pub(crate) fn canonical(&self) -> CanonicalNumber {
        match *self {
            Number::Int(i) => canonical_int(i),
            Number::Float(f) if f.is_nan() => CanonicalNumber::NaN,
            Number::Float(f) if f.fract() == 0.0 && (-TWO_POW_63..TWO_POW_63).contains(&f) => {
                canonical_int(f as i64)
            }
            Number::Float(f) => CanonicalNumber::Ordered {
                approx: f,
                remainder: 0,
            },
        }
    }
}

fn canonical_int(i: i64) -> CanonicalNumber {
    let approx = i as f64;
    let remainder = (i as i128 - approx as i128) as i64;
    CanonicalNumber::Ordered { approx, remainder }
}

impl CanonicalNumber {
    pub(crate) fn cmp(&self, other: &Self) -> Ordering {
        use CanonicalNumber::*;
        match (self, other) {
            (NaN, NaN) => Ordering::Equal,
            (NaN, _) => Ordering::Less,
            (_, NaN) => Ordering::Greater,
            (
                Ordered {
                    approx: a,
                    remainder: ra,
                },
                Ordered {
                    approx: b,
                    remainder: rb,
                },
            ) => a.total_cmp(b).then(ra.cmp(rb)),
        }
    }
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A document value as the comparator sees it. Field order of documents is
/// preserved exactly as inserted.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Number(Number),
    String(String),
    Document(Vec<(String, Value)>),
    Array(Vec<Value>),
    Binary(Vec<u8>),
    Boolean(bool),
    DateTime(i64), // millis since epoch
}

impl Value {
    /// Position of this value's type in the cross-type ordering:
    /// null < numbers < strings < documents < arrays < binary < booleans < dates.
    pub fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Document(_) => 4,
            Value::Array(_) => 5,
            Value::Binary(_) => 6,
            Value::Boolean(_) => 7,
            Value::DateTime(_) => 8,
        }
    }

    /// Convert a JSON value. `{"$date": ...}` and `{"$binary": ...}`
    /// single-field objects become dates and binary values.
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Boolean(*b),
            JsonValue::Number(n) => Value::Number(Number::from_json(n)),
            JsonValue::String(s) => Value::String(s.clone()),
            JsonValue::Array(arr) => Value::Array(arr.iter().map(Value::from_json).collect()),
            JsonValue::Object(map) => from_extended(map).unwrap_or_else(|| {
                Value::Document(
                    map.iter()
                        .map(|(k, v)| (k.clone(), Value::from_json(v)))
                        .collect(),
                )
            }),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Number(n) => n.to_json(),
            Value::String(s) => JsonValue::String(s.clone()),
            Value::Document(fields) => {
                let mut map = Map::new();
                for (k, v) in fields {
                    map.insert(k.clone(), v.to_json());
                }
                JsonValue::Object(map)
            }
            Value::Array(items) => JsonValue::Array(items.iter().map(Value::to_json).collect()),
            Value::Binary(bytes) => serde_json::json!({ "$binary": BASE64.encode(bytes) }),
            Value::Boolean(b) => JsonValue::Bool(*b),
            Value::DateTime(ms) => match chrono::DateTime::from_timestamp_millis(*ms) {
                Some(dt) => serde_json::json!({
                    "$date": dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
                }),
                None => serde_json::json!({ "$date": ms }),
            },
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

fn from_extended(map: &Map<String, JsonValue>) -> Option<Value> {
    if map.len() != 1 {
        return None;
    }
    let (key, inner) = map.iter().next()?;
    match key.as_str() {
        "$date" => parse_date(inner).map(Value::DateTime),
        "$binary" => inner
            .as_str()
            .and_then(|s| BASE64.decode(s).ok())
            .map(Value::Binary),
        _ => None,
    }
}

fn parse_date(value: &JsonValue) -> Option<i64> {
    if let Some(ms) = value.as_i64() {
        return Some(ms);
    }
    let s = value.as_str()?;
    // Try RFC 3339 / ISO 8601 with timezone: "2024-01-15T10:30:00Z"
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    // Try ISO 8601 without timezone: "2024-01-15T10:30:00"
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.and_utc().timestamp_millis());
    }
    // Try date only: "2024-01-15"
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
}
