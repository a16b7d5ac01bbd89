use std::cmp::Ordering;

use oxicollate::{CollationSpec, CollationValidator, Result, SIMPLE, compare_json, encode_json};
use serde_json::{Value, json};

/// Interpret a command-line argument: JSON when it parses, otherwise a
/// plain string, so `foo` and `"foo"` mean the same thing.
pub fn parse_value(arg: &str) -> Value {
    serde_json::from_str(arg).unwrap_or_else(|_| Value::String(arg.to_string()))
}

/// The collation named by `--collation`, or the simple one.
pub fn resolve_collation(validator: &CollationValidator, raw: Option<&str>) -> Result<CollationSpec> {
    match raw {
        None => Ok(SIMPLE.clone()),
        Some(text) => validator.validate(&serde_json::from_str(text)?),
    }
}

pub fn ok(data: Value) -> Value {
    json!({ "ok": true, "data": data })
}

pub fn failed(error: impl std::fmt::Display) -> Value {
    json!({ "ok": false, "error": error.to_string() })
}

/// Validate a raw collation document and report every resolved attribute.
pub fn validate(validator: &CollationValidator, raw: &str) -> Result<Value> {
    let spec = validator.validate(&serde_json::from_str(raw)?)?;
    Ok(spec.to_json())
}

pub fn compare(a: &str, b: &str, spec: &CollationSpec) -> Value {
    let ord = compare_json(&parse_value(a), &parse_value(b), spec);
    let (word, n) = match ord {
        Ordering::Less => ("less", -1),
        Ordering::Equal => ("equal", 0),
        Ordering::Greater => ("greater", 1),
    };
    json!({ "result": word, "cmp": n, "collation": spec.to_json() })
}

pub fn key(value: &str, spec: &CollationSpec) -> Value {
    json!(encode_json(&parse_value(value), spec).to_hex())
}

/// Sort values under `spec`. Values that compare equal keep their input order.
pub fn sort(values: &[String], spec: &CollationSpec, descending: bool) -> Value {
    let mut parsed: Vec<Value> = values.iter().map(|v| parse_value(v)).collect();
    parsed.sort_by(|a, b| {
        let ord = compare_json(a, b, spec);
        if descending { ord.reverse() } else { ord }
    });
    Value::Array(parsed)
}
