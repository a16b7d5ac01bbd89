use std::cmp::Ordering;

use serde_json::{Map, Value as JsonValue, json};

use crate::compare::{compare, equal};
use crate::error::{Error, Result};
use crate::pipeline::{number_to_value, resolve_field, set_field};
use crate::spec::CollationSpec;
use crate::value::Value;

/// Apply all update operators in `update` to `doc`.
///
/// `update` must be an object whose keys are operator names (`$set`, `$inc`, etc.)
/// and whose values are objects mapping field paths to operand values.
/// Multiple operators in a single update are applied sequentially.
///
/// `$min`, `$max`, `$pull` and `$addToSet` compare values under `spec`, so
/// under a case-insensitive collation `$addToSet: {tags: "FOO"}` is a no-op
/// when `"foo"` is already present.
pub fn apply_update(doc: &mut JsonValue, update: &JsonValue, spec: &CollationSpec) -> Result<()> {
    let obj = update
        .as_object()
        .ok_or_else(|| Error::InvalidUpdate("update must be an object".into()))?;
    if obj.is_empty() {
        return Err(Error::InvalidUpdate("update must contain an operator".into()));
    }

    for (op, fields) in obj {
        let fields = fields
            .as_object()
            .ok_or_else(|| Error::InvalidUpdate(format!("{op} value must be an object")))?;
        if fields.contains_key("_id") {
            return Err(Error::InvalidUpdate(format!("{op} may not modify _id")));
        }
        match op.as_str() {
            "$set" => apply_set(doc, fields),
            "$unset" => apply_unset(doc, fields),
            "$inc" => apply_inc(doc, fields)?,
            "$mul" => apply_mul(doc, fields)?,
            "$min" => apply_bound(doc, fields, spec, Ordering::Less),
            "$max" => apply_bound(doc, fields, spec, Ordering::Greater),
            "$rename" => apply_rename(doc, fields)?,
            "$currentDate" => apply_current_date(doc, fields),
            "$push" => apply_push(doc, fields)?,
            "$pull" => apply_pull(doc, fields, spec)?,
            "$addToSet" => apply_add_to_set(doc, fields, spec)?,
            "$pop" => apply_pop(doc, fields)?,
            _ => return Err(Error::InvalidUpdate(format!("unknown update operator: {op}"))),
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Field operators
// ---------------------------------------------------------------------------

fn apply_set(doc: &mut JsonValue, fields: &Map<String, JsonValue>) {
    for (path, value) in fields {
        set_field(doc, path, value.clone());
    }
}

fn apply_unset(doc: &mut JsonValue, fields: &Map<String, JsonValue>) {
    for path in fields.keys() {
        remove_field(doc, path);
    }
}

fn numeric_operand(op: &str, path: &str, operand: &JsonValue) -> Result<f64> {
    operand
        .as_f64()
        .ok_or_else(|| Error::InvalidUpdate(format!("{op} value for '{path}' must be numeric")))
}

fn numeric_field(op: &str, path: &str, current: &JsonValue) -> Result<f64> {
    current.as_f64().ok_or_else(|| {
        Error::InvalidUpdate(format!("{op} cannot be applied to non-numeric field '{path}'"))
    })
}

/// Integral operands stay in `i64` while the result fits; anything else
/// goes through `f64`.
fn arithmetic(
    op: &str,
    path: &str,
    current: &JsonValue,
    operand: &JsonValue,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<JsonValue> {
    let b = numeric_operand(op, path, operand)?;
    let a = numeric_field(op, path, current)?;
    if let (Some(x), Some(y)) = (current.as_i64(), operand.as_i64())
        && let Some(n) = int_op(x, y)
    {
        return Ok(json!(n));
    }
    Ok(number_to_value(float_op(a, b)))
}

/// A missing field counts as 0 for both `$inc` and `$mul`.
fn numeric_or_zero(doc: &JsonValue, path: &str) -> JsonValue {
    match resolve_field(doc, path) {
        JsonValue::Null => json!(0),
        v => v,
    }
}

fn apply_inc(doc: &mut JsonValue, fields: &Map<String, JsonValue>) -> Result<()> {
    for (path, operand) in fields {
        let current = numeric_or_zero(doc, path);
        let new_val = arithmetic("$inc", path, &current, operand, i64::checked_add, |a, b| a + b)?;
        set_field(doc, path, new_val);
    }
    Ok(())
}

fn apply_mul(doc: &mut JsonValue, fields: &Map<String, JsonValue>) -> Result<()> {
    for (path, operand) in fields {
        let current = numeric_or_zero(doc, path);
        let new_val = arithmetic("$mul", path, &current, operand, i64::checked_mul, |a, b| a * b)?;
        set_field(doc, path, new_val);
    }
    Ok(())
}

/// `$min` (`wanted == Less`) and `$max` (`wanted == Greater`): replace the
/// field when the operand orders before/after it under the collation.
fn apply_bound(
    doc: &mut JsonValue,
    fields: &Map<String, JsonValue>,
    spec: &CollationSpec,
    wanted: Ordering,
) {
    for (path, new_val) in fields {
        let current = resolve_field(doc, path);
        let replace = current.is_null()
            || compare(&Value::from_json(new_val), &Value::from_json(&current), spec) == wanted;
        if replace {
            set_field(doc, path, new_val.clone());
        }
    }
}

fn apply_rename(doc: &mut JsonValue, fields: &Map<String, JsonValue>) -> Result<()> {
    for (old_path, target) in fields {
        let new_path = target.as_str().ok_or_else(|| {
            Error::InvalidUpdate(format!("$rename target for '{old_path}' must be a string"))
        })?;
        if new_path == "_id" {
            return Err(Error::InvalidUpdate("$rename may not target _id".into()));
        }
        let val = resolve_field(doc, old_path);
        if !val.is_null() {
            remove_field(doc, old_path);
            set_field(doc, new_path, val);
        }
    }
    Ok(())
}

/// Stores the current time as an extended-JSON date.
fn apply_current_date(doc: &mut JsonValue, fields: &Map<String, JsonValue>) {
    let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
    for path in fields.keys() {
        set_field(doc, path, json!({ "$date": now }));
    }
}

// ---------------------------------------------------------------------------
// Array operators
// ---------------------------------------------------------------------------

fn array_field(op: &str, path: &str, current: JsonValue) -> Result<Option<Vec<JsonValue>>> {
    match current {
        JsonValue::Null => Ok(None),
        JsonValue::Array(arr) => Ok(Some(arr)),
        _ => Err(Error::InvalidUpdate(format!(
            "{op} requires field '{path}' to be an array"
        ))),
    }
}

fn apply_push(doc: &mut JsonValue, fields: &Map<String, JsonValue>) -> Result<()> {
    for (path, value) in fields {
        let mut arr = array_field("$push", path, resolve_field(doc, path))?.unwrap_or_default();
        arr.push(value.clone());
        set_field(doc, path, JsonValue::Array(arr));
    }
    Ok(())
}

fn apply_pull(
    doc: &mut JsonValue,
    fields: &Map<String, JsonValue>,
    spec: &CollationSpec,
) -> Result<()> {
    for (path, match_val) in fields {
        let Some(arr) = array_field("$pull", path, resolve_field(doc, path))? else {
            continue;
        };
        let target = Value::from_json(match_val);
        let kept: Vec<JsonValue> = arr
            .into_iter()
            .filter(|el| !equal(&Value::from_json(el), &target, spec))
            .collect();
        set_field(doc, path, JsonValue::Array(kept));
    }
    Ok(())
}

fn apply_add_to_set(
    doc: &mut JsonValue,
    fields: &Map<String, JsonValue>,
    spec: &CollationSpec,
) -> Result<()> {
    for (path, value) in fields {
        let mut arr = array_field("$addToSet", path, resolve_field(doc, path))?.unwrap_or_default();
        let candidate = Value::from_json(value);
        if !arr.iter().any(|el| equal(&Value::from_json(el), &candidate, spec)) {
            arr.push(value.clone());
            set_field(doc, path, JsonValue::Array(arr));
        }
    }
    Ok(())
}

fn apply_pop(doc: &mut JsonValue, fields: &Map<String, JsonValue>) -> Result<()> {
    for (path, dir_val) in fields {
        let dir = dir_val.as_i64().filter(|d| *d == 1 || *d == -1).ok_or_else(|| {
            Error::InvalidUpdate(format!("$pop value for '{path}' must be 1 or -1"))
        })?;
        let Some(mut arr) = array_field("$pop", path, resolve_field(doc, path))? else {
            continue;
        };
        if arr.is_empty() {
            continue;
        }
        if dir == 1 {
            arr.pop();
        } else {
            arr.remove(0);
        }
        set_field(doc, path, JsonValue::Array(arr));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn remove_field(doc: &mut JsonValue, path: &str) {
    let (parent_path, leaf) = match path.rsplit_once('.') {
        Some((parent, leaf)) => (Some(parent), leaf),
        None => (None, path),
    };
    let mut current = &mut *doc;
    if let Some(parent_path) = parent_path {
        for part in parent_path.split('.') {
            match current {
                JsonValue::Object(map) => match map.get_mut(part) {
                    Some(v) => current = v,
                    None => return,
                },
                _ => return,
            }
        }
    }
    if let JsonValue::Object(map) = current {
        map.shift_remove(leaf);
    }
}

// ===========================================================================
// Tests
// ===========================================================================
