use std::borrow::Cow;
use std::cmp::Ordering;

use serde_json::Value as JsonValue;

use crate::spec::CollationSpec;
use crate::value::Value;
use crate::weights;

/// Compare two values under `spec`.
///
/// Values of different types order by type (null, numbers, strings,
/// documents, arrays, binary, booleans, dates). Only strings are affected by
/// the locale; document field names always compare as raw bytes.
pub fn compare(a: &Value, b: &Value, spec: &CollationSpec) -> Ordering {
    let rank = a.type_rank().cmp(&b.type_rank());
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.canonical().cmp(&y.canonical()),
        (Value::String(x), Value::String(y)) => compare_strings(x, y, spec),
        (Value::Document(x), Value::Document(y)) => {
            let x = ordered_fields(x, spec);
            let y = ordered_fields(y, spec);
            for ((ka, va), (kb, vb)) in x.iter().zip(y.iter()) {
                // Field type, then name, then value.
                let ord = va
                    .type_rank()
                    .cmp(&vb.type_rank())
                    .then_with(|| ka.as_bytes().cmp(kb.as_bytes()))
                    .then_with(|| compare(va, vb, spec));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Array(x), Value::Array(y)) => {
            for (va, vb) in x.iter().zip(y.iter()) {
                let ord = compare(va, vb, spec);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Binary(x), Value::Binary(y)) => x.len().cmp(&y.len()).then_with(|| x.cmp(y)),
        (Value::Boolean(x), Value::Boolean(y)) => x.cmp(y),
        (Value::DateTime(x), Value::DateTime(y)) => x.cmp(y),
        // Null, or same rank with a single representation.
        _ => Ordering::Equal,
    }
}

/// `compare(a, b, spec) == Equal`: the equality used by matching,
/// deduplication and uniqueness checks.
pub fn equal(a: &Value, b: &Value, spec: &CollationSpec) -> bool {
    compare(a, b, spec) == Ordering::Equal
}

pub fn compare_json(a: &JsonValue, b: &JsonValue, spec: &CollationSpec) -> Ordering {
    compare(&Value::from_json(a), &Value::from_json(b), spec)
}

pub fn compare_strings(a: &str, b: &str, spec: &CollationSpec) -> Ordering {
    if spec.is_simple() {
        return a.as_bytes().cmp(b.as_bytes());
    }
    weights::weight_bytes(a, spec).cmp(&weights::weight_bytes(b, spec))
}

/// Fields in comparison order: insertion order, or sorted by name under
/// `ignoreFieldOrder`.
pub(crate) fn ordered_fields<'a>(
    fields: &'a [(String, Value)],
    spec: &CollationSpec,
) -> Cow<'a, [(String, Value)]> {
    if !spec.ignore_field_order() {
        return Cow::Borrowed(fields);
    }
    let mut sorted = fields.to_vec();
    sorted.sort_by(|(a, _), (b, _)| a.as_bytes().cmp(b.as_bytes()));
    Cow::Owned(sorted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::SIMPLE;
    use crate::validate::CollationValidator;
    use serde_json::json;

    fn spec(raw: JsonValue) -> CollationSpec {
        CollationValidator::builtin().validate(&raw).unwrap()
    }

    fn cmp(a: JsonValue, b: JsonValue, s: &CollationSpec) -> Ordering {
        compare_json(&a, &b, s)
    }

    #[test]
    fn case_folding_at_strength_two() {
        let s = spec(json!({"locale": "en_US", "strength": 2}));
        assert_eq!(cmp(json!("FOO"), json!("foo"), &s), Ordering::Equal);
        assert_ne!(cmp(json!("FOO"), json!("foo"), &SIMPLE), Ordering::Equal);
    }

    #[test]
    fn simple_is_bytewise() {
        assert_eq!(cmp(json!("Z"), json!("a"), &SIMPLE), Ordering::Less);
        let en = spec(json!({"locale": "en"}));
        assert_eq!(cmp(json!("Z"), json!("a"), &en), Ordering::Greater);
    }

    #[test]
    fn ignore_field_order_equates_permuted_documents() {
        let ifo = spec(json!({"locale": "simple", "ignoreFieldOrder": true}));
        assert_eq!(
            cmp(json!({"a": 1, "b": 1}), json!({"b": 1, "a": 1}), &ifo),
            Ordering::Equal
        );
        assert_ne!(
            cmp(json!({"a": 1, "b": 1}), json!({"b": 1, "a": 1}), &SIMPLE),
            Ordering::Equal
        );
        // Nested documents too; arrays stay ordered.
        assert_eq!(
            cmp(json!({"x": {"a": 1, "b": 2}}), json!({"x": {"b": 2, "a": 1}}), &ifo),
            Ordering::Equal
        );
        assert_ne!(cmp(json!([1, 2]), json!([2, 1]), &ifo), Ordering::Equal);
    }

    #[test]
    fn numbers_and_types_unaffected_by_locale() {
        let s = spec(json!({"locale": "en", "numericOrdering": true}));
        assert_eq!(cmp(json!(10), json!(9), &s), Ordering::Greater);
        assert_eq!(cmp(json!(1), json!(1.0), &s), Ordering::Equal);
        assert_eq!(cmp(json!(null), json!(0), &s), Ordering::Less);
        assert_eq!(cmp(json!(5), json!("5"), &s), Ordering::Less);
        assert_eq!(cmp(json!(true), json!({"$date": 0}), &s), Ordering::Less);
        assert_eq!(cmp(json!([]), json!({"$binary": ""}), &s), Ordering::Less);
    }

    #[test]
    fn strings_inside_structures_are_collated() {
        let s = spec(json!({"locale": "en", "strength": 2}));
        assert_eq!(cmp(json!({"a": "X"}), json!({"a": "x"}), &s), Ordering::Equal);
        assert_eq!(cmp(json!(["A", "b"]), json!(["a", "B"]), &s), Ordering::Equal);
        // Field names are never collated.
        assert_ne!(cmp(json!({"A": 1}), json!({"a": 1}), &s), Ordering::Equal);
    }

    #[test]
    fn shorter_document_and_array_sort_first() {
        assert_eq!(cmp(json!({"a": 1}), json!({"a": 1, "b": 0}), &SIMPLE), Ordering::Less);
        assert_eq!(cmp(json!([1]), json!([1, 0]), &SIMPLE), Ordering::Less);
    }

    #[test]
    fn document_fields_compare_type_before_name() {
        assert_eq!(cmp(json!({"b": 1}), json!({"a": "x"}), &SIMPLE), Ordering::Less);
        assert_eq!(cmp(json!({"a": 1}), json!({"b": 1}), &SIMPLE), Ordering::Less);
        assert_eq!(cmp(json!({"a": 2}), json!({"a": 1}), &SIMPLE), Ordering::Greater);
    }

    #[test]
    fn binary_orders_by_length_first() {
        let short = Value::Binary(vec![9]);
        let long = Value::Binary(vec![0, 0]);
        assert_eq!(compare(&short, &long, &SIMPLE), Ordering::Less);
    }

    #[test]
    fn equal_helper() {
        let s = spec(json!({"locale": "en", "strength": 1}));
        assert!(equal(&Value::from_json(&json!("Café")), &Value::from_json(&json!("cafe")), &s));
    }
}
