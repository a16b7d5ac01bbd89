use std::fmt;

use crate::spec::{CollationSpec, SIMPLE};
use crate::value::Value;

/// The collation that governs an operation: an explicit operation collation
/// wins (including an explicit simple one), then the collection default,
/// then the simple collation.
pub fn resolve_effective<'a>(
    operation: Option<&'a CollationSpec>,
    collection_default: Option<&'a CollationSpec>,
) -> &'a CollationSpec {
    operation.or(collection_default).unwrap_or(&SIMPLE)
}

/// Why an index cannot serve an operation: the first attribute on which the
/// two collations disagree. Not an error; callers fall back to a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollationMismatch {
    pub attribute: &'static str,
    pub requested: String,
    pub index: String,
}

impl fmt::Display for CollationMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "collation {} differs: operation has {}, index has {}",
            self.attribute, self.requested, self.index
        )
    }
}

/// Compare an operation's effective collation with an index's stored one.
/// An index without a collation uses the simple collation.
pub fn mismatch(
    effective: &CollationSpec,
    index: Option<&CollationSpec>,
) -> Option<CollationMismatch> {
    let index = index.unwrap_or(&SIMPLE);

    macro_rules! check {
        ($name:literal, $get:ident) => {
            if effective.$get() != index.$get() {
                return Some(CollationMismatch {
                    attribute: $name,
                    requested: format!("{:?}", effective.$get()),
                    index: format!("{:?}", index.$get()),
                });
            }
        };
    }

    check!("locale", locale);
    check!("caseLevel", case_level);
    check!("caseFirst", case_first);
    check!("strength", strength);
    check!("numericOrdering", numeric_ordering);
    check!("alternate", alternate);
    check!("maxVariable", max_variable);
    check!("normalization", normalization);
    check!("backwards", backwards);
    check!("ignoreFieldOrder", ignore_field_order);
    None
}

/// True iff an index built under `index` may answer an operation running
/// under `effective`: every attribute must match, not just the locale.
pub fn index_usable(effective: &CollationSpec, index: Option<&CollationSpec>) -> bool {
    match mismatch(effective, index) {
        None => true,
        Some(m) => {
            tracing::debug!(reason = %m, "index collation not usable");
            false
        }
    }
}

/// A view accepts a request only if it names no collation or exactly the
/// view's own. A view defined without one has the simple collation.
pub fn view_accepts_override(
    view: Option<&CollationSpec>,
    requested: Option<&CollationSpec>,
) -> bool {
    match requested {
        None => true,
        Some(req) => req == view.unwrap_or(&SIMPLE),
    }
}

/// Whether comparing against `value` can depend on the collation at all:
/// strings are collated, and documents follow `ignoreFieldOrder`.
/// Predicates on any other value may use an index of any collation.
pub fn needs_collation(value: &Value) -> bool {
    match value {
        Value::String(_) | Value::Document(_) => true,
        Value::Array(items) => items.iter().any(needs_collation),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::CollationValidator;
    use serde_json::json;

    fn spec(raw: serde_json::Value) -> CollationSpec {
        CollationValidator::builtin().validate(&raw).unwrap()
    }

    #[test]
    fn operation_override_wins() {
        let coll = spec(json!({"locale": "en_US", "strength": 2}));
        let op = spec(json!({"locale": "fr"}));
        assert_eq!(resolve_effective(Some(&op), Some(&coll)), &op);
        assert_eq!(resolve_effective(None, Some(&coll)), &coll);
        assert_eq!(resolve_effective(None, None), &SIMPLE);
    }

    #[test]
    fn explicit_simple_suppresses_inheritance() {
        let coll = spec(json!({"locale": "en_US", "strength": 2}));
        let simple = spec(json!({"locale": "simple"}));
        let effective = resolve_effective(Some(&simple), Some(&coll));
        assert!(effective.is_simple());
    }

    #[test]
    fn index_usable_requires_every_attribute() {
        let s3 = spec(json!({"locale": "en_US", "strength": 3}));
        let s2 = spec(json!({"locale": "en_US", "strength": 2}));
        assert!(index_usable(&s3, Some(&s3)));
        assert!(!index_usable(&s2, Some(&s3)));
        let m = mismatch(&s2, Some(&s3)).unwrap();
        assert_eq!(m.attribute, "strength");
    }

    #[test]
    fn defaulted_attributes_are_compared_after_validation() {
        let implicit = spec(json!({"locale": "fr_CA"}));
        let explicit = spec(json!({"locale": "fr_CA", "backwards": true}));
        assert!(index_usable(&implicit, Some(&explicit)));
        let off = spec(json!({"locale": "fr_CA", "backwards": false}));
        assert_eq!(mismatch(&implicit, Some(&off)).unwrap().attribute, "backwards");
    }

    #[test]
    fn index_without_collation_is_simple() {
        assert!(index_usable(&SIMPLE, None));
        let en = spec(json!({"locale": "en"}));
        assert!(!index_usable(&en, None));
        assert_eq!(mismatch(&en, None).unwrap().attribute, "locale");
    }

    #[test]
    fn view_override_rules() {
        let en = spec(json!({"locale": "en"}));
        let fr = spec(json!({"locale": "fr"}));
        assert!(view_accepts_override(Some(&en), None));
        assert!(view_accepts_override(Some(&en), Some(&en)));
        assert!(!view_accepts_override(Some(&en), Some(&fr)));
        assert!(!view_accepts_override(None, Some(&en)));
        assert!(view_accepts_override(None, Some(&SIMPLE)));
    }

    #[test]
    fn string_free_values_need_no_collation() {
        assert!(!needs_collation(&Value::from_json(&json!([1, {"$date": 0}, null]))));
        assert!(needs_collation(&Value::from_json(&json!([1, ["x"]]))));
        assert!(needs_collation(&Value::from_json(&json!({"a": 1}))));
    }
}
