use std::borrow::Cow;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};
use crate::locale::{BuiltinLocales, LocaleProvider};
use crate::spec::{
    Alternate, CaseFirst, CollationSpec, MaxVariable, SIMPLE_LOCALE, Strength,
};

/// `lang[_Script][_REGION]`, e.g. `en`, `en_US`, `zh_Hant_TW`, `es_419`.
static LOCALE_SYNTAX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z]{2,3}(_[A-Z][a-z]{3})?(_[A-Z]{2}|_[0-9]{3})?$")
        .expect("locale syntax pattern compiles")
});

fn invalid(msg: impl Into<String>) -> Error {
    Error::InvalidCollationSpec(msg.into())
}

/// Fields as they appear in the raw document, before defaulting.
#[derive(Default)]
struct RawFields<'a> {
    locale: Option<&'a str>,
    case_level: Option<bool>,
    case_first: Option<CaseFirst>,
    strength: Option<Strength>,
    numeric_ordering: Option<bool>,
    alternate: Option<Alternate>,
    max_variable: Option<MaxVariable>,
    normalization: Option<bool>,
    backwards: Option<bool>,
    ignore_field_order: Option<bool>,
}

impl RawFields<'_> {
    /// True when anything besides `locale` and `ignoreFieldOrder` was given.
    fn has_locale_attributes(&self) -> bool {
        self.case_level.is_some()
            || self.case_first.is_some()
            || self.strength.is_some()
            || self.numeric_ordering.is_some()
            || self.alternate.is_some()
            || self.max_variable.is_some()
            || self.normalization.is_some()
            || self.backwards.is_some()
    }
}

/// Turns raw collation documents into validated, fully defaulted specs.
pub struct CollationValidator {
    provider: Arc<dyn LocaleProvider>,
}

impl CollationValidator {
    pub fn new(provider: Arc<dyn LocaleProvider>) -> Self {
        Self { provider }
    }

    pub fn builtin() -> Self {
        Self::new(Arc::new(BuiltinLocales))
    }

    pub fn provider(&self) -> &dyn LocaleProvider {
        self.provider.as_ref()
    }

    pub fn table_version(&self) -> u32 {
        self.provider.table_version()
    }

    /// Validate a raw collation document.
    ///
    /// Fails with `InvalidCollationSpec` when the document is not an object,
    /// is empty, has unknown or mistyped fields, names an unknown locale,
    /// carries an out-of-range strength, or sets `ignoreFieldOrder` on a
    /// non-simple locale.
    pub fn validate(&self, raw: &JsonValue) -> Result<CollationSpec> {
        let obj = raw
            .as_object()
            .ok_or_else(|| invalid("collation must be an object"))?;
        if obj.is_empty() {
            return Err(invalid("collation spec must not be empty"));
        }

        let mut fields = RawFields::default();
        for (name, value) in obj {
            match name.as_str() {
                "locale" => fields.locale = Some(expect_str(name, value)?),
                "caseLevel" => fields.case_level = Some(expect_bool(name, value)?),
                "caseFirst" => {
                    fields.case_first = Some(parse_enum(name, value, CaseFirst::parse)?)
                }
                "strength" => fields.strength = Some(parse_strength(value)?),
                "numericOrdering" => fields.numeric_ordering = Some(expect_bool(name, value)?),
                "alternate" => {
                    fields.alternate = Some(parse_enum(name, value, Alternate::parse)?)
                }
                "maxVariable" => {
                    fields.max_variable = Some(parse_enum(name, value, MaxVariable::parse)?)
                }
                "normalization" => fields.normalization = Some(expect_bool(name, value)?),
                "backwards" => fields.backwards = Some(expect_bool(name, value)?),
                "ignoreFieldOrder" => {
                    fields.ignore_field_order = Some(expect_bool(name, value)?)
                }
                other => {
                    return Err(invalid(format!("unknown collation spec field: {other}")));
                }
            }
        }

        let locale = fields
            .locale
            .ok_or_else(|| invalid("missing locale string"))?;

        if locale == SIMPLE_LOCALE {
            if fields.has_locale_attributes() {
                return Err(invalid(
                    "if locale is 'simple', only 'ignoreFieldOrder' may also be specified",
                ));
            }
            let spec = CollationSpec::simple_with(fields.ignore_field_order.unwrap_or(false));
            tracing::debug!(spec = %spec, "validated simple collation");
            return Ok(spec);
        }

        if fields.ignore_field_order == Some(true) {
            return Err(invalid("ignoreFieldOrder requires locale 'simple'"));
        }
        if !LOCALE_SYNTAX.is_match(locale) {
            return Err(invalid(format!("malformed locale identifier: {locale}")));
        }
        let rules = self
            .provider
            .rules(locale)
            .ok_or_else(|| invalid(format!("unknown locale: {locale}")))?;

        let spec = CollationSpec {
            locale: Cow::Owned(locale.to_string()),
            case_level: fields.case_level.unwrap_or(false),
            case_first: fields.case_first.unwrap_or(rules.defaults.case_first),
            strength: fields.strength.unwrap_or(Strength::Tertiary),
            numeric_ordering: fields.numeric_ordering.unwrap_or(false),
            alternate: fields.alternate.unwrap_or(rules.defaults.alternate),
            max_variable: fields.max_variable.unwrap_or(MaxVariable::Punct),
            normalization: fields.normalization.unwrap_or(false),
            backwards: fields.backwards.unwrap_or(rules.defaults.backwards),
            ignore_field_order: false,
            tailoring: rules.tailoring,
        };
        tracing::debug!(spec = %spec, "validated collation");
        Ok(spec)
    }

    /// Validate the optional `collation` field of a command options document.
    /// Absent or `null` yields `None`.
    pub fn validate_option(&self, options: &JsonValue) -> Result<Option<CollationSpec>> {
        match options.get("collation") {
            None | Some(JsonValue::Null) => Ok(None),
            Some(raw) => self.validate(raw).map(Some),
        }
    }
}

impl Default for CollationValidator {
    fn default() -> Self {
        Self::builtin()
    }
}

fn expect_str<'a>(name: &str, value: &'a JsonValue) -> Result<&'a str> {
    value
        .as_str()
        .ok_or_else(|| invalid(format!("field '{name}' must be of type string")))
}

fn expect_bool(name: &str, value: &JsonValue) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| invalid(format!("field '{name}' must be of type bool")))
}

fn parse_enum<T>(name: &str, value: &JsonValue, parse: fn(&str) -> Option<T>) -> Result<T> {
    let s = expect_str(name, value)?;
    parse(s).ok_or_else(|| invalid(format!("field '{name}' has invalid value: {s}")))
}

fn parse_strength(value: &JsonValue) -> Result<Strength> {
    let level = match value.as_i64() {
        Some(n) => n,
        None => match value.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e9 => f as i64,
            _ => return Err(invalid("field 'strength' must be an integer")),
        },
    };
    Strength::from_level(level)
        .ok_or_else(|| invalid(format!("strength must be between 1 and 5, got {level}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validate(raw: JsonValue) -> Result<CollationSpec> {
        CollationValidator::builtin().validate(&raw)
    }

    #[test]
    fn rejects_malformed_documents() {
        assert!(validate(json!("not an object")).is_err());
        assert!(validate(json!({})).is_err());
        assert!(validate(json!({"blah": 1})).is_err());
        assert!(validate(json!({"locale": "en", "blah": 1})).is_err());
        assert!(validate(json!({"locale": "xx"})).is_err());
        assert!(validate(json!({"locale": "en", "strength": 99})).is_err());
    }

    #[test]
    fn locale_must_be_a_string() {
        let err = validate(json!({"locale": 3})).unwrap_err();
        assert!(matches!(err, Error::InvalidCollationSpec(_)));
    }

    #[test]
    fn missing_locale_fails() {
        assert!(validate(json!({"strength": 2})).is_err());
    }

    #[test]
    fn strength_bounds() {
        assert!(validate(json!({"locale": "en", "strength": 0})).is_err());
        assert!(validate(json!({"locale": "en", "strength": 6})).is_err());
        assert!(validate(json!({"locale": "en", "strength": "2"})).is_err());
        assert!(validate(json!({"locale": "en", "strength": 2.5})).is_err());
        assert_eq!(
            validate(json!({"locale": "en", "strength": 2.0})).unwrap().strength(),
            Strength::Secondary
        );
        for level in 1..=5 {
            let spec = validate(json!({"locale": "en", "strength": level})).unwrap();
            assert_eq!(spec.strength().level() as i64, level);
        }
    }

    #[test]
    fn enum_fields_checked() {
        assert!(validate(json!({"locale": "en", "caseFirst": "sideways"})).is_err());
        assert!(validate(json!({"locale": "en", "alternate": "ignore"})).is_err());
        assert!(validate(json!({"locale": "en", "maxVariable": "symbol"})).is_err());
        assert!(validate(json!({"locale": "en", "caseLevel": "yes"})).is_err());
    }

    #[test]
    fn ignore_field_order_only_with_simple() {
        assert!(validate(json!({"locale": "en_US", "ignoreFieldOrder": true})).is_err());
        assert!(validate(json!({"locale": "en_US", "ignoreFieldOrder": false})).is_ok());
        let spec = validate(json!({"locale": "simple", "ignoreFieldOrder": true})).unwrap();
        assert!(spec.is_simple());
        assert!(spec.ignore_field_order());
    }

    #[test]
    fn simple_rejects_locale_attributes() {
        assert!(validate(json!({"locale": "simple", "strength": 2})).is_err());
        assert_eq!(validate(json!({"locale": "simple"})).unwrap(), crate::spec::SIMPLE);
    }

    #[test]
    fn malformed_locale_syntax() {
        assert!(validate(json!({"locale": "EN-us"})).is_err());
        assert!(validate(json!({"locale": ""})).is_err());
    }

    #[test]
    fn fr_ca_defaults_fully_populated() {
        let spec = validate(json!({"locale": "fr_CA"})).unwrap();
        assert_eq!(
            spec.to_json(),
            json!({
                "locale": "fr_CA",
                "caseLevel": false,
                "caseFirst": "off",
                "strength": 3,
                "numericOrdering": false,
                "alternate": "non-ignorable",
                "maxVariable": "punct",
                "normalization": false,
                "backwards": true
            })
        );
    }

    #[test]
    fn en_us_defaults_backwards_false() {
        let spec = validate(json!({"locale": "en_US"})).unwrap();
        assert!(!spec.backwards());
    }

    #[test]
    fn explicit_value_overrides_locale_default() {
        let spec = validate(json!({"locale": "fr_CA", "backwards": false})).unwrap();
        assert!(!spec.backwards());
        let spec = validate(json!({"locale": "da"})).unwrap();
        assert_eq!(spec.case_first(), CaseFirst::Upper);
        let spec = validate(json!({"locale": "th"})).unwrap();
        assert_eq!(spec.alternate(), Alternate::Shifted);
    }

    #[test]
    fn validate_option_reads_collation_field() {
        let v = CollationValidator::builtin();
        assert!(v.validate_option(&json!({})).unwrap().is_none());
        assert!(v.validate_option(&json!({"collation": null})).unwrap().is_none());
        let spec = v
            .validate_option(&json!({"collation": {"locale": "en"}}))
            .unwrap()
            .unwrap();
        assert_eq!(spec.locale(), "en");
        assert!(v.validate_option(&json!({"collation": "en"})).is_err());
    }
}
