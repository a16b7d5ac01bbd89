//! The engine against an injected locale provider with synthetic locales.

use std::cmp::Ordering;
use std::sync::Arc;

use oxicollate::{
    CaseFirst, CollationValidator, Database, Error, LocaleDefaults, LocaleProvider, LocaleRules,
    Tailoring, compare_strings,
};
use serde_json::{Value, json};
use tempfile::tempdir;

/// Two made-up locales:
/// * `xx`: root ordering, but from table version 2 on `q` sorts after `z`.
/// * `yy_ZZ`: root ordering with upper case first and backwards accents.
struct FakeLocales {
    version: u32,
}

const Q_LAST: &[char] = &['q'];

impl LocaleProvider for FakeLocales {
    fn rules(&self, locale: &str) -> Option<LocaleRules> {
        match locale {
            "xx" if self.version >= 2 => Some(LocaleRules {
                tailoring: Tailoring::TrailingLetters(Q_LAST),
                defaults: LocaleDefaults::STANDARD,
            }),
            "xx" => Some(LocaleRules::ROOT),
            "yy_ZZ" => Some(LocaleRules {
                tailoring: Tailoring::Root,
                defaults: LocaleDefaults {
                    case_first: CaseFirst::Upper,
                    backwards: true,
                    ..LocaleDefaults::STANDARD
                },
            }),
            _ => None,
        }
    }

    fn table_version(&self) -> u32 {
        self.version
    }
}

fn provider(version: u32) -> Arc<dyn LocaleProvider> {
    Arc::new(FakeLocales { version })
}

fn none() -> Value {
    json!({})
}

#[test]
fn only_provider_locales_validate() {
    let validator = CollationValidator::new(provider(1));
    assert!(validator.validate(&json!({"locale": "xx"})).is_ok());
    assert!(validator.validate(&json!({"locale": "simple"})).is_ok());
    assert!(matches!(
        validator.validate(&json!({"locale": "en_US"})),
        Err(Error::InvalidCollationSpec(_))
    ));
}

#[test]
fn defaults_come_from_the_provider() {
    let validator = CollationValidator::new(provider(1));
    let yy = validator.validate(&json!({"locale": "yy_ZZ"})).unwrap();
    assert_eq!(yy.case_first(), CaseFirst::Upper);
    assert!(yy.backwards());

    let overridden = validator
        .validate(&json!({"locale": "yy_ZZ", "caseFirst": "lower", "backwards": false}))
        .unwrap();
    assert_eq!(overridden.case_first(), CaseFirst::Lower);
    assert!(!overridden.backwards());
    assert_ne!(yy, overridden);
}

#[test]
fn tailoring_is_applied_per_table_version() {
    let v1 = CollationValidator::new(provider(1))
        .validate(&json!({"locale": "xx"}))
        .unwrap();
    let v2 = CollationValidator::new(provider(2))
        .validate(&json!({"locale": "xx"}))
        .unwrap();
    assert_eq!(compare_strings("q", "r", &v1), Ordering::Less);
    assert_eq!(compare_strings("q", "z", &v2), Ordering::Greater);
    assert_eq!(compare_strings("Q", "q", &v2), Ordering::Greater);
    assert_eq!(compare_strings("qa", "za", &v2), Ordering::Greater);
}

#[test]
fn database_uses_injected_provider() {
    let db = Database::with_provider(provider(1));
    db.create_collection("c", &json!({"collation": {"locale": "yy_ZZ"}}))
        .unwrap();
    for s in ["b", "a", "B", "A"] {
        db.insert("c", json!({"s": s})).unwrap();
    }
    let docs = db.find("c", &none(), &json!({"sort": {"s": 1}})).unwrap();
    let order: Vec<&str> = docs.iter().filter_map(|d| d["s"].as_str()).collect();
    assert_eq!(order, vec!["A", "a", "B", "b"]);

    assert!(db
        .create_collection("d", &json!({"collation": {"locale": "fr"}}))
        .is_err());
}

#[test]
fn stale_index_keys_are_rebuilt_under_new_table_version() {
    let dir = tempdir().unwrap();
    {
        let db = Database::open_with_provider(dir.path(), provider(1)).unwrap();
        db.create_collection("c", &json!({"collation": {"locale": "xx"}}))
            .unwrap();
        for s in ["p", "q", "r", "z"] {
            db.insert("c", json!({"s": s})).unwrap();
        }
        db.create_index("c", &json!({"s": 1}), &none()).unwrap();
        let after_z = db.find("c", &json!({"s": {"$gt": "z"}}), &none()).unwrap();
        assert!(after_z.is_empty());
        db.save().unwrap();
    }

    let db = Database::open_with_provider(dir.path(), provider(2)).unwrap();
    let col = db.collection("c").unwrap();
    {
        let col = col.read().unwrap();
        let index = col.indexes().iter().find(|i| i.name() == "s_1").unwrap();
        assert_eq!(index.descriptor().table_version, 2);
    }

    let plan = db.explain("c", &json!({"s": {"$gt": "z"}}), &none()).unwrap();
    assert_eq!(plan["stage"], "IXSCAN");
    let after_z = db.find("c", &json!({"s": {"$gt": "z"}}), &none()).unwrap();
    assert_eq!(after_z.len(), 1);
    assert_eq!(after_z[0]["s"], "q");
}

#[test]
fn current_key_cache_is_reused() {
    let dir = tempdir().unwrap();
    {
        let db = Database::open_with_provider(dir.path(), provider(2)).unwrap();
        db.insert("c", json!({"s": "q"})).unwrap();
        db.create_index("c", &json!({"s": 1}), &json!({"collation": {"locale": "xx"}}))
            .unwrap();
        db.save().unwrap();
    }
    let db = Database::open_with_provider(dir.path(), provider(2)).unwrap();
    let found = db
        .find("c", &json!({"s": "q"}), &json!({"collation": {"locale": "xx"}}))
        .unwrap();
    assert_eq!(found.len(), 1);
}
