//! End-to-end collation behaviour through the `Database` command surface.

use oxicollate::{Database, Error};
use serde_json::{Value, json};

fn none() -> Value {
    json!({})
}

fn en_strength_2() -> Value {
    json!({"collation": {"locale": "en_US", "strength": 2}})
}

fn field(docs: &[Value], name: &str) -> Vec<Value> {
    docs.iter().map(|d| d[name].clone()).collect()
}

fn seeded(name: &str, options: &Value) -> Database {
    let db = Database::new();
    db.create_collection(name, options).unwrap();
    db.insert_many(
        name,
        vec![json!({"_id": 1, "str": "foo"}), json!({"_id": 2, "str": "bar"})],
    )
    .unwrap();
    db
}

// ============================================================================
// Validation at the command surface
// ============================================================================

#[test]
fn create_collection_rejects_malformed_collations() {
    let db = Database::new();
    let bad = [
        json!({"collation": "not an object"}),
        json!({"collation": {}}),
        json!({"collation": {"blah": 1}}),
        json!({"collation": {"locale": "en", "blah": 1}}),
        json!({"collation": {"locale": "xx"}}),
        json!({"collation": {"locale": "en", "strength": 99}}),
        json!({"collation": {"locale": "en", "ignoreFieldOrder": true}}),
        json!({"collation": {"locale": "en", "caseFirst": "sideways"}}),
    ];
    for options in &bad {
        let err = db.create_collection("c", options).unwrap_err();
        assert!(matches!(err, Error::InvalidCollationSpec(_)), "{options}: {err}");
    }
    assert!(db.list_collections().is_empty());
}

#[test]
fn collection_info_reports_every_resolved_attribute() {
    let db = Database::new();
    db.create_collection("c", &json!({"collation": {"locale": "fr_CA"}}))
        .unwrap();
    let info = db.collection_info("c").unwrap();
    assert_eq!(
        info["options"]["collation"],
        json!({
            "locale": "fr_CA",
            "caseLevel": false,
            "caseFirst": "off",
            "strength": 3,
            "numericOrdering": false,
            "alternate": "non-ignorable",
            "maxVariable": "punct",
            "normalization": false,
            "backwards": true,
        })
    );
}

// ============================================================================
// Inheritance and explicit overrides
// ============================================================================

#[test]
fn queries_inherit_collection_default() {
    let db = seeded("c", &en_strength_2());
    assert_eq!(db.find("c", &json!({"str": "FOO"}), &none()).unwrap().len(), 1);

    let simple = json!({"collation": {"locale": "simple"}});
    assert_eq!(db.find("c", &json!({"str": "FOO"}), &simple).unwrap().len(), 0);
    assert_eq!(db.count("c", &json!({"str": "FOO"}), &simple).unwrap(), 0);
}

#[test]
fn operation_collation_governs_every_read() {
    let db = seeded("c", &none());
    let en = json!({"collation": {"locale": "en_US"}});

    assert_eq!(db.count("c", &json!({"str": "FOO"}), &en).unwrap(), 0);
    assert_eq!(db.count("c", &json!({"str": "FOO"}), &en_strength_2()).unwrap(), 1);
    assert_eq!(db.find("c", &json!({"_id": 1, "str": "FOO"}), &en_strength_2()).unwrap().len(), 1);

    let out = db
        .aggregate("c", &json!([{"$match": {"str": "FOO"}}]), &en_strength_2())
        .unwrap();
    assert_eq!(out, vec![json!({"_id": 1, "str": "foo"})]);

    let groups = db
        .group_count("c", "str", &json!({"str": "FOO"}), &en_strength_2())
        .unwrap();
    assert_eq!(groups, vec![json!({"_id": "foo", "count": 1})]);
}

#[test]
fn distinct_folds_equal_values_and_keeps_first_seen() {
    let db = seeded("c", &none());
    db.insert("c", json!({"str": "FOO"})).unwrap();

    let fr = json!({"collation": {"locale": "fr"}});
    assert_eq!(
        db.distinct("c", "str", &none(), &fr).unwrap(),
        vec![json!("foo"), json!("bar"), json!("FOO")]
    );
    let folded = json!({"collation": {"locale": "fr", "strength": 2}});
    assert_eq!(
        db.distinct("c", "str", &none(), &folded).unwrap(),
        vec![json!("foo"), json!("bar")]
    );
}

#[test]
fn ignore_field_order_matches_reordered_documents() {
    let db = Database::new();
    db.insert("c", json!({"obj": {"a": 1, "b": 1}})).unwrap();
    db.insert("c", json!({"obj": {"b": 1, "a": 1}})).unwrap();

    assert_eq!(db.count("c", &json!({"obj": {"a": 1, "b": 1}}), &none()).unwrap(), 1);
    let ignore = json!({"collation": {"locale": "simple", "ignoreFieldOrder": true}});
    assert_eq!(db.count("c", &json!({"obj": {"a": 1, "b": 1}}), &ignore).unwrap(), 2);
    assert_eq!(db.count("c", &json!({"obj": {"b": 1, "a": 1}}), &ignore).unwrap(), 2);
}

// ============================================================================
// Sorting
// ============================================================================

#[test]
fn sort_follows_locale_rules() {
    let db = Database::new();
    for s in ["b", "A", "a", "B", "ä", "z"] {
        db.insert("c", json!({"s": s})).unwrap();
    }
    let sort = |collation: Value| {
        let mut options = json!({"sort": {"s": 1}});
        if !collation.is_null() {
            options["collation"] = collation;
        }
        field(&db.find("c", &none(), &options).unwrap(), "s")
    };

    assert_eq!(sort(Value::Null), vec!["A", "B", "a", "b", "z", "ä"]);
    assert_eq!(sort(json!({"locale": "en"})), vec!["a", "A", "ä", "b", "B", "z"]);
    assert_eq!(
        sort(json!({"locale": "en", "caseFirst": "upper"})),
        vec!["A", "a", "ä", "B", "b", "z"]
    );
    assert_eq!(sort(json!({"locale": "sv"})), vec!["a", "A", "b", "B", "z", "ä"]);
}

#[test]
fn numeric_ordering_compares_digit_runs_by_value() {
    let db = Database::new();
    for s in ["a10", "a9", "a100", "a09"] {
        db.insert("c", json!({"s": s})).unwrap();
    }
    let lexical = db
        .find("c", &none(), &json!({"sort": {"s": 1}, "collation": {"locale": "en"}}))
        .unwrap();
    assert_eq!(field(&lexical, "s"), vec!["a09", "a10", "a100", "a9"]);

    let numeric = db
        .find(
            "c",
            &none(),
            &json!({"sort": {"s": 1}, "collation": {"locale": "en", "numericOrdering": true}}),
        )
        .unwrap();
    let sorted = field(&numeric, "s");
    assert_eq!(&sorted[2..], &[json!("a10"), json!("a100")]);
    assert!(sorted[..2].contains(&json!("a9")) && sorted[..2].contains(&json!("a09")));
}

#[test]
fn french_canadian_sorts_accents_backwards() {
    let db = Database::new();
    for s in ["cote", "côte", "coté", "côté"] {
        db.insert("c", json!({"s": s})).unwrap();
    }
    let fr = db
        .find("c", &none(), &json!({"sort": {"s": 1}, "collation": {"locale": "fr"}}))
        .unwrap();
    assert_eq!(field(&fr, "s"), vec!["cote", "coté", "côte", "côté"]);
    let fr_ca = db
        .find("c", &none(), &json!({"sort": {"s": 1}, "collation": {"locale": "fr_CA"}}))
        .unwrap();
    assert_eq!(field(&fr_ca, "s"), vec!["cote", "côte", "coté", "côté"]);
}

// ============================================================================
// Indexes and plans
// ============================================================================

#[test]
fn index_inherits_collection_default_unless_overridden() {
    let db = Database::new();
    db.create_collection("c", &json!({"collation": {"locale": "fr_CA"}}))
        .unwrap();
    db.create_index("c", &json!({"a": 1}), &none()).unwrap();
    db.create_index("c", &json!({"b": 1}), &json!({"collation": {"locale": "en_US"}}))
        .unwrap();
    db.create_index("c", &json!({"c": 1}), &json!({"collation": {"locale": "simple"}}))
        .unwrap();

    let indexes = db.list_indexes("c").unwrap();
    let by_name = |name: &str| indexes.iter().find(|i| i["name"] == name).cloned().unwrap();
    assert_eq!(by_name("a_1")["collation"]["locale"], "fr_CA");
    assert_eq!(by_name("b_1")["collation"]["locale"], "en_US");
    assert_eq!(by_name("b_1")["collation"]["backwards"], false);
    assert!(by_name("c_1").get("collation").is_none());
}

#[test]
fn index_is_used_only_under_identical_collation() {
    let db = Database::new();
    db.insert("c", json!({"a": "foo"})).unwrap();
    db.create_index("c", &json!({"a": 1}), &json!({"collation": {"locale": "fr_CA"}}))
        .unwrap();

    let stage = |options: Value| db.explain("c", &json!({"a": "foo"}), &options).unwrap()["stage"].clone();
    assert_eq!(stage(none()), "COLLSCAN");
    assert_eq!(stage(json!({"collation": {"locale": "en_US"}})), "COLLSCAN");
    assert_eq!(stage(json!({"collation": {"locale": "fr_CA"}})), "IXSCAN");
    assert_eq!(
        stage(json!({"collation": {"locale": "fr_CA", "strength": 2}})),
        "COLLSCAN"
    );

    // Numbers never depend on the collation.
    let plan = db.explain("c", &json!({"a": 1}), &none()).unwrap();
    assert_eq!(plan["stage"], "IXSCAN");
}

#[test]
fn hinted_index_with_other_collation_still_filters_correctly() {
    let db = seeded("c", &none());
    db.create_index("c", &json!({"str": 1}), &en_strength_2()).unwrap();

    let hinted = |collation: Option<Value>| {
        let mut options = json!({"hint": {"str": 1}});
        if let Some(c) = collation {
            options["collation"] = c;
        }
        db.find("c", &json!({"str": "FOO"}), &options).unwrap().len()
    };
    assert_eq!(hinted(None), 0);
    assert_eq!(hinted(Some(json!({"locale": "en_US"}))), 0);
    assert_eq!(hinted(Some(json!({"locale": "en_US", "strength": 2}))), 1);
}

#[test]
fn unique_index_rejects_values_equal_under_its_collation() {
    let db = Database::new();
    db.create_index("c", &json!({"s": 1}), &json!({"unique": true, "collation": {"locale": "en", "strength": 2}}))
        .unwrap();
    db.insert("c", json!({"s": "foo"})).unwrap();
    assert!(matches!(
        db.insert("c", json!({"s": "FOO"})),
        Err(Error::UniqueViolation { .. })
    ));
    db.insert("c", json!({"s": "föo"})).unwrap();

    // A simple-collation unique index tells the cases apart.
    db.create_index("d", &json!({"s": 1}), &json!({"unique": true})).unwrap();
    db.insert("d", json!({"s": "foo"})).unwrap();
    db.insert("d", json!({"s": "FOO"})).unwrap();
}

#[test]
fn same_field_may_carry_indexes_of_different_collations() {
    let db = Database::new();
    db.create_index("c", &json!({"s": 1}), &none()).unwrap();
    db.create_index(
        "c",
        &json!({"s": 1}),
        &json!({"name": "s_en", "collation": {"locale": "en"}}),
    )
    .unwrap();
    assert!(matches!(
        db.create_index("c", &json!({"s": 1}), &json!({"name": "again"})),
        Err(Error::IndexAlreadyExists(_))
    ));
    let plan = db
        .explain("c", &json!({"s": "x"}), &json!({"collation": {"locale": "en"}}))
        .unwrap();
    assert_eq!(plan["indexName"], "s_en");
}

// ============================================================================
// Writes
// ============================================================================

#[test]
fn update_and_delete_match_under_collation() {
    let db = seeded("c", &none());
    assert_eq!(
        db.update("c", &json!({"str": "FOO"}), &json!({"$set": {"n": 1}}), &none())
            .unwrap()
            .matched,
        0
    );
    assert_eq!(
        db.update("c", &json!({"str": "FOO"}), &json!({"$set": {"n": 1}}), &en_strength_2())
            .unwrap()
            .matched,
        1
    );
    assert_eq!(db.count("c", &json!({"n": 1}), &none()).unwrap(), 1);

    let mut just_one = en_strength_2();
    just_one["justOne"] = json!(true);
    assert_eq!(db.delete("c", &json!({"str": "BAR"}), &just_one).unwrap(), 1);
    assert_eq!(db.count("c", &none(), &none()).unwrap(), 1);
}

#[test]
fn find_one_and_update_returns_new_document() {
    let db = seeded("c", &none());
    let mut options = en_strength_2();
    options["new"] = json!(true);
    let out = db
        .find_one_and_update("c", &json!({"str": "FOO"}), &json!({"$set": {"str": "baz"}}), &options)
        .unwrap();
    assert_eq!(out, Some(json!({"_id": 1, "str": "baz"})));
    assert_eq!(
        db.find_one_and_update("c", &json!({"str": "FOO"}), &json!({"$set": {"x": 1}}), &none())
            .unwrap(),
        None
    );
}

#[test]
fn collated_update_operators() {
    let db = Database::new();
    db.create_collection("c", &en_strength_2()).unwrap();
    db.insert("c", json!({"_id": 1, "tags": ["Rust", "go"], "best": "b"})).unwrap();

    db.update(
        "c",
        &json!({"_id": 1}),
        &json!({"$addToSet": {"tags": "RUST"}, "$pull": {"tags": "GO"}, "$max": {"best": "A"}}),
        &none(),
    )
    .unwrap();
    let doc = db.find("c", &json!({"_id": 1}), &none()).unwrap().remove(0);
    assert_eq!(doc["tags"], json!(["Rust"]));
    assert_eq!(doc["best"], "b");
}

#[test]
fn views_are_read_only_and_pin_their_collation() {
    let db = seeded("c", &none());
    db.create_view(
        "v",
        &json!({"viewOn": "c", "filter": {"str": {"$gte": "B"}}, "collation": {"locale": "en_US", "strength": 2}}),
    )
    .unwrap();

    assert_eq!(db.count("v", &none(), &none()).unwrap(), 2);
    assert_eq!(db.count("v", &json!({"str": "FOO"}), &en_strength_2()).unwrap(), 1);
    assert!(matches!(
        db.count("v", &none(), &json!({"collation": {"locale": "fr"}})),
        Err(Error::ViewCollationUnsupported { .. })
    ));
    assert!(matches!(
        db.update("v", &none(), &json!({"$set": {"x": 1}}), &none()),
        Err(Error::ViewNotWritable(_))
    ));
}

// ============================================================================
// Replace, upsert, bulk writes and geo search
// ============================================================================

#[test]
fn bulk_delete_ones_use_their_own_collations() {
    let db = seeded("c", &none());
    let result = db
        .bulk_write(
            "c",
            &json!([
                {"deleteOne": {"filter": {"str": "FOO"}, "collation": {"locale": "fr", "strength": 2}}},
                {"deleteOne": {"filter": {"str": "BAR"}, "collation": {"locale": "en_US", "strength": 2}}},
            ]),
            &none(),
        )
        .unwrap();
    assert_eq!(result.deleted, 2);
    assert_eq!(result.to_json()["nRemoved"], 2);
    assert_eq!(db.count("c", &none(), &none()).unwrap(), 0);
}

#[test]
fn bulk_write_rejects_bad_batches_before_running() {
    let db = seeded("c", &none());
    let bad_collation = db.bulk_write(
        "c",
        &json!([
            {"deleteMany": {"filter": {}}},
            {"deleteOne": {"filter": {}, "collation": {"locale": "en", "strength": 9}}},
        ]),
        &none(),
    );
    assert!(matches!(bad_collation, Err(Error::InvalidCollationSpec(_))));
    assert!(db.bulk_write("c", &json!([]), &json!({"ordered": "yes"})).is_err());
    assert_eq!(db.count("c", &none(), &none()).unwrap(), 2);
}

#[test]
fn replace_one_upserts_into_empty_collection() {
    let db = Database::new();
    let mut options = en_strength_2();
    options["upsert"] = json!(true);
    let result = db
        .replace_one("c", &json!({"str": "ABC"}), &json!({"str": "abc", "n": 1}), &options)
        .unwrap();
    assert_eq!(result.matched, 0);
    assert!(result.upserted_id.is_some());

    let replaced = db
        .replace_one("c", &json!({"str": "ABC"}), &json!({"str": "x"}), &en_strength_2())
        .unwrap();
    assert_eq!((replaced.matched, replaced.modified), (1, 1));
    assert_eq!(field(&db.find("c", &none(), &none()).unwrap(), "str"), vec![json!("x")]);
}

#[test]
fn find_one_and_delete_and_replace_honour_collation() {
    let db = seeded("c", &none());
    assert_eq!(db.find_one_and_delete("c", &json!({"str": "FOO"}), &none()).unwrap(), None);
    assert_eq!(
        db.find_one_and_delete("c", &json!({"str": "FOO"}), &en_strength_2()).unwrap(),
        Some(json!({"_id": 1, "str": "foo"}))
    );

    let mut options = en_strength_2();
    options["new"] = json!(true);
    assert_eq!(
        db.find_one_and_replace("c", &json!({"str": "BAR"}), &json!({"str": "qux"}), &options)
            .unwrap(),
        Some(json!({"_id": 2, "str": "qux"}))
    );
    assert!(matches!(
        db.find_one_and_replace("c", &none(), &json!({"$set": {"str": "x"}}), &none()),
        Err(Error::InvalidUpdate(_))
    ));
}

#[test]
fn geo_near_matches_query_under_collation() {
    let db = Database::new();
    db.insert("c", json!({"str": "abc", "loc": {"type": "Point", "coordinates": [0, 0]}}))
        .unwrap();

    let request = json!({"near": [0, 0], "key": "loc", "query": {"str": "ABC"}});
    assert_eq!(db.geo_near("c", &request).unwrap().len(), 0);

    let mut collated = request.clone();
    collated["collation"] = json!({"locale": "en_US", "strength": 2});
    let hits = db.geo_near("c", &collated).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["obj"]["str"], "abc");

    db.create_view("ci", &json!({"viewOn": "c", "filter": {}, "collation": {"locale": "en_US", "strength": 2}}))
        .unwrap();
    assert_eq!(db.geo_near("ci", &request).unwrap().len(), 1);
}
