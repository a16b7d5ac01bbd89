//! Batched writes. Every sub-operation carries its own options, collation
//! included, and the whole batch is validated before anything runs.

use serde_json::{Value as JsonValue, json};

use crate::collection::UpdateResult;
use crate::error::{Error, Result};
use crate::query::{self, WriteOptions};
use crate::validate::CollationValidator;

/// One operation of a batch.
#[derive(Debug, Clone)]
pub enum BulkOp {
    InsertOne {
        document: JsonValue,
    },
    /// `updateOne` or, with `options.multi`, `updateMany`.
    Update {
        filter: JsonValue,
        update: JsonValue,
        options: WriteOptions,
    },
    Replace {
        filter: JsonValue,
        replacement: JsonValue,
        options: WriteOptions,
    },
    /// `deleteOne` (`options.limit == Some(1)`) or `deleteMany`.
    Delete {
        filter: JsonValue,
        options: WriteOptions,
    },
}

const INSERT_FIELDS: &[&str] = &["document"];
const UPDATE_FIELDS: &[&str] = &["filter", "update", "collation", "upsert"];
const REPLACE_FIELDS: &[&str] = &["filter", "replacement", "collation", "upsert"];
const DELETE_FIELDS: &[&str] = &["filter", "collation"];

impl BulkOp {
    /// Parse one entry such as `{updateOne: {filter, update, collation, upsert}}`.
    pub fn parse(entry: &JsonValue, validator: &CollationValidator) -> Result<Self> {
        let (kind, body) = match entry.as_object() {
            Some(map) if map.len() == 1 => map.iter().next().ok_or_else(|| bad("empty operation"))?,
            _ => return Err(bad("each operation must be an object with exactly one key")),
        };
        if !body.is_object() {
            return Err(bad(&format!("{kind} must be an object")));
        }

        let allowed = match kind.as_str() {
            "insertOne" => INSERT_FIELDS,
            "updateOne" | "updateMany" => UPDATE_FIELDS,
            "replaceOne" => REPLACE_FIELDS,
            "deleteOne" | "deleteMany" => DELETE_FIELDS,
            other => return Err(bad(&format!("unknown bulk operation '{other}'"))),
        };
        if let Some(field) = body
            .as_object()
            .and_then(|m| m.keys().find(|k| !allowed.contains(&k.as_str())))
        {
            return Err(bad(&format!("unknown field '{field}' in {kind}")));
        }

        if kind == "insertOne" {
            let document = body.get("document").filter(|d| d.is_object()).cloned();
            return document
                .map(|document| BulkOp::InsertOne { document })
                .ok_or_else(|| bad("insertOne needs a document object"));
        }

        let filter = body
            .get("filter")
            .filter(|f| f.is_object())
            .cloned()
            .ok_or_else(|| bad(&format!("{kind} needs a filter object")))?;
        // The sub-operation's own `collation` and `upsert` go through the
        // same checks as a standalone write.
        let mut options = query::parse_write_options(body, validator)?;
        query::parse_query(&filter)?;

        match kind.as_str() {
            "updateOne" | "updateMany" => {
                options.multi = kind == "updateMany";
                let update = body
                    .get("update")
                    .filter(|u| u.as_object().is_some_and(|m| !m.is_empty()))
                    .cloned()
                    .ok_or_else(|| bad(&format!("{kind} needs a non-empty update object")))?;
                Ok(BulkOp::Update {
                    filter,
                    update,
                    options,
                })
            }
            "replaceOne" => {
                let replacement = body
                    .get("replacement")
                    .cloned()
                    .ok_or_else(|| bad("replaceOne needs a replacement"))?;
                crate::collection::check_replacement(&replacement)?;
                Ok(BulkOp::Replace {
                    filter,
                    replacement,
                    options,
                })
            }
            _ => {
                options.limit = (kind == "deleteOne").then_some(1);
                Ok(BulkOp::Delete { filter, options })
            }
        }
    }
}

fn bad(msg: &str) -> Error {
    Error::InvalidQuery(format!("bulk write: {msg}"))
}

/// Parse a whole batch. Nothing runs unless every entry parses.
pub fn parse_ops(ops: &JsonValue, validator: &CollationValidator) -> Result<Vec<BulkOp>> {
    let entries = ops
        .as_array()
        .ok_or_else(|| bad("operations must be an array"))?;
    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            BulkOp::parse(entry, validator).map_err(|e| match e {
                Error::InvalidQuery(msg) => Error::InvalidQuery(format!("operation {i}: {msg}")),
                other => other,
            })
        })
        .collect()
}

/// A failed operation of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkWriteError {
    pub index: usize,
    pub message: String,
}

/// Totals of a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkWriteResult {
    pub inserted: u64,
    pub matched: u64,
    pub modified: u64,
    pub deleted: u64,
    /// `(operation index, _id)` of every upserted document.
    pub upserted: Vec<(usize, JsonValue)>,
    pub write_errors: Vec<BulkWriteError>,
}

impl BulkWriteResult {
    pub(crate) fn absorb(&mut self, index: usize, update: UpdateResult) {
        self.matched += update.matched;
        self.modified += update.modified;
        if let Some(id) = update.upserted_id {
            self.upserted.push((index, id));
        }
    }

    pub fn is_ok(&self) -> bool {
        self.write_errors.is_empty()
    }

    pub fn to_json(&self) -> JsonValue {
        json!({
            "nInserted": self.inserted,
            "nMatched": self.matched,
            "nModified": self.modified,
            "nRemoved": self.deleted,
            "nUpserted": self.upserted.len(),
            "upserted": self.upserted
                .iter()
                .map(|(index, id)| json!({"index": index, "_id": id}))
                .collect::<Vec<_>>(),
            "writeErrors": self.write_errors
                .iter()
                .map(|e| json!({"index": e.index, "errmsg": e.message}))
                .collect::<Vec<_>>(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(entry: JsonValue) -> Result<BulkOp> {
        BulkOp::parse(&entry, &CollationValidator::builtin())
    }

    #[test]
    fn each_operation_keeps_its_own_collation() {
        let ops = parse_ops(
            &json!([
                {"deleteOne": {"filter": {"str": "foo"}, "collation": {"locale": "fr", "strength": 2}}},
                {"deleteOne": {"filter": {"str": "bar"}, "collation": {"locale": "en_US", "strength": 2}}},
                {"deleteMany": {"filter": {}}},
            ]),
            &CollationValidator::builtin(),
        )
        .unwrap();
        let locales: Vec<_> = ops
            .iter()
            .map(|op| match op {
                BulkOp::Delete { options, .. } => {
                    (options.collation.as_ref().map(|c| c.locale.to_string()), options.limit)
                }
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(
            locales,
            vec![
                (Some("fr".to_string()), Some(1)),
                (Some("en_US".to_string()), Some(1)),
                (None, None),
            ]
        );
    }

    #[test]
    fn update_kinds_set_multi_and_upsert() {
        let BulkOp::Update { options, .. } =
            parse(json!({"updateMany": {"filter": {}, "update": {"$set": {"a": 1}}, "upsert": true}})).unwrap()
        else {
            panic!("expected an update");
        };
        assert!(options.multi);
        assert!(options.upsert);
        let BulkOp::Update { options, .. } =
            parse(json!({"updateOne": {"filter": {}, "update": {"$set": {"a": 1}}}})).unwrap()
        else {
            panic!("expected an update");
        };
        assert!(!options.multi);
    }

    #[test]
    fn malformed_entries_are_rejected() {
        assert!(parse(json!({"insertOne": {}})).is_err());
        assert!(parse(json!({"updateOne": {"filter": {}}})).is_err());
        assert!(parse(json!({"replaceOne": {"filter": {}, "replacement": {"$set": {"a": 1}}}})).is_err());
        assert!(parse(json!({"deleteOne": {"filter": {}, "multi": true}})).is_err());
        assert!(parse(json!({"dropAll": {}})).is_err());
        assert!(parse(json!({"deleteOne": {"filter": {}}, "insertOne": {"document": {}}})).is_err());
        assert!(matches!(
            parse(json!({"deleteOne": {"filter": {}, "collation": {"locale": "xx"}}})),
            Err(Error::InvalidCollationSpec(_))
        ));
    }

    #[test]
    fn one_bad_entry_rejects_the_batch() {
        let err = parse_ops(
            &json!([{"insertOne": {"document": {"a": 1}}}, {"updateOne": {"filter": {}}}]),
            &CollationValidator::builtin(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("operation 1"));
    }

    #[test]
    fn result_json_counts_upserts() {
        let mut result = BulkWriteResult::default();
        result.absorb(
            2,
            UpdateResult {
                upserted_id: Some(json!(9)),
                ..UpdateResult::default()
            },
        );
        result.deleted = 1;
        let out = result.to_json();
        assert_eq!(out["nUpserted"], 1);
        assert_eq!(out["upserted"], json!([{"index": 2, "_id": 9}]));
        assert_eq!(out["nRemoved"], 1);
        assert!(result.is_ok());
    }
}
