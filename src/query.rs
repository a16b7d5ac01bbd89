use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::ops::Bound;

use serde_json::Value as JsonValue;

use crate::compare::{compare, equal};
use crate::document::{DocumentId, collect_path, get_path};
use crate::error::{Error, Result};
use crate::index::FieldIndex;
use crate::key::SortKey;
use crate::resolve::{index_usable, needs_collation};
use crate::spec::CollationSpec;
use crate::validate::CollationValidator;
use crate::value::Value;

// ---------------------------------------------------------------------------
// Find options: sort / skip / limit / collation / hint
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// An index requested by name (`"a_1"`) or by key pattern (`{a: 1}`).
#[derive(Debug, Clone, PartialEq)]
pub enum Hint {
    Name(String),
    Field(String),
}

#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub sort: Option<Vec<(String, SortOrder)>>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    pub collation: Option<CollationSpec>,
    pub hint: Option<Hint>,
}

/// Parse find options from the JSON request object.
/// Expects optional fields: `sort` (object: field→1/-1), `skip`, `limit`,
/// `collation` (collation document), `hint` (index name or key pattern).
pub fn parse_find_options(request: &JsonValue, validator: &CollationValidator) -> Result<FindOptions> {
    let mut opts = FindOptions {
        sort: parse_sort(request.get("sort"))?,
        collation: validator.validate_option(request)?,
        ..FindOptions::default()
    };

    if let Some(n) = request.get("skip").and_then(JsonValue::as_u64) {
        opts.skip = Some(n);
    }
    if let Some(n) = request.get("limit").and_then(JsonValue::as_u64) {
        opts.limit = Some(n);
    }

    opts.hint = match request.get("hint") {
        None | Some(JsonValue::Null) => None,
        Some(JsonValue::String(name)) => Some(Hint::Name(name.clone())),
        Some(JsonValue::Object(pattern)) if pattern.len() == 1 => {
            pattern.keys().next().map(|f| Hint::Field(f.clone()))
        }
        Some(_) => {
            return Err(Error::InvalidQuery(
                "hint must be an index name or a single-field key pattern".into(),
            ));
        }
    };

    Ok(opts)
}

/// Options of update, delete and find-and-modify requests.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    pub collation: Option<CollationSpec>,
    /// Update every match instead of the first one.
    pub multi: bool,
    /// Delete at most this many documents (`justOne` means 1).
    pub limit: Option<usize>,
    /// Which match a find-and-modify picks.
    pub sort: Option<Vec<(String, SortOrder)>>,
    /// Find-and-modify returns the updated document instead of the original.
    pub return_new: bool,
    /// Insert a document built from the query when nothing matches.
    pub upsert: bool,
}

/// Parse `{collation, multi, justOne, limit, sort, new, upsert}`.
pub fn parse_write_options(request: &JsonValue, validator: &CollationValidator) -> Result<WriteOptions> {
    let flag = |name: &str| -> Result<bool> {
        match request.get(name) {
            None | Some(JsonValue::Null) => Ok(false),
            Some(JsonValue::Bool(b)) => Ok(*b),
            Some(_) => Err(Error::InvalidQuery(format!("{name} must be a boolean"))),
        }
    };
    let limit = if flag("justOne")? {
        Some(1)
    } else {
        match request.get("limit").and_then(JsonValue::as_u64) {
            None | Some(0) => None,
            Some(n) => Some(n as usize),
        }
    };
    Ok(WriteOptions {
        collation: validator.validate_option(request)?,
        multi: flag("multi")?,
        limit,
        sort: parse_sort(request.get("sort"))?,
        return_new: flag("new")?,
        upsert: flag("upsert")?,
    })
}

pub fn parse_sort(sort_val: Option<&JsonValue>) -> Result<Option<Vec<(String, SortOrder)>>> {
    let Some(obj) = sort_val.and_then(JsonValue::as_object) else {
        return Ok(None);
    };
    let mut sort_fields = Vec::new();
    for (field, dir) in obj {
        let order = match dir.as_i64() {
            Some(1) => SortOrder::Asc,
            Some(-1) => SortOrder::Desc,
            _ => {
                return Err(Error::InvalidQuery(
                    "sort direction must be 1 (asc) or -1 (desc)".into(),
                ));
            }
        };
        sort_fields.push((field.clone(), order));
    }
    Ok(if sort_fields.is_empty() { None } else { Some(sort_fields) })
}

// ---------------------------------------------------------------------------
// Query AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum QueryOp {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Exists(bool),
}

#[derive(Debug, Clone)]
pub enum Query {
    Field { field: String, op: QueryOp },
    And(Vec<Query>),
    Or(Vec<Query>),
    All, // match everything
}

// ---------------------------------------------------------------------------
// Parsing: JSON → Query AST
// ---------------------------------------------------------------------------

pub fn parse_query(query: &JsonValue) -> Result<Query> {
    let obj = query
        .as_object()
        .ok_or_else(|| Error::InvalidQuery("query must be a JSON object".into()))?;

    let mut conditions: Vec<Query> = Vec::new();

    for (key, value) in obj {
        match key.as_str() {
            "$and" | "$or" => {
                let arr = value
                    .as_array()
                    .ok_or_else(|| Error::InvalidQuery(format!("{key} must be an array")))?;
                let subs = arr.iter().map(parse_query).collect::<Result<Vec<_>>>()?;
                conditions.push(if key == "$and" {
                    Query::And(subs)
                } else {
                    Query::Or(subs)
                });
            }
            field => match value.as_object() {
                // Operator object: every key starts with `$` (extended JSON
                // values such as `{"$date": ...}` are plain values).
                Some(ops) if is_operator_object(ops) => {
                    for (op_key, op_val) in ops {
                        conditions.push(Query::Field {
                            field: field.to_string(),
                            op: parse_op(op_key, op_val)?,
                        });
                    }
                }
                // Shorthand for $eq
                _ => conditions.push(Query::Field {
                    field: field.to_string(),
                    op: QueryOp::Eq(Value::from_json(value)),
                }),
            },
        }
    }

    Ok(match conditions.len() {
        0 => Query::All,
        1 => conditions.remove(0),
        _ => Query::And(conditions),
    })
}

/// The document an upsert starts from: every top-level equality in the
/// query (including those inside `$and`), set at its path.
pub fn upsert_seed(query: &Query) -> JsonValue {
    let mut seed = JsonValue::Object(serde_json::Map::new());
    collect_equalities(query, &mut seed);
    seed
}

fn collect_equalities(query: &Query, seed: &mut JsonValue) {
    match query {
        Query::Field {
            field,
            op: QueryOp::Eq(value),
        } => crate::pipeline::set_field(seed, field, value.to_json()),
        Query::And(subs) => {
            for sub in subs {
                collect_equalities(sub, seed);
            }
        }
        Query::Field { .. } | Query::Or(_) | Query::All => {}
    }
}

fn is_operator_object(ops: &serde_json::Map<String, JsonValue>) -> bool {
    !ops.is_empty()
        && ops.keys().all(|k| k.starts_with('$'))
        && !matches!(Value::from_json(&JsonValue::Object(ops.clone())), Value::DateTime(_) | Value::Binary(_))
}

fn parse_op(op_key: &str, op_val: &JsonValue) -> Result<QueryOp> {
    let v = || Value::from_json(op_val);
    match op_key {
        "$eq" => Ok(QueryOp::Eq(v())),
        "$ne" => Ok(QueryOp::Ne(v())),
        "$gt" => Ok(QueryOp::Gt(v())),
        "$gte" => Ok(QueryOp::Gte(v())),
        "$lt" => Ok(QueryOp::Lt(v())),
        "$lte" => Ok(QueryOp::Lte(v())),
        "$in" => {
            let arr = op_val
                .as_array()
                .ok_or_else(|| Error::InvalidQuery("$in must be an array".into()))?;
            Ok(QueryOp::In(arr.iter().map(Value::from_json).collect()))
        }
        "$exists" => {
            let b = op_val
                .as_bool()
                .ok_or_else(|| Error::InvalidQuery("$exists must be a boolean".into()))?;
            Ok(QueryOp::Exists(b))
        }
        _ => Err(Error::InvalidQuery(format!("unknown operator: {op_key}"))),
    }
}

// ---------------------------------------------------------------------------
// Filter: evaluate a query against a single document under a collation
// ---------------------------------------------------------------------------

pub fn matches_value(query: &Query, data: &JsonValue, spec: &CollationSpec) -> bool {
    match query {
        Query::All => true,
        Query::Field { field, op } => matches_field(&collect_path(data, field), op, spec),
        Query::And(subs) => subs.iter().all(|s| matches_value(s, data, spec)),
        Query::Or(subs) => subs.iter().any(|s| matches_value(s, data, spec)),
    }
}

fn matches_field(found: &[&JsonValue], op: &QueryOp, spec: &CollationSpec) -> bool {
    // A missing field behaves as null for equality.
    let mut candidates: Vec<Value> = Vec::new();
    if found.is_empty() {
        candidates.push(Value::Null);
    }
    for json in found {
        let value = Value::from_json(json);
        if let Value::Array(items) = &value {
            candidates.extend(items.iter().cloned());
        }
        candidates.push(value);
    }

    let any_eq = |target: &Value| candidates.iter().any(|c| equal(c, target, spec));
    // Comparison operators only match values of the same type.
    let any_cmp = |target: &Value, accept: fn(Ordering) -> bool| {
        candidates
            .iter()
            .filter(|c| c.type_rank() == target.type_rank())
            .any(|c| accept(compare(c, target, spec)))
    };

    match op {
        QueryOp::Eq(v) => any_eq(v),
        QueryOp::Ne(v) => !any_eq(v),
        QueryOp::Gt(v) => any_cmp(v, Ordering::is_gt),
        QueryOp::Gte(v) => any_cmp(v, Ordering::is_ge),
        QueryOp::Lt(v) => any_cmp(v, Ordering::is_lt),
        QueryOp::Lte(v) => any_cmp(v, Ordering::is_le),
        QueryOp::In(vals) => vals.iter().any(any_eq),
        QueryOp::Exists(expected) => !found.is_empty() == *expected,
    }
}

// ---------------------------------------------------------------------------
// Planning: which index, if any, narrows the candidates
// ---------------------------------------------------------------------------

/// Result of planning a query. Candidates from an index are a superset of
/// the matches; callers always re-check them with `matches_value`.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub index: Option<String>,
    pub candidates: Option<BTreeSet<DocumentId>>,
}

impl QueryPlan {
    pub fn stage(&self) -> &'static str {
        if self.index.is_some() { "IXSCAN" } else { "COLLSCAN" }
    }
}

/// Choose how to execute `query` under the effective collation `spec`.
///
/// An index may serve a predicate when its collation is identical to
/// `spec`, or when the predicate value cannot be affected by collation. A
/// hinted index that cannot serve any predicate is scanned in full.
pub fn plan(
    query: &Query,
    indexes: &[FieldIndex],
    spec: &CollationSpec,
    hint: Option<&Hint>,
) -> Result<QueryPlan> {
    if let Some(hint) = hint {
        let idx = indexes
            .iter()
            .find(|i| match hint {
                Hint::Name(name) => i.name() == name,
                Hint::Field(field) => i.field() == field,
            })
            .ok_or_else(|| {
                Error::IndexNotFound(match hint {
                    Hint::Name(n) | Hint::Field(n) => n.clone(),
                })
            })?;
        let candidates = match execute_indexed(query, std::slice::from_ref(idx), spec) {
            Some((ids, _)) => ids,
            None => {
                tracing::debug!(index = idx.name(), "hinted index cannot bound query; full index scan");
                idx.all_ids()
            }
        };
        return Ok(QueryPlan {
            index: Some(idx.name().to_string()),
            candidates: Some(candidates),
        });
    }

    let plan = match execute_indexed(query, indexes, spec) {
        Some((ids, name)) => QueryPlan {
            index: Some(name),
            candidates: Some(ids),
        },
        None => QueryPlan {
            index: None,
            candidates: None,
        },
    };
    tracing::debug!(stage = plan.stage(), index = ?plan.index, "query planned");
    Ok(plan)
}

/// Candidate ids from usable indexes plus the name of the first index used.
/// `None` means a full collection scan is needed.
fn execute_indexed(
    query: &Query,
    indexes: &[FieldIndex],
    spec: &CollationSpec,
) -> Option<(BTreeSet<DocumentId>, String)> {
    match query {
        Query::All => None,
        Query::Field { field, op } => indexes
            .iter()
            .filter(|idx| idx.field() == field)
            .find_map(|idx| execute_field_op(idx, op, spec).map(|ids| (ids, idx.name().to_string()))),
        Query::And(subs) => {
            let mut result: Option<(BTreeSet<DocumentId>, String)> = None;
            for sub in subs {
                if let Some((ids, name)) = execute_indexed(sub, indexes, spec) {
                    result = Some(match result {
                        Some((existing, first)) => (&existing & &ids, first),
                        None => (ids, name),
                    });
                }
            }
            result
        }
        Query::Or(subs) => {
            let mut result = BTreeSet::new();
            let mut first = None;
            for sub in subs {
                let (ids, name) = execute_indexed(sub, indexes, spec)?;
                result = &result | &ids;
                first.get_or_insert(name);
            }
            first.map(|name| (result, name))
        }
    }
}

fn execute_field_op(
    idx: &FieldIndex,
    op: &QueryOp,
    spec: &CollationSpec,
) -> Option<BTreeSet<DocumentId>> {
    let usable = |v: &Value| !needs_collation(v) || index_usable(spec, idx.descriptor().collation.as_ref());

    Some(match op {
        QueryOp::Eq(v) if usable(v) => idx.find_eq(&idx.key_for(v)),
        QueryOp::In(vals) if vals.iter().all(usable) => {
            let keys: Vec<SortKey> = vals.iter().map(|v| idx.key_for(v)).collect();
            idx.find_in(&keys)
        }
        QueryOp::Gt(v) if usable(v) => range(idx, v, false, true),
        QueryOp::Gte(v) if usable(v) => range(idx, v, true, true),
        QueryOp::Lt(v) if usable(v) => range(idx, v, false, false),
        QueryOp::Lte(v) if usable(v) => range(idx, v, true, false),
        _ => return None,
    })
}

/// Range scan bracketed to the type of `v`.
fn range(idx: &FieldIndex, v: &Value, inclusive: bool, lower: bool) -> BTreeSet<DocumentId> {
    let key = idx.key_for(v);
    let at_key = if inclusive {
        Bound::Included(&key)
    } else {
        Bound::Excluded(&key)
    };
    if lower {
        let ceiling = SortKey::type_ceiling(v.type_rank());
        idx.find_range(at_key, Bound::Excluded(&ceiling))
    } else {
        let floor = SortKey::type_floor(v.type_rank());
        idx.find_range(Bound::Included(&floor), at_key)
    }
}

// ---------------------------------------------------------------------------
// Sorting
// ---------------------------------------------------------------------------

/// The values a document contributes to each sort field; missing fields
/// sort as null.
pub(crate) fn sort_values(doc: &JsonValue, sort: &[(String, SortOrder)]) -> Vec<Value> {
    sort.iter()
        .map(|(field, _)| get_path(doc, field).map(Value::from_json).unwrap_or(Value::Null))
        .collect()
}

/// Compare two `sort_values` results field by field under `spec`.
pub(crate) fn compare_sort_values(
    a: &[Value],
    b: &[Value],
    sort: &[(String, SortOrder)],
    spec: &CollationSpec,
) -> Ordering {
    for ((x, y), (_, order)) in a.iter().zip(b).zip(sort) {
        let ord = compare(x, y, spec);
        let ord = if *order == SortOrder::Desc { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Order documents by the sort specification under `spec`. Stable, so
/// equal documents keep their relative order.
pub fn sort_documents(docs: &mut [JsonValue], sort: &[(String, SortOrder)], spec: &CollationSpec) {
    let mut keyed: Vec<(Vec<Value>, JsonValue)> = docs
        .iter_mut()
        .map(|d| (sort_values(d, sort), std::mem::take(d)))
        .collect();
    keyed.sort_by(|(a, _), (b, _)| compare_sort_values(a, b, sort, spec));
    for (slot, (_, doc)) in docs.iter_mut().zip(keyed) {
        *slot = doc;
    }
}
