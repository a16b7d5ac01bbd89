use std::cmp::Ordering;
use std::collections::HashMap;

use serde_json::{Map, Value as JsonValue, json};

use crate::compare::compare;
use crate::error::{Error, Result};
use crate::key::{self, SortKey};
use crate::query::{self, SortOrder};
use crate::spec::CollationSpec;
use crate::value::Value;

// ---------------------------------------------------------------------------
// Expression
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Expression {
    Literal(JsonValue),
    FieldRef(String),
}

// ---------------------------------------------------------------------------
// Group key
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum GroupKey {
    Null,
    Single(Expression),
    Compound(Vec<(String, Expression)>),
}

// ---------------------------------------------------------------------------
// Accumulators
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Accumulator {
    Sum(Expression),
    Min(Expression),
    Max(Expression),
    Count,
    First(Expression),
    Last(Expression),
}

enum AccumulatorState {
    Sum(f64),
    Min(Option<JsonValue>),
    Max(Option<JsonValue>),
    Count(u64),
    First(Option<JsonValue>),
    Last(Option<JsonValue>),
}

impl AccumulatorState {
    fn initial(acc: &Accumulator) -> Self {
        match acc {
            Accumulator::Sum(_) => AccumulatorState::Sum(0.0),
            Accumulator::Min(_) => AccumulatorState::Min(None),
            Accumulator::Max(_) => AccumulatorState::Max(None),
            Accumulator::Count => AccumulatorState::Count(0),
            Accumulator::First(_) => AccumulatorState::First(None),
            Accumulator::Last(_) => AccumulatorState::Last(None),
        }
    }

    fn finish(self) -> JsonValue {
        match self {
            AccumulatorState::Sum(s) => number_to_value(s),
            AccumulatorState::Min(v)
            | AccumulatorState::Max(v)
            | AccumulatorState::First(v)
            | AccumulatorState::Last(v) => v.unwrap_or(JsonValue::Null),
            AccumulatorState::Count(c) => JsonValue::Number(c.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum ProjectionField {
    Include,
    Exclude,
    Compute(Expression),
}

// ---------------------------------------------------------------------------
// Pipeline stages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Stage {
    Match(query::Query),
    Group {
        key: GroupKey,
        accumulators: Vec<(String, Accumulator)>,
    },
    Sort(Vec<(String, SortOrder)>),
    Skip(u64),
    Limit(u64),
    Project(Vec<(String, ProjectionField)>),
    Count(String),
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// A parsed aggregation pipeline. Every stage that compares values
/// (`$match`, `$group`, `$sort`, `$min`/`$max`) runs under the single
/// collation passed to `execute`.
#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn resolve_field(doc: &JsonValue, path: &str) -> JsonValue {
    let mut current = doc;
    for part in path.split('.') {
        match current {
            JsonValue::Object(map) => match map.get(part) {
                Some(v) => current = v,
                None => return JsonValue::Null,
            },
            _ => return JsonValue::Null,
        }
    }
    current.clone()
}

pub(crate) fn set_field(doc: &mut JsonValue, path: &str, value: JsonValue) {
    let parts: Vec<&str> = path.split('.').collect();
    let last = parts.len() - 1;
    let mut current = doc;
    for (i, part) in parts.iter().enumerate() {
        let JsonValue::Object(map) = current else {
            return;
        };
        if i == last {
            map.insert(part.to_string(), value);
            return;
        }
        let slot = map.entry(part.to_string()).or_insert_with(|| json!({}));
        if !slot.is_object() {
            *slot = json!({});
        }
        current = slot;
    }
}

pub(crate) fn number_to_value(n: f64) -> JsonValue {
    // `i64::MAX as f64` is 2^63, one past the largest i64.
    if n.fract() == 0.0 && n >= i64::MIN as f64 && n < i64::MAX as f64 {
        JsonValue::Number((n as i64).into())
    } else {
        serde_json::Number::from_f64(n)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null)
    }
}

fn single_entry<'a>(
    obj: &'a Map<String, JsonValue>,
    what: &str,
) -> Result<(&'a String, &'a JsonValue)> {
    match obj.iter().next() {
        Some(entry) if obj.len() == 1 => Ok(entry),
        _ => Err(Error::InvalidPipeline(format!(
            "{what} must have exactly one key"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Expression parsing & evaluation
// ---------------------------------------------------------------------------

/// `"$path"` is a field reference; anything else is a literal.
/// A field path or a literal. Operator expressions are not supported.
fn parse_expression(val: &JsonValue) -> Result<Expression> {
    match val {
        JsonValue::String(s) if s.starts_with('$') => Ok(Expression::FieldRef(s[1..].to_string())),
        JsonValue::Object(map) => match map.keys().find(|k| k.starts_with('$')) {
            Some(op) => Err(Error::InvalidPipeline(format!("unsupported expression: {op}"))),
            None => Ok(Expression::Literal(val.clone())),
        },
        _ => Ok(Expression::Literal(val.clone())),
    }
}

impl Expression {
    fn eval(&self, doc: &JsonValue) -> JsonValue {
        match self {
            Expression::Literal(v) => v.clone(),
            Expression::FieldRef(path) => resolve_field(doc, path),
        }
    }
}

// ---------------------------------------------------------------------------
// Stage parsing helpers
// ---------------------------------------------------------------------------

fn parse_accumulator(val: &JsonValue) -> Result<Accumulator> {
    let obj = val
        .as_object()
        .ok_or_else(|| Error::InvalidPipeline("accumulator must be an object".into()))?;
    let (op, arg) = single_entry(obj, "accumulator")?;
    match op.as_str() {
        "$sum" => Ok(Accumulator::Sum(parse_expression(arg)?)),
        "$min" => Ok(Accumulator::Min(parse_expression(arg)?)),
        "$max" => Ok(Accumulator::Max(parse_expression(arg)?)),
        "$count" => Ok(Accumulator::Count),
        "$first" => Ok(Accumulator::First(parse_expression(arg)?)),
        "$last" => Ok(Accumulator::Last(parse_expression(arg)?)),
        _ => Err(Error::InvalidPipeline(format!("unknown accumulator: {op}"))),
    }
}

fn parse_group_stage(val: &JsonValue) -> Result<Stage> {
    let obj = val
        .as_object()
        .ok_or_else(|| Error::InvalidPipeline("$group must be an object".into()))?;

    let id_val = obj
        .get("_id")
        .ok_or_else(|| Error::InvalidPipeline("$group requires '_id' field".into()))?;

    let key = match id_val {
        JsonValue::Null => GroupKey::Null,
        JsonValue::String(s) if s.starts_with('$') => {
            GroupKey::Single(Expression::FieldRef(s[1..].to_string()))
        }
        JsonValue::Object(map) => {
            if let Some(op) = map.keys().find(|k| k.starts_with('$')) {
                return Err(Error::InvalidPipeline(format!(
                    "unsupported $group _id expression: {op}"
                )));
            }
            GroupKey::Compound(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), parse_expression(v)?)))
                    .collect::<Result<_>>()?,
            )
        }
        _ => GroupKey::Single(Expression::Literal(id_val.clone())),
    };

    let mut accumulators = Vec::new();
    for (name, spec) in obj {
        if name == "_id" {
            continue;
        }
        accumulators.push((name.clone(), parse_accumulator(spec)?));
    }

    Ok(Stage::Group { key, accumulators })
}

fn parse_project(val: &JsonValue) -> Result<Vec<(String, ProjectionField)>> {
    let obj = val
        .as_object()
        .ok_or_else(|| Error::InvalidPipeline("$project must be an object".into()))?;
    let mut fields = Vec::new();
    for (field, spec) in obj {
        let pf = match spec {
            JsonValue::Number(n) if n.as_i64() == Some(1) => ProjectionField::Include,
            JsonValue::Number(n) if n.as_i64() == Some(0) => ProjectionField::Exclude,
            JsonValue::Bool(true) => ProjectionField::Include,
            JsonValue::Bool(false) => ProjectionField::Exclude,
            _ => ProjectionField::Compute(parse_expression(spec)?),
        };
        fields.push((field.clone(), pf));
    }
    Ok(fields)
}

impl Pipeline {
    pub fn parse(pipeline_json: &JsonValue) -> Result<Self> {
        let arr = pipeline_json
            .as_array()
            .ok_or_else(|| Error::InvalidPipeline("pipeline must be an array".into()))?;

        let mut stages = Vec::new();
        for stage_val in arr {
            let obj = stage_val.as_object().ok_or_else(|| {
                Error::InvalidPipeline("each pipeline stage must be an object".into())
            })?;
            let (stage_name, stage_body) = single_entry(obj, "each pipeline stage")?;

            let stage = match stage_name.as_str() {
                "$match" => Stage::Match(
                    query::parse_query(stage_body)
                        .map_err(|e| Error::InvalidPipeline(e.to_string()))?,
                ),
                "$group" => parse_group_stage(stage_body)?,
                "$sort" => {
                    if !stage_body.is_object() {
                        return Err(Error::InvalidPipeline("$sort must be an object".into()));
                    }
                    let fields = query::parse_sort(Some(stage_body))
                        .map_err(|e| Error::InvalidPipeline(e.to_string()))?
                        .ok_or_else(|| {
                            Error::InvalidPipeline("$sort needs at least one field".into())
                        })?;
                    Stage::Sort(fields)
                }
                "$skip" => {
                    let n = stage_body.as_u64().ok_or_else(|| {
                        Error::InvalidPipeline("$skip must be a non-negative integer".into())
                    })?;
                    Stage::Skip(n)
                }
                "$limit" => {
                    let n = stage_body.as_u64().filter(|n| *n > 0).ok_or_else(|| {
                        Error::InvalidPipeline("$limit must be a positive integer".into())
                    })?;
                    Stage::Limit(n)
                }
                "$project" => Stage::Project(parse_project(stage_body)?),
                "$count" => {
                    let field = stage_body
                        .as_str()
                        .filter(|f| !f.is_empty() && !f.starts_with('$'))
                        .ok_or_else(|| {
                            Error::InvalidPipeline("$count must be a non-empty field name".into())
                        })?;
                    Stage::Count(field.to_string())
                }
                other => {
                    return Err(Error::InvalidPipeline(format!("unknown stage: {other}")));
                }
            };
            stages.push(stage);
        }

        Ok(Self { stages })
    }

    /// Run every stage in order over `docs` under the collation `spec`.
    pub fn execute(&self, docs: Vec<JsonValue>, spec: &CollationSpec) -> Vec<JsonValue> {
        let mut current = docs;
        for stage in &self.stages {
            current = match stage {
                Stage::Match(q) => current
                    .into_iter()
                    .filter(|doc| query::matches_value(q, doc, spec))
                    .collect(),
                Stage::Group { key, accumulators } => exec_group(current, key, accumulators, spec),
                Stage::Sort(fields) => {
                    query::sort_documents(&mut current, fields, spec);
                    current
                }
                Stage::Skip(n) => current.into_iter().skip(*n as usize).collect(),
                Stage::Limit(n) => current.into_iter().take(*n as usize).collect(),
                Stage::Project(fields) => exec_project(current, fields),
                Stage::Count(field) => vec![json!({ field.as_str(): current.len() })],
            };
        }
        current
    }
}

// ---------------------------------------------------------------------------
// Stage execution
// ---------------------------------------------------------------------------

fn collated_cmp(a: &JsonValue, b: &JsonValue, spec: &CollationSpec) -> Ordering {
    compare(&Value::from_json(a), &Value::from_json(b), spec)
}

/// Groups are keyed by the `_id` value's sort key, so `_id`s equal under the
/// collation fall into one group whose `_id` is the first one seen.
fn exec_group(
    docs: Vec<JsonValue>,
    key: &GroupKey,
    accumulators: &[(String, Accumulator)],
    spec: &CollationSpec,
) -> Vec<JsonValue> {
    let mut slots: HashMap<SortKey, usize> = HashMap::new();
    let mut groups: Vec<(JsonValue, Vec<AccumulatorState>)> = Vec::new();

    for doc in &docs {
        let key_val = match key {
            GroupKey::Null => JsonValue::Null,
            GroupKey::Single(expr) => expr.eval(doc),
            GroupKey::Compound(fields) => {
                let mut map = Map::new();
                for (name, expr) in fields {
                    map.insert(name.clone(), expr.eval(doc));
                }
                JsonValue::Object(map)
            }
        };

        let slot = *slots
            .entry(key::encode_json(&key_val, spec))
            .or_insert_with(|| {
                let initial = accumulators
                    .iter()
                    .map(|(_, acc)| AccumulatorState::initial(acc))
                    .collect();
                groups.push((key_val, initial));
                groups.len() - 1
            });
        let states = &mut groups[slot].1;

        for ((_, acc), state) in accumulators.iter().zip(states.iter_mut()) {
            match (acc, state) {
                (Accumulator::Sum(expr), AccumulatorState::Sum(s)) => {
                    if let Some(n) = expr.eval(doc).as_f64() {
                        *s += n;
                    }
                }
                (Accumulator::Min(expr), AccumulatorState::Min(current)) => {
                    let val = expr.eval(doc);
                    if !val.is_null() {
                        *current = Some(match current.take() {
                            Some(cur) if collated_cmp(&val, &cur, spec).is_ge() => cur,
                            _ => val,
                        });
                    }
                }
                (Accumulator::Max(expr), AccumulatorState::Max(current)) => {
                    let val = expr.eval(doc);
                    if !val.is_null() {
                        *current = Some(match current.take() {
                            Some(cur) if collated_cmp(&val, &cur, spec).is_le() => cur,
                            _ => val,
                        });
                    }
                }
                (Accumulator::Count, AccumulatorState::Count(c)) => {
                    *c += 1;
                }
                (Accumulator::First(expr), AccumulatorState::First(current)) => {
                    if current.is_none() {
                        *current = Some(expr.eval(doc));
                    }
                }
                (Accumulator::Last(expr), AccumulatorState::Last(current)) => {
                    *current = Some(expr.eval(doc));
                }
                _ => {}
            }
        }
    }

    groups
        .into_iter()
        .map(|(key_val, states)| {
            let mut doc = Map::new();
            doc.insert("_id".to_string(), key_val);
            for ((name, _), state) in accumulators.iter().zip(states) {
                doc.insert(name.clone(), state.finish());
            }
            JsonValue::Object(doc)
        })
        .collect()
}

fn exec_project(docs: Vec<JsonValue>, fields: &[(String, ProjectionField)]) -> Vec<JsonValue> {
    let has_include = fields
        .iter()
        .any(|(name, pf)| name != "_id" && matches!(pf, ProjectionField::Include));
    let has_compute = fields
        .iter()
        .any(|(_, pf)| matches!(pf, ProjectionField::Compute(_)));
    let inclusion_mode = has_include || has_compute;

    docs.into_iter()
        .map(|doc| {
            let mut result = Map::new();

            if inclusion_mode {
                let id_excluded = fields
                    .iter()
                    .any(|(name, pf)| name == "_id" && matches!(pf, ProjectionField::Exclude));

                if !id_excluded {
                    if let Some(id_val) = doc.get("_id") {
                        result.insert("_id".to_string(), id_val.clone());
                    }
                }

                for (name, pf) in fields {
                    match pf {
                        ProjectionField::Include => {
                            if crate::document::get_path(&doc, name).is_some() {
                                result.insert(name.clone(), resolve_field(&doc, name));
                            }
                        }
                        ProjectionField::Compute(expr) => {
                            result.insert(name.clone(), expr.eval(&doc));
                        }
                        ProjectionField::Exclude => {}
                    }
                }
            } else {
                if let JsonValue::Object(map) = &doc {
                    result = map.clone();
                }
                for (name, pf) in fields {
                    if matches!(pf, ProjectionField::Exclude) {
                        result.remove(name.as_str());
                    }
                }
            }

            JsonValue::Object(result)
        })
        .collect()
}
