use std::collections::{BTreeMap, HashSet};

use serde_json::{Map, Value as JsonValue, json};

use crate::bulk::{BulkOp, BulkWriteError, BulkWriteResult};
use crate::catalog::{CollectionDescriptor, IndexDescriptor};
use crate::document::{DocumentId, collect_path, get_path};
use crate::error::{Error, Result};
use crate::geo::{GeoNearOptions, Point};
use crate::index::FieldIndex;
use crate::key;
use crate::pipeline::Pipeline;
use crate::query::{self, FindOptions, Hint, Query, WriteOptions};
use crate::resolve::resolve_effective;
use crate::spec::CollationSpec;
use crate::update;
use crate::validate::CollationValidator;

/// Name of the unique index every collection keeps on `_id`.
pub const ID_INDEX: &str = "_id_";

/// Options accepted when creating an index: `{name, unique, collation}`.
#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    pub name: Option<String>,
    pub unique: bool,
    pub collation: Option<CollationSpec>,
}

impl IndexOptions {
    pub fn parse(options: &JsonValue, validator: &CollationValidator) -> Result<Self> {
        let name = match options.get("name") {
            None | Some(JsonValue::Null) => None,
            Some(JsonValue::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(_) => return Err(Error::InvalidQuery("index name must be a non-empty string".into())),
        };
        let unique = match options.get("unique") {
            None | Some(JsonValue::Null) => false,
            Some(JsonValue::Bool(b)) => *b,
            Some(_) => return Err(Error::InvalidQuery("unique must be a boolean".into())),
        };
        Ok(Self {
            name,
            unique,
            collation: validator.validate_option(options)?,
        })
    }
}

/// Outcome of an update or replace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateResult {
    pub matched: u64,
    pub modified: u64,
    /// `_id` of the document an upsert inserted.
    pub upserted_id: Option<JsonValue>,
}

/// An in-memory collection. Every read and write resolves its collation
/// once: the operation's own, else the collection default, else simple.
#[derive(Debug)]
pub struct Collection {
    descriptor: CollectionDescriptor,
    docs: BTreeMap<DocumentId, JsonValue>,
    next_id: DocumentId,
    indexes: Vec<FieldIndex>,
    table_version: u32,
}

impl Collection {
    pub fn new(descriptor: CollectionDescriptor, table_version: u32) -> Self {
        let id_index = IndexDescriptor::new(
            ID_INDEX,
            "_id",
            true,
            None,
            descriptor.default_collation(),
            table_version,
        );
        Self {
            descriptor,
            docs: BTreeMap::new(),
            next_id: 1,
            indexes: vec![FieldIndex::new(id_index)],
            table_version,
        }
    }

    /// Reassemble a persisted collection. Indexes are attached afterwards,
    /// from their key caches or by `rebuild_index`.
    pub(crate) fn restore(
        descriptor: CollectionDescriptor,
        next_id: DocumentId,
        docs: BTreeMap<DocumentId, JsonValue>,
        table_version: u32,
    ) -> Self {
        Self {
            descriptor,
            docs,
            next_id,
            indexes: Vec::new(),
            table_version,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &CollectionDescriptor {
        &self.descriptor
    }

    pub fn default_collation(&self) -> Option<&CollationSpec> {
        self.descriptor.default_collation()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub(crate) fn next_id(&self) -> DocumentId {
        self.next_id
    }

    pub(crate) fn documents(&self) -> impl Iterator<Item = (DocumentId, &JsonValue)> {
        self.docs.iter().map(|(id, data)| (*id, data))
    }

    pub fn indexes(&self) -> &[FieldIndex] {
        &self.indexes
    }

    fn effective<'a>(&'a self, requested: Option<&'a CollationSpec>) -> &'a CollationSpec {
        resolve_effective(requested, self.descriptor.default_collation())
    }

    // -----------------------------------------------------------------------
    // Index management
    // -----------------------------------------------------------------------

    fn build_index(&self, descriptor: IndexDescriptor) -> Result<FieldIndex> {
        let mut idx = FieldIndex::new(descriptor);
        for (&id, data) in &self.docs {
            if idx.is_unique() && idx.check_unique(data, None) {
                return Err(Error::UniqueViolation {
                    field: idx.field().to_string(),
                });
            }
            idx.insert_value(id, data);
        }
        Ok(idx)
    }

    /// Create a single-field index and backfill it from existing documents.
    /// Returns the index name. Two indexes on the same field may coexist
    /// only under different collations.
    pub fn create_index(&mut self, field: &str, options: IndexOptions) -> Result<String> {
        let name = options
            .name
            .unwrap_or_else(|| IndexDescriptor::default_name(field));
        let descriptor = IndexDescriptor::new(
            name.clone(),
            field,
            options.unique,
            options.collation,
            self.descriptor.default_collation(),
            self.table_version,
        );

        let clash = self.indexes.iter().any(|idx| {
            idx.name() == name
                || (idx.field() == field
                    && idx.descriptor().collation() == descriptor.collation())
        });
        if clash {
            return Err(Error::IndexAlreadyExists(name));
        }

        let idx = self.build_index(descriptor)?;
        tracing::debug!(
            collection = self.name(),
            index = %name,
            collation = %idx.descriptor().collation(),
            "created index"
        );
        self.indexes.push(idx);
        Ok(name)
    }

    /// Drop an index by name. The `_id` index cannot be dropped.
    pub fn drop_index(&mut self, name: &str) -> Result<()> {
        if name == ID_INDEX {
            return Err(Error::InvalidQuery("cannot drop the _id index".into()));
        }
        let pos = self
            .indexes
            .iter()
            .position(|idx| idx.name() == name)
            .ok_or_else(|| Error::IndexNotFound(name.to_string()))?;
        self.indexes.remove(pos);
        Ok(())
    }

    /// `listIndexes`-style entries, each with its resolved collation.
    pub fn list_indexes(&self) -> Vec<JsonValue> {
        self.indexes.iter().map(|idx| idx.descriptor().info()).collect()
    }

    pub(crate) fn attach_index(&mut self, index: FieldIndex) {
        self.indexes.push(index);
    }

    /// Build an index from the documents under the current table version,
    /// e.g. when its cached keys were encoded under an older one.
    pub(crate) fn rebuild_index(&mut self, mut descriptor: IndexDescriptor) -> Result<()> {
        descriptor.table_version = self.table_version;
        let idx = self.build_index(descriptor)?;
        self.indexes.push(idx);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    fn check_unique_constraints(&self, data: &JsonValue, exclude_id: Option<DocumentId>) -> Result<()> {
        match self
            .indexes
            .iter()
            .find(|idx| idx.is_unique() && idx.check_unique(data, exclude_id))
        {
            Some(idx) => Err(Error::UniqueViolation {
                field: idx.field().to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Insert a document. An `_id` is assigned only when the document has
    /// none. Returns the internal document id.
    pub fn insert(&mut self, data: JsonValue) -> Result<DocumentId> {
        let JsonValue::Object(fields) = data else {
            return Err(Error::NotAnObject);
        };
        // A generated `_id` doubles as the internal id. Explicit ones never
        // move the id counter.
        let (id, data) = if fields.contains_key("_id") {
            (self.next_id, JsonValue::Object(fields))
        } else {
            let id = self.generate_id();
            let mut with_id = Map::with_capacity(fields.len() + 1);
            with_id.insert("_id".to_string(), json!(id));
            with_id.extend(fields);
            (id, JsonValue::Object(with_id))
        };

        self.check_unique_constraints(&data, None)?;

        self.next_id = id + 1;
        for idx in &mut self.indexes {
            idx.insert_value(id, &data);
        }
        self.docs.insert(id, data);
        Ok(id)
    }

    /// First id at or after `next_id` that no explicit `_id` holds yet.
    fn generate_id(&self) -> DocumentId {
        let id_index = self.indexes.iter().find(|idx| idx.name() == ID_INDEX);
        let mut candidate = self.next_id;
        while id_index.is_some_and(|idx| idx.check_unique(&json!({ "_id": candidate }), None)) {
            candidate += 1;
        }
        candidate
    }

    /// Insert every document or none of them.
    pub fn insert_many(&mut self, docs: Vec<JsonValue>) -> Result<Vec<DocumentId>> {
        let saved_next_id = self.next_id;
        let mut ids = Vec::with_capacity(docs.len());
        for data in docs {
            match self.insert(data) {
                Ok(id) => ids.push(id),
                Err(e) => {
                    for id in ids {
                        self.remove_doc(id);
                    }
                    self.next_id = saved_next_id;
                    return Err(e);
                }
            }
        }
        Ok(ids)
    }

    fn remove_doc(&mut self, id: DocumentId) -> Option<JsonValue> {
        let data = self.docs.remove(&id)?;
        for idx in &mut self.indexes {
            idx.remove_value(id, &data);
        }
        Some(data)
    }

    /// Replace a document, keeping every index in step. On a unique
    /// violation the old version stays in place.
    fn swap_doc(&mut self, id: DocumentId, old: &JsonValue, new: JsonValue) -> Result<()> {
        for idx in &mut self.indexes {
            idx.remove_value(id, old);
        }
        let violation = self
            .indexes
            .iter()
            .find(|idx| idx.is_unique() && idx.check_unique(&new, Some(id)))
            .map(|idx| idx.field().to_string());
        let (kept, result) = match violation {
            Some(field) => (old.clone(), Err(Error::UniqueViolation { field })),
            None => (new, Ok(())),
        };
        for idx in &mut self.indexes {
            idx.insert_value(id, &kept);
        }
        self.docs.insert(id, kept);
        result
    }

    /// Apply prepared replacements atomically: all of them, or none.
    fn swap_all(&mut self, changes: Vec<(DocumentId, JsonValue, JsonValue)>) -> Result<()> {
        let mut done: Vec<(DocumentId, JsonValue, JsonValue)> = Vec::with_capacity(changes.len());
        for (id, old, new) in changes {
            if let Err(e) = self.swap_doc(id, &old, new.clone()) {
                for (id, old, new) in done.into_iter().rev() {
                    // Restores a state that satisfied every unique index.
                    let restored = self.swap_doc(id, &new, old);
                    debug_assert!(restored.is_ok());
                }
                return Err(e);
            }
            done.push((id, old, new));
        }
        Ok(())
    }

    /// Insert the document an upsert builds, reporting its `_id`.
    fn upsert(&mut self, doc: JsonValue) -> Result<(DocumentId, UpdateResult)> {
        let id = self.insert(doc)?;
        let upserted_id = self.docs.get(&id).and_then(|d| d.get("_id")).cloned();
        Ok((
            id,
            UpdateResult {
                upserted_id,
                ..UpdateResult::default()
            },
        ))
    }

    /// Apply `update_json` to the first match, or to every match when
    /// `opts.multi`. With `opts.upsert` and no match, the query's equality
    /// fields seed a new document that the update is applied to.
    pub fn update(
        &mut self,
        query_json: &JsonValue,
        update_json: &JsonValue,
        opts: &WriteOptions,
    ) -> Result<UpdateResult> {
        let query = query::parse_query(query_json)?;
        let spec = self.effective(opts.collation.as_ref()).clone();
        let mut ids = self.matching_ids(&query, &spec, None)?;
        if !opts.multi {
            ids.truncate(1);
        }

        if ids.is_empty() && opts.upsert {
            let mut doc = query::upsert_seed(&query);
            update::apply_update(&mut doc, update_json, &spec)?;
            return Ok(self.upsert(doc)?.1);
        }

        let mut changes = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(old) = self.docs.get(&id) else {
                continue;
            };
            let mut new = old.clone();
            update::apply_update(&mut new, update_json, &spec)?;
            changes.push((id, old.clone(), new));
        }

        let result = UpdateResult {
            matched: changes.len() as u64,
            modified: changes.iter().filter(|(_, old, new)| old != new).count() as u64,
            upserted_id: None,
        };
        self.swap_all(changes)?;
        Ok(result)
    }

    /// Replace the first match (in `opts.sort` order) with `replacement`,
    /// keeping its `_id`. With `opts.upsert` and no match, the replacement
    /// is inserted, taking an `_id` equality from the query if it has none.
    pub fn replace_one(
        &mut self,
        query_json: &JsonValue,
        replacement: &JsonValue,
        opts: &WriteOptions,
    ) -> Result<UpdateResult> {
        let query = query::parse_query(query_json)?;
        let spec = self.effective(opts.collation.as_ref()).clone();
        check_replacement(replacement)?;

        match self.pick_one(&query, &spec, opts)? {
            Some((id, old)) => {
                let new = replacement_for(&old, replacement)?;
                let modified = u64::from(old != new);
                self.swap_doc(id, &old, new)?;
                Ok(UpdateResult {
                    matched: 1,
                    modified,
                    upserted_id: None,
                })
            }
            None if opts.upsert => Ok(self.upsert(upsert_replacement(&query, replacement))?.1),
            None => Ok(UpdateResult::default()),
        }
    }

    /// First match in `opts.sort` order under `spec`, or id order without
    /// a sort.
    fn pick_one(
        &self,
        query: &Query,
        spec: &CollationSpec,
        opts: &WriteOptions,
    ) -> Result<Option<(DocumentId, JsonValue)>> {
        let ids = self.matching_ids(query, spec, None)?;
        let picked = match &opts.sort {
            None => ids.first().copied(),
            Some(sort) => {
                let mut keyed: Vec<_> = ids
                    .iter()
                    .filter_map(|id| self.docs.get(id).map(|d| (query::sort_values(d, sort), *id)))
                    .collect();
                keyed.sort_by(|(a, _), (b, _)| query::compare_sort_values(a, b, sort, spec));
                keyed.first().map(|(_, id)| *id)
            }
        };
        Ok(picked.and_then(|id| self.docs.get(&id).map(|d| (id, d.clone()))))
    }

    /// Update the first match (in `opts.sort` order under the effective
    /// collation) and return it, before or after the update per
    /// `opts.return_new`. An upsert returns the new document only when
    /// `opts.return_new` is set.
    pub fn find_one_and_update(
        &mut self,
        query_json: &JsonValue,
        update_json: &JsonValue,
        opts: &WriteOptions,
    ) -> Result<Option<JsonValue>> {
        let query = query::parse_query(query_json)?;
        let spec = self.effective(opts.collation.as_ref()).clone();

        let Some((id, old)) = self.pick_one(&query, &spec, opts)? else {
            if !opts.upsert {
                return Ok(None);
            }
            let mut doc = query::upsert_seed(&query);
            update::apply_update(&mut doc, update_json, &spec)?;
            let (id, _) = self.upsert(doc)?;
            return Ok(self.docs.get(&id).filter(|_| opts.return_new).cloned());
        };

        let mut new = old.clone();
        update::apply_update(&mut new, update_json, &spec)?;
        self.swap_doc(id, &old, new.clone())?;
        Ok(Some(if opts.return_new { new } else { old }))
    }

    /// Replace the first match and return it, before or after the
    /// replacement per `opts.return_new`.
    pub fn find_one_and_replace(
        &mut self,
        query_json: &JsonValue,
        replacement: &JsonValue,
        opts: &WriteOptions,
    ) -> Result<Option<JsonValue>> {
        let query = query::parse_query(query_json)?;
        let spec = self.effective(opts.collation.as_ref()).clone();
        check_replacement(replacement)?;

        let Some((id, old)) = self.pick_one(&query, &spec, opts)? else {
            if !opts.upsert {
                return Ok(None);
            }
            let (id, _) = self.upsert(upsert_replacement(&query, replacement))?;
            return Ok(self.docs.get(&id).filter(|_| opts.return_new).cloned());
        };

        let new = replacement_for(&old, replacement)?;
        self.swap_doc(id, &old, new.clone())?;
        Ok(Some(if opts.return_new { new } else { old }))
    }

    /// Remove the first match (in `opts.sort` order) and return it.
    pub fn find_one_and_delete(
        &mut self,
        query_json: &JsonValue,
        opts: &WriteOptions,
    ) -> Result<Option<JsonValue>> {
        let query = query::parse_query(query_json)?;
        let spec = self.effective(opts.collation.as_ref()).clone();
        let Some((id, _)) = self.pick_one(&query, &spec, opts)? else {
            return Ok(None);
        };
        Ok(self.remove_doc(id))
    }

    /// Delete matches, at most `opts.limit` of them. Returns the number deleted.
    pub fn delete(&mut self, query_json: &JsonValue, opts: &WriteOptions) -> Result<u64> {
        let query = query::parse_query(query_json)?;
        let spec = self.effective(opts.collation.as_ref()).clone();
        let mut ids = self.matching_ids(&query, &spec, None)?;
        if let Some(limit) = opts.limit {
            ids.truncate(limit);
        }
        let mut count = 0;
        for id in ids {
            if self.remove_doc(id).is_some() {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Run a validated batch. Ordered batches stop at the first failing
    /// operation; unordered ones record the failure and carry on.
    pub fn bulk_write(&mut self, ops: &[BulkOp], ordered: bool) -> BulkWriteResult {
        let mut result = BulkWriteResult::default();
        for (index, op) in ops.iter().enumerate() {
            if let Err(e) = self.apply_bulk_op(index, op, &mut result) {
                result.write_errors.push(BulkWriteError {
                    index,
                    message: e.to_string(),
                });
                if ordered {
                    break;
                }
            }
        }
        result
    }

    fn apply_bulk_op(&mut self, index: usize, op: &BulkOp, result: &mut BulkWriteResult) -> Result<()> {
        match op {
            BulkOp::InsertOne { document } => {
                self.insert(document.clone())?;
                result.inserted += 1;
            }
            BulkOp::Update {
                filter,
                update,
                options,
            } => result.absorb(index, self.update(filter, update, options)?),
            BulkOp::Replace {
                filter,
                replacement,
                options,
            } => result.absorb(index, self.replace_one(filter, replacement, options)?),
            BulkOp::Delete { filter, options } => result.deleted += self.delete(filter, options)?,
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Ids of matching documents in id order. Index candidates are always
    /// re-checked against the query.
    fn matching_ids(
        &self,
        query: &Query,
        spec: &CollationSpec,
        hint: Option<&Hint>,
    ) -> Result<Vec<DocumentId>> {
        let plan = query::plan(query, &self.indexes, spec, hint)?;
        let ids = match plan.candidates {
            Some(candidates) => candidates
                .into_iter()
                .filter(|id| {
                    self.docs
                        .get(id)
                        .is_some_and(|d| query::matches_value(query, d, spec))
                })
                .collect(),
            None => self
                .docs
                .iter()
                .filter(|(_, d)| query::matches_value(query, d, spec))
                .map(|(id, _)| *id)
                .collect(),
        };
        Ok(ids)
    }

    /// Find documents matching a query with sort/skip/limit/collation/hint.
    pub fn find(&self, query_json: &JsonValue, opts: &FindOptions) -> Result<Vec<JsonValue>> {
        let query = query::parse_query(query_json)?;
        let spec = self.effective(opts.collation.as_ref());
        let ids = self.matching_ids(&query, spec, opts.hint.as_ref())?;

        let mut docs: Vec<JsonValue> = ids
            .iter()
            .filter_map(|id| self.docs.get(id).cloned())
            .collect();
        if let Some(sort) = &opts.sort {
            query::sort_documents(&mut docs, sort, spec);
        }

        let skip = opts.skip.unwrap_or(0) as usize;
        let limit = match opts.limit {
            None | Some(0) => usize::MAX,
            Some(n) => n as usize,
        };
        Ok(docs.into_iter().skip(skip).take(limit).collect())
    }

    pub fn count(&self, query_json: &JsonValue, collation: Option<&CollationSpec>) -> Result<usize> {
        let query = query::parse_query(query_json)?;
        let spec = self.effective(collation);
        Ok(self.matching_ids(&query, spec, None)?.len())
    }

    /// Distinct values of `field` among matches, array fields contributing
    /// each element. Values equal under the collation are reported once,
    /// as the first one seen.
    pub fn distinct(
        &self,
        field: &str,
        query_json: &JsonValue,
        collation: Option<&CollationSpec>,
    ) -> Result<Vec<JsonValue>> {
        let query = query::parse_query(query_json)?;
        let spec = self.effective(collation);
        let mut seen = HashSet::new();
        let mut values = Vec::new();
        for id in self.matching_ids(&query, spec, None)? {
            let Some(doc) = self.docs.get(&id) else {
                continue;
            };
            for found in collect_path(doc, field) {
                let items: Vec<&JsonValue> = match found {
                    JsonValue::Array(items) => items.iter().collect(),
                    other => vec![other],
                };
                for item in items {
                    if seen.insert(key::encode_json(item, spec)) {
                        values.push(item.clone());
                    }
                }
            }
        }
        Ok(values)
    }

    /// Run an aggregation pipeline over the whole collection.
    pub fn aggregate(
        &self,
        pipeline_json: &JsonValue,
        collation: Option<&CollationSpec>,
    ) -> Result<Vec<JsonValue>> {
        let pipeline = Pipeline::parse(pipeline_json)?;
        let spec = self.effective(collation);
        Ok(pipeline.execute(self.docs.values().cloned().collect(), spec))
    }

    /// Count matches per distinct value of `field`:
    /// `[{_id: <value>, count: <n>}, ...]` in first-seen order.
    pub fn group_count(
        &self,
        field: &str,
        query_json: &JsonValue,
        collation: Option<&CollationSpec>,
    ) -> Result<Vec<JsonValue>> {
        let pipeline = json!([
            { "$match": query_json },
            { "$group": { "_id": format!("${field}"), "count": { "$sum": 1 } } },
        ]);
        self.aggregate(&pipeline, collation)
    }

    /// Describe how a find would run: the plan stage, the index used and
    /// the effective collation.
    pub fn explain(&self, query_json: &JsonValue, opts: &FindOptions) -> Result<JsonValue> {
        let query = query::parse_query(query_json)?;
        let spec = self.effective(opts.collation.as_ref());
        let plan = query::plan(&query, &self.indexes, spec, opts.hint.as_ref())?;
        Ok(json!({
            "namespace": self.name(),
            "stage": plan.stage(),
            "indexName": plan.index,
            "collation": spec.to_json(),
        }))
    }

    /// Documents whose `opts.key` point lies within `opts.max_distance` of
    /// `opts.near`, nearest first, as `{dis, obj}`. The filter is matched
    /// under the effective collation; documents without a valid point are
    /// skipped.
    pub fn geo_near(&self, opts: &GeoNearOptions) -> Result<Vec<JsonValue>> {
        let query = query::parse_query(&opts.query)?;
        let spec = self.effective(opts.collation.as_ref());
        let mut hits: Vec<(f64, DocumentId)> = self
            .matching_ids(&query, spec, None)?
            .into_iter()
            .filter_map(|id| {
                let point = get_path(self.docs.get(&id)?, &opts.key).and_then(Point::from_json)?;
                let dis = opts.near.distance_to(&point);
                opts.max_distance.is_none_or(|max| dis <= max).then_some((dis, id))
            })
            .collect();
        hits.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        hits.truncate(opts.limit);
        Ok(hits
            .into_iter()
            .filter_map(|(dis, id)| self.docs.get(&id).map(|obj| json!({"dis": dis, "obj": obj})))
            .collect())
    }
}

/// A replacement is a plain document: no update operators.
pub(crate) fn check_replacement(replacement: &JsonValue) -> Result<()> {
    let fields = replacement.as_object().ok_or(Error::NotAnObject)?;
    if fields.keys().any(|k| k.starts_with('$')) {
        return Err(Error::InvalidUpdate(
            "replacement document must not contain update operators".into(),
        ));
    }
    Ok(())
}

/// `replacement` carrying `old`'s `_id` first. A different `_id` is refused.
fn replacement_for(old: &JsonValue, replacement: &JsonValue) -> Result<JsonValue> {
    let fields = replacement.as_object().ok_or(Error::NotAnObject)?;
    let Some(old_id) = old.get("_id") else {
        return Ok(replacement.clone());
    };
    if let Some(new_id) = fields.get("_id")
        && new_id != old_id
    {
        return Err(Error::InvalidUpdate("replacement must not change _id".into()));
    }
    let mut out = Map::with_capacity(fields.len() + 1);
    out.insert("_id".to_string(), old_id.clone());
    out.extend(
        fields
            .iter()
            .filter(|(k, _)| k.as_str() != "_id")
            .map(|(k, v)| (k.clone(), v.clone())),
    );
    Ok(JsonValue::Object(out))
}

/// The document an upserting replace inserts: the replacement, with the
/// query's `_id` equality when the replacement names none.
fn upsert_replacement(query: &Query, replacement: &JsonValue) -> JsonValue {
    let Some(fields) = replacement.as_object() else {
        return replacement.clone();
    };
    if fields.contains_key("_id") {
        return replacement.clone();
    }
    let seed = query::upsert_seed(query);
    let Some(id) = seed.get("_id") else {
        return replacement.clone();
    };
    let mut out = Map::with_capacity(fields.len() + 1);
    out.insert("_id".to_string(), id.clone());
    out.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
    JsonValue::Object(out)
}
