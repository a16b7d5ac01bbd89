use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::{Value as JsonValue, json};

use crate::bulk::{self, BulkWriteResult};
use crate::catalog::{CollectionDescriptor, ViewDescriptor};
use crate::collection::{Collection, IndexOptions, UpdateResult};
use crate::document::DocumentId;
use crate::error::{Error, Result};
use crate::geo::GeoNearOptions;
use crate::locale::LocaleProvider;
use crate::persist::{self, CatalogFile, StoredCollection, StoredDocument, StoredIndex, StoredView};
use crate::query::{self, FindOptions};
use crate::resolve::view_accepts_override;
use crate::spec::{CollationSpec, SIMPLE};
use crate::validate::CollationValidator;

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Where a read lands once views are resolved.
struct ReadTarget {
    collection: Arc<RwLock<Collection>>,
    collation: Option<CollationSpec>,
    filter: Option<JsonValue>,
}

impl ReadTarget {
    fn query(&self, query: &JsonValue) -> JsonValue {
        match &self.filter {
            Some(filter) => json!({ "$and": [filter, query] }),
            None => query.clone(),
        }
    }
}

/// A database of collections and views, addressed with command-style JSON
/// option documents.
///
/// Thread-safe: a `RwLock` guards the collection map and each collection
/// has its own `RwLock`, so reads on one collection never block another.
pub struct Database {
    data_dir: Option<PathBuf>,
    validator: CollationValidator,
    collections: RwLock<HashMap<String, Arc<RwLock<Collection>>>>,
    views: RwLock<HashMap<String, ViewDescriptor>>,
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl Database {
    /// An in-memory database using the built-in locale table.
    pub fn new() -> Self {
        Self::with_validator(None, CollationValidator::builtin())
    }

    /// An in-memory database backed by another locale provider.
    pub fn with_provider(provider: Arc<dyn LocaleProvider>) -> Self {
        Self::with_validator(None, CollationValidator::new(provider))
    }

    fn with_validator(data_dir: Option<PathBuf>, validator: CollationValidator) -> Self {
        Self {
            data_dir,
            validator,
            collections: RwLock::new(HashMap::new()),
            views: RwLock::new(HashMap::new()),
        }
    }

    /// Open or create a database persisted under `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self> {
        Self::open_with_validator(data_dir, CollationValidator::builtin())
    }

    pub fn open_with_provider(data_dir: &Path, provider: Arc<dyn LocaleProvider>) -> Result<Self> {
        Self::open_with_validator(data_dir, CollationValidator::new(provider))
    }

    fn open_with_validator(data_dir: &Path, validator: CollationValidator) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let db = Self::with_validator(Some(data_dir.to_path_buf()), validator);
        if let Some(catalog) = persist::load_catalog(&persist::catalog_path(data_dir))? {
            db.load(data_dir, catalog)?;
        }
        Ok(db)
    }

    fn load(&self, data_dir: &Path, catalog: CatalogFile) -> Result<()> {
        let table_version = self.validator.table_version();
        let mut collections = write(&self.collections);
        for stored in catalog.collections {
            let descriptor = stored.descriptor(&self.validator)?;
            let docs: BTreeMap<DocumentId, JsonValue> = stored
                .documents
                .into_iter()
                .map(|doc| (doc.id, doc.data))
                .collect();
            let doc_count = docs.len() as u64;
            let mut col = Collection::restore(descriptor, stored.next_id, docs, table_version);

            for stored_index in &stored.indexes {
                let descriptor = stored_index.descriptor(&self.validator)?;
                let path = persist::index_keys_path(data_dir, &stored.name, &descriptor.name);
                match persist::load_index_keys(&path, descriptor.clone(), table_version, doc_count) {
                    Ok(Some(index)) => col.attach_index(index),
                    Ok(None) => {
                        tracing::debug!(collection = %stored.name, index = %descriptor.name, "rebuilding index keys");
                        col.rebuild_index(descriptor)?;
                    }
                    Err(Error::StaleEncodedKey { expected, found }) => {
                        tracing::warn!(
                            collection = %stored.name,
                            index = %descriptor.name,
                            expected,
                            found,
                            "index keys encoded under another locale table version; rebuilding"
                        );
                        col.rebuild_index(descriptor)?;
                    }
                    Err(e) => return Err(e),
                }
            }
            collections.insert(stored.name, Arc::new(RwLock::new(col)));
        }

        let mut views = write(&self.views);
        for stored in catalog.views {
            let view = stored.descriptor(&self.validator)?;
            views.insert(view.name.clone(), view);
        }
        tracing::info!(
            dir = %data_dir.display(),
            collections = collections.len(),
            views = views.len(),
            "loaded catalog"
        );
        Ok(())
    }

    /// Write the catalog and every index's key cache. A no-op for an
    /// in-memory database.
    pub fn save(&self) -> Result<()> {
        let Some(dir) = &self.data_dir else {
            return Ok(());
        };
        let mut collections: Vec<(String, Arc<RwLock<Collection>>)> = read(&self.collections)
            .iter()
            .map(|(name, col)| (name.clone(), Arc::clone(col)))
            .collect();
        collections.sort_by(|a, b| a.0.cmp(&b.0));

        let mut catalog = CatalogFile::default();
        for (name, col) in &collections {
            let col = read(col);
            let doc_count = col.len() as u64;
            for index in col.indexes() {
                persist::save_index_keys(
                    &persist::index_keys_path(dir, name, index.name()),
                    index,
                    doc_count,
                )?;
            }
            catalog.collections.push(StoredCollection {
                name: name.clone(),
                collation: StoredCollection::collation_of(col.descriptor()),
                next_id: col.next_id(),
                documents: col
                    .documents()
                    .map(|(id, data)| StoredDocument {
                        id,
                        data: data.clone(),
                    })
                    .collect(),
                indexes: col
                    .indexes()
                    .iter()
                    .map(|index| StoredIndex::from_descriptor(index.descriptor()))
                    .collect(),
            });
        }

        let views = read(&self.views);
        let mut view_names: Vec<&String> = views.keys().collect();
        view_names.sort();
        catalog.views = view_names
            .into_iter()
            .map(|name| StoredView::from_descriptor(&views[name]))
            .collect();

        persist::save_catalog(&persist::catalog_path(dir), &catalog)?;
        tracing::info!(
            dir = %dir.display(),
            collections = catalog.collections.len(),
            views = catalog.views.len(),
            "saved catalog"
        );
        Ok(())
    }

    pub fn validator(&self) -> &CollationValidator {
        &self.validator
    }

    // -----------------------------------------------------------------------
    // Collections and views
    // -----------------------------------------------------------------------

    fn check_name(name: &str) -> Result<()> {
        if name.is_empty() || name.contains(['/', '\\', '\0']) {
            return Err(Error::InvalidQuery(format!("invalid namespace name: {name:?}")));
        }
        Ok(())
    }

    /// Create a collection. `options` may carry a default `collation`,
    /// which every later index and operation inherits unless overridden.
    pub fn create_collection(&self, name: &str, options: &JsonValue) -> Result<()> {
        let collation = self.validator.validate_option(options)?;
        Self::check_name(name)?;

        // Lock order everywhere: collections, then views.
        let mut collections = write(&self.collections);
        if read(&self.views).contains_key(name) {
            return Err(Error::CollectionAlreadyExists(name.to_string()));
        }
        match collections.entry(name.to_string()) {
            Entry::Occupied(_) => Err(Error::CollectionAlreadyExists(name.to_string())),
            Entry::Vacant(slot) => {
                let descriptor = CollectionDescriptor::new(name, collation);
                let col = Collection::new(descriptor, self.validator.table_version());
                slot.insert(Arc::new(RwLock::new(col)));
                tracing::debug!(collection = name, "created collection");
                Ok(())
            }
        }
    }

    /// The collection named `name`.
    pub fn collection(&self, name: &str) -> Result<Arc<RwLock<Collection>>> {
        read(&self.collections)
            .get(name)
            .cloned()
            .ok_or_else(|| Error::CollectionNotFound(name.to_string()))
    }

    /// Writes create a missing collection implicitly, with no default collation.
    fn collection_for_write(&self, name: &str) -> Result<Arc<RwLock<Collection>>> {
        // A name held by a collection is never also a view.
        if let Ok(col) = self.collection(name) {
            return Ok(col);
        }
        Self::check_name(name)?;
        let mut cols = write(&self.collections);
        if read(&self.views).contains_key(name) {
            return Err(Error::ViewNotWritable(name.to_string()));
        }
        let col = cols.entry(name.to_string()).or_insert_with(|| {
            let descriptor = CollectionDescriptor::new(name, None);
            Arc::new(RwLock::new(Collection::new(descriptor, self.validator.table_version())))
        });
        Ok(Arc::clone(col))
    }

    pub fn drop_collection(&self, name: &str) -> Result<()> {
        let mut collections = write(&self.collections);
        if write(&self.views).remove(name).is_some() {
            return Ok(());
        }
        collections
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::CollectionNotFound(name.to_string()))
    }

    /// Create a view: a filter over `viewOn` read under the view's own
    /// collation (simple when `collation` is absent).
    pub fn create_view(&self, name: &str, options: &JsonValue) -> Result<()> {
        let view_on = options
            .get("viewOn")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| Error::InvalidQuery("createView requires a 'viewOn' string".into()))?;
        let filter = match options.get("filter") {
            None | Some(JsonValue::Null) => json!({}),
            Some(f) if f.is_object() => f.clone(),
            Some(_) => return Err(Error::InvalidQuery("view filter must be an object".into())),
        };
        query::parse_query(&filter)?;
        let collation = self
            .validator
            .validate_option(options)?
            .filter(|c| *c != SIMPLE);
        Self::check_name(name)?;

        let collections = read(&self.collections);
        let mut views = write(&self.views);
        if collections.contains_key(name) || views.contains_key(name) {
            return Err(Error::CollectionAlreadyExists(name.to_string()));
        }
        // A view over a view must share its collation.
        match views.get(view_on) {
            Some(base) if base.collation != collation => {
                return Err(Error::ViewCollationUnsupported {
                    view: view_on.to_string(),
                });
            }
            Some(_) => {}
            None if !collections.contains_key(view_on) => {
                return Err(Error::CollectionNotFound(view_on.to_string()));
            }
            None => {}
        }

        views.insert(
            name.to_string(),
            ViewDescriptor {
                name: name.to_string(),
                view_on: view_on.to_string(),
                filter,
                collation,
            },
        );
        tracing::debug!(view = name, view_on, "created view");
        Ok(())
    }

    /// Resolve a read on `name`. Reads on a view run under the view's
    /// collation; requesting any other collation fails.
    fn read_target(&self, name: &str, requested: Option<CollationSpec>) -> Result<ReadTarget> {
        let views = read(&self.views);
        let Some(view) = views.get(name) else {
            drop(views);
            return Ok(ReadTarget {
                collection: self.collection(name)?,
                collation: requested,
                filter: None,
            });
        };
        if !view_accepts_override(view.collation.as_ref(), requested.as_ref()) {
            return Err(Error::ViewCollationUnsupported {
                view: name.to_string(),
            });
        }

        let mut filters = vec![view.filter.clone()];
        let collation = view.collation.clone().unwrap_or_else(|| SIMPLE.clone());
        let mut source = view.view_on.clone();
        while let Some(inner) = views.get(&source) {
            if filters.len() > views.len() {
                return Err(Error::InvalidQuery(format!("view cycle through {name}")));
            }
            filters.push(inner.filter.clone());
            source = inner.view_on.clone();
        }
        drop(views);

        Ok(ReadTarget {
            collection: self.collection(&source)?,
            collation: Some(collation),
            filter: Some(json!({ "$and": filters })),
        })
    }

    /// `listCollections`-style info, sorted by name.
    pub fn list_collections(&self) -> Vec<JsonValue> {
        let mut infos: Vec<(String, JsonValue)> = read(&self.collections)
            .iter()
            .map(|(name, col)| (name.clone(), read(col).descriptor().info()))
            .collect();
        infos.extend(
            read(&self.views)
                .iter()
                .map(|(name, view)| (name.clone(), view.info())),
        );
        infos.sort_by(|a, b| a.0.cmp(&b.0));
        infos.into_iter().map(|(_, info)| info).collect()
    }

    pub fn collection_info(&self, name: &str) -> Result<JsonValue> {
        if let Some(view) = read(&self.views).get(name) {
            return Ok(view.info());
        }
        let col = self.collection(name)?;
        Ok(read(&col).descriptor().info())
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    pub fn insert(&self, collection: &str, doc: JsonValue) -> Result<DocumentId> {
        let col = self.collection_for_write(collection)?;
        let mut col = write(&col);
        col.insert(doc)
    }

    pub fn insert_many(&self, collection: &str, docs: Vec<JsonValue>) -> Result<Vec<DocumentId>> {
        let col = self.collection_for_write(collection)?;
        let mut col = write(&col);
        col.insert_many(docs)
    }

    /// Options: `{collation, multi, upsert}`.
    pub fn update(
        &self,
        collection: &str,
        query: &JsonValue,
        update: &JsonValue,
        options: &JsonValue,
    ) -> Result<UpdateResult> {
        let opts = query::parse_write_options(options, &self.validator)?;
        let col = self.collection_for_write(collection)?;
        let mut col = write(&col);
        col.update(query, update, &opts)
    }

    /// Options: `{collation, sort, upsert}`.
    pub fn replace_one(
        &self,
        collection: &str,
        query: &JsonValue,
        replacement: &JsonValue,
        options: &JsonValue,
    ) -> Result<UpdateResult> {
        let opts = query::parse_write_options(options, &self.validator)?;
        let col = self.collection_for_write(collection)?;
        let mut col = write(&col);
        col.replace_one(query, replacement, &opts)
    }

    /// Options: `{collation, sort, new, upsert}`.
    pub fn find_one_and_replace(
        &self,
        collection: &str,
        query: &JsonValue,
        replacement: &JsonValue,
        options: &JsonValue,
    ) -> Result<Option<JsonValue>> {
        let opts = query::parse_write_options(options, &self.validator)?;
        let col = self.collection_for_write(collection)?;
        let mut col = write(&col);
        col.find_one_and_replace(query, replacement, &opts)
    }

    /// Options: `{collation, sort}`.
    pub fn find_one_and_delete(
        &self,
        collection: &str,
        query: &JsonValue,
        options: &JsonValue,
    ) -> Result<Option<JsonValue>> {
        let opts = query::parse_write_options(options, &self.validator)?;
        let col = self.collection_for_write(collection)?;
        let mut col = write(&col);
        col.find_one_and_delete(query, &opts)
    }

    /// Run a batch of `insertOne`, `updateOne`, `updateMany`, `replaceOne`,
    /// `deleteOne` and `deleteMany` entries, each with its own collation.
    /// Options: `{ordered}` (default true). A malformed entry fails the
    /// call before anything runs; failures while running are reported in
    /// the result.
    pub fn bulk_write(&self, collection: &str, ops: &JsonValue, options: &JsonValue) -> Result<BulkWriteResult> {
        let ordered = match options.get("ordered") {
            None | Some(JsonValue::Null) => true,
            Some(JsonValue::Bool(b)) => *b,
            Some(_) => return Err(Error::InvalidQuery("ordered must be a boolean".into())),
        };
        let ops = bulk::parse_ops(ops, &self.validator)?;
        let col = self.collection_for_write(collection)?;
        let mut col = write(&col);
        let result = col.bulk_write(&ops, ordered);
        tracing::debug!(
            collection,
            ops = ops.len(),
            errors = result.write_errors.len(),
            "bulk write"
        );
        Ok(result)
    }

    /// Options: `{collation, sort, new, upsert}`.
    pub fn find_one_and_update(
        &self,
        collection: &str,
        query: &JsonValue,
        update: &JsonValue,
        options: &JsonValue,
    ) -> Result<Option<JsonValue>> {
        let opts = query::parse_write_options(options, &self.validator)?;
        let col = self.collection_for_write(collection)?;
        let mut col = write(&col);
        col.find_one_and_update(query, update, &opts)
    }

    /// Options: `{collation, justOne | limit}`.
    pub fn delete(&self, collection: &str, query: &JsonValue, options: &JsonValue) -> Result<u64> {
        let opts = query::parse_write_options(options, &self.validator)?;
        let col = self.collection_for_write(collection)?;
        let mut col = write(&col);
        col.delete(query, &opts)
    }

    /// Create an index from a single-field key pattern such as `{a: 1}`.
    /// Options: `{name, unique, collation}`. Returns the index name.
    pub fn create_index(&self, collection: &str, keys: &JsonValue, options: &JsonValue) -> Result<String> {
        let field = match keys.as_object() {
            Some(map) if map.len() == 1 => map
                .iter()
                .find(|(_, dir)| matches!(dir.as_i64(), Some(1 | -1)))
                .map(|(field, _)| field.clone()),
            _ => None,
        }
        .ok_or_else(|| Error::InvalidQuery("index key must be a single field with 1 or -1".into()))?;
        let opts = IndexOptions::parse(options, &self.validator)?;
        let col = self.collection_for_write(collection)?;
        let mut col = write(&col);
        col.create_index(&field, opts)
    }

    pub fn drop_index(&self, collection: &str, name: &str) -> Result<()> {
        let col = self.collection_for_write(collection)?;
        let mut col = write(&col);
        col.drop_index(name)
    }

    pub fn list_indexes(&self, collection: &str) -> Result<Vec<JsonValue>> {
        let col = self.collection(collection)?;
        let col = read(&col);
        Ok(col.list_indexes())
    }

    // -----------------------------------------------------------------------
    // Reads (collections or views)
    // -----------------------------------------------------------------------

    /// Options: `{sort, skip, limit, collation, hint}`.
    pub fn find(&self, collection: &str, query: &JsonValue, options: &JsonValue) -> Result<Vec<JsonValue>> {
        let mut opts: FindOptions = query::parse_find_options(options, &self.validator)?;
        let target = self.read_target(collection, opts.collation.take())?;
        opts.collation = target.collation.clone();
        let col = read(&target.collection);
        col.find(&target.query(query), &opts)
    }

    /// Nearest documents to a point. Request: `{near, key, query,
    /// collation, maxDistance, limit}`; see [`GeoNearOptions`].
    pub fn geo_near(&self, collection: &str, request: &JsonValue) -> Result<Vec<JsonValue>> {
        let mut opts = GeoNearOptions::parse(request, &self.validator)?;
        let target = self.read_target(collection, opts.collation.take())?;
        opts.collation = target.collation.clone();
        opts.query = target.query(&opts.query);
        let col = read(&target.collection);
        col.geo_near(&opts)
    }

    /// Options: `{collation}`.
    pub fn count(&self, collection: &str, query: &JsonValue, options: &JsonValue) -> Result<usize> {
        let target = self.read_target(collection, self.validator.validate_option(options)?)?;
        let col = read(&target.collection);
        col.count(&target.query(query), target.collation.as_ref())
    }

    /// Options: `{collation}`.
    pub fn distinct(
        &self,
        collection: &str,
        field: &str,
        query: &JsonValue,
        options: &JsonValue,
    ) -> Result<Vec<JsonValue>> {
        let target = self.read_target(collection, self.validator.validate_option(options)?)?;
        let col = read(&target.collection);
        col.distinct(field, &target.query(query), target.collation.as_ref())
    }

    /// Options: `{collation}`.
    pub fn group_count(
        &self,
        collection: &str,
        field: &str,
        query: &JsonValue,
        options: &JsonValue,
    ) -> Result<Vec<JsonValue>> {
        let target = self.read_target(collection, self.validator.validate_option(options)?)?;
        let col = read(&target.collection);
        col.group_count(field, &target.query(query), target.collation.as_ref())
    }

    /// Options: `{collation}`. On a view the view's filter runs first.
    pub fn aggregate(
        &self,
        collection: &str,
        pipeline: &JsonValue,
        options: &JsonValue,
    ) -> Result<Vec<JsonValue>> {
        let target = self.read_target(collection, self.validator.validate_option(options)?)?;
        let stages = pipeline
            .as_array()
            .ok_or_else(|| Error::InvalidPipeline("pipeline must be an array".into()))?;
        let pipeline = match &target.filter {
            Some(filter) => {
                let mut with_filter = vec![json!({ "$match": filter })];
                with_filter.extend(stages.iter().cloned());
                JsonValue::Array(with_filter)
            }
            None => pipeline.clone(),
        };
        let col = read(&target.collection);
        col.aggregate(&pipeline, target.collation.as_ref())
    }

    /// Options as for `find`.
    pub fn explain(&self, collection: &str, query: &JsonValue, options: &JsonValue) -> Result<JsonValue> {
        let mut opts = query::parse_find_options(options, &self.validator)?;
        let target = self.read_target(collection, opts.collation.take())?;
        opts.collation = target.collation.clone();
        let col = read(&target.collection);
        col.explain(&target.query(query), &opts)
    }
}
