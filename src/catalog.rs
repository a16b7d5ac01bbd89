use serde_json::{Value as JsonValue, json};

use crate::error::{Error, Result};
use crate::spec::{CollationSpec, SIMPLE};

/// A collection and its optional default collation, fixed at creation.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionDescriptor {
    pub name: String,
    pub collation: Option<CollationSpec>,
}

impl CollectionDescriptor {
    /// An explicit `{locale: "simple"}` default is the same as none.
    pub fn new(name: impl Into<String>, collation: Option<CollationSpec>) -> Self {
        Self {
            name: name.into(),
            collation: collation.filter(|c| *c != SIMPLE),
        }
    }

    pub fn default_collation(&self) -> Option<&CollationSpec> {
        self.collation.as_ref()
    }

    /// `listCollections`-style info document.
    pub fn info(&self) -> JsonValue {
        let mut options = serde_json::Map::new();
        if let Some(c) = &self.collation {
            options.insert("collation".into(), c.to_json());
        }
        json!({ "name": self.name, "type": "collection", "options": options })
    }
}

/// A single-field index. Its collation is resolved once, at creation:
/// the requested one, else the collection default. Keys are only valid for
/// the locale-table version recorded here.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDescriptor {
    pub name: String,
    pub field: String,
    pub unique: bool,
    pub collation: Option<CollationSpec>,
    pub table_version: u32,
}

impl IndexDescriptor {
    pub fn new(
        name: impl Into<String>,
        field: impl Into<String>,
        unique: bool,
        requested: Option<CollationSpec>,
        collection_default: Option<&CollationSpec>,
        table_version: u32,
    ) -> Self {
        let collation = match requested {
            Some(spec) if spec == SIMPLE => None,
            Some(spec) => Some(spec),
            None => collection_default.cloned(),
        };
        Self {
            name: name.into(),
            field: field.into(),
            unique,
            collation,
            table_version,
        }
    }

    /// Default index name for a field: `<field>_1`.
    pub fn default_name(field: &str) -> String {
        format!("{field}_1")
    }

    pub fn collation(&self) -> &CollationSpec {
        self.collation.as_ref().unwrap_or(&SIMPLE)
    }

    /// Fail if keys for this index were built under another table version.
    pub fn check_version(&self, current: u32) -> Result<()> {
        if self.table_version != current {
            return Err(Error::StaleEncodedKey {
                expected: current,
                found: self.table_version,
            });
        }
        Ok(())
    }

    /// `listIndexes`-style entry.
    pub fn info(&self) -> JsonValue {
        let mut doc = json!({
            "name": self.name,
            "key": { self.field.clone(): 1 },
        });
        if self.unique {
            doc["unique"] = json!(true);
        }
        if let Some(c) = &self.collation {
            doc["collation"] = c.to_json();
        }
        doc
    }
}

/// A stored query over another collection, with no storage of its own.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewDescriptor {
    pub name: String,
    pub view_on: String,
    pub filter: JsonValue,
    pub collation: Option<CollationSpec>,
}

impl ViewDescriptor {
    pub fn info(&self) -> JsonValue {
        let mut options = json!({ "viewOn": self.view_on, "pipeline": [{ "$match": self.filter }] });
        if let Some(c) = &self.collation {
            options["collation"] = c.to_json();
        }
        json!({ "name": self.name, "type": "view", "options": options })
    }
}
