use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Read, Write};
use std::ops::Bound;

use serde_json::Value as JsonValue;

use crate::catalog::IndexDescriptor;
use crate::document::{DocumentId, collect_path};
use crate::key::{self, SortKey};
use crate::value::Value;

// ---------------------------------------------------------------------------
// Single-field collated index
// ---------------------------------------------------------------------------

/// Maps encoded keys (under the index's own collation) to document ids.
///
/// Multikey: a document contributes the key of the field value itself and,
/// when the value is an array, the key of every element. A missing field is
/// indexed as null.
#[derive(Debug)]
pub struct FieldIndex {
    descriptor: IndexDescriptor,
    tree: BTreeMap<SortKey, BTreeSet<DocumentId>>,
}

impl FieldIndex {
    pub fn new(descriptor: IndexDescriptor) -> Self {
        Self {
            descriptor,
            tree: BTreeMap::new(),
        }
    }

    pub fn descriptor(&self) -> &IndexDescriptor {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn field(&self) -> &str {
        &self.descriptor.field
    }

    pub fn is_unique(&self) -> bool {
        self.descriptor.unique
    }

    /// Encode a query value under this index's collation.
    pub fn key_for(&self, value: &Value) -> SortKey {
        key::encode(value, self.descriptor.collation())
    }

    /// All keys a document contributes to this index.
    pub fn keys_for(&self, data: &JsonValue) -> BTreeSet<SortKey> {
        let spec = self.descriptor.collation();
        let mut keys = BTreeSet::new();
        let found = collect_path(data, &self.descriptor.field);
        if found.is_empty() {
            keys.insert(key::encode(&Value::Null, spec));
        }
        for json in found {
            let value = Value::from_json(json);
            if let Value::Array(items) = &value {
                for item in items {
                    keys.insert(key::encode(item, spec));
                }
            }
            keys.insert(key::encode(&value, spec));
        }
        keys
    }

    /// True if another document already holds a key equal to one of
    /// `data`'s keys.
    pub fn check_unique(&self, data: &JsonValue, exclude_id: Option<DocumentId>) -> bool {
        self.keys_for(data).iter().any(|k| match self.tree.get(k) {
            Some(ids) => ids.iter().any(|id| Some(*id) != exclude_id),
            None => false,
        })
    }

    pub fn insert_value(&mut self, id: DocumentId, data: &JsonValue) {
        for key in self.keys_for(data) {
            self.tree.entry(key).or_default().insert(id);
        }
    }

    pub fn remove_value(&mut self, id: DocumentId, data: &JsonValue) {
        for key in self.keys_for(data) {
            if let Some(set) = self.tree.get_mut(&key) {
                set.remove(&id);
                if set.is_empty() {
                    self.tree.remove(&key);
                }
            }
        }
    }

    // -- Query helpers -------------------------------------------------------

    pub fn find_eq(&self, key: &SortKey) -> BTreeSet<DocumentId> {
        self.tree.get(key).cloned().unwrap_or_default()
    }

    pub fn find_range(&self, start: Bound<&SortKey>, end: Bound<&SortKey>) -> BTreeSet<DocumentId> {
        let mut result = BTreeSet::new();
        // BTreeMap::range panics on inverted or empty-exclusive bounds.
        if let (Bound::Included(s) | Bound::Excluded(s), Bound::Included(e) | Bound::Excluded(e)) =
            (start, end)
        {
            let both_excluded = matches!((start, end), (Bound::Excluded(_), Bound::Excluded(_)));
            if s > e || (s == e && both_excluded) {
                return result;
            }
        }
        for (_key, ids) in self.tree.range((start, end)) {
            result.extend(ids);
        }
        result
    }

    pub fn find_in(&self, keys: &[SortKey]) -> BTreeSet<DocumentId> {
        let mut result = BTreeSet::new();
        for k in keys {
            if let Some(ids) = self.tree.get(k) {
                result.extend(ids);
            }
        }
        result
    }

    pub fn all_ids(&self) -> BTreeSet<DocumentId> {
        let mut result = BTreeSet::new();
        for ids in self.tree.values() {
            result.extend(ids);
        }
        result
    }

    /// Number of (key, document) entries.
    pub fn count_all(&self) -> usize {
        self.tree.values().map(|ids| ids.len()).sum()
    }

    // -- Binary serialization -------------------------------------------------

    /// Serialize the key tree. The descriptor lives in the catalog.
    /// Format: [entry_count:u32]
    ///   per entry: [key_len:u32][key bytes][doc_count:u32][doc_ids as u64 LE...]
    pub fn write_entries<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&(self.tree.len() as u32).to_le_bytes())?;
        for (key, ids) in &self.tree {
            let bytes = key.as_bytes();
            w.write_all(&(bytes.len() as u32).to_le_bytes())?;
            w.write_all(bytes)?;
            w.write_all(&(ids.len() as u32).to_le_bytes())?;
            for &id in ids {
                w.write_all(&id.to_le_bytes())?;
            }
        }
        Ok(())
    }

    /// Rebuild an index from serialized entries written by `write_entries`.
    pub fn read_entries<R: Read>(descriptor: IndexDescriptor, r: &mut R) -> io::Result<Self> {
        let mut len_buf = [0u8; 4];
        r.read_exact(&mut len_buf)?;
        let entry_count = u32::from_le_bytes(len_buf) as usize;
        let mut tree = BTreeMap::new();
        for _ in 0..entry_count {
            r.read_exact(&mut len_buf)?;
            let key_len = u32::from_le_bytes(len_buf) as usize;
            // Read through `take` so a damaged length cannot force a huge allocation.
            let mut key = Vec::new();
            r.by_ref().take(key_len as u64).read_to_end(&mut key)?;
            if key.len() != key_len {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            r.read_exact(&mut len_buf)?;
            let doc_count = u32::from_le_bytes(len_buf) as usize;
            let mut ids = BTreeSet::new();
            let mut id_buf = [0u8; 8];
            for _ in 0..doc_count {
                r.read_exact(&mut id_buf)?;
                ids.insert(u64::from_le_bytes(id_buf));
            }
            tree.insert(SortKey::from_bytes(key), ids);
        }
        Ok(Self { descriptor, tree })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::CollationSpec;
    use crate::validate::CollationValidator;
    use serde_json::json;

    fn spec(raw: JsonValue) -> CollationSpec {
        CollationValidator::builtin().validate(&raw).unwrap()
    }

    fn index(field: &str, collation: Option<CollationSpec>) -> FieldIndex {
        FieldIndex::new(IndexDescriptor::new(
            IndexDescriptor::default_name(field),
            field,
            false,
            collation,
            None,
            1,
        ))
    }

    fn key(idx: &FieldIndex, v: JsonValue) -> SortKey {
        idx.key_for(&Value::from_json(&v))
    }

    #[test]
    fn collated_equality_lookup() {
        let mut idx = index("str", Some(spec(json!({"locale": "en_US", "strength": 2}))));
        idx.insert_value(1, &json!({"str": "foo"}));
        idx.insert_value(2, &json!({"str": "bar"}));
        assert_eq!(idx.find_eq(&key(&idx, json!("FOO"))), BTreeSet::from([1]));

        let mut plain = index("str", None);
        plain.insert_value(1, &json!({"str": "foo"}));
        assert!(plain.find_eq(&key(&plain, json!("FOO"))).is_empty());
    }

    #[test]
    fn range_follows_collation_order() {
        let mut idx = index("s", Some(spec(json!({"locale": "en"}))));
        idx.insert_value(1, &json!({"s": "apple"}));
        idx.insert_value(2, &json!({"s": "Banana"}));
        idx.insert_value(3, &json!({"s": "cherry"}));
        // Under simple, "Banana" < "apple"; under en it sits between.
        let lo = key(&idx, json!("b"));
        let hi = SortKey::type_ceiling(3);
        assert_eq!(
            idx.find_range(Bound::Included(&lo), Bound::Excluded(&hi)),
            BTreeSet::from([2, 3])
        );
    }

    #[test]
    fn inverted_range_is_empty() {
        let mut idx = index("n", None);
        idx.insert_value(1, &json!({"n": 5}));
        let lo = key(&idx, json!(10));
        let hi = key(&idx, json!(1));
        assert!(idx.find_range(Bound::Included(&lo), Bound::Included(&hi)).is_empty());
    }

    #[test]
    fn multikey_arrays_and_missing_fields() {
        let mut idx = index("tags", None);
        idx.insert_value(1, &json!({"tags": ["a", "b"]}));
        idx.insert_value(2, &json!({"other": 1}));
        assert_eq!(idx.find_eq(&key(&idx, json!("b"))), BTreeSet::from([1]));
        assert_eq!(idx.find_eq(&key(&idx, json!(["a", "b"]))), BTreeSet::from([1]));
        assert_eq!(idx.find_eq(&key(&idx, json!(null))), BTreeSet::from([2]));
        idx.remove_value(1, &json!({"tags": ["a", "b"]}));
        assert_eq!(idx.count_all(), 1);
    }

    #[test]
    fn unique_check_uses_collation() {
        let mut idx = index("u", Some(spec(json!({"locale": "en", "strength": 2}))));
        idx.insert_value(1, &json!({"u": "foo"}));
        assert!(idx.check_unique(&json!({"u": "FOO"}), None));
        assert!(!idx.check_unique(&json!({"u": "FOO"}), Some(1)));
        assert!(!idx.check_unique(&json!({"u": "bar"}), None));
    }

    #[test]
    fn entries_round_trip() {
        let mut idx = index("s", Some(spec(json!({"locale": "en"}))));
        idx.insert_value(1, &json!({"s": "x"}));
        idx.insert_value(2, &json!({"s": "y"}));
        let mut buf = Vec::new();
        idx.write_entries(&mut buf).unwrap();
        let loaded =
            FieldIndex::read_entries(idx.descriptor().clone(), &mut io::Cursor::new(buf)).unwrap();
        assert_eq!(loaded.count_all(), 2);
        assert_eq!(loaded.find_eq(&key(&loaded, json!("x"))), BTreeSet::from([1]));
    }
}
