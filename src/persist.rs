use std::fs;
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::catalog::{CollectionDescriptor, IndexDescriptor, ViewDescriptor};
use crate::document::DocumentId;
use crate::error::{Error, Result};
use crate::index::FieldIndex;
use crate::spec::CollationSpec;
use crate::validate::CollationValidator;

/// Magic bytes identifying a catalog file.
const CATALOG_MAGIC: &[u8; 4] = b"OXCL";
/// Magic bytes identifying an index key cache file.
const KEYS_MAGIC: &[u8; 4] = b"OXKY";
/// Current format version of both files.
const VERSION: u32 = 1;
/// Catalog header: MAGIC(4) + VERSION(4) + BODY_CRC(4) + BODY_LEN(8) = 20
const CATALOG_HEADER_SIZE: usize = 20;
/// Key cache header: MAGIC(4) + VERSION(4) + TABLE_VERSION(4) + DOC_COUNT(8)
///   + BODY_CRC(4) + BODY_LEN(8) = 32
const KEYS_HEADER_SIZE: usize = 32;

pub const CATALOG_FILE: &str = "catalog.oxcl";

pub fn catalog_path(dir: &Path) -> PathBuf {
    dir.join(CATALOG_FILE)
}

pub fn index_keys_path(dir: &Path, collection: &str, index: &str) -> PathBuf {
    dir.join(format!("{collection}.{index}.okey"))
}

// ---------------------------------------------------------------------------
// Catalog file
// ---------------------------------------------------------------------------

/// On-disk form of the catalog. Collations are stored as their canonical
/// documents and validated again when loaded.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CatalogFile {
    pub collections: Vec<StoredCollection>,
    #[serde(default)]
    pub views: Vec<StoredView>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StoredCollection {
    pub name: String,
    pub collation: Option<JsonValue>,
    pub next_id: DocumentId,
    pub documents: Vec<StoredDocument>,
    pub indexes: Vec<StoredIndex>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: DocumentId,
    pub data: JsonValue,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StoredIndex {
    pub name: String,
    pub field: String,
    pub unique: bool,
    pub collation: Option<JsonValue>,
    pub table_version: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StoredView {
    pub name: String,
    #[serde(rename = "viewOn")]
    pub view_on: String,
    pub filter: JsonValue,
    pub collation: Option<JsonValue>,
}

fn store_spec(spec: Option<&CollationSpec>) -> Option<JsonValue> {
    spec.map(CollationSpec::to_json)
}

fn load_spec(validator: &CollationValidator, raw: Option<&JsonValue>) -> Result<Option<CollationSpec>> {
    match raw {
        None | Some(JsonValue::Null) => Ok(None),
        Some(raw) => validator.validate(raw).map(Some),
    }
}

impl StoredCollection {
    pub fn descriptor(&self, validator: &CollationValidator) -> Result<CollectionDescriptor> {
        let collation = load_spec(validator, self.collation.as_ref())?;
        Ok(CollectionDescriptor::new(self.name.clone(), collation))
    }

    pub fn collation_of(descriptor: &CollectionDescriptor) -> Option<JsonValue> {
        store_spec(descriptor.collation.as_ref())
    }
}

impl StoredIndex {
    pub fn from_descriptor(descriptor: &IndexDescriptor) -> Self {
        Self {
            name: descriptor.name.clone(),
            field: descriptor.field.clone(),
            unique: descriptor.unique,
            collation: store_spec(descriptor.collation.as_ref()),
            table_version: descriptor.table_version,
        }
    }

    pub fn descriptor(&self, validator: &CollationValidator) -> Result<IndexDescriptor> {
        Ok(IndexDescriptor {
            name: self.name.clone(),
            field: self.field.clone(),
            unique: self.unique,
            collation: load_spec(validator, self.collation.as_ref())?,
            table_version: self.table_version,
        })
    }
}

impl StoredView {
    pub fn from_descriptor(descriptor: &ViewDescriptor) -> Self {
        Self {
            name: descriptor.name.clone(),
            view_on: descriptor.view_on.clone(),
            filter: descriptor.filter.clone(),
            collation: store_spec(descriptor.collation.as_ref()),
        }
    }

    pub fn descriptor(&self, validator: &CollationValidator) -> Result<ViewDescriptor> {
        Ok(ViewDescriptor {
            name: self.name.clone(),
            view_on: self.view_on.clone(),
            filter: self.filter.clone(),
            collation: load_spec(validator, self.collation.as_ref())?,
        })
    }
}

/// Save the catalog atomically (write tmp + rename).
pub fn save_catalog(path: &Path, catalog: &CatalogFile) -> Result<()> {
    let body = serde_json::to_vec(catalog)?;

    let mut header = Vec::with_capacity(CATALOG_HEADER_SIZE);
    header.write_all(CATALOG_MAGIC)?;
    header.write_all(&VERSION.to_le_bytes())?;
    header.write_all(&crc(&body).to_le_bytes())?;
    header.write_all(&(body.len() as u64).to_le_bytes())?;

    write_atomic(path, &header, &body)?;
    Ok(())
}

/// Load the catalog. `Ok(None)` if no catalog exists yet; a damaged file is
/// an error, since documents cannot be rebuilt from anywhere else.
pub fn load_catalog(path: &Path) -> Result<Option<CatalogFile>> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let corrupt = |what: &str| Error::CorruptFile(format!("{}: {what}", path.display()));

    if data.len() < CATALOG_HEADER_SIZE {
        return Err(corrupt("truncated header"));
    }
    if &data[0..4] != CATALOG_MAGIC {
        return Err(corrupt("bad magic"));
    }
    if read_u32(&data[4..8]) != VERSION {
        return Err(corrupt("unsupported version"));
    }
    let stored_crc = read_u32(&data[8..12]);
    let body = body_range(CATALOG_HEADER_SIZE, read_u64(&data[12..20]))
        .and_then(|range| data.get(range))
        .ok_or_else(|| corrupt("truncated body"))?;
    if crc(body) != stored_crc {
        return Err(corrupt("checksum mismatch"));
    }
    Ok(Some(serde_json::from_slice(body)?))
}

// ---------------------------------------------------------------------------
// Index key caches (.okey)
// ---------------------------------------------------------------------------

/// Save an index's encoded keys, tagged with the table version they were
/// built under and the document count they cover.
pub fn save_index_keys(path: &Path, index: &FieldIndex, doc_count: u64) -> io::Result<()> {
    let mut body = Vec::new();
    index.write_entries(&mut body)?;

    let mut header = Vec::with_capacity(KEYS_HEADER_SIZE);
    header.write_all(KEYS_MAGIC)?;
    header.write_all(&VERSION.to_le_bytes())?;
    header.write_all(&index.descriptor().table_version.to_le_bytes())?;
    header.write_all(&doc_count.to_le_bytes())?;
    header.write_all(&crc(&body).to_le_bytes())?;
    header.write_all(&(body.len() as u64).to_le_bytes())?;

    write_atomic(path, &header, &body)
}

/// Load an index's cached keys.
///
/// Returns `Ok(None)` when the cache is missing, corrupt, or covers a
/// different number of documents: the caller rebuilds. Keys encoded under
/// another locale-table version fail with `StaleEncodedKey`.
pub fn load_index_keys(
    path: &Path,
    descriptor: IndexDescriptor,
    current_table_version: u32,
    expected_doc_count: u64,
) -> Result<Option<FieldIndex>> {
    let Ok(data) = fs::read(path) else {
        return Ok(None);
    };
    if data.len() < KEYS_HEADER_SIZE || &data[0..4] != KEYS_MAGIC {
        return Ok(None);
    }
    if read_u32(&data[4..8]) != VERSION {
        return Ok(None);
    }
    let table_version = read_u32(&data[8..12]);
    if table_version != current_table_version {
        return Err(Error::StaleEncodedKey {
            expected: current_table_version,
            found: table_version,
        });
    }
    descriptor.check_version(current_table_version)?;
    if read_u64(&data[12..20]) != expected_doc_count {
        return Ok(None);
    }
    let stored_crc = read_u32(&data[20..24]);
    let Some(body) =
        body_range(KEYS_HEADER_SIZE, read_u64(&data[24..32])).and_then(|range| data.get(range))
    else {
        return Ok(None);
    };
    if crc(body) != stored_crc {
        return Ok(None);
    }
    Ok(FieldIndex::read_entries(descriptor, &mut Cursor::new(body)).ok())
}

/// Byte range of a body of `body_len` bytes following the header. `None`
/// when the stored length cannot be addressed at all.
fn body_range(header_size: usize, body_len: u64) -> Option<std::ops::Range<usize>> {
    let end = usize::try_from(body_len).ok()?.checked_add(header_size)?;
    Some(header_size..end)
}

fn write_atomic(path: &Path, header: &[u8], body: &[u8]) -> io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(header)?;
    file.write_all(body)?;
    file.sync_data()?;
    drop(file);

    fs::rename(&tmp_path, path)?;
    Ok(())
}

fn crc(body: &[u8]) -> u32 {
    let mut h = Hasher::new();
    h.update(body);
    h.finalize()
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}
