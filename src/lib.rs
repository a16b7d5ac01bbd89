pub mod bulk;
pub mod catalog;
pub mod collection;
pub mod compare;
pub mod document;
pub mod engine;
pub mod error;
pub mod geo;
pub mod index;
pub mod key;
pub mod locale;
pub mod persist;
pub mod pipeline;
pub mod query;
pub mod resolve;
pub mod spec;
pub mod update;
pub mod validate;
pub mod value;
mod weights;

pub use bulk::{BulkOp, BulkWriteError, BulkWriteResult};
pub use catalog::{CollectionDescriptor, IndexDescriptor, ViewDescriptor};
pub use collection::{Collection, IndexOptions, UpdateResult};
pub use compare::{compare, compare_json, compare_strings, equal};
pub use document::DocumentId;
pub use engine::Database;
pub use error::{Error, Result};
pub use geo::{GeoNearOptions, Point};
pub use key::{SortKey, encode, encode_json};
pub use locale::{BuiltinLocales, LocaleDefaults, LocaleProvider, LocaleRules, Tailoring};
pub use pipeline::Pipeline;
pub use query::{FindOptions, WriteOptions};
pub use resolve::{
    CollationMismatch, index_usable, mismatch, needs_collation, resolve_effective,
    view_accepts_override,
};
pub use spec::{Alternate, CaseFirst, CollationSpec, MaxVariable, SIMPLE, Strength};
pub use validate::CollationValidator;
pub use value::Value;
