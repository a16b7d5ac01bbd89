use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid collation spec: {0}")]
    InvalidCollationSpec(String),

    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("collection already exists: {0}")]
    CollectionAlreadyExists(String),

    #[error("index already exists: {0}")]
    IndexAlreadyExists(String),

    #[error("index not found: {0}")]
    IndexNotFound(String),

    #[error("view '{view}' does not support a collation different from its own")]
    ViewCollationUnsupported { view: String },

    #[error("{0} is a view and cannot be modified")]
    ViewNotWritable(String),

    #[error("encoded keys were built with locale table version {found}, current is {expected}")]
    StaleEncodedKey { expected: u32, found: u32 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("invalid update: {0}")]
    InvalidUpdate(String),

    #[error("unique constraint violated: field '{field}' value already exists")]
    UniqueViolation { field: String },

    #[error("invalid pipeline: {0}")]
    InvalidPipeline(String),

    #[error("corrupt file: {0}")]
    CorruptFile(String),

    #[error("document must be a JSON object")]
    NotAnObject,
}

pub type Result<T> = std::result::Result<T, Error>;
