//! Error types for s3aio

use thiserror::Error;

#[derive(Error, Debug)]
pub enum S3IoError {
    /// Backend failure other than a plain not-found. `code` is the HTTP
    /// status when the object store reported one; filesystem errors carry `None`.
    #[error("Storage error (code {code:?}): {message}")]
    Storage { code: Option<u16>, message: String },

    #[error("Object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("Transfer failed after {attempts} attempt(s) (exceeded retries: {exceeded_retries}): {source}")]
    Transfer {
        attempts: u32,
        exceeded_retries: bool,
        #[source]
        source: Box<S3IoError>,
    },

    #[error("Invalid bucket name: {0}")]
    InvalidBucketName(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid byte range: [{start}, {end})")]
    InvalidRange { start: u64, end: u64 },

    #[error("Invalid block size: {0}")]
    InvalidBlockSize(String),

    #[error("Staging buffer already exists: {0}")]
    ArenaExists(String),

    #[error("Staging buffer does not exist: {0}")]
    ArenaMissing(String),

    #[error("Access of {len} bytes at offset {offset} is outside staging buffer {name} ({capacity} bytes)")]
    ArenaBounds {
        name: String,
        offset: u64,
        len: u64,
        capacity: u64,
    },

    #[error("Multipart upload error: {0}")]
    Multipart(String),

    #[error("Operation not supported by this backend: {0}")]
    Unsupported(&'static str),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Worker pool error: {0}")]
    Pool(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl S3IoError {
    /// Shorthand for a storage failure without a protocol status code.
    pub fn storage(message: impl Into<String>) -> Self {
        S3IoError::Storage {
            code: None,
            message: message.into(),
        }
    }

    /// True for the not-found outcome, looking through transfer wrappers.
    pub fn is_not_found(&self) -> bool {
        match self {
            S3IoError::NotFound { .. } => true,
            S3IoError::Transfer { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}
