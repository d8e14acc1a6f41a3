//! Core data models and types for s3aio

pub mod config;
pub mod error;
pub mod types;

pub use config::*;
pub use error::*;
pub use types::*;

/// Result type alias for s3aio operations
pub type Result<T> = std::result::Result<T, S3IoError>;
