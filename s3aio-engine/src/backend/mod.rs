//! Storage backends: the object store and its local-disk emulation

use std::sync::Arc;
use s3aio_core::*;

pub mod local;
pub mod remote;

pub use local::LocalBackend;
pub use remote::RemoteBackend;

/// Which client session an operation runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Session {
    /// Reuse the engine's client and its connection pool
    #[default]
    Shared,
    /// Build a client with its own connection pool
    Fresh,
}

/// Primitives every backend provides with identical observable behavior.
///
/// Existence checks and `get_object` report absence as a value, never as an
/// error. Ranges are half-open and clipped to the object size.
pub trait Backend: Send + Sync {
    /// Short label used in logs
    fn name(&self) -> &'static str;

    /// Handle bound to the requested session
    fn with_session(&self, session: Session) -> Result<Arc<dyn Backend>>;

    fn bucket_exists(&self, bucket: &str) -> Result<bool>;

    fn object_exists(&self, location: &StorageLocation) -> Result<bool>;

    fn list_buckets(&self) -> Result<Vec<String>>;

    /// At most `max_keys` keys starting with `prefix`, in lexicographic order
    fn list_objects(&self, bucket: &str, prefix: &str, max_keys: usize) -> Result<Vec<String>>;

    /// Keys that were actually deleted
    fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<Vec<String>>;

    fn put_object(&self, location: &StorageLocation, data: &[u8]) -> Result<()>;

    fn get_object(&self, location: &StorageLocation) -> Result<Option<Vec<u8>>>;

    /// Bytes in `[start, end)`; `NotFound` when the object is missing
    fn get_object_range(&self, location: &StorageLocation, start: u64, end: u64) -> Result<Vec<u8>>;

    fn object_size(&self, location: &StorageLocation) -> Result<Option<u64>>;

    fn supports_multipart(&self) -> bool {
        false
    }

    /// Initiate a multipart upload and return its upload id
    fn create_multipart(&self, _location: &StorageLocation) -> Result<String> {
        Err(S3IoError::Unsupported("multipart upload"))
    }

    fn upload_part(
        &self,
        _location: &StorageLocation,
        _upload_id: &str,
        _part_number: u32,
        _data: &[u8],
    ) -> Result<CompletedPart> {
        Err(S3IoError::Unsupported("multipart upload"))
    }

    /// `parts` must be sorted ascending by part number
    fn complete_multipart(
        &self,
        _location: &StorageLocation,
        _upload_id: &str,
        _parts: &[CompletedPart],
    ) -> Result<MultipartResponse> {
        Err(S3IoError::Unsupported("multipart upload"))
    }

    fn abort_multipart(&self, _location: &StorageLocation, _upload_id: &str) -> Result<()> {
        Err(S3IoError::Unsupported("multipart upload"))
    }
}

/// Build the backend selected by `config.enable_s3`
pub fn from_config(config: &S3IoConfig) -> Result<Arc<dyn Backend>> {
    if config.enable_s3 {
        Ok(Arc::new(RemoteBackend::new(&config.remote)?))
    } else {
        Ok(Arc::new(LocalBackend::new(&config.file_path)?))
    }
}

/// Clip `[start, end)` to an object of `size` bytes
pub(crate) fn clip_range(start: u64, end: u64, size: u64) -> Result<(u64, u64)> {
    if start > end {
        return Err(S3IoError::InvalidRange { start, end });
    }
    let end = end.min(size);
    Ok((start.min(end), end))
}
