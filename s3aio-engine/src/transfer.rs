//! Whole-object transfers with bounded retry

use std::sync::Arc;
use tracing::{debug, warn};
use s3aio_core::*;
use crate::backend::Backend;

/// Attempts made by whole-object transfers before giving up
pub const MAX_TRANSFER_ATTEMPTS: u32 = 10;

/// Single-object get/put on top of a backend.
///
/// Whole-object transfers retry immediately, up to [`MAX_TRANSFER_ATTEMPTS`]
/// attempts, blocking the calling thread throughout. Ranged reads make a
/// single attempt.
#[derive(Clone)]
pub struct TransferEngine {
    backend: Arc<dyn Backend>,
}

impl TransferEngine {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        TransferEngine { backend }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Write the whole object
    pub fn put_object(&self, location: &StorageLocation, data: &[u8]) -> Result<()> {
        debug!("put {} ({} bytes) via {}", location, data.len(), self.backend.name());
        with_retries("put_object", location, || self.backend.put_object(location, data))
    }

    /// Read the whole object; `None` when it does not exist on any backend
    pub fn get_object(&self, location: &StorageLocation) -> Result<Option<Vec<u8>>> {
        debug!("get {} via {}", location, self.backend.name());
        with_retries("get_object", location, || self.backend.get_object(location))
    }

    /// Read `[start, end)` in one attempt
    pub fn get_byte_range(&self, location: &StorageLocation, start: u64, end: u64) -> Result<Vec<u8>> {
        debug!("get {} [{}, {}) via {}", location, start, end, self.backend.name());
        match self.backend.get_object_range(location, start, end) {
            Ok(data) => Ok(data),
            Err(e @ (S3IoError::NotFound { .. } | S3IoError::InvalidRange { .. })) => Err(e),
            Err(e) => Err(S3IoError::Transfer {
                attempts: 1,
                exceeded_retries: false,
                source: Box::new(e),
            }),
        }
    }
}

/// Run `op` until it succeeds or the attempt cap is reached.
///
/// Validation errors cannot succeed on a second try and are returned as-is.
fn with_retries<T>(
    op_name: &str,
    location: &StorageLocation,
    mut op: impl FnMut() -> Result<T>,
) -> Result<T> {
    let mut last_error = None;

    for attempt in 1..=MAX_TRANSFER_ATTEMPTS {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if !is_retryable(&e) => return Err(e),
            Err(e) => {
                warn!(
                    "{} {} failed (attempt {}/{}): {}",
                    op_name, location, attempt, MAX_TRANSFER_ATTEMPTS, e
                );
                last_error = Some(e);
            }
        }
    }

    Err(S3IoError::Transfer {
        attempts: MAX_TRANSFER_ATTEMPTS,
        exceeded_retries: true,
        source: Box::new(last_error.unwrap_or_else(|| {
            S3IoError::Internal(format!("{} made no attempts", op_name))
        })),
    })
}

fn is_retryable(err: &S3IoError) -> bool {
    !matches!(
        err,
        S3IoError::InvalidBucketName(_)
            | S3IoError::InvalidKey(_)
            | S3IoError::InvalidRange { .. }
            | S3IoError::NotFound { .. }
            | S3IoError::Unsupported(_)
    )
}
