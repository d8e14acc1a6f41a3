//! Parallel ranged download assembled in a staging buffer

use std::sync::Arc;
use tracing::{debug, warn};
use s3aio_core::*;
use crate::arena::Arena;
use crate::backend::{clip_range, Backend, Session};
use crate::pool::WorkerPool;

/// Downloads `[start, end)` of one object as independent ranged GETs.
///
/// Every chunk task writes straight into its own slice of a staging buffer
/// sized to the clipped range. The assembled bytes are copied out before the
/// buffer is deleted, so callers only ever see owned data.
pub struct RangeDownloader {
    backend: Arc<dyn Backend>,
    pool: Arc<WorkerPool>,
    arena: Arena,
}

impl RangeDownloader {
    pub fn new(backend: Arc<dyn Backend>, pool: Arc<WorkerPool>, arena: Arena) -> Self {
        RangeDownloader {
            backend,
            pool,
            arena,
        }
    }

    pub fn download(
        &self,
        location: &StorageLocation,
        start: u64,
        end: u64,
        block_size: u64,
    ) -> Result<Vec<u8>> {
        if start > end {
            return Err(S3IoError::InvalidRange { start, end });
        }
        if block_size == 0 {
            return Err(S3IoError::InvalidBlockSize(
                "block size must be greater than zero".to_string()
            ));
        }

        let size = self
            .backend
            .object_size(location)?
            .ok_or_else(|| S3IoError::NotFound {
                bucket: location.bucket().to_string(),
                key: location.key().to_string(),
            })?;
        let (start, end) = clip_range(start, end, size)?;

        let tasks = plan_chunks(end - start, block_size)?;
        if tasks.is_empty() {
            return Ok(Vec::new());
        }

        let name = self
            .arena
            .generate_name(&format!("{}_{}", location.bucket(), location.key()));
        let buffer = self.arena.create(&name, end - start)?;
        debug!(
            "Downloading {} [{}, {}) in {} chunks into {}",
            location,
            start,
            end,
            tasks.len(),
            name
        );

        let filled = self.pool.map(&tasks, |task| {
            let session = self.backend.with_session(Session::Fresh)?;
            let data = session.get_object_range(location, start + task.start, start + task.end)?;
            if data.len() as u64 != task.len() {
                return Err(S3IoError::storage(format!(
                    "short read for {} chunk {}: expected {} bytes, got {}",
                    location,
                    task.block_number,
                    task.len(),
                    data.len()
                )));
            }
            buffer.write_at(task.start, &data)
        });

        let assembled = filled.and_then(|_| buffer.to_vec());
        drop(buffer);

        if let Err(e) = self.arena.delete(&name) {
            warn!("Failed to delete staging buffer {}: {}", name, e);
        }

        assembled
    }
}
