//! Chunked multipart upload across the worker pool

use std::borrow::Cow;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, warn};
use s3aio_core::*;
use crate::arena::StagingBuffer;
use crate::backend::Session;
use crate::pool::WorkerPool;
use crate::transfer::TransferEngine;

/// Splits a payload into parts and uploads them in parallel.
///
/// Each invocation owns its [`MultipartUpload`]: initiate, upload every part
/// on a fresh session, complete with parts sorted by part number. Any part
/// or completion failure aborts the upload before the error is returned.
pub struct MultipartUploader {
    transfer: TransferEngine,
    pool: Arc<WorkerPool>,
}

impl MultipartUploader {
    pub fn new(transfer: TransferEngine, pool: Arc<WorkerPool>) -> Self {
        MultipartUploader { transfer, pool }
    }

    /// Upload `data` in parts of `block_size` bytes
    pub fn upload(
        &self,
        location: &StorageLocation,
        data: &[u8],
        block_size: u64,
    ) -> Result<MultipartResponse> {
        let tasks = plan_parts(data.len() as u64, block_size)?;

        if tasks.is_empty() || !self.transfer.backend().supports_multipart() {
            return self.single_write(location, data, &tasks);
        }

        self.upload_parts(location, &tasks, |task| Ok(Cow::Borrowed(&data[task.range()])))
    }

    /// Upload the contents of a staging buffer; each part task reads only its slice
    pub fn upload_staged(
        &self,
        location: &StorageLocation,
        buffer: &StagingBuffer,
        block_size: u64,
    ) -> Result<MultipartResponse> {
        let tasks = plan_parts(buffer.len(), block_size)?;

        if tasks.is_empty() || !self.transfer.backend().supports_multipart() {
            let data = buffer.to_vec()?;
            return self.single_write(location, &data, &tasks);
        }

        self.upload_parts(location, &tasks, |task| {
            buffer.read_at(task.start, task.len()).map(Cow::Owned)
        })
    }

    fn upload_parts<'d, F>(
        &self,
        location: &StorageLocation,
        tasks: &[ChunkTask],
        read_part: F,
    ) -> Result<MultipartResponse>
    where
        F: Fn(&ChunkTask) -> Result<Cow<'d, [u8]>> + Sync + Send,
    {
        let backend = self.transfer.backend();
        let upload_id = backend.create_multipart(location)?;
        let upload = Mutex::new(MultipartUpload::new(upload_id.clone(), location.clone()));

        let uploaded = self.pool.map(tasks, |task| {
            let session = backend.with_session(Session::Fresh)?;
            let data = read_part(task)?;
            debug!(
                "Uploading part {} of {} ({} bytes)",
                task.part_number(),
                location,
                data.len()
            );
            let part = session.upload_part(location, &upload_id, task.part_number(), &data)?;
            // Recorded in completion order
            upload.lock().unwrap_or_else(PoisonError::into_inner).add_part(part);
            Ok(())
        });
        let upload = upload.into_inner().unwrap_or_else(PoisonError::into_inner);

        if let Err(e) = uploaded {
            self.abort(&upload, &e);
            return Err(e);
        }

        if !upload.is_complete(tasks.len()) {
            let e = S3IoError::Multipart(format!(
                "expected parts 1..={} for {}, backend returned {:?}",
                tasks.len(),
                location,
                upload.parts.iter().map(|p| p.part_number).collect::<Vec<_>>()
            ));
            self.abort(&upload, &e);
            return Err(e);
        }

        // Completion order is arbitrary; the protocol wants ascending part numbers
        let parts = upload.sorted_parts();
        match backend.complete_multipart(location, &upload.upload_id, &parts) {
            Ok(response) => {
                info!(
                    "Completed multipart upload {} for {} ({} parts)",
                    upload.upload_id,
                    location,
                    parts.len()
                );
                Ok(response)
            }
            Err(e) => {
                self.abort(&upload, &e);
                Err(e)
            }
        }
    }

    /// Release server-side state of a failed upload. Never replaces `cause`.
    fn abort(&self, upload: &MultipartUpload, cause: &S3IoError) {
        warn!(
            "Aborting multipart upload {} for {}: {}",
            upload.upload_id, upload.location, cause
        );
        if let Err(abort_err) = self
            .transfer
            .backend()
            .abort_multipart(&upload.location, &upload.upload_id)
        {
            error!(
                "Failed to abort multipart upload {} for {}: {}",
                upload.upload_id, upload.location, abort_err
            );
        }
    }

    /// One whole-object write answered in the multipart response shape.
    ///
    /// Used for empty payloads and for backends without multipart support.
    /// Part ETags are BLAKE3 digests of each planned slice.
    fn single_write(
        &self,
        location: &StorageLocation,
        data: &[u8],
        tasks: &[ChunkTask],
    ) -> Result<MultipartResponse> {
        let digests = self.pool.map(tasks, |task| Ok(blake3::hash(&data[task.range()])))?;

        self.transfer.put_object(location, data)?;

        let parts: Vec<CompletedPart> = tasks
            .iter()
            .zip(&digests)
            .map(|(task, digest)| CompletedPart {
                part_number: task.part_number(),
                e_tag: format!("\"{}\"", digest.to_hex()),
            })
            .collect();

        let e_tag = if digests.is_empty() {
            None
        } else {
            let mut hasher = blake3::Hasher::new();
            for digest in &digests {
                hasher.update(digest.as_bytes());
            }
            Some(format!("\"{}-{}\"", hasher.finalize().to_hex(), digests.len()))
        };

        debug!(
            "Stored {} as a single object in the multipart response shape ({} parts)",
            location,
            parts.len()
        );
        Ok(MultipartResponse {
            bucket: location.bucket().to_string(),
            key: location.key().to_string(),
            upload_id: format!("single-{}", ulid::Ulid::new()),
            e_tag,
            parts,
        })
    }
}
