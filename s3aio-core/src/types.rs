//! Core data types for s3aio

use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Largest number of parts a multipart upload may carry.
pub const MAX_PARTS: u64 = 10_000;

/// Identifies one object: a key inside a bucket
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageLocation {
    bucket: String,
    key: String,
}

impl StorageLocation {
    /// Create a new location with validation
    pub fn new(bucket: &str, key: &str) -> crate::Result<Self> {
        validate_bucket(bucket)?;

        if key.is_empty() {
            return Err(crate::S3IoError::InvalidKey("empty key".to_string()));
        }

        // Basic validation - no control characters
        if key.chars().any(|c| c.is_control()) {
            return Err(crate::S3IoError::InvalidKey(
                "control characters not allowed".to_string()
            ));
        }

        Ok(StorageLocation {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Validate a bucket name on its own (listing, existence checks)
pub fn validate_bucket(bucket: &str) -> crate::Result<()> {
    if bucket.is_empty() {
        return Err(crate::S3IoError::InvalidBucketName("empty name".to_string()));
    }

    if bucket.contains('/') || bucket.chars().any(|c| c.is_control()) {
        return Err(crate::S3IoError::InvalidBucketName(
            format!("invalid characters in '{}'", bucket)
        ));
    }

    Ok(())
}

/// One contiguous slice `[start, end)` of a chunked transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkTask {
    pub block_number: u64,
    pub start: u64,
    pub end: u64,
}

impl ChunkTask {
    /// Multipart part numbers start at 1
    pub fn part_number(&self) -> u32 {
        (self.block_number + 1) as u32
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Byte range relative to the start of the transfer, for slicing buffers
    pub fn range(&self) -> Range<usize> {
        self.start as usize..self.end as usize
    }
}

/// Number of chunks needed to cover `len` bytes with blocks of `block_size`
pub fn num_parts(len: u64, block_size: u64) -> crate::Result<u64> {
    if block_size == 0 {
        return Err(crate::S3IoError::InvalidBlockSize(
            "block size must be greater than zero".to_string()
        ));
    }
    Ok(len.div_ceil(block_size))
}

/// Split `[0, len)` into chunk tasks of `block_size` bytes.
///
/// The returned ranges tile `[0, len)` exactly, in block order, with the
/// last chunk clipped to `len`. An empty payload yields no chunks.
pub fn plan_chunks(len: u64, block_size: u64) -> crate::Result<Vec<ChunkTask>> {
    let count = num_parts(len, block_size)?;

    Ok((0..count)
        .map(|block_number| {
            let start = block_number * block_size;
            let end = start.saturating_add(block_size).min(len);
            ChunkTask {
                block_number,
                start,
                end,
            }
        })
        .collect())
}

/// Same as [`plan_chunks`], additionally enforcing the multipart part limit
pub fn plan_parts(len: u64, block_size: u64) -> crate::Result<Vec<ChunkTask>> {
    let count = num_parts(len, block_size)?;
    if count > MAX_PARTS {
        return Err(crate::S3IoError::InvalidBlockSize(format!(
            "{} bytes in blocks of {} needs {} parts, limit is {}",
            len, block_size, count, MAX_PARTS
        )));
    }
    plan_chunks(len, block_size)
}

/// A part accepted by the object store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    pub part_number: u32,
    pub e_tag: String,
}

/// Multipart upload state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultipartUpload {
    pub upload_id: String,
    pub location: StorageLocation,
    /// Parts in arrival order until [`MultipartUpload::sorted_parts`] is taken
    pub parts: Vec<CompletedPart>,
}

impl MultipartUpload {
    /// Create new multipart upload
    pub fn new(upload_id: String, location: StorageLocation) -> Self {
        MultipartUpload {
            upload_id,
            location,
            parts: Vec::new(),
        }
    }

    /// Record a part as it completes
    pub fn add_part(&mut self, part: CompletedPart) {
        self.parts.push(part);
    }

    /// Parts ordered ascending by part number, as completion requires
    pub fn sorted_parts(&self) -> Vec<CompletedPart> {
        let mut parts = self.parts.clone();
        parts.sort_by_key(|p| p.part_number);
        parts
    }

    /// Check if every part from 1 to `expected` is present exactly once
    pub fn is_complete(&self, expected: usize) -> bool {
        let parts = self.sorted_parts();
        parts.len() == expected
            && parts
                .iter()
                .enumerate()
                .all(|(i, part)| part.part_number == i as u32 + 1)
    }
}

/// Completion response, identical in shape on every backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipartResponse {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    pub e_tag: Option<String>,
    pub parts: Vec<CompletedPart>,
}
