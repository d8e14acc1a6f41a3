//! Byte-level object I/O over S3 or a local-disk emulation, with parallel
//! multipart uploads and parallel ranged downloads.

use std::sync::Arc;
use tracing::info;
use s3aio_core::*;

pub mod arena;
pub mod backend;
pub mod multipart;
pub mod pool;
pub mod range;
pub mod transfer;

pub use arena::*;
pub use backend::{Backend, LocalBackend, RemoteBackend, Session};
pub use multipart::*;
pub use pool::*;
pub use range::*;
pub use transfer::*;

/// Engine facade.
///
/// The backend is chosen once at construction. The worker pool and arena
/// are shared by every session derived from this engine.
#[derive(Clone)]
pub struct S3Io {
    transfer: TransferEngine,
    pool: Arc<WorkerPool>,
    arena: Arena,
}

impl S3Io {
    /// Build the engine described by `config`
    pub fn new(config: &S3IoConfig) -> Result<Self> {
        config.validate()?;
        let backend = backend::from_config(config)?;
        Self::with_backend(backend, config)
    }

    /// Build the engine around an existing backend
    pub fn with_backend(backend: Arc<dyn Backend>, config: &S3IoConfig) -> Result<Self> {
        let pool = Arc::new(WorkerPool::new(config.num_workers)?);
        let arena_root = config.arena_dir.clone().unwrap_or_else(Arena::default_root);
        let arena = Arena::new(arena_root, config.arena_prefix.clone())?;

        info!(
            "s3aio engine ready: {} backend, {} workers, arena at {}",
            backend.name(),
            pool.size(),
            arena.root().display()
        );

        Ok(S3Io {
            transfer: TransferEngine::new(backend),
            pool,
            arena,
        })
    }

    /// Create temporary local engine for testing
    #[cfg(any(test, feature = "test-utils"))]
    pub fn temp() -> Result<(Self, tempfile::TempDir)> {
        let temp_dir = tempfile::tempdir()?;
        let mut config = S3IoConfig::local(temp_dir.path().join("store"));
        config.arena_dir = Some(temp_dir.path().join("arena"));
        config.num_workers = 4;
        let io = Self::new(&config)?;
        Ok((io, temp_dir))
    }

    /// Same engine on the requested client session
    pub fn session(&self, session: Session) -> Result<Self> {
        let backend = self.backend().with_session(session)?;
        Ok(S3Io {
            transfer: TransferEngine::new(backend),
            pool: self.pool.clone(),
            arena: self.arena.clone(),
        })
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        self.transfer.backend()
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn put_bytes(&self, bucket: &str, key: &str, data: &[u8]) -> Result<()> {
        let location = StorageLocation::new(bucket, key)?;
        self.transfer.put_object(&location, data)
    }

    /// `None` when the object does not exist
    pub fn get_bytes(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let location = StorageLocation::new(bucket, key)?;
        self.transfer.get_object(&location)
    }

    /// Bytes in `[start, end)`, clipped to the object size
    pub fn get_byte_range(&self, bucket: &str, key: &str, start: u64, end: u64) -> Result<Vec<u8>> {
        let location = StorageLocation::new(bucket, key)?;
        self.transfer.get_byte_range(&location, start, end)
    }

    pub fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        self.backend().bucket_exists(bucket)
    }

    pub fn object_exists(&self, bucket: &str, key: &str) -> Result<bool> {
        let location = StorageLocation::new(bucket, key)?;
        self.backend().object_exists(&location)
    }

    pub fn list_buckets(&self) -> Result<Vec<String>> {
        self.backend().list_buckets()
    }

    pub fn list_objects(&self, bucket: &str, prefix: &str, max_keys: usize) -> Result<Vec<String>> {
        self.backend().list_objects(bucket, prefix, max_keys)
    }

    /// Keys that were actually deleted
    pub fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<Vec<String>> {
        self.backend().delete_objects(bucket, keys)
    }

    /// Upload `data` as parts of `block_size` bytes in parallel
    pub fn put_bytes_multipart(
        &self,
        bucket: &str,
        key: &str,
        data: &[u8],
        block_size: u64,
    ) -> Result<MultipartResponse> {
        let location = StorageLocation::new(bucket, key)?;
        self.uploader().upload(&location, data, block_size)
    }

    /// Upload the contents of the named staging buffer in parallel
    pub fn put_staged_multipart(
        &self,
        bucket: &str,
        key: &str,
        buffer_name: &str,
        block_size: u64,
    ) -> Result<MultipartResponse> {
        let location = StorageLocation::new(bucket, key)?;
        let buffer = self.arena.attach(buffer_name)?;
        self.uploader().upload_staged(&location, &buffer, block_size)
    }

    /// Download `[start, end)` as parallel ranged reads of `block_size` bytes
    pub fn get_byte_range_parallel(
        &self,
        bucket: &str,
        key: &str,
        start: u64,
        end: u64,
        block_size: u64,
    ) -> Result<Vec<u8>> {
        let location = StorageLocation::new(bucket, key)?;
        self.downloader().download(&location, start, end, block_size)
    }

    /// Staging buffers carrying the reserved prefix
    pub fn list_created_arrays(&self) -> Result<Vec<String>> {
        self.arena.list_created()
    }

    /// Delete every staging buffer carrying the reserved prefix
    pub fn delete_created_arrays(&self) -> Result<Vec<String>> {
        self.arena.delete_all()
    }

    fn uploader(&self) -> MultipartUploader {
        MultipartUploader::new(self.transfer.clone(), self.pool.clone())
    }

    fn downloader(&self) -> RangeDownloader {
        RangeDownloader::new(self.backend().clone(), self.pool.clone(), self.arena.clone())
    }
}
