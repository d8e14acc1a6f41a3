//! Shared fixtures for engine integration tests

#![allow(dead_code)]

use rand::{Rng, SeedableRng};
use s3aio_core::*;
use s3aio_engine::*;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Route engine logs to the test harness output
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Deterministic pseudo-random payload
pub fn payload(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let mut data = vec![0u8; len];
    rng.fill(&mut data[..]);
    data
}

/// Engine over a local store plus an arena, both inside `dir`
pub fn engine_with(backend: Arc<dyn Backend>, dir: &tempfile::TempDir) -> S3Io {
    let mut config = S3IoConfig::local(dir.path().join("store"));
    config.arena_dir = Some(dir.path().join("arena"));
    config.num_workers = 4;
    S3Io::with_backend(backend, &config).unwrap()
}

/// Knobs and recordings shared by every session of a [`ScriptedBackend`]
#[derive(Default)]
pub struct Script {
    pub fail_part: Mutex<Option<u32>>,
    pub fail_complete: AtomicBool,
    pub fail_abort: AtomicBool,
    /// Remaining put_object calls that fail before one succeeds
    pub put_failures: AtomicU32,
    /// Remaining get_object calls that fail before one succeeds
    pub get_failures: AtomicU32,
    /// Remaining get_object_range calls that fail before one succeeds
    pub range_failures: AtomicU32,
    /// Remaining get_object_range calls that come back one byte short
    pub short_reads: AtomicU32,
    pub put_calls: AtomicU32,
    pub get_calls: AtomicU32,
    pub range_calls: AtomicU32,
    pub fresh_sessions: AtomicU32,
    pub arrivals: Mutex<Vec<u32>>,
    pub completed_with: Mutex<Vec<Vec<u32>>>,
    pub aborted: Mutex<Vec<String>>,
    uploads: Mutex<HashMap<String, BTreeMap<u32, Vec<u8>>>>,
    next_upload: AtomicU32,
}

/// Local backend with an in-memory multipart protocol and failure injection
#[derive(Clone)]
pub struct ScriptedBackend {
    inner: LocalBackend,
    pub script: Arc<Script>,
}

impl ScriptedBackend {
    pub fn new(root: &std::path::Path) -> Self {
        ScriptedBackend {
            inner: LocalBackend::new(root).unwrap(),
            script: Arc::new(Script::default()),
        }
    }

    pub fn open_uploads(&self) -> usize {
        self.script.uploads.lock().unwrap().len()
    }
}

impl Backend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn with_session(&self, session: Session) -> Result<Arc<dyn Backend>> {
        if session == Session::Fresh {
            self.script.fresh_sessions.fetch_add(1, Ordering::SeqCst);
        }
        Ok(Arc::new(self.clone()))
    }

    fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        self.inner.bucket_exists(bucket)
    }

    fn object_exists(&self, location: &StorageLocation) -> Result<bool> {
        self.inner.object_exists(location)
    }

    fn list_buckets(&self) -> Result<Vec<String>> {
        self.inner.list_buckets()
    }

    fn list_objects(&self, bucket: &str, prefix: &str, max_keys: usize) -> Result<Vec<String>> {
        self.inner.list_objects(bucket, prefix, max_keys)
    }

    fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<Vec<String>> {
        self.inner.delete_objects(bucket, keys)
    }

    fn put_object(&self, location: &StorageLocation, data: &[u8]) -> Result<()> {
        self.script.put_calls.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.script.put_failures) {
            return Err(S3IoError::Storage {
                code: Some(503),
                message: "SlowDown".to_string(),
            });
        }
        self.inner.put_object(location, data)
    }

    fn get_object(&self, location: &StorageLocation) -> Result<Option<Vec<u8>>> {
        self.script.get_calls.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.script.get_failures) {
            return Err(S3IoError::storage("read timeout"));
        }
        self.inner.get_object(location)
    }

    fn get_object_range(&self, location: &StorageLocation, start: u64, end: u64) -> Result<Vec<u8>> {
        self.script.range_calls.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.script.range_failures) {
            return Err(S3IoError::Storage {
                code: Some(500),
                message: "connection reset".to_string(),
            });
        }
        let mut data = self.inner.get_object_range(location, start, end)?;
        if !data.is_empty() && take_failure(&self.script.short_reads) {
            data.pop();
        }
        Ok(data)
    }

    fn object_size(&self, location: &StorageLocation) -> Result<Option<u64>> {
        self.inner.object_size(location)
    }

    fn supports_multipart(&self) -> bool {
        true
    }

    fn create_multipart(&self, _location: &StorageLocation) -> Result<String> {
        let id = format!("upload-{}", self.script.next_upload.fetch_add(1, Ordering::SeqCst));
        self.script.uploads.lock().unwrap().insert(id.clone(), BTreeMap::new());
        Ok(id)
    }

    fn upload_part(
        &self,
        _location: &StorageLocation,
        upload_id: &str,
        part_number: u32,
        data: &[u8],
    ) -> Result<CompletedPart> {
        // Later parts finish first
        std::thread::sleep(Duration::from_millis(((8 - part_number % 8) * 20) as u64));

        if *self.script.fail_part.lock().unwrap() == Some(part_number) {
            return Err(S3IoError::Storage {
                code: Some(500),
                message: format!("part {} rejected", part_number),
            });
        }

        let mut uploads = self.script.uploads.lock().unwrap();
        let parts = uploads
            .get_mut(upload_id)
            .ok_or_else(|| S3IoError::Storage { code: Some(404), message: "NoSuchUpload".to_string() })?;
        parts.insert(part_number, data.to_vec());
        self.script.arrivals.lock().unwrap().push(part_number);

        Ok(CompletedPart {
            part_number,
            e_tag: format!("\"{}\"", blake3::hash(data).to_hex()),
        })
    }

    fn complete_multipart(
        &self,
        location: &StorageLocation,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<MultipartResponse> {
        let numbers: Vec<u32> = parts.iter().map(|p| p.part_number).collect();
        self.script.completed_with.lock().unwrap().push(numbers.clone());

        if self.script.fail_complete.load(Ordering::SeqCst) {
            return Err(S3IoError::Storage { code: Some(500), message: "InternalError".to_string() });
        }
        if numbers.windows(2).any(|w| w[0] >= w[1]) {
            return Err(S3IoError::Storage { code: Some(400), message: "InvalidPartOrder".to_string() });
        }

        let stored = self
            .script
            .uploads
            .lock()
            .unwrap()
            .remove(upload_id)
            .ok_or_else(|| S3IoError::Storage { code: Some(404), message: "NoSuchUpload".to_string() })?;
        let mut data = Vec::new();
        for part in parts {
            let bytes = stored
                .get(&part.part_number)
                .ok_or_else(|| S3IoError::Storage { code: Some(400), message: "InvalidPart".to_string() })?;
            data.extend_from_slice(bytes);
        }
        self.inner.put_object(location, &data)?;

        Ok(MultipartResponse {
            bucket: location.bucket().to_string(),
            key: location.key().to_string(),
            upload_id: upload_id.to_string(),
            e_tag: Some(format!("\"{}-{}\"", blake3::hash(&data).to_hex(), parts.len())),
            parts: parts.to_vec(),
        })
    }

    fn abort_multipart(&self, _location: &StorageLocation, upload_id: &str) -> Result<()> {
        self.script.aborted.lock().unwrap().push(upload_id.to_string());
        if self.script.fail_abort.load(Ordering::SeqCst) {
            return Err(S3IoError::Storage { code: Some(503), message: "abort unavailable".to_string() });
        }
        self.script.uploads.lock().unwrap().remove(upload_id);
        Ok(())
    }
}

fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}
