//! Local-disk emulation of the object store.
//!
//! Buckets are directories under a root path and keys are relative file
//! paths inside them. Directories only exist while they hold objects, which
//! mirrors an object store having no real directories.

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use s3aio_core::*;
use crate::backend::{clip_range, Backend, Session};

/// Prefix of in-flight temp files; never reported as objects
const TEMP_PREFIX: &str = ".s3aio-";

/// Backend storing objects as files under `root/<bucket>/<key>`
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        Ok(LocalBackend {
            root: root.as_ref().to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf> {
        validate_bucket(bucket)?;
        if bucket == "." || bucket == ".." {
            return Err(S3IoError::InvalidBucketName(bucket.to_string()));
        }
        Ok(self.root.join(bucket))
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        let dir = self.bucket_dir(bucket)?;
        validate_local_key(key)?;
        Ok(dir.join(key))
    }

    fn location_path(&self, location: &StorageLocation) -> Result<PathBuf> {
        self.object_path(location.bucket(), location.key())
    }
}

impl Backend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    fn with_session(&self, _session: Session) -> Result<Arc<dyn Backend>> {
        Ok(Arc::new(self.clone()))
    }

    fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        Ok(self.bucket_dir(bucket)?.is_dir())
    }

    fn object_exists(&self, location: &StorageLocation) -> Result<bool> {
        Ok(self.location_path(location)?.is_file())
    }

    fn list_buckets(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(fs_error("list buckets", &self.root, e)),
        };

        let mut buckets = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| fs_error("list buckets", &self.root, e))?;
            let is_dir = entry
                .file_type()
                .map_err(|e| fs_error("list buckets", &entry.path(), e))?
                .is_dir();
            if let (true, Some(name)) = (is_dir, entry.file_name().to_str()) {
                if !name.starts_with('.') {
                    buckets.push(name.to_string());
                }
            }
        }
        buckets.sort();
        Ok(buckets)
    }

    fn list_objects(&self, bucket: &str, prefix: &str, max_keys: usize) -> Result<Vec<String>> {
        let bucket_dir = self.bucket_dir(bucket)?;

        // Only descend into the directory the prefix pins down
        let (start_rel, start_dir) = match prefix.rfind('/') {
            Some(i) => {
                // No stored key can start with such a directory part
                if validate_local_key(&prefix[..i]).is_err() {
                    return Ok(Vec::new());
                }
                (&prefix[..=i], bucket_dir.join(&prefix[..i]))
            }
            None => ("", bucket_dir.clone()),
        };

        let mut keys = Vec::new();
        if start_dir.is_dir() {
            collect_keys(&start_dir, start_rel, &mut keys)?;
        }

        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        keys.truncate(max_keys);
        Ok(keys)
    }

    fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<Vec<String>> {
        let bucket_dir = self.bucket_dir(bucket)?;
        // Reject the whole request before touching anything
        let paths = keys
            .iter()
            .map(|key| self.object_path(bucket, key))
            .collect::<Result<Vec<_>>>()?;
        let mut deleted = Vec::new();

        for (key, path) in keys.iter().zip(paths) {
            if !path.is_file() {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => deleted.push(key.clone()),
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(fs_error("delete", &path, e)),
            }
            prune_empty_parents(&path, &bucket_dir);
        }

        debug!("Deleted {} of {} keys from {}", deleted.len(), keys.len(), bucket);
        Ok(deleted)
    }

    fn put_object(&self, location: &StorageLocation, data: &[u8]) -> Result<()> {
        let path = self.location_path(location)?;
        let parent = path
            .parent()
            .ok_or_else(|| S3IoError::InvalidKey(location.key().to_string()))?;
        std::fs::create_dir_all(parent).map_err(|e| fs_error("create directories", parent, e))?;

        // Write beside the target and rename, so readers never see a torn object
        let mut temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(parent)
            .map_err(|e| fs_error("create temp file", parent, e))?;
        temp.write_all(data).map_err(|e| fs_error("write", &path, e))?;
        temp.persist(&path).map_err(|e| fs_error("persist", &path, e.error))?;
        Ok(())
    }

    fn get_object(&self, location: &StorageLocation) -> Result<Option<Vec<u8>>> {
        let path = self.location_path(location)?;
        if !path.is_file() {
            return Ok(None);
        }
        match std::fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(fs_error("read", &path, e)),
        }
    }

    fn get_object_range(&self, location: &StorageLocation, start: u64, end: u64) -> Result<Vec<u8>> {
        let path = self.location_path(location)?;
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(S3IoError::NotFound {
                    bucket: location.bucket().to_string(),
                    key: location.key().to_string(),
                });
            }
            Err(e) => return Err(fs_error("open", &path, e)),
        };

        let meta = file.metadata().map_err(|e| fs_error("stat", &path, e))?;
        // A directory is only a key prefix, never an object
        if !meta.is_file() {
            return Err(S3IoError::NotFound {
                bucket: location.bucket().to_string(),
                key: location.key().to_string(),
            });
        }
        let (start, end) = clip_range(start, end, meta.len())?;

        let mut data = Vec::with_capacity((end - start) as usize);
        file.seek(SeekFrom::Start(start)).map_err(|e| fs_error("seek", &path, e))?;
        file.take(end - start)
            .read_to_end(&mut data)
            .map_err(|e| fs_error("read", &path, e))?;
        Ok(data)
    }

    fn object_size(&self, location: &StorageLocation) -> Result<Option<u64>> {
        let path = self.location_path(location)?;
        match std::fs::metadata(&path) {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(fs_error("stat", &path, e)),
        }
    }
}

/// Keys must stay inside their bucket directory
fn validate_local_key(key: &str) -> Result<()> {
    if key.starts_with('/') || key.ends_with('/') || key.contains('\\') {
        return Err(S3IoError::InvalidKey(format!("'{}' is not a relative file path", key)));
    }
    for part in key.split('/') {
        if part.is_empty() || part == "." || part == ".." {
            return Err(S3IoError::InvalidKey(format!("'{}' has an empty or relative component", key)));
        }
    }
    // Catches platform-specific prefixes the split above cannot see
    if !Path::new(key).components().all(|c| matches!(c, Component::Normal(_))) {
        return Err(S3IoError::InvalidKey(key.to_string()));
    }
    Ok(())
}

fn collect_keys(dir: &Path, rel: &str, keys: &mut Vec<String>) -> Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        // Pruned by a concurrent delete
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(fs_error("list", dir, e)),
    };

    for entry in entries {
        let entry = entry.map_err(|e| fs_error("list", dir, e))?;
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if name.starts_with(TEMP_PREFIX) {
            continue;
        }
        let file_type = entry.file_type().map_err(|e| fs_error("list", &entry.path(), e))?;
        let key = format!("{}{}", rel, name);
        if file_type.is_dir() {
            collect_keys(&entry.path(), &format!("{}/", key), keys)?;
        } else if file_type.is_file() {
            keys.push(key);
        }
    }
    Ok(())
}

/// Remove empty directories above `path`, stopping below `bucket_dir`
fn prune_empty_parents(path: &Path, bucket_dir: &Path) {
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir == bucket_dir || !dir.starts_with(bucket_dir) {
            break;
        }
        // remove_dir refuses non-empty directories
        if std::fs::remove_dir(dir).is_err() {
            break;
        }
        current = dir.parent();
    }
}

fn fs_error(op: &str, path: &Path, err: std::io::Error) -> S3IoError {
    S3IoError::storage(format!("{} {}: {}", op, path.display(), err))
}
