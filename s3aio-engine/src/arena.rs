//! Staging arena: named byte buffers shared between workers and processes.
//!
//! Each buffer is a fixed-length file in a shared-memory directory
//! (`/dev/shm` on Linux). Any process on the host can attach to it by name.
//! Writers use positional I/O on disjoint ranges, so concurrent chunk tasks
//! never need a lock.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use s3aio_core::*;

/// Keeps generated names well under filesystem name limits
const MAX_BASENAME: usize = 64;

/// Owner of a directory of named staging buffers
#[derive(Debug, Clone)]
pub struct Arena {
    root: PathBuf,
    prefix: String,
}

impl Arena {
    /// Arena rooted at `root` using `prefix` as the reserved name prefix
    pub fn new(root: impl Into<PathBuf>, prefix: impl Into<String>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Arena {
            root,
            prefix: prefix.into(),
        })
    }

    /// `/dev/shm` when the host has it, the temp dir otherwise
    pub fn default_root() -> PathBuf {
        let shm = Path::new("/dev/shm");
        if shm.is_dir() {
            shm.to_path_buf()
        } else {
            std::env::temp_dir()
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Unique name: `<prefix>_<basename>_<ulid>_<pid>`.
    ///
    /// The random suffix and creator pid make collisions across processes
    /// unlikely without any coordination; the trailing pid also lets
    /// [`Arena::reclaim_orphans`] find buffers whose creator died.
    pub fn generate_name(&self, basename: &str) -> String {
        let basename: String = basename
            .chars()
            .take(MAX_BASENAME)
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
            .collect();
        format!(
            "{}_{}_{}_{}",
            self.prefix,
            basename,
            ulid::Ulid::new(),
            std::process::id()
        )
    }

    /// Allocate a zero-filled buffer of `len` bytes; fails if `name` exists
    pub fn create(&self, name: &str, len: u64) -> Result<StagingBuffer> {
        let path = self.path_of(name)?;
        let file = match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(S3IoError::ArenaExists(name.to_string()));
            }
            Err(e) => return Err(S3IoError::Io(e)),
        };

        if let Err(e) = file.set_len(len) {
            let _ = std::fs::remove_file(&path);
            return Err(S3IoError::Io(e));
        }

        debug!("Created staging buffer {} ({} bytes)", name, len);
        Ok(StagingBuffer {
            name: name.to_string(),
            len,
            file,
        })
    }

    /// Open an existing buffer for read/write
    pub fn attach(&self, name: &str) -> Result<StagingBuffer> {
        let path = self.path_of(name)?;
        let file = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(S3IoError::ArenaMissing(name.to_string()));
            }
            Err(e) => return Err(S3IoError::Io(e)),
        };
        let len = file.metadata()?.len();

        Ok(StagingBuffer {
            name: name.to_string(),
            len,
            file,
        })
    }

    /// Release a buffer; fails if it does not exist
    pub fn delete(&self, name: &str) -> Result<()> {
        let path = self.path_of(name)?;
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!("Deleted staging buffer {}", name);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(S3IoError::ArenaMissing(name.to_string()))
            }
            Err(e) => Err(S3IoError::Io(e)),
        }
    }

    /// Names of live buffers starting with `prefix_filter`, sorted
    pub fn list_live(&self, prefix_filter: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if name.starts_with(prefix_filter) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Live buffers carrying this arena's reserved prefix
    pub fn list_created(&self) -> Result<Vec<String>> {
        self.list_live(&format!("{}_", self.prefix))
    }

    /// Delete every buffer carrying the reserved prefix
    pub fn delete_all(&self) -> Result<Vec<String>> {
        let mut deleted = Vec::new();
        for name in self.list_created()? {
            match self.delete(&name) {
                Ok(()) => deleted.push(name),
                // Raced with its owner
                Err(S3IoError::ArenaMissing(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(deleted)
    }

    /// Delete buffers left behind by processes that no longer exist
    pub fn reclaim_orphans(&self) -> Result<Vec<String>> {
        let mut reclaimed = Vec::new();
        for name in self.list_created()? {
            let Some(pid) = creator_pid(&name) else {
                continue;
            };
            if process_alive(pid) {
                continue;
            }
            match self.delete(&name) {
                Ok(()) => {
                    warn!("Reclaimed orphaned staging buffer {} (creator pid {})", name, pid);
                    reclaimed.push(name);
                }
                Err(S3IoError::ArenaMissing(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(reclaimed)
    }

    fn path_of(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains('/') || name.contains('\\') || name.starts_with('.') {
            return Err(S3IoError::Internal(format!("invalid staging buffer name '{}'", name)));
        }
        Ok(self.root.join(name))
    }
}

/// Handle to one staging buffer
#[derive(Debug)]
pub struct StagingBuffer {
    name: String,
    len: u64,
    file: File,
}

impl StagingBuffer {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Write `data` at `offset`. Safe to call concurrently for disjoint ranges.
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.check_bounds(offset, data.len() as u64)?;
        write_all_at(&self.file, data, offset)?;
        Ok(())
    }

    /// Read `len` bytes starting at `offset`
    pub fn read_at(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        self.check_bounds(offset, len)?;
        let mut buf = vec![0u8; len as usize];
        read_exact_at(&self.file, &mut buf, offset)?;
        Ok(buf)
    }

    /// Copy the whole buffer out
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        self.read_at(0, self.len)
    }

    fn check_bounds(&self, offset: u64, len: u64) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(S3IoError::ArenaBounds {
                name: self.name.clone(),
                offset,
                len,
                capacity: self.len,
            }),
        }
    }
}

#[cfg(unix)]
fn write_all_at(file: &File, data: &[u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(data, offset)
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn write_all_at(file: &File, mut data: &[u8], mut offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !data.is_empty() {
        let n = file.seek_write(data, offset)?;
        if n == 0 {
            return Err(ErrorKind::WriteZero.into());
        }
        data = &data[n..];
        offset += n as u64;
    }
    Ok(())
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        let n = file.seek_read(buf, offset)?;
        if n == 0 {
            return Err(ErrorKind::UnexpectedEof.into());
        }
        buf = &mut std::mem::take(&mut buf)[n..];
        offset += n as u64;
    }
    Ok(())
}

fn creator_pid(name: &str) -> Option<u32> {
    name.rsplit('_').next()?.parse().ok()
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

// Without /proc there is no cheap liveness probe; never reclaim.
#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}
