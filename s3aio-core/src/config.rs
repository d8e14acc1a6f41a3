//! Engine configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::{Result, S3IoError};

/// Reserved prefix for staging buffer names
pub const DEFAULT_ARENA_PREFIX: &str = "S3IO";

/// Engine configuration.
///
/// `enable_s3` is the single backend switch: `true` talks to the object
/// store, `false` emulates buckets as directories under `file_path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct S3IoConfig {
    pub enable_s3: bool,
    pub file_path: PathBuf,
    /// Worker pool size; 0 uses the host's available parallelism
    pub num_workers: usize,
    /// Directory holding staging buffers; `None` picks `/dev/shm` or the temp dir
    pub arena_dir: Option<PathBuf>,
    pub arena_prefix: String,
    pub remote: RemoteConfig,
}

/// Object store client settings. Credentials always come from the default chain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible stores
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
}

impl Default for S3IoConfig {
    fn default() -> Self {
        S3IoConfig {
            enable_s3: true,
            file_path: default_file_path(),
            num_workers: 0,
            arena_dir: None,
            arena_prefix: DEFAULT_ARENA_PREFIX.to_string(),
            remote: RemoteConfig::default(),
        }
    }
}

impl S3IoConfig {
    /// Local-disk emulation rooted at `root`
    pub fn local(root: impl Into<PathBuf>) -> Self {
        S3IoConfig {
            enable_s3: false,
            file_path: root.into(),
            ..Default::default()
        }
    }

    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read(path.as_ref())?;
        let config = serde_json::from_slice(&raw)?;
        Ok(config)
    }

    /// Defaults overridden by `S3AIO_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = S3IoConfig::default();

        if let Some(v) = var("S3AIO_ENABLE_S3") {
            config.enable_s3 = parse_bool("S3AIO_ENABLE_S3", &v)?;
        }
        if let Some(v) = var("S3AIO_FILE_PATH") {
            config.file_path = PathBuf::from(v);
        }
        if let Some(v) = var("S3AIO_NUM_WORKERS") {
            config.num_workers = v.trim().parse().map_err(|_| {
                S3IoError::Config(format!("S3AIO_NUM_WORKERS: not a number: '{}'", v))
            })?;
        }
        if let Some(v) = var("S3AIO_ARENA_DIR") {
            config.arena_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = var("S3AIO_ARENA_PREFIX") {
            config.arena_prefix = v;
        }
        if let Some(v) = var("S3AIO_REGION") {
            config.remote.region = Some(v);
        }
        if let Some(v) = var("S3AIO_ENDPOINT_URL") {
            config.remote.endpoint_url = Some(v);
        }
        if let Some(v) = var("S3AIO_FORCE_PATH_STYLE") {
            config.remote.force_path_style = parse_bool("S3AIO_FORCE_PATH_STYLE", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.arena_prefix.is_empty() || self.arena_prefix.contains('/') {
            return Err(S3IoError::Config(format!(
                "arena prefix must be non-empty and contain no '/': '{}'",
                self.arena_prefix
            )));
        }
        if !self.enable_s3 && self.file_path.as_os_str().is_empty() {
            return Err(S3IoError::Config(
                "file_path is required when enable_s3 is false".to_string()
            ));
        }
        Ok(())
    }
}

fn default_file_path() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
        .join("S3IO")
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(S3IoError::Config(format!("{}: not a boolean: '{}'", name, value))),
    }
}
