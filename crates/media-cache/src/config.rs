//! Cache configuration.
//!
//! Resolution order: built-in defaults, then an optional TOML file, then
//! `MEDIA_CACHE_*` environment variables. The result is validated once and
//! shared read-only afterwards.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default cache budget (32 GiB)
pub const DEFAULT_CACHE_SIZE_BYTES: i64 = 32 * 1024 * 1024 * 1024;

/// Default pause between GC passes of the service
pub const DEFAULT_GC_SLEEP_SECONDS: u64 = 60;

/// Default rotating log size (10 MiB)
pub const DEFAULT_LOG_MAX_BYTES: u64 = 10 * 1024 * 1024;

/// Default number of rotated log backups
pub const DEFAULT_LOG_BACKUP_COUNT: usize = 5;

/// Default per-request timeout for streaming downloads
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;

/// Media cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Root directory; blobs live under `<cache_dir>/media`
    pub cache_dir: PathBuf,
    /// Size budget in bytes; negative means unlimited
    pub cache_size_bytes: i64,
    /// Worker threads for bulk downloads
    pub num_workers: usize,
    /// Optional global ceiling on `num_workers`
    pub max_workers: Option<usize>,
    /// Seconds between passes of the GC service
    pub gc_sleep_seconds: u64,
    /// GC service log file settings
    pub gc_log: GcLogConfig,
    /// Per-request timeout for streaming downloads, in seconds
    pub download_timeout_secs: u64,
}

/// Rotating log settings for the GC service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GcLogConfig {
    /// Write a log file at all
    pub enabled: bool,
    /// Log file path; defaults to `<cache_dir>/gc.log`
    pub path: Option<PathBuf>,
    /// Rotate once the file reaches this size
    pub max_bytes: u64,
    /// Number of rotated files to keep
    pub backup_count: usize,
}

impl Default for GcLogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: None,
            max_bytes: DEFAULT_LOG_MAX_BYTES,
            backup_count: DEFAULT_LOG_BACKUP_COUNT,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("media-cache");
        Self {
            cache_dir,
            cache_size_bytes: DEFAULT_CACHE_SIZE_BYTES,
            num_workers: default_num_workers(),
            max_workers: None,
            gc_sleep_seconds: DEFAULT_GC_SLEEP_SECONDS,
            gc_log: GcLogConfig::default(),
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
        }
    }
}

fn default_num_workers() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get())
}

impl CacheConfig {
    /// Config rooted at `cache_dir` with every other field defaulted.
    #[must_use]
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Self::default()
        }
    }

    /// Set the size budget
    #[must_use]
    pub const fn cache_size_bytes(mut self, bytes: i64) -> Self {
        self.cache_size_bytes = bytes;
        self
    }

    /// Set the bulk worker count
    #[must_use]
    pub const fn num_workers(mut self, workers: usize) -> Self {
        self.num_workers = workers;
        self
    }

    /// Load from an optional TOML file, apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        let config = base.with_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(e, path, "read"))?;
        toml::from_str(&content).map_err(|e| Error::parse(path, e.to_string()))
    }

    /// Apply `MEDIA_CACHE_*` environment variables on top of `self`.
    ///
    /// Reads:
    /// - `MEDIA_CACHE_DIR`
    /// - `MEDIA_CACHE_SIZE_BYTES` (negative for unlimited)
    /// - `MEDIA_CACHE_NUM_WORKERS`
    /// - `MEDIA_CACHE_MAX_WORKERS`
    /// - `MEDIA_CACHE_GC_SLEEP_SECONDS`
    /// - `MEDIA_CACHE_GC_LOG` ("true"/"1" to enable)
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(dir) = env_var("MEDIA_CACHE_DIR") {
            self.cache_dir = PathBuf::from(dir);
        }
        if let Some(v) = env_var("MEDIA_CACHE_SIZE_BYTES") {
            self.cache_size_bytes = parse_env("MEDIA_CACHE_SIZE_BYTES", &v)?;
        }
        if let Some(v) = env_var("MEDIA_CACHE_NUM_WORKERS") {
            self.num_workers = parse_env("MEDIA_CACHE_NUM_WORKERS", &v)?;
        }
        if let Some(v) = env_var("MEDIA_CACHE_MAX_WORKERS") {
            self.max_workers = Some(parse_env("MEDIA_CACHE_MAX_WORKERS", &v)?);
        }
        if let Some(v) = env_var("MEDIA_CACHE_GC_SLEEP_SECONDS") {
            self.gc_sleep_seconds = parse_env("MEDIA_CACHE_GC_SLEEP_SECONDS", &v)?;
        }
        if let Some(v) = env_var("MEDIA_CACHE_GC_LOG") {
            self.gc_log.enabled = v == "true" || v == "1";
        }
        Ok(self)
    }

    /// Reject configurations the cache cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.cache_dir.as_os_str().is_empty() {
            return Err(Error::configuration("cache_dir must not be empty"));
        }
        if self.num_workers == 0 {
            return Err(Error::configuration("num_workers must be at least 1"));
        }
        if self.max_workers == Some(0) {
            return Err(Error::configuration("max_workers must be at least 1"));
        }
        if self.gc_log.enabled && self.gc_log.max_bytes == 0 {
            return Err(Error::configuration("gc_log.max_bytes must be positive"));
        }
        Ok(())
    }

    /// Directory holding cached blobs and sidecars.
    #[must_use]
    pub fn media_dir(&self) -> PathBuf {
        self.cache_dir.join("media")
    }

    /// Directory where downloads are staged before being moved into place.
    /// Shares a filesystem with `media_dir` so the final move is a rename.
    #[must_use]
    pub fn staging_dir(&self) -> PathBuf {
        self.cache_dir.join("staging")
    }

    /// GC lock file path.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.cache_dir.join("gc.lock")
    }

    /// Resolved GC service log path.
    #[must_use]
    pub fn gc_log_path(&self) -> PathBuf {
        self.gc_log
            .path
            .clone()
            .unwrap_or_else(|| self.cache_dir.join("gc.log"))
    }

    /// Size budget, `None` when unlimited.
    #[must_use]
    pub fn budget(&self) -> Option<u64> {
        u64::try_from(self.cache_size_bytes).ok()
    }

    /// Worker count after applying the global ceiling.
    #[must_use]
    pub fn effective_workers(&self) -> usize {
        let workers = self.num_workers.max(1);
        self.max_workers.map_or(workers, |max| workers.min(max.max(1)))
    }

    /// Pause between GC service passes.
    #[must_use]
    pub const fn gc_sleep(&self) -> Duration {
        Duration::from_secs(self.gc_sleep_seconds)
    }

    /// Streaming download timeout.
    #[must_use]
    pub const fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::configuration(format!("{name}={value:?} is invalid: {e}")))
}
