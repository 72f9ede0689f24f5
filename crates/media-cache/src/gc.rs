//! Garbage Collection
//!
//! Budgeted LRU cleanup of the media directory, coordinated across processes
//! by a timestamp lock file.
//!
//! The lock is advisory: a collector that finds a lock younger than the
//! staleness threshold skips its pass, otherwise it writes a fresh timestamp
//! and proceeds. Two collectors starting within the same instant can both
//! proceed. Every delete tolerates the file already being gone, so such a
//! race wastes work but does not corrupt the cache.

use crate::config::CacheConfig;
use crate::entry::{ensure_parent, remove_if_exists};
use crate::scan::scan_media;
use crate::sidecar::{self, sidecar_path};
use crate::{Error, Result};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};

/// Age after which a lock is presumed abandoned
pub const LOCK_STALE_AFTER: Duration = Duration::from_secs(60);

/// Age after which a staged download is presumed abandoned
pub const STAGING_STALE_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// Statistics from a completed pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GcStats {
    /// Blobs scanned
    pub files_scanned: usize,
    /// Blobs deleted (with their sidecars)
    pub files_deleted: usize,
    /// Bytes of deleted blobs
    pub bytes_reclaimed: u64,
    /// Sidecars deleted because their blob was gone
    pub orphan_sidecars_removed: usize,
    /// Abandoned partial downloads deleted from the staging directory
    pub partials_removed: usize,
    /// Blobs left after the pass
    pub files_remaining: usize,
    /// Bytes left after the pass
    pub bytes_remaining: u64,
    /// Duration of the pass
    pub duration_ms: u64,
}

impl GcStats {
    /// Whether the pass changed anything on disk
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.files_deleted == 0 && self.orphan_sidecars_removed == 0 && self.partials_removed == 0
    }
}

/// Result of [`GarbageCollector::run`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GcOutcome {
    /// Another collector holds a fresh lock
    Skipped {
        /// Age of the lock that was found, in seconds
        lock_age_secs: u64,
    },
    /// The sweep ran
    Completed(GcStats),
}

/// Blob considered for eviction
#[derive(Debug)]
struct Candidate {
    path: PathBuf,
    size: u64,
    /// `None` marks an untrustworthy entry (missing or corrupt sidecar)
    recency: Option<SystemTime>,
}

/// Garbage collector for the media cache
#[derive(Debug, Clone)]
pub struct GarbageCollector {
    config: Arc<CacheConfig>,
    stale_after: Duration,
    staging_stale_after: Duration,
}

impl GarbageCollector {
    /// Create a collector over `config`'s cache directory
    #[must_use]
    pub fn new(config: Arc<CacheConfig>) -> Self {
        Self {
            config,
            stale_after: LOCK_STALE_AFTER,
            staging_stale_after: STAGING_STALE_AFTER,
        }
    }

    /// Override the lock staleness threshold
    #[must_use]
    pub const fn stale_after(mut self, threshold: Duration) -> Self {
        self.stale_after = threshold;
        self
    }

    /// Override the age at which staged downloads are deleted
    #[must_use]
    pub const fn staging_stale_after(mut self, threshold: Duration) -> Self {
        self.staging_stale_after = threshold;
        self
    }

    /// Run one pass: take the lock, sweep, release the lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be written or the sweep hits an
    /// I/O failure other than a concurrently deleted file. The lock is
    /// released either way.
    pub fn run(&self) -> Result<GcOutcome> {
        let lock_path = self.config.lock_path();
        let _lock = match GcLock::acquire(&lock_path, self.stale_after)? {
            Acquired::Locked(lock) => lock,
            Acquired::Busy { age_secs } => {
                info!(
                    lock = %lock_path.display(),
                    age_secs,
                    "Garbage collection already in progress, skipping"
                );
                return Ok(GcOutcome::Skipped {
                    lock_age_secs: age_secs,
                });
            }
        };
        self.sweep().map(GcOutcome::Completed)
    }

    fn sweep(&self) -> Result<GcStats> {
        let start = Instant::now();
        let media_dir = self.config.media_dir();
        let scan = scan_media(&media_dir);
        let mut stats = GcStats {
            files_scanned: scan.blobs.len(),
            partials_removed: remove_stale_partials(&self.config.staging_dir(), self.staging_stale_after),
            ..GcStats::default()
        };

        let expected: HashSet<PathBuf> = scan.blobs.iter().map(|b| sidecar_path(&b.path)).collect();
        for orphan in scan.sidecars.iter().filter(|s| !expected.contains(*s)) {
            match remove_if_exists(orphan) {
                Ok(true) => stats.orphan_sidecars_removed += 1,
                Ok(false) => {}
                Err(e) => warn!(path = %orphan.display(), error = %e, "Failed to remove orphan sidecar"),
            }
        }

        let mut candidates: Vec<Candidate> = scan
            .blobs
            .into_iter()
            .map(|blob| {
                let trusted = matches!(sidecar::read(&blob.path), Ok(Some(_)));
                Candidate {
                    recency: trusted.then_some(blob.accessed),
                    path: blob.path,
                    size: blob.size,
                }
            })
            .collect();
        // Untrusted entries sort first
        candidates.sort_by_key(|c| c.recency);

        let budget = self.config.budget();
        let mut current_size: u64 = candidates.iter().map(|c| c.size).sum();
        let mut remaining = candidates.len();

        for candidate in &candidates {
            let within_budget = budget.is_none_or(|b| current_size <= b);
            if within_budget && candidate.recency.is_some() {
                break;
            }
            match remove_blob(&candidate.path) {
                Ok(()) => {
                    debug!(
                        path = %candidate.path.display(),
                        size = candidate.size,
                        trusted = candidate.recency.is_some(),
                        "Evicted cache entry"
                    );
                    stats.files_deleted += 1;
                    stats.bytes_reclaimed += candidate.size;
                    current_size = current_size.saturating_sub(candidate.size);
                    remaining -= 1;
                }
                Err(e) => {
                    warn!(path = %candidate.path.display(), error = %e, "Failed to evict cache entry");
                }
            }
        }

        stats.files_remaining = remaining;
        stats.bytes_remaining = current_size;
        stats.duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        if stats.is_noop() {
            info!(
                files = stats.files_remaining,
                bytes = stats.bytes_remaining,
                "Nothing to cleanup"
            );
        } else {
            info!(
                deleted = stats.files_deleted,
                bytes_reclaimed = stats.bytes_reclaimed,
                orphan_sidecars = stats.orphan_sidecars_removed,
                partials = stats.partials_removed,
                files = stats.files_remaining,
                bytes = stats.bytes_remaining,
                duration_ms = stats.duration_ms,
                "Garbage collection complete"
            );
        }
        Ok(stats)
    }
}

/// Delete a blob and its sidecar; a blob that is already gone counts as deleted.
fn remove_blob(path: &Path) -> Result<()> {
    remove_if_exists(path)?;
    remove_if_exists(&sidecar_path(path))?;
    Ok(())
}

/// Delete staged downloads older than `max_age`; returns how many went.
///
/// Younger files may belong to a download in flight and are left alone.
fn remove_stale_partials(staging_dir: &Path, max_age: Duration) -> usize {
    let entries = match fs::read_dir(staging_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return 0,
        Err(e) => {
            warn!(path = %staging_dir.display(), error = %e, "Failed to read staging directory");
            return 0;
        }
    };
    let now = SystemTime::now();
    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(meta) = entry.metadata() else { continue };
        let age = meta
            .modified()
            .ok()
            .and_then(|m| now.duration_since(m).ok())
            .unwrap_or_default();
        if !meta.is_file() || age < max_age {
            continue;
        }
        match remove_if_exists(&path) {
            Ok(true) => {
                debug!(path = %path.display(), "Removed abandoned partial download");
                removed += 1;
            }
            Ok(false) => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove partial download"),
        }
    }
    removed
}

enum Acquired {
    Locked(GcLock),
    Busy { age_secs: u64 },
}

/// Held GC lock; the file is deleted on drop.
#[derive(Debug)]
struct GcLock {
    path: PathBuf,
}

impl GcLock {
    fn acquire(path: &Path, stale_after: Duration) -> Result<Acquired> {
        let now = Utc::now().timestamp();
        match fs::read_to_string(path) {
            Ok(content) => match content.trim().parse::<i64>() {
                Ok(stamp) => {
                    let age = now.saturating_sub(stamp).unsigned_abs();
                    if age < stale_after.as_secs() {
                        return Ok(Acquired::Busy { age_secs: age });
                    }
                    warn!(lock = %path.display(), age_secs = age, "Stealing stale GC lock");
                }
                Err(_) => {
                    warn!(lock = %path.display(), "Unreadable GC lock, treating as stale");
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io(e, path, "read")),
        }

        ensure_parent(path)?;
        fs::write(path, now.to_string()).map_err(|e| Error::io(e, path, "write"))?;
        Ok(Acquired::Locked(Self {
            path: path.to_path_buf(),
        }))
    }
}

impl Drop for GcLock {
    fn drop(&mut self) {
        if let Err(e) = remove_if_exists(&self.path) {
            warn!(lock = %self.path.display(), error = %e, "Failed to release GC lock");
        }
    }
}
