//! Enumeration of the media directory.

use crate::sidecar::is_sidecar;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

/// A cached blob found on disk
#[derive(Debug, Clone)]
pub(crate) struct BlobFile {
    pub(crate) path: PathBuf,
    pub(crate) size: u64,
    /// Last access time, falling back to modification time
    pub(crate) accessed: SystemTime,
}

/// Every file under the media directory, split by kind
#[derive(Debug, Default)]
pub(crate) struct MediaScan {
    pub(crate) blobs: Vec<BlobFile>,
    pub(crate) sidecars: Vec<PathBuf>,
}

/// Walk `media_dir` recursively. A missing directory yields an empty scan;
/// files that vanish mid-walk are skipped.
pub(crate) fn scan_media(media_dir: &Path) -> MediaScan {
    let mut scan = MediaScan::default();
    for entry in walkdir::WalkDir::new(media_dir) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                if e.io_error().is_some_and(|err| err.kind() == io::ErrorKind::NotFound) {
                    debug!(error = %e, "Entry vanished during scan");
                } else {
                    warn!(error = %e, "Skipping unreadable cache entry");
                }
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.into_path();
        if is_sidecar(&path) {
            scan.sidecars.push(path);
            continue;
        }
        let Ok(metadata) = std::fs::metadata(&path) else {
            continue;
        };
        let accessed = metadata
            .accessed()
            .or_else(|_| metadata.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        scan.blobs.push(BlobFile {
            path,
            size: metadata.len(),
            accessed,
        });
    }
    scan
}
