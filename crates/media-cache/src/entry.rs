//! Cache entries: deterministic mapping from remote paths to local files.

use crate::backend::Backend;
use crate::sidecar::{self, Sidecar};
use crate::{Error, Result};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Where a remote path lives in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalCacheEntry {
    /// Remote path this entry mirrors
    pub remote_path: String,
    /// Backend the remote path belongs to
    pub backend: Backend,
    /// `<media_dir>/<backend-id>/<client relative path>`
    pub local_path: PathBuf,
    /// Sidecar next to `local_path`
    pub sidecar_path: PathBuf,
}

impl LocalCacheEntry {
    /// Build the entry for `remote_path` given the client's relative key.
    #[must_use]
    pub fn new(media_dir: &Path, backend: Backend, remote_path: &str, relative: &Path) -> Self {
        let local_path = escape_sidecar_name(media_dir.join(backend.id()).join(sanitize(relative)));
        let sidecar_path = sidecar::sidecar_path(&local_path);
        Self {
            remote_path: remote_path.to_string(),
            backend,
            local_path,
            sidecar_path,
        }
    }

    /// Read this entry's sidecar.
    pub fn sidecar(&self) -> Result<Option<Sidecar>> {
        sidecar::read(&self.local_path)
    }

    /// Whether the blob itself is on disk.
    #[must_use]
    pub fn blob_exists(&self) -> bool {
        self.local_path.is_file()
    }

    /// Whether the entry counts as present.
    ///
    /// A missing blob whose sidecar records a failed download still counts, so
    /// callers do not keep retrying an object that is known to fail.
    pub fn exists(&self) -> Result<bool> {
        if self.blob_exists() {
            return Ok(true);
        }
        match self.sidecar() {
            Ok(record) => Ok(record.is_some_and(|s| !s.success)),
            // A corrupt record is no evidence of a prior failure
            Err(Error::Parse { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Write this entry's sidecar, creating its directory.
    pub fn record(&self, success: bool, checksum: Option<&str>) -> Result<()> {
        ensure_parent(&self.local_path)?;
        sidecar::write(&self.remote_path, &self.local_path, success, checksum)
    }

    /// Delete blob and sidecar. Returns the blob bytes reclaimed.
    pub fn remove(&self) -> Result<u64> {
        let size = fs::metadata(&self.local_path).map_or(0, |m| m.len());
        let removed = remove_if_exists(&self.local_path)?;
        remove_if_exists(&self.sidecar_path)?;
        Ok(if removed { size } else { 0 })
    }
}

/// Keep only normal components so a client key cannot escape its backend dir.
fn sanitize(relative: &Path) -> PathBuf {
    let clean: PathBuf = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect();
    if clean.as_os_str().is_empty() {
        PathBuf::from("_")
    } else {
        clean
    }
}

/// Keep blob names out of the sidecar namespace.
///
/// A blob whose name ends in `.checksum` (optionally followed by
/// underscores) gets one more `_`. The mapping is injective, and no escaped
/// or untouched blob carries the sidecar extension, so scans can classify
/// files by extension alone.
fn escape_sidecar_name(path: PathBuf) -> PathBuf {
    let Some(name) = path.file_name() else {
        return path;
    };
    let bytes = name.as_encoded_bytes();
    let end = bytes.iter().rposition(|&b| b != b'_').map_or(0, |i| i + 1);
    let suffix = format!(".{}", sidecar::SIDECAR_EXTENSION);
    if !bytes[..end].ends_with(suffix.as_bytes()) {
        return path;
    }
    let mut escaped = name.to_os_string();
    escaped.push("_");
    path.with_file_name(escaped)
}

/// Remove a file, treating "not found" as success. Returns whether it existed.
pub(crate) fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::io(e, path, "remove_file")),
    }
}

/// Create the parent directory of `path`.
pub(crate) fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io(e, parent, "create_dir_all"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_entry_layout() {
        let entry = LocalCacheEntry::new(
            Path::new("/c/media"),
            Backend::S3,
            "s3://bucket/dir/a.jpg",
            Path::new("bucket/dir/a.jpg"),
        );
        assert_eq!(entry.local_path, PathBuf::from("/c/media/s3/bucket/dir/a.jpg"));
        assert_eq!(
            entry.sidecar_path,
            PathBuf::from("/c/media/s3/bucket/dir/a.checksum")
        );
    }

    #[test]
    fn test_sanitize_drops_escapes() {
        let entry = LocalCacheEntry::new(
            Path::new("/c/media"),
            Backend::Http,
            "https://h/../../etc/passwd",
            Path::new("/h/../../etc/passwd"),
        );
        assert!(entry.local_path.starts_with("/c/media/http"));
        assert_eq!(entry.local_path, PathBuf::from("/c/media/http/h/etc/passwd"));
    }

    #[test]
    fn test_checksum_named_blob_is_escaped() {
        let media = Path::new("/c/media");
        let entry = |key: &str| {
            LocalCacheEntry::new(media, Backend::S3, &format!("s3://{key}"), Path::new(key))
        };

        let blob = entry("b/data.checksum");
        assert_eq!(blob.local_path, PathBuf::from("/c/media/s3/b/data.checksum_"));
        assert_ne!(blob.local_path, blob.sidecar_path);
        assert!(!sidecar::is_sidecar(&blob.local_path));

        // Already-underscored names shift by one so the mapping stays injective
        assert_eq!(
            entry("b/data.checksum_").local_path,
            PathBuf::from("/c/media/s3/b/data.checksum__")
        );
        assert_eq!(entry("b/data.txt").local_path, PathBuf::from("/c/media/s3/b/data.txt"));
        assert_eq!(entry("b/data_").local_path, PathBuf::from("/c/media/s3/b/data_"));
    }

    #[test]
    fn test_failed_sidecar_counts_as_existing() {
        let tmp = TempDir::new().unwrap();
        let entry = LocalCacheEntry::new(tmp.path(), Backend::Gcs, "gs://b/a.jpg", Path::new("b/a.jpg"));
        assert!(!entry.exists().unwrap());

        ensure_parent(&entry.local_path).unwrap();
        sidecar::write(&entry.remote_path, &entry.local_path, false, None).unwrap();
        assert!(!entry.blob_exists());
        assert!(entry.exists().unwrap());

        sidecar::write(&entry.remote_path, &entry.local_path, true, Some("e")).unwrap();
        assert!(!entry.exists().unwrap());
    }

    #[test]
    fn test_remove_reports_bytes_and_tolerates_missing() {
        let tmp = TempDir::new().unwrap();
        let entry = LocalCacheEntry::new(tmp.path(), Backend::S3, "s3://b/a.bin", Path::new("b/a.bin"));
        assert_eq!(entry.remove().unwrap(), 0);

        ensure_parent(&entry.local_path).unwrap();
        fs::write(&entry.local_path, vec![0u8; 42]).unwrap();
        sidecar::write(&entry.remote_path, &entry.local_path, true, Some("e")).unwrap();
        assert_eq!(entry.remove().unwrap(), 42);
        assert!(!entry.local_path.exists());
        assert!(!entry.sidecar_path.exists());
    }
}
