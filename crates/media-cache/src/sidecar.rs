//! Per-blob sidecar records.
//!
//! Each cached blob has a one-line sidecar next to it recording the remote
//! path it came from, whether the last download attempt succeeded, and the
//! backend checksum observed at that time:
//!
//! ```text
//! <remote_path>,<0|1>,<checksum-or-empty>
//! ```
//!
//! Sidecars are whole-file overwrites with last-writer-wins semantics.

use crate::{Error, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// File extension substituted for the blob's own extension.
pub const SIDECAR_EXTENSION: &str = "checksum";

/// A parsed sidecar record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sidecar {
    /// Remote path the blob was downloaded from
    pub remote_path: String,
    /// Whether the last terminal download attempt succeeded
    pub success: bool,
    /// Backend checksum; `Some("")` means the backend has no checksum support
    pub checksum: Option<String>,
}

impl Sidecar {
    /// Serialize to the on-disk line format.
    #[must_use]
    pub fn to_line(&self) -> String {
        format!(
            "{},{},{}",
            self.remote_path,
            u8::from(self.success),
            self.checksum.as_deref().unwrap_or_default()
        )
    }

    /// Parse the on-disk line format. Remote paths may contain commas, so the
    /// line is split on its last two.
    pub fn parse(line: &str, path: &Path) -> Result<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let mut parts = line.rsplitn(3, ',');
        let (Some(checksum), Some(success), Some(remote_path)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::parse(path, "expected `<remote>,<0|1>,<checksum>`"));
        };
        let success = match success {
            "1" => true,
            "0" => false,
            other => {
                return Err(Error::parse(
                    path,
                    format!("success flag must be 0 or 1, got {other:?}"),
                ));
            }
        };
        let checksum = if checksum.is_empty() && !success {
            None
        } else {
            Some(checksum.to_string())
        };
        Ok(Self {
            remote_path: remote_path.to_string(),
            success,
            checksum,
        })
    }
}

/// Sidecar path for a blob: its extension replaced by [`SIDECAR_EXTENSION`].
#[must_use]
pub fn sidecar_path(local_path: &Path) -> PathBuf {
    local_path.with_extension(SIDECAR_EXTENSION)
}

/// Whether `path` looks like a sidecar.
#[must_use]
pub fn is_sidecar(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == SIDECAR_EXTENSION)
}

/// Write the sidecar for `local_path`. The parent directory must exist.
pub fn write(
    remote_path: &str,
    local_path: &Path,
    success: bool,
    checksum: Option<&str>,
) -> Result<()> {
    let path = sidecar_path(local_path);
    let record = Sidecar {
        remote_path: remote_path.to_string(),
        success,
        checksum: checksum.map(str::to_string),
    };
    fs::write(&path, record.to_line()).map_err(|e| Error::io(e, &path, "write"))
}

/// Read the sidecar for `local_path`; `None` if it does not exist.
pub fn read(local_path: &Path) -> Result<Option<Sidecar>> {
    let path = sidecar_path(local_path);
    match fs::read_to_string(&path) {
        Ok(content) => Sidecar::parse(&content, &path).map(Some),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::io(e, &path, "read")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sidecar_path_replaces_extension() {
        assert_eq!(
            sidecar_path(Path::new("/c/media/s3/b/a.jpg")),
            PathBuf::from("/c/media/s3/b/a.checksum")
        );
        assert_eq!(
            sidecar_path(Path::new("/c/media/s3/b/noext")),
            PathBuf::from("/c/media/s3/b/noext.checksum")
        );
        assert!(is_sidecar(Path::new("/c/a.checksum")));
        assert!(!is_sidecar(Path::new("/c/a.jpg")));
    }

    #[test]
    fn test_line_format_is_stable() {
        let record = Sidecar {
            remote_path: "s3://bucket/a.jpg".into(),
            success: true,
            checksum: Some("\"abc123\"".into()),
        };
        assert_eq!(record.to_line(), "s3://bucket/a.jpg,1,\"abc123\"");

        let failed = Sidecar {
            remote_path: "s3://bucket/a.jpg".into(),
            success: false,
            checksum: None,
        };
        assert_eq!(failed.to_line(), "s3://bucket/a.jpg,0,");
    }

    #[test]
    fn test_parse_handles_commas_in_remote_path() {
        let path = Path::new("x.checksum");
        let record = Sidecar::parse("https://h/a,b.jpg,1,etag", path).unwrap();
        assert_eq!(record.remote_path, "https://h/a,b.jpg");
        assert!(record.success);
        assert_eq!(record.checksum.as_deref(), Some("etag"));
    }

    #[test]
    fn test_parse_empty_checksum() {
        let path = Path::new("x.checksum");
        let ok = Sidecar::parse("s3://b/a.jpg,1,", path).unwrap();
        assert_eq!(ok.checksum.as_deref(), Some(""));
        let failed = Sidecar::parse("s3://b/a.jpg,0,\n", path).unwrap();
        assert_eq!(failed.checksum, None);
        assert!(!failed.success);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let path = Path::new("x.checksum");
        assert!(Sidecar::parse("nonsense", path).is_err());
        assert!(Sidecar::parse("s3://b/a.jpg,yes,etag", path).is_err());
    }

    #[test]
    fn test_write_then_read() {
        let tmp = TempDir::new().unwrap();
        let blob = tmp.path().join("a.png");
        assert_eq!(read(&blob).unwrap(), None);

        write("gs://b/a.png", &blob, true, Some("e1")).unwrap();
        write("gs://b/a.png", &blob, true, Some("e2")).unwrap();
        let record = read(&blob).unwrap().unwrap();
        assert_eq!(record.checksum.as_deref(), Some("e2"));
        assert_eq!(
            fs::read_to_string(sidecar_path(&blob)).unwrap(),
            "gs://b/a.png,1,e2"
        );
    }
}
