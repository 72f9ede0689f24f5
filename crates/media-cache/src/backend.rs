//! Storage backend classification by path scheme.

use std::fmt;

/// Remote storage backend a path belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Backend {
    /// Amazon S3 and S3-compatible stores (`s3://`)
    S3,
    /// Google Cloud Storage (`gs://`)
    Gcs,
    /// Azure Blob Storage (`az://`)
    Azure,
    /// Plain HTTP(S) URLs (`http://`, `https://`)
    Http,
}

impl Backend {
    /// All remote backends.
    pub const ALL: [Self; 4] = [Self::S3, Self::Gcs, Self::Azure, Self::Http];

    /// Classify a path. Returns `None` for local paths.
    #[must_use]
    pub fn from_path(path: &str) -> Option<Self> {
        let (scheme, _) = path.split_once("://")?;
        match scheme.to_ascii_lowercase().as_str() {
            "s3" => Some(Self::S3),
            "gs" => Some(Self::Gcs),
            "az" => Some(Self::Azure),
            "http" | "https" => Some(Self::Http),
            _ => None,
        }
    }

    /// Directory name under `media/` holding this backend's blobs.
    #[must_use]
    pub const fn id(self) -> &'static str {
        match self {
            Self::S3 => "s3",
            Self::Gcs => "gcs",
            Self::Azure => "azure",
            Self::Http => "http",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Whether a path refers to the local filesystem.
#[must_use]
pub fn is_local(path: &str) -> bool {
    Backend::from_path(path).is_none()
}

/// Strip a `file://` prefix from a local path.
#[must_use]
pub fn normalize_local(path: &str) -> &str {
    path.strip_prefix("file://").unwrap_or(path)
}
