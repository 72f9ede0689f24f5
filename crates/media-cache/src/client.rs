//! Remote client interface and optional capabilities.
//!
//! The cache never talks to S3, GCS or HTTP directly on the blocking path.
//! It calls a [`RemoteClient`] per backend. Checksums and signed URLs are
//! separate capability traits; a client advertises them by overriding
//! [`RemoteClient::checksums`] / [`RemoteClient::signer`], which the cache
//! resolves once at registration.

use crate::backend::Backend;
use crate::error::BoxError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A storage client for one remote backend.
pub trait RemoteClient: Send + Sync {
    /// Download `remote_path` to `local_path`, replacing any existing file.
    fn download(&self, remote_path: &str, local_path: &Path) -> Result<(), BoxError>;

    /// Relative path used as the cache key for `remote_path`.
    ///
    /// The default is [`cache_key`]: `s3://bucket/a/b.jpg` becomes
    /// `bucket/a/b.jpg`, and a query string is folded into the file name.
    fn local_path(&self, remote_path: &str) -> PathBuf {
        cache_key(remote_path)
    }

    /// Checksum capability, if the backend exposes object metadata.
    fn checksums(self: Arc<Self>) -> Option<Arc<dyn ChecksumCapable>> {
        None
    }

    /// URL signing capability.
    fn signer(self: Arc<Self>) -> Option<Arc<dyn SignableCapable>> {
        None
    }
}

/// Clients that can report object metadata including an ETag.
pub trait ChecksumCapable: Send + Sync {
    /// Fetch metadata for `remote_path`.
    fn file_metadata(&self, remote_path: &str) -> Result<FileMetadata, BoxError>;
}

/// Clients that can mint pre-signed URLs.
pub trait SignableCapable: Send + Sync {
    /// Produce a signed URL for `remote_path`.
    fn signed_url(&self, remote_path: &str, options: &SignedUrlOptions) -> Result<String, BoxError>;
}

/// Object metadata as reported by a backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Opaque content tag, compared for equality only
    pub etag: Option<String>,
    /// Object size in bytes
    pub size: Option<u64>,
    /// Last modification time
    pub last_modified: Option<DateTime<Utc>>,
    /// MIME type, when known
    pub content_type: Option<String>,
}

/// HTTP method a signed URL is valid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// Read access
    #[default]
    Get,
    /// Upload access
    Put,
    /// Delete access
    Delete,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        })
    }
}

/// Options for [`SignableCapable::signed_url`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignedUrlOptions {
    /// Method the URL authorizes
    pub method: HttpMethod,
    /// Validity window
    pub expires_in: Duration,
}

impl SignedUrlOptions {
    /// GET access for `hours` hours.
    #[must_use]
    pub fn get(hours: i64) -> Self {
        Self {
            method: HttpMethod::Get,
            expires_in: Duration::hours(hours),
        }
    }
}

/// A registered client with its capabilities resolved.
#[derive(Clone)]
pub(crate) struct ClientHandle {
    pub(crate) backend: Backend,
    pub(crate) client: Arc<dyn RemoteClient>,
    pub(crate) checksums: Option<Arc<dyn ChecksumCapable>>,
    pub(crate) signer: Option<Arc<dyn SignableCapable>>,
}

impl ClientHandle {
    pub(crate) fn new(backend: Backend, client: Arc<dyn RemoteClient>) -> Self {
        let checksums = Arc::clone(&client).checksums();
        let signer = Arc::clone(&client).signer();
        Self {
            backend,
            client,
            checksums,
            signer,
        }
    }

    /// Current checksum for `remote_path`.
    ///
    /// Clients without checksum support yield `Some("")`, which never matches
    /// a cached value and so always reads as stale.
    pub(crate) fn checksum(&self, remote_path: &str) -> Result<Option<String>, BoxError> {
        match &self.checksums {
            Some(c) => Ok(c.file_metadata(remote_path)?.etag),
            None => Ok(Some(String::new())),
        }
    }
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("backend", &self.backend)
            .field("checksums", &self.checksums.is_some())
            .field("signer", &self.signer.is_some())
            .finish_non_exhaustive()
    }
}

/// Hex digits of the query digest embedded in a cache key
const QUERY_TAG_LEN: usize = 16;

/// Strip `scheme://`, query string and fragment from a remote path.
#[must_use]
pub fn strip_scheme(remote_path: &str) -> &str {
    split_query(remote_path).0
}

/// Relative cache key for a remote path.
///
/// The scheme and fragment are dropped. A non-empty query selects a
/// different object on most HTTP servers, so its digest is folded into the
/// file name ahead of the extension: `https://host/img.jpg?id=1` becomes
/// `host/img@<digest>.jpg`.
#[must_use]
pub fn cache_key(remote_path: &str) -> PathBuf {
    let (path, query) = split_query(remote_path);
    let path = Path::new(path);
    let Some(query) = query else {
        return path.to_path_buf();
    };

    let digest = Sha256::digest(query.as_bytes());
    let tag = hex::encode(digest);
    let mut name = path.file_stem().map(OsStr::to_os_string).unwrap_or_default();
    name.push("@");
    name.push(&tag[..QUERY_TAG_LEN]);
    if let Some(ext) = path.extension() {
        name.push(".");
        name.push(ext);
    }
    path.with_file_name(name)
}

/// Split off the scheme, then separate path from a non-empty query. The
/// fragment never reaches the server and is discarded.
fn split_query(remote_path: &str) -> (&str, Option<&str>) {
    let rest = remote_path
        .split_once("://")
        .map_or(remote_path, |(_, rest)| rest);
    let rest = rest.split_once('#').map_or(rest, |(before, _)| before);
    match rest.split_once('?') {
        Some((path, query)) if !query.is_empty() => (path, Some(query)),
        Some((path, _)) => (path, None),
        None => (rest, None),
    }
}
