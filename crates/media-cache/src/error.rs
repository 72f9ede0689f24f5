//! Error types for the media cache

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Boxed error returned by remote clients
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error type for media cache operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// I/O error during cache operations
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(media_cache::io),
        help("Check file permissions and ensure the cache directory is writable")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "read", "write", "remove")
        operation: String,
    },

    /// Configuration or validation error
    #[error("Cache configuration error: {message}")]
    #[diagnostic(code(media_cache::config))]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },

    /// A remote client call failed
    #[error("Remote operation failed for {remote_path}: {source}")]
    #[diagnostic(
        code(media_cache::remote),
        help("Pass skip_failures=true to record the failure instead of propagating it")
    )]
    Remote {
        /// Remote path the client was asked about
        remote_path: String,
        /// The client's error
        #[source]
        source: BoxError,
    },

    /// The backend's client lacks a capability the call requires
    #[error("Backend '{backend}' does not support {capability}")]
    #[diagnostic(code(media_cache::unsupported))]
    Unsupported {
        /// Backend id
        backend: String,
        /// Missing capability (e.g., "checksums", "signed URLs")
        capability: String,
    },

    /// A remote path was required but a local one was given
    #[error("Path is local, expected a remote path: {path}")]
    #[diagnostic(
        code(media_cache::not_remote),
        help("Local files are never cached; use them directly")
    )]
    NotRemote {
        /// The offending path
        path: String,
    },

    /// No client is registered for the path's backend
    #[error("No client registered for backend '{backend}'")]
    #[diagnostic(
        code(media_cache::unknown_backend),
        help("Register a RemoteClient for this backend when building the MediaCache")
    )]
    UnknownBackend {
        /// Backend id
        backend: String,
    },

    /// Malformed on-disk record (sidecar or lock file)
    #[error("Failed to parse {}: {message}", path.display())]
    #[diagnostic(code(media_cache::parse))]
    Parse {
        /// File that failed to parse
        path: Box<Path>,
        /// What was wrong with it
        message: String,
    },

    /// HTTP transport error on the streaming path
    #[error("HTTP request failed for {url}: {source}")]
    #[diagnostic(code(media_cache::http))]
    Http {
        /// Requested URL
        url: String,
        /// The underlying transport error
        #[source]
        source: reqwest::Error,
    },

    /// A blocking task panicked or was cancelled
    #[error("Background task failed: {0}")]
    #[diagnostic(code(media_cache::task_join))]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl Error {
    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create an I/O error without path context
    #[must_use]
    pub fn io_no_path(source: std::io::Error, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            path: None,
            operation: operation.into(),
        }
    }

    /// Wrap a client error for the given remote path
    #[must_use]
    pub fn remote(remote_path: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Remote {
            remote_path: remote_path.into(),
            source: source.into(),
        }
    }

    /// Create a missing-capability error
    #[must_use]
    pub fn unsupported(backend: impl Into<String>, capability: impl Into<String>) -> Self {
        Self::Unsupported {
            backend: backend.into(),
            capability: capability.into(),
        }
    }

    /// Create a parse error for an on-disk record
    #[must_use]
    pub fn parse(path: impl AsRef<Path>, msg: impl Into<String>) -> Self {
        Self::Parse {
            path: path.as_ref().into(),
            message: msg.into(),
        }
    }

    /// Whether this error is an I/O "not found"
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

/// Result type for media cache operations
pub type Result<T> = std::result::Result<T, Error>;
