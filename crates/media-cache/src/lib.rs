//! Local disk cache for remote media
//!
//! This crate keeps local mirrors of media referenced by object-storage or
//! HTTP URLs so consumers can always work with a filesystem path:
//! - Deterministic mapping from remote paths to `<cache_dir>/media/<backend>/...`
//! - A sidecar per blob recording download outcome and backend checksum
//! - Synchronous, pooled, and async-streaming downloads
//! - Staleness detection through checksums (`update`)
//! - Budgeted LRU garbage collection coordinated by a lock file
//!
//! # Overview
//!
//! ```rust,ignore
//! use media_cache::{Backend, CacheConfig, MediaCache};
//! use std::sync::Arc;
//!
//! let cache = MediaCache::builder(CacheConfig::load(None)?)
//!     .client(Backend::S3, Arc::new(my_s3_client))
//!     .build()?;
//! let local = cache.get_local_path("s3://bucket/video.mp4", true, true)?;
//! ```
//!
//! Remote clients are supplied by the caller through [`RemoteClient`];
//! checksum and URL-signing support are opt-in capabilities.

// TODO(docs): Add # Errors sections to the fallible facade methods
#![expect(
    clippy::missing_errors_doc,
    reason = "Error documentation to be added incrementally"
)]

pub mod backend;
mod cache;
pub mod client;
pub mod config;
pub mod entry;
mod error;
mod executor;
pub mod gc;
mod scan;
pub mod sidecar;

// Re-export error types at crate root
pub use error::{BoxError, Error, Result};

// Re-export main types
pub use backend::{Backend, is_local};
pub use cache::{CacheStats, MediaCache, MediaCacheBuilder, RemoteMetadata, UpdateSummary};
pub use client::{
    ChecksumCapable, FileMetadata, HttpMethod, RemoteClient, SignableCapable, SignedUrlOptions,
};
pub use config::{CacheConfig, GcLogConfig};
pub use entry::LocalCacheEntry;
pub use executor::DownloadOutcome;
pub use gc::{GarbageCollector, GcOutcome, GcStats, LOCK_STALE_AFTER};
pub use sidecar::Sidecar;
