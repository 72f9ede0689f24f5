//! The media cache facade.
//!
//! [`MediaCache`] is an explicit handle: build it once at startup with the
//! clients for each backend and pass clones to whatever needs local paths.
//! Clones share configuration, clients and the worker pool settings.

use crate::backend::{Backend, is_local, normalize_local};
use crate::client::{ClientHandle, FileMetadata, HttpMethod, RemoteClient, SignedUrlOptions};
use crate::config::CacheConfig;
use crate::entry::LocalCacheEntry;
use crate::executor::{DownloadExecutor, DownloadOutcome, DownloadTask};
use crate::gc::{GarbageCollector, GcOutcome};
use crate::scan::scan_media;
use crate::sidecar::Sidecar;
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Condensed metadata for a remote object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteMetadata {
    /// Remote path the metadata describes
    pub remote_path: String,
    /// Backend checksum (ETag)
    pub checksum: Option<String>,
    /// Object size in bytes
    pub size_bytes: Option<u64>,
    /// Last modification time
    pub last_modified: Option<DateTime<Utc>>,
    /// MIME type
    pub content_type: Option<String>,
}

impl RemoteMetadata {
    fn new(remote_path: &str, meta: FileMetadata) -> Self {
        Self {
            remote_path: remote_path.to_string(),
            checksum: meta.etag,
            size_bytes: meta.size,
            last_modified: meta.last_modified,
            content_type: meta.content_type,
        }
    }
}

/// Disk usage of the cache or a subset of it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    /// Number of resident blobs
    pub file_count: usize,
    /// Bytes used by resident blobs
    pub total_bytes: u64,
    /// `total_bytes / cache_size_bytes`; 0 when the budget is unlimited
    pub load_factor: f64,
    /// Configured budget (negative for unlimited)
    pub cache_size_bytes: i64,
}

/// What `update()` did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpdateSummary {
    /// Entries examined
    pub checked: usize,
    /// Entries evicted because the remote object is gone
    pub evicted: usize,
    /// Entries downloaded again because their checksum changed
    pub redownloaded: usize,
    /// Entries already current
    pub unchanged: usize,
    /// Entries whose download failed again (recorded, not propagated)
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpdateAction {
    Evicted,
    Redownloaded,
    Unchanged,
    Failed,
}

/// Builder for [`MediaCache`]
#[derive(Debug)]
pub struct MediaCacheBuilder {
    config: CacheConfig,
    clients: HashMap<Backend, ClientHandle>,
}

impl MediaCacheBuilder {
    /// Register the client for `backend`, replacing any previous one.
    #[must_use]
    pub fn client(mut self, backend: Backend, client: Arc<dyn RemoteClient>) -> Self {
        self.clients
            .insert(backend, ClientHandle::new(backend, client));
        self
    }

    /// Validate the configuration and build the cache.
    pub fn build(self) -> Result<MediaCache> {
        self.config.validate()?;
        let executor = DownloadExecutor::new(
            self.config.effective_workers(),
            self.config.download_timeout(),
            self.config.staging_dir(),
        )?;
        Ok(MediaCache {
            inner: Arc::new(Inner {
                config: Arc::new(self.config),
                clients: self.clients,
                executor,
            }),
        })
    }
}

#[derive(Debug)]
struct Inner {
    config: Arc<CacheConfig>,
    clients: HashMap<Backend, ClientHandle>,
    executor: DownloadExecutor,
}

/// Local mirror of remote media
#[derive(Debug, Clone)]
pub struct MediaCache {
    inner: Arc<Inner>,
}

impl MediaCache {
    /// Start building a cache over `config`.
    #[must_use]
    pub fn builder(config: CacheConfig) -> MediaCacheBuilder {
        MediaCacheBuilder {
            config,
            clients: HashMap::new(),
        }
    }

    /// The configuration this cache was built with.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Whether `path` is on the local filesystem.
    #[must_use]
    pub fn is_local(&self, path: &str) -> bool {
        is_local(path)
    }

    /// Cache entry for a remote path.
    pub fn entry(&self, remote_path: &str) -> Result<LocalCacheEntry> {
        let handle = self.handle(remote_path)?;
        Ok(self.entry_with(handle, remote_path))
    }

    /// Whether `path` is local, or remote with a resident mirror (including a
    /// recorded failure, which is not retried implicitly).
    pub fn is_local_or_cached(&self, path: &str) -> Result<bool> {
        if is_local(path) {
            return Ok(true);
        }
        self.entry(path)?.exists()
    }

    /// Resolve `path` to a local file, downloading it first if needed.
    ///
    /// Local paths come back unchanged. For remote paths the cache location is
    /// returned even when the download fails and `skip_failures` is set; an
    /// object whose last download failed is not retried until [`update`].
    ///
    /// [`update`]: Self::update
    pub fn get_local_path(&self, path: &str, download: bool, skip_failures: bool) -> Result<PathBuf> {
        if is_local(path) {
            return Ok(PathBuf::from(normalize_local(path)));
        }
        let task = self.task(path, false, skip_failures)?;
        if download && !task.entry.exists()? {
            self.inner.executor.download(&task)?;
        }
        Ok(task.entry.local_path)
    }

    /// Plural [`get_local_path`](Self::get_local_path): missing entries are
    /// filled through the worker pool. Results follow input order.
    #[instrument(skip_all, fields(count = paths.len()))]
    pub fn get_local_paths<S>(&self, paths: &[S], download: bool, skip_failures: bool) -> Result<Vec<PathBuf>>
    where
        S: AsRef<str>,
    {
        let mut tasks = Vec::new();
        let mut seen = HashSet::new();
        for path in paths.iter().map(|p| p.as_ref()) {
            if is_local(path) || !seen.insert(path) {
                continue;
            }
            let task = self.task(path, false, skip_failures)?;
            if download && !task.entry.exists()? {
                tasks.push(task);
            }
        }
        if !tasks.is_empty() {
            self.inner.executor.download_all(&tasks)?;
        }

        paths
            .iter()
            .map(|p| self.get_local_path(p.as_ref(), false, skip_failures))
            .collect()
    }

    /// Async [`get_local_path`](Self::get_local_path) that streams the body
    /// to disk without blocking the runtime.
    pub async fn get_local_path_async(&self, path: &str, skip_failures: bool) -> Result<PathBuf> {
        if is_local(path) {
            return Ok(PathBuf::from(normalize_local(path)));
        }
        let task = self.task(path, false, skip_failures)?;
        let entry = task.entry.clone();
        if !tokio::task::spawn_blocking(move || entry.exists()).await?? {
            self.inner.executor.download_async(&task).await?;
        }
        Ok(task.entry.local_path)
    }

    /// Raw backend metadata for a remote object.
    ///
    /// Fails for local paths and for backends without checksum support
    /// regardless of `skip_failures`; only remote fetch errors are skipped.
    pub fn get_remote_file_metadata(&self, path: &str, skip_failures: bool) -> Result<Option<FileMetadata>> {
        let handle = self.handle(path)?;
        let checksums = handle
            .checksums
            .as_ref()
            .ok_or_else(|| Error::unsupported(handle.backend.id(), "checksums"))?;
        match checksums.file_metadata(path) {
            Ok(meta) => Ok(Some(meta)),
            Err(e) if skip_failures => {
                warn!(remote_path = path, error = %e, "Failed to fetch remote metadata");
                Ok(None)
            }
            Err(e) => Err(Error::remote(path, e)),
        }
    }

    /// Plural [`get_remote_file_metadata`](Self::get_remote_file_metadata);
    /// deduplicated and pooled, results aligned with `paths`.
    pub fn get_remote_file_metadatas<S>(
        &self,
        paths: &[S],
        skip_failures: bool,
    ) -> Result<Vec<Option<FileMetadata>>>
    where
        S: AsRef<str>,
    {
        let unique = dedupe(paths);
        let fetched = self
            .inner
            .executor
            .run_pooled(&unique, |p| self.get_remote_file_metadata(p, skip_failures))?;
        let by_path: HashMap<&str, Option<FileMetadata>> =
            unique.iter().copied().zip(fetched).collect();
        Ok(paths
            .iter()
            .map(|p| by_path.get(p.as_ref()).cloned().flatten())
            .collect())
    }

    /// Condensed metadata for a remote object.
    pub fn get_remote_metadata(&self, path: &str, skip_failures: bool) -> Result<Option<RemoteMetadata>> {
        Ok(self
            .get_remote_file_metadata(path, skip_failures)?
            .map(|meta| RemoteMetadata::new(path, meta)))
    }

    /// Plural [`get_remote_metadata`](Self::get_remote_metadata).
    pub fn get_remote_metadatas<S>(&self, paths: &[S], skip_failures: bool) -> Result<Vec<Option<RemoteMetadata>>>
    where
        S: AsRef<str>,
    {
        let metas = self.get_remote_file_metadatas(paths, skip_failures)?;
        Ok(paths
            .iter()
            .zip(metas)
            .map(|(p, meta)| meta.map(|m| RemoteMetadata::new(p.as_ref(), m)))
            .collect())
    }

    /// Signed URL for a remote object, valid for `hours`.
    ///
    /// Always fails for local paths and for backends that cannot sign; these
    /// are caller errors, not transient ones.
    pub fn get_url(&self, remote_path: &str, method: HttpMethod, hours: i64) -> Result<String> {
        let handle = self.handle(remote_path)?;
        let signer = handle
            .signer
            .as_ref()
            .ok_or_else(|| Error::unsupported(handle.backend.id(), "signed URLs"))?;
        let options = SignedUrlOptions {
            method,
            expires_in: Duration::hours(hours),
        };
        signer
            .signed_url(remote_path, &options)
            .map_err(|e| Error::remote(remote_path, e))
    }

    /// Reconcile cached entries with their remote objects.
    ///
    /// For each entry with a sidecar (every one when `filepaths` is `None`):
    /// - previously successful and the remote reports no checksum: evict
    /// - checksum differs, or none was cached: download again
    /// - checksum matches: leave alone
    ///
    /// Backends without checksum support are downloaded again every time.
    #[instrument(skip_all)]
    pub fn update(&self, filepaths: Option<&[&str]>, skip_failures: bool) -> Result<UpdateSummary> {
        let targets = match filepaths {
            Some(paths) => self.targets_for(paths)?,
            None => self.all_targets(),
        };

        let actions = self.inner.executor.run_pooled(&targets, |(task, record)| {
            self.update_entry(task, record, skip_failures)
        })?;

        let mut summary = UpdateSummary {
            checked: actions.len(),
            ..UpdateSummary::default()
        };
        for action in actions {
            match action {
                UpdateAction::Evicted => summary.evicted += 1,
                UpdateAction::Redownloaded => summary.redownloaded += 1,
                UpdateAction::Unchanged => summary.unchanged += 1,
                UpdateAction::Failed => summary.failed += 1,
            }
        }
        info!(
            checked = summary.checked,
            evicted = summary.evicted,
            redownloaded = summary.redownloaded,
            unchanged = summary.unchanged,
            failed = summary.failed,
            "Cache update complete"
        );
        Ok(summary)
    }

    /// Run one garbage collection pass. Errors are logged, never returned.
    pub fn garbage_collect(&self) -> Option<GcOutcome> {
        match GarbageCollector::new(Arc::clone(&self.inner.config)).run() {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!(error = %e, "Garbage collection failed");
                None
            }
        }
    }

    /// Delete cached files: the whole media directory, or blob and sidecar
    /// for each remote path in `filepaths`.
    pub fn clear(&self, filepaths: Option<&[&str]>) -> Result<()> {
        let Some(paths) = filepaths else {
            let media_dir = self.inner.config.media_dir();
            return match fs::remove_dir_all(&media_dir) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(Error::io(e, &media_dir, "remove_dir_all")),
            };
        };
        for path in paths.iter().copied().filter(|p| !is_local(p)) {
            self.entry(path)?.remove()?;
        }
        Ok(())
    }

    /// Resident file count, bytes and load factor, for the whole cache or
    /// for the given remote paths.
    pub fn stats(&self, filepaths: Option<&[&str]>) -> Result<CacheStats> {
        let (file_count, total_bytes) = match filepaths {
            None => {
                let scan = scan_media(&self.inner.config.media_dir());
                (scan.blobs.len(), scan.blobs.iter().map(|b| b.size).sum())
            }
            Some(paths) => {
                let mut count = 0usize;
                let mut bytes = 0u64;
                for path in dedupe(paths).into_iter().filter(|p| !is_local(p)) {
                    let entry = self.entry(path)?;
                    if let Ok(meta) = fs::metadata(&entry.local_path)
                        && meta.is_file()
                    {
                        count += 1;
                        bytes += meta.len();
                    }
                }
                (count, bytes)
            }
        };

        let cache_size_bytes = self.inner.config.cache_size_bytes;
        let load_factor = match self.inner.config.budget() {
            None => 0.0,
            Some(0) if total_bytes == 0 => 0.0,
            Some(0) => f64::INFINITY,
            Some(budget) => total_bytes as f64 / budget as f64,
        };
        Ok(CacheStats {
            file_count,
            total_bytes,
            load_factor,
            cache_size_bytes,
        })
    }

    fn handle(&self, path: &str) -> Result<&ClientHandle> {
        let backend = Backend::from_path(path).ok_or_else(|| Error::NotRemote {
            path: path.to_string(),
        })?;
        self.inner
            .clients
            .get(&backend)
            .ok_or_else(|| Error::UnknownBackend {
                backend: backend.id().to_string(),
            })
    }

    fn entry_with(&self, handle: &ClientHandle, remote_path: &str) -> LocalCacheEntry {
        let relative = handle.client.local_path(remote_path);
        LocalCacheEntry::new(
            &self.inner.config.media_dir(),
            handle.backend,
            remote_path,
            &relative,
        )
    }

    fn task(&self, remote_path: &str, force: bool, skip_failures: bool) -> Result<DownloadTask> {
        let handle = self.handle(remote_path)?;
        Ok(DownloadTask {
            entry: self.entry_with(handle, remote_path),
            client: handle.clone(),
            force,
            skip_failures,
        })
    }

    /// Update targets for explicit paths: remote paths that have a sidecar.
    fn targets_for(&self, paths: &[&str]) -> Result<Vec<(DownloadTask, Sidecar)>> {
        let mut targets = Vec::new();
        for path in dedupe(paths).into_iter().filter(|p| !is_local(p)) {
            let task = self.task(path, true, false)?;
            if let Some(record) = task.entry.sidecar()? {
                targets.push((task, record));
            }
        }
        Ok(targets)
    }

    /// Update targets for the whole cache, found through their sidecars.
    fn all_targets(&self) -> Vec<(DownloadTask, Sidecar)> {
        let scan = scan_media(&self.inner.config.media_dir());
        let mut targets = Vec::new();
        for sidecar_file in scan.sidecars {
            let record = match fs::read_to_string(&sidecar_file)
                .map_err(|e| Error::io(e, &sidecar_file, "read"))
                .and_then(|content| Sidecar::parse(&content, &sidecar_file))
            {
                Ok(record) => record,
                Err(e) => {
                    warn!(path = %sidecar_file.display(), error = %e, "Skipping unreadable sidecar");
                    continue;
                }
            };
            match self.task(&record.remote_path, true, false) {
                Ok(task) => targets.push((task, record)),
                Err(e) => {
                    warn!(remote_path = %record.remote_path, error = %e, "Skipping cached entry");
                }
            }
        }
        targets
    }

    fn update_entry(&self, task: &DownloadTask, record: &Sidecar, skip_failures: bool) -> Result<UpdateAction> {
        let remote = &task.entry.remote_path;
        let current = match task.client.checksum(remote) {
            Ok(checksum) => checksum,
            Err(e) if skip_failures => {
                warn!(remote_path = %remote, error = %e, "Failed to fetch checksum");
                None
            }
            Err(e) => return Err(Error::remote(remote, e)),
        };

        if record.success && current.is_none() {
            info!(remote_path = %remote, "Remote object is gone, evicting");
            task.entry.remove()?;
            return Ok(UpdateAction::Evicted);
        }

        let cached = record.checksum.as_deref().filter(|c| !c.is_empty());
        if cached.is_none() || cached != current.as_deref() {
            let task = DownloadTask {
                skip_failures,
                ..task.clone()
            };
            return match self.inner.executor.download(&task)? {
                DownloadOutcome::Failed => Ok(UpdateAction::Failed),
                _ => Ok(UpdateAction::Redownloaded),
            };
        }
        Ok(UpdateAction::Unchanged)
    }
}

/// Unique paths in first-seen order.
fn dedupe<S: AsRef<str>>(paths: &[S]) -> Vec<&str> {
    let mut seen = HashSet::new();
    paths
        .iter()
        .map(|p| p.as_ref())
        .filter(|p| seen.insert(*p))
        .collect()
}
