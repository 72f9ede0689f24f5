//! Download execution: one task contract, three ways to run it.
//!
//! Every mode applies the same steps to a [`DownloadTask`]:
//! 1. skip when the blob exists and `force` is not set
//! 2. download into a staging file, then rename it over the blob
//! 3. look up the checksum (`""` when the backend cannot report one)
//! 4. write the sidecar for every terminal outcome
//!
//! Readers only ever see a complete blob: partial bodies live in the staging
//! directory until the rename. A failure with `skip_failures` unset
//! propagates and leaves no sidecar, so the next call retries.

use crate::backend::Backend;
use crate::client::{ClientHandle, SignedUrlOptions};
use crate::entry::{LocalCacheEntry, ensure_parent, remove_if_exists};
use crate::{Error, Result, sidecar};
use futures::StreamExt;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Validity of signed URLs minted for streaming downloads, in hours.
const STREAM_URL_HOURS: i64 = 1;

/// Prefix of staged download files
const STAGING_PREFIX: &str = "download-";

/// One unit of download work.
#[derive(Debug, Clone)]
pub(crate) struct DownloadTask {
    pub(crate) entry: LocalCacheEntry,
    pub(crate) client: ClientHandle,
    pub(crate) force: bool,
    pub(crate) skip_failures: bool,
}

/// Terminal result of a task that did not propagate an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Blob was already resident; nothing was fetched
    Cached,
    /// Blob was fetched; carries the recorded checksum
    Downloaded(String),
    /// Download failed and the failure was recorded in the sidecar
    Failed,
}

/// Runs download tasks synchronously, on a worker pool, or as a stream.
#[derive(Debug)]
pub(crate) struct DownloadExecutor {
    /// `None` when a single worker is configured
    pool: Option<rayon::ThreadPool>,
    staging_dir: PathBuf,
    http: reqwest::Client,
}

impl DownloadExecutor {
    pub(crate) fn new(workers: usize, timeout: Duration, staging_dir: PathBuf) -> Result<Self> {
        let pool = if workers > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .thread_name(|i| format!("media-cache-worker-{i}"))
                .build()
                .map_err(|e| Error::configuration(format!("failed to build worker pool: {e}")))?;
            Some(pool)
        } else {
            None
        };
        let http = reqwest::Client::builder()
            .user_agent(concat!("media-cache/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| Error::configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            pool,
            staging_dir,
            http,
        })
    }

    /// Run one task on the calling thread.
    pub(crate) fn download(&self, task: &DownloadTask) -> Result<DownloadOutcome> {
        let entry = &task.entry;
        if !task.force && entry.blob_exists() {
            return Ok(DownloadOutcome::Cached);
        }
        debug!(remote_path = %entry.remote_path, local_path = %entry.local_path.display(), "Downloading");
        let fetched = fetch_with_client(
            &task.client,
            &entry.remote_path,
            &self.staging_dir,
            &entry.local_path,
        );
        finish(task, fetched)
    }

    /// Run many tasks across the worker pool; blocks until all finish or the
    /// first unskipped error. Outcomes are returned in task order.
    pub(crate) fn download_all(&self, tasks: &[DownloadTask]) -> Result<Vec<DownloadOutcome>> {
        self.run_pooled(tasks, |task| self.download(task))
    }

    /// Apply `f` to every item, on the worker pool when one is configured.
    /// The first error aborts the batch.
    pub(crate) fn run_pooled<T, R, F>(&self, items: &[T], f: F) -> Result<Vec<R>>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> Result<R> + Sync + Send,
    {
        match &self.pool {
            Some(pool) if items.len() > 1 => pool.install(|| items.par_iter().map(f).collect()),
            _ => items.iter().map(f).collect(),
        }
    }

    /// Run one task without blocking the caller's runtime, streaming the body
    /// to disk. Filesystem work that has no async form runs on tokio's
    /// blocking pool.
    pub(crate) async fn download_async(&self, task: &DownloadTask) -> Result<DownloadOutcome> {
        let entry = &task.entry;
        if !task.force && tokio::fs::metadata(&entry.local_path).await.is_ok_and(|m| m.is_file()) {
            return Ok(DownloadOutcome::Cached);
        }

        let fetched = match self.fetch_url(task) {
            Ok(Some(url)) => {
                debug!(remote_path = %entry.remote_path, "Streaming download");
                self.stream_to_file(&url, &entry.local_path).await
            }
            Ok(None) => {
                let client = task.client.clone();
                let remote = entry.remote_path.clone();
                let staging_dir = self.staging_dir.clone();
                let local = entry.local_path.clone();
                tokio::task::spawn_blocking(move || {
                    fetch_with_client(&client, &remote, &staging_dir, &local)
                })
                .await?
            }
            Err(e) => Err(e),
        };

        let task = task.clone();
        tokio::task::spawn_blocking(move || finish(&task, fetched)).await?
    }

    /// URL to stream from: the path itself for HTTP, a signed URL for object
    /// stores that can mint one, `None` to fall back to the blocking client.
    fn fetch_url(&self, task: &DownloadTask) -> Result<Option<String>> {
        let remote = &task.entry.remote_path;
        if task.client.backend == Backend::Http {
            return Ok(Some(remote.clone()));
        }
        match &task.client.signer {
            Some(signer) => signer
                .signed_url(remote, &SignedUrlOptions::get(STREAM_URL_HOURS))
                .map(Some)
                .map_err(|e| Error::remote(remote, e)),
            None => Ok(None),
        }
    }

    async fn stream_to_file(&self, url: &str, local_path: &Path) -> Result<()> {
        // Url::parse keeps existing %XX escapes intact; signed URLs depend on it
        let parsed = reqwest::Url::parse(url).map_err(|e| Error::remote(url, e))?;
        let http_err = |source| Error::Http {
            url: url.to_string(),
            source,
        };
        let response = self
            .http
            .get(parsed)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(http_err)?;

        let staging_dir = self.staging_dir.clone();
        let staged = tokio::task::spawn_blocking(move || stage(&staging_dir)).await??;
        let written = match write_body(response, &staged, http_err).await {
            Ok(written) => written,
            Err(e) => {
                tokio::task::spawn_blocking(move || discard(staged)).await?;
                return Err(e);
            }
        };

        let target = local_path.to_path_buf();
        tokio::task::spawn_blocking(move || publish(staged, &target)).await??;
        debug!(path = %local_path.display(), bytes = written, "Stream complete");
        Ok(())
    }
}

/// Stream a response body into `path`; returns the byte count.
async fn write_body<F>(response: reqwest::Response, path: &Path, http_err: F) -> Result<u64>
where
    F: Fn(reqwest::Error) -> Error,
{
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| Error::io(e, path, "create"))?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(&http_err)?;
        file.write_all(&chunk)
            .await
            .map_err(|e| Error::io(e, path, "write"))?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(|e| Error::io(e, path, "flush"))?;
    Ok(written)
}

/// Delete an unpublished staging file.
fn discard(staged: TempPath) {
    let path = staged.to_path_buf();
    if let Err(e) = staged.close() {
        warn!(path = %path.display(), error = %e, "Failed to remove partial download");
    }
}

/// Create an empty staging file. It is deleted on drop unless published.
fn stage(staging_dir: &Path) -> Result<TempPath> {
    fs::create_dir_all(staging_dir).map_err(|e| Error::io(e, staging_dir, "create_dir_all"))?;
    tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempfile_in(staging_dir)
        .map(tempfile::NamedTempFile::into_temp_path)
        .map_err(|e| Error::io(e, staging_dir, "create staging file"))
}

/// Move a finished staging file over the blob.
fn publish(staged: TempPath, local_path: &Path) -> Result<()> {
    ensure_parent(local_path)?;
    staged
        .persist(local_path)
        .map_err(|e| Error::io(e.error, local_path, "rename"))
}

/// Blocking client download through a staging file.
fn fetch_with_client(
    client: &ClientHandle,
    remote_path: &str,
    staging_dir: &Path,
    local_path: &Path,
) -> Result<()> {
    let staged = stage(staging_dir)?;
    client
        .client
        .download(remote_path, &staged)
        .map_err(|e| Error::remote(remote_path, e))?;
    publish(staged, local_path)
}

/// Record the terminal outcome of a fetch.
fn finish(task: &DownloadTask, fetched: Result<()>) -> Result<DownloadOutcome> {
    if let Err(e) = fetched {
        return record_failure(task, e);
    }
    let entry = &task.entry;
    let checksum = checksum_after_download(&task.client, &entry.remote_path);
    sidecar::write(&entry.remote_path, &entry.local_path, true, Some(&checksum))?;
    Ok(DownloadOutcome::Downloaded(checksum))
}

/// Checksum to record after a successful download. Lookup failures degrade
/// to `""`, which reads as stale on the next `update()`.
fn checksum_after_download(client: &ClientHandle, remote_path: &str) -> String {
    match client.checksum(remote_path) {
        Ok(checksum) => checksum.unwrap_or_default(),
        Err(e) => {
            warn!(remote_path, error = %e, "Checksum lookup failed after download");
            String::new()
        }
    }
}

/// Suppress a failure: drop any previous blob and record the failure.
fn record_failure(task: &DownloadTask, err: Error) -> Result<DownloadOutcome> {
    if !task.skip_failures {
        return Err(err);
    }
    let entry = &task.entry;
    warn!(remote_path = %entry.remote_path, error = %err, "Download failed; recording failure");
    // A blob next to a failure record would be served as a cache hit
    if let Err(e) = remove_if_exists(&entry.local_path) {
        warn!(path = %entry.local_path.display(), error = %e, "Failed to remove blob after failed download");
    }
    entry.record(false, None)?;
    Ok(DownloadOutcome::Failed)
}
