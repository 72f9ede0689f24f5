//! Shared fixtures for integration tests

#![allow(dead_code)]

use media_cache::{
    Backend, BoxError, CacheConfig, ChecksumCapable, FileMetadata, MediaCache, RemoteClient,
    SignableCapable, SignedUrlOptions,
};
use std::collections::HashMap;
use std::fs::{File, FileTimes};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// In-memory object store that counts downloads.
#[derive(Default)]
pub struct FakeStore {
    objects: Mutex<HashMap<String, (Vec<u8>, Option<String>)>>,
    downloads: Mutex<HashMap<String, usize>>,
    pub fail_downloads: AtomicBool,
    pub fail_metadata: AtomicBool,
    /// Write the first half of each body, then fail
    pub truncate_downloads: AtomicBool,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Put an object with an ETag.
    pub fn put(&self, remote: &str, body: &[u8], etag: &str) {
        self.objects
            .lock()
            .unwrap()
            .insert(remote.to_string(), (body.to_vec(), Some(etag.to_string())));
    }

    pub fn delete(&self, remote: &str) {
        self.objects.lock().unwrap().remove(remote);
    }

    pub fn downloads(&self, remote: &str) -> usize {
        self.downloads
            .lock()
            .unwrap()
            .get(remote)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_downloads(&self) -> usize {
        self.downloads.lock().unwrap().values().sum()
    }

    fn fetch(&self, remote: &str) -> Result<Vec<u8>, BoxError> {
        *self
            .downloads
            .lock()
            .unwrap()
            .entry(remote.to_string())
            .or_default() += 1;
        if self.fail_downloads.load(Ordering::SeqCst) {
            return Err("simulated transport failure".into());
        }
        self.objects
            .lock()
            .unwrap()
            .get(remote)
            .map(|(body, _)| body.clone())
            .ok_or_else(|| format!("no such object: {remote}").into())
    }

    /// Copy an object to `local_path` the way a transport would.
    fn write_to(&self, remote: &str, local_path: &Path) -> Result<(), BoxError> {
        let body = self.fetch(remote)?;
        if self.truncate_downloads.load(Ordering::SeqCst) {
            std::fs::write(local_path, &body[..body.len() / 2])?;
            return Err("connection reset mid-body".into());
        }
        std::fs::write(local_path, body)?;
        Ok(())
    }

    fn metadata(&self, remote: &str) -> Result<FileMetadata, BoxError> {
        if self.fail_metadata.load(Ordering::SeqCst) {
            return Err("simulated metadata failure".into());
        }
        let objects = self.objects.lock().unwrap();
        Ok(match objects.get(remote) {
            Some((body, etag)) => FileMetadata {
                etag: etag.clone(),
                size: Some(body.len() as u64),
                content_type: Some("image/jpeg".into()),
                ..FileMetadata::default()
            },
            None => FileMetadata::default(),
        })
    }
}

/// Client with checksum and signing support.
pub struct TaggedClient(pub Arc<FakeStore>);

impl RemoteClient for TaggedClient {
    fn download(&self, remote_path: &str, local_path: &Path) -> Result<(), BoxError> {
        self.0.write_to(remote_path, local_path)
    }

    fn checksums(self: Arc<Self>) -> Option<Arc<dyn ChecksumCapable>> {
        Some(self)
    }

    fn signer(self: Arc<Self>) -> Option<Arc<dyn SignableCapable>> {
        Some(self)
    }
}

impl ChecksumCapable for TaggedClient {
    fn file_metadata(&self, remote_path: &str) -> Result<FileMetadata, BoxError> {
        self.0.metadata(remote_path)
    }
}

impl SignableCapable for TaggedClient {
    fn signed_url(&self, remote_path: &str, options: &SignedUrlOptions) -> Result<String, BoxError> {
        Ok(format!(
            "https://signed.example/{}?method={}&expires={}",
            remote_path.trim_start_matches("s3://"),
            options.method,
            options.expires_in.num_seconds()
        ))
    }
}

/// Client without any optional capability.
pub struct PlainClient(pub Arc<FakeStore>);

impl RemoteClient for PlainClient {
    fn download(&self, remote_path: &str, local_path: &Path) -> Result<(), BoxError> {
        self.0.write_to(remote_path, local_path)
    }
}

pub fn config(dir: &Path) -> CacheConfig {
    CacheConfig::new(dir).num_workers(4)
}

/// Cache with a checksum-capable S3 client and a plain GCS client over one store.
pub fn cache_with(config: CacheConfig, store: &Arc<FakeStore>) -> MediaCache {
    MediaCache::builder(config)
        .client(Backend::S3, Arc::new(TaggedClient(Arc::clone(store))))
        .client(Backend::Gcs, Arc::new(PlainClient(Arc::clone(store))))
        .client(Backend::Http, Arc::new(TaggedClient(Arc::clone(store))))
        .build()
        .unwrap()
}

/// Set a file's access and modification times to `age` ago.
pub fn set_age(path: &Path, age: Duration) {
    let t = SystemTime::now() - age;
    let file = File::options().write(true).open(path).unwrap();
    file.set_times(FileTimes::new().set_accessed(t).set_modified(t))
        .unwrap();
}

/// Serve one HTTP response on a random port. Resolves to the request line.
pub async fn serve_once(status: &'static str, body: &'static [u8]) -> (u16, tokio::task::JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
        }
        let head = format!(
            "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.write_all(body).await.unwrap();
        socket.shutdown().await.unwrap();
        String::from_utf8_lossy(&request)
            .lines()
            .next()
            .unwrap_or_default()
            .to_string()
    });
    (port, handle)
}
