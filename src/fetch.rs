//! HTTP downloads and the on-disk model cache.

use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::LabsError;
use crate::runtime::ModelSource;

/// GET `url` and return the body. Non-success statuses are errors.
pub async fn download(client: &reqwest::Client, url: &str) -> Result<Vec<u8>> {
    let resp = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("failed to fetch {url}"))?;
    let status = resp.status();
    if !status.is_success() {
        bail!("failed to fetch {url}: {status}");
    }
    let bytes = resp
        .bytes()
        .await
        .with_context(|| format!("failed to fetch {url}: body interrupted"))?;
    Ok(bytes.to_vec())
}

/// Fetches ONNX model blobs over HTTP on every call.
#[derive(Debug, Clone, Default)]
pub struct HttpModelSource {
    client: reqwest::Client,
}

impl HttpModelSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ModelSource for HttpModelSource {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, LabsError> {
        let fetch_error = |reason: String| LabsError::Fetch {
            context: "Failed to fetch ONNX model".to_string(),
            reason,
        };
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(fetch_error(status.to_string()));
        }
        let bytes = resp.bytes().await.map_err(|e| fetch_error(e.to_string()))?;
        debug!(url, bytes = bytes.len(), "model fetched");
        Ok(bytes.to_vec())
    }
}

/// Content-addressed by a caller-chosen key, one file per key.
#[derive(Debug, Clone)]
pub struct ModelCache {
    dir: PathBuf,
}

impl ModelCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File backing `key`. Characters outside `[A-Za-z0-9._-]` are replaced,
    /// so keys can never escape the cache directory.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let name = name.trim_start_matches('.');
        self.dir.join(if name.is_empty() { "_" } else { name })
    }

    /// Cached bytes for `key`, or `None` when absent or unreadable.
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        tokio::fs::read(self.path_for(key)).await.ok()
    }

    /// Store `bytes` under `key` atomically (temp file, then rename).
    pub async fn put(&self, key: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.path_for(key);
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);
        tokio::fs::write(&tmp_path, bytes)
            .await
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .with_context(|| format!("failed to move {} into place", path.display()))?;
        Ok(path)
    }

    /// Cached bytes for `key`, otherwise the result of `fetch`. A failed
    /// cache write is logged and the fetched bytes are still returned.
    pub async fn get_or_fetch<Fut>(&self, key: &str, fetch: Fut) -> Result<Vec<u8>>
    where
        Fut: Future<Output = Result<Vec<u8>>>,
    {
        if let Some(bytes) = self.get(key).await {
            debug!(key, "cache hit");
            return Ok(bytes);
        }
        let bytes = fetch.await?;
        if let Err(err) = self.put(key, &bytes).await {
            warn!(key, "model not cached: {err:#}");
        }
        Ok(bytes)
    }

    /// Cached bytes for `key`, downloading `url` on a miss.
    pub async fn get_or_download(
        &self,
        client: &reqwest::Client,
        key: &str,
        url: &str,
    ) -> Result<Vec<u8>> {
        self.get_or_fetch(key, async {
            info!(url, "downloading");
            download(client, url).await
        })
        .await
    }
}
