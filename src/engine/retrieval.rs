//! Host-side retrieval of generated files.

use anyhow::{Context, Result};
use futures::StreamExt;
use reqwest::Url;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const FALLBACK_FILE_NAME: &str = "chart.pptx";

/// Opens a finished export the way the host environment retrieves files.
///
/// `retrieve` must return quickly; any long-running work happens in the background.
pub trait Retriever: Send + Sync {
    fn retrieve(&self, url: &Url) -> Result<()>;

    /// Background work started by `retrieve` that nobody has awaited yet.
    fn take_pending(&self) -> Vec<JoinHandle<()>> {
        Vec::new()
    }
}

/// Downloads the generated file into a directory on a background task.
pub struct DownloadRetriever {
    http: reqwest::Client,
    dir: PathBuf,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl DownloadRetriever {
    pub fn new(http: reqwest::Client, dir: PathBuf) -> Self {
        Self {
            http,
            dir,
            pending: Mutex::new(Vec::new()),
        }
    }
}

impl Retriever for DownloadRetriever {
    fn retrieve(&self, url: &Url) -> Result<()> {
        let http = self.http.clone();
        let url = url.clone();
        let target = self.dir.join(file_name_for(&url));
        let runtime = tokio::runtime::Handle::try_current()
            .context("download requires a running tokio runtime")?;
        let handle = runtime.spawn(async move {
            match download_to(&http, &url, &target).await {
                Ok(bytes) => info!(path = %target.display(), bytes, "downloaded generated file"),
                Err(e) => warn!(%url, "download failed: {e:#}"),
            }
        });
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
        Ok(())
    }

    fn take_pending(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut *self.pending.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

/// Only reports the link; used when downloads are disabled.
pub struct LinkRetriever;

impl Retriever for LinkRetriever {
    fn retrieve(&self, url: &Url) -> Result<()> {
        info!(%url, "generated file available");
        Ok(())
    }
}

async fn download_to(http: &reqwest::Client, url: &Url, target: &Path) -> Result<u64> {
    let resp = http
        .get(url.clone())
        .send()
        .await
        .context("request generated file")?
        .error_for_status()
        .context("generated file not available")?;
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("create {}", parent.display()))?;
    }
    let mut out = tokio::fs::File::create(target)
        .await
        .with_context(|| format!("create {}", target.display()))?;
    let mut written = 0u64;
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("read generated file")?;
        out.write_all(&chunk).await.context("write generated file")?;
        written += chunk.len() as u64;
    }
    out.flush().await.context("flush generated file")?;
    Ok(written)
}

/// Last non-empty path segment of the URL.
fn file_name_for(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segs| segs.next_back().map(str::to_string))
        .filter(|s| !s.is_empty() && s != "." && s != "..")
        .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string())
}
