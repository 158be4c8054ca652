//! Resolution and download collaborators
//!
//! The pipeline consumes these as black-box async functions: search/metadata
//! resolution and binary media download. Production implementations talk to
//! an HTTP resolver service and an external downloader binary; tests supply
//! doubles implementing the same traits.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Concrete track information produced by resolution
#[derive(Debug, Clone, Deserialize)]
pub struct ResolvedTrack {
    pub url: String,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub duration_ms: Option<u64>,
}

/// Resolves a source ref (URL or search terms) into concrete track metadata
#[async_trait]
pub trait TrackResolver: Send + Sync {
    /// Resolve free-text search terms to a concrete URL plus metadata
    async fn resolve(&self, source_ref: &str) -> Result<ResolvedTrack>;

    /// Fetch metadata (title/artist/duration) for an already-concrete URL
    async fn metadata(&self, url: &str) -> Result<ResolvedTrack>;
}

/// Downloads media bytes to a local path
#[async_trait]
pub trait MediaDownloader: Send + Sync {
    async fn download(&self, url: &str, dest: &Path) -> Result<()>;

    /// Thumbnail download is best-effort; default is a no-op
    async fn download_thumbnail(&self, _url: &str, _dest: &Path) -> Result<()> {
        Ok(())
    }
}

/// Resolver backed by an HTTP metadata service
pub struct HttpResolver {
    client: reqwest::Client,
    base_url: String,
}

impl HttpResolver {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    async fn fetch(&self, path: &str, param: (&str, &str)) -> Result<ResolvedTrack> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path);
        let response = self
            .client
            .get(&url)
            .query(&[param])
            .send()
            .await
            .map_err(|e| Error::Resolution(format!("resolver unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Resolution(format!(
                "resolver returned {}",
                response.status()
            )));
        }

        response
            .json::<ResolvedTrack>()
            .await
            .map_err(|e| Error::Resolution(format!("bad resolver response: {}", e)))
    }
}

#[async_trait]
impl TrackResolver for HttpResolver {
    async fn resolve(&self, source_ref: &str) -> Result<ResolvedTrack> {
        debug!(query = source_ref, "Resolving search terms");
        self.fetch("resolve", ("q", source_ref)).await
    }

    async fn metadata(&self, url: &str) -> Result<ResolvedTrack> {
        debug!(url, "Fetching track metadata");
        self.fetch("metadata", ("url", url)).await
    }
}

/// Downloader shelling out to an external binary (yt-dlp style: `<program>
/// -o <dest> <url>`). The pipeline's semaphore bounds concurrent processes.
pub struct ExternalDownloader {
    program: String,
}

impl ExternalDownloader {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl MediaDownloader for ExternalDownloader {
    async fn download(&self, url: &str, dest: &Path) -> Result<()> {
        debug!(url, dest = %dest.display(), "Spawning downloader");
        let output = tokio::process::Command::new(&self.program)
            .arg("-o")
            .arg(dest)
            .arg(url)
            .output()
            .await
            .map_err(|e| Error::Download(format!("failed to spawn {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Download(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        if !dest.exists() {
            return Err(Error::Download(format!(
                "{} reported success but produced no file",
                self.program
            )));
        }
        Ok(())
    }
}
