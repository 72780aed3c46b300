//! Streaming payload fetcher.

use std::path::{Path, PathBuf};

use futures::StreamExt;
use reqwest::Client;
use tokio::io::AsyncWriteExt;

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::progress::{ProgressReporter, STAGE_DOWNLOADING};

/// Streams remote payloads to disk chunk by chunk.
///
/// Bytes go to a hidden `.<name>.part` sibling first and are renamed onto
/// the destination once the body is complete, so an interrupted transfer
/// never leaves a truncated file under the final name.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    /// Create a fetcher with the download timeouts from `config`.
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        let client = epta_common::download_client(config.connect_timeout(), config.read_timeout())
            .map_err(|e| SyncError::Client {
                message: e.to_string(),
            })?;
        Ok(Self { client })
    }

    /// Download `url` to `dest`, reporting byte progress under the
    /// `Downloading` stage. Returns the number of bytes written.
    ///
    /// Intermediate percentages are only reported when the server announces
    /// a length. A final 100 is always reported.
    pub async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        progress: &ProgressReporter,
    ) -> SyncResult<u64> {
        let response =
            self.client
                .get(url)
                .send()
                .await
                .map_err(|e| SyncError::DownloadFailed {
                    message: format!("{url}: {e}"),
                })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::DownloadFailed {
                message: format!("HTTP {status} for {url}"),
            });
        }

        let expected = response.content_length();
        let mut tracker = progress.tracker(STAGE_DOWNLOADING, expected);

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::io(parent, e))?;
        }

        let part = part_path(dest);
        let written = match stream_to_file(response, &part, expected, &mut tracker).await {
            Ok(written) => written,
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                return Err(e);
            }
        };

        if let Err(e) = tokio::fs::rename(&part, dest).await {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(SyncError::io(dest, e));
        }

        tracker.finish().await;
        tracing::debug!("Fetched {} ({}) to {}", url, format_bytes(written), dest.display());
        Ok(written)
    }

    /// Download without reporting progress.
    pub async fn fetch_quiet(&self, url: &str, dest: &Path) -> SyncResult<u64> {
        self.fetch(url, dest, &ProgressReporter::disabled()).await
    }
}

async fn stream_to_file(
    response: reqwest::Response,
    part: &Path,
    expected: Option<u64>,
    tracker: &mut crate::progress::PercentTracker,
) -> SyncResult<u64> {
    let mut file = tokio::fs::File::create(part)
        .await
        .map_err(|e| SyncError::io(part, e))?;
    let mut body = response.bytes_stream();
    let mut downloaded: u64 = 0;

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| SyncError::DownloadFailed {
            message: e.to_string(),
        })?;

        file.write_all(&chunk)
            .await
            .map_err(|e| SyncError::io(part, e))?;

        downloaded += chunk.len() as u64;
        tracker.update(downloaded).await;
    }

    file.flush().await.map_err(|e| SyncError::io(part, e))?;
    file.sync_all().await.map_err(|e| SyncError::io(part, e))?;

    if let Some(expected) = expected {
        if downloaded != expected {
            return Err(SyncError::DownloadFailed {
                message: format!("truncated body: got {downloaded} of {expected} bytes"),
            });
        }
    }

    Ok(downloaded)
}

/// Hidden sibling the payload is streamed into.
fn part_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    dest.with_file_name(format!(".{name}.part"))
}

/// Format bytes as human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 3] = ["KB", "MB", "GB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
