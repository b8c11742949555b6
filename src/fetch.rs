use actix_web::HttpMessage;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    /// Wait after the n-th failed attempt is `n * backoff_unit`.
    pub backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_unit: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff_unit.saturating_mul(attempt)
    }
}

/// File extension to store a download under, taken from the URL path when it
/// looks like one.
pub fn source_extension<'a>(url: &'a str, fallback: &'a str) -> &'a str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let file_name = path.rsplit('/').next().unwrap_or(path);

    match file_name.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && (1..=5).contains(&ext.len())
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            ext
        }
        _ => fallback,
    }
}

fn staging_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    destination.with_file_name(name)
}

/// Downloads remote assets into the scratch directory.
pub struct AssetFetcher {
    client: awc::Client,
    policy: RetryPolicy,
}

impl AssetFetcher {
    pub fn new(policy: RetryPolicy) -> Self {
        let client = awc::Client::builder()
            .timeout(Duration::from_secs(120))
            .finish();
        Self { client, policy }
    }

    /// Fetches `url` to `destination`, retrying per the policy. The file only
    /// appears at `destination` once it is complete and non-empty.
    pub async fn fetch(
        &self,
        asset: &str,
        url: &str,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> PipelineResult<PathBuf> {
        let mut reason = String::new();

        for attempt in 1..=self.policy.attempts {
            match self.fetch_once(url, destination).await {
                Ok(bytes) => {
                    info!(asset, url, attempt, "downloaded {} bytes", bytes);
                    return Ok(destination.to_path_buf());
                }
                Err(err) => {
                    warn!(asset, url, attempt, "download failed: {}", err);
                    reason = err;
                }
            }

            if attempt < self.policy.attempts {
                tokio::select! {
                    _ = tokio::time::sleep(self.policy.delay_after(attempt)) => {}
                    _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                }
            }
        }

        Err(PipelineError::AssetDownloadFailed {
            asset: asset.to_owned(),
            url: url.to_owned(),
            attempts: self.policy.attempts,
            reason,
        })
    }

    async fn fetch_once(&self, url: &str, destination: &Path) -> Result<u64, String> {
        let staging = staging_path(destination);

        let written = match self.stream_to_file(url, &staging).await {
            Ok(()) => tokio::fs::metadata(&staging)
                .await
                .map(|meta| meta.len())
                .map_err(|e| e.to_string()),
            Err(err) => Err(err),
        };

        match written {
            Ok(0) => {
                let _ = tokio::fs::remove_file(&staging).await;
                Err("response body was empty".to_owned())
            }
            Ok(bytes) => {
                tokio::fs::rename(&staging, destination)
                    .await
                    .map_err(|e| format!("could not move download into place: {e}"))?;
                Ok(bytes)
            }
            Err(err) => {
                let _ = tokio::fs::remove_file(&staging).await;
                Err(err)
            }
        }
    }

    async fn stream_to_file(&self, url: &str, path: &Path) -> Result<(), String> {
        debug!("GET {}", url);

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("GET request failed: {e}"))?;

        if !response.status().is_success() {
            return Err(format!("server responded {}", response.status()));
        }

        let mut stream = response.take_payload();
        let mut file = tokio::fs::File::create(path)
            .await
            .map_err(|e| e.to_string())?;

        while let Some(item) = stream.next().await {
            let chunk = item.map_err(|e| format!("body read failed: {e}"))?;
            file.write_all(&chunk).await.map_err(|e| e.to_string())?;
        }

        file.flush().await.map_err(|e| e.to_string())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_fetcher() -> AssetFetcher {
        AssetFetcher::new(RetryPolicy {
            attempts: 3,
            backoff_unit: Duration::from_millis(5),
        })
    }

    #[test]
    fn extension_comes_from_url_path() {
        assert_eq!(source_extension("https://cdn/x/hook.MOV?sig=abc", "mp4"), "MOV");
        assert_eq!(source_extension("https://cdn/x/voice.mp3#t=1", "mp3"), "mp3");
        assert_eq!(source_extension("https://cdn/x/download", "mp4"), "mp4");
        assert_eq!(source_extension("https://cdn/x/.hidden", "mp4"), "mp4");
        assert_eq!(source_extension("https://cdn/x/file.some-thing", "wav"), "wav");
    }

    #[test]
    fn backoff_grows_linearly() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
    }

    #[actix_web::test]
    async fn succeeds_on_third_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hook.mp4"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/hook.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"video-bytes".to_vec()))
            .with_priority(2)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("source_hook.mp4");
        let path = fast_fetcher()
            .fetch(
                "hook",
                &format!("{}/hook.mp4", server.uri()),
                &destination,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"video-bytes");
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
        assert!(!staging_path(&destination).exists());
    }

    #[actix_web::test]
    async fn gives_up_after_three_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("source_voiceover.mp3");
        let url = format!("{}/vo.mp3", server.uri());
        let err = fast_fetcher()
            .fetch("voiceover", &url, &destination, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            PipelineError::AssetDownloadFailed {
                asset,
                url: failed_url,
                attempts,
                ..
            } => {
                assert_eq!(asset, "voiceover");
                assert_eq!(failed_url, url);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
        assert!(!destination.exists());
    }

    #[actix_web::test]
    async fn empty_body_is_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("source_music.mp3");
        let result = fast_fetcher()
            .fetch(
                "background_music",
                &format!("{}/music.mp3", server.uri()),
                &destination,
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(result, Err(PipelineError::AssetDownloadFailed { .. })));
        assert!(!destination.exists());
    }
}
