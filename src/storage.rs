use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use std::path::Path;
use tokio_util::codec::{BytesCodec, FramedRead};
use tracing::info;
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::error::{PipelineError, PipelineResult};

/// Object key for a job's delivery file. The timestamp keeps retries of the
/// same manifest from colliding.
pub fn object_key(job_id: Uuid, at: DateTime<Utc>) -> String {
    format!("videos/{}-{}.mp4", job_id, at.format("%Y%m%d%H%M%S"))
}

#[async_trait(?Send)]
pub trait Publisher {
    /// Uploads `path` under `key` and returns its public URL.
    async fn publish(&self, path: &Path, key: &str) -> PipelineResult<String>;
}

/// PUTs files to an HTTP object store (S3/R2 presigned-style endpoints,
/// or any bucket that accepts bearer-authenticated PUTs).
pub struct HttpPublisher {
    client: reqwest::Client,
    config: StorageConfig,
}

impl HttpPublisher {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.config.public_url, key)
    }
}

#[async_trait(?Send)]
impl Publisher for HttpPublisher {
    async fn publish(&self, path: &Path, key: &str) -> PipelineResult<String> {
        let file = tokio::fs::File::open(path).await?;
        let length = file.metadata().await?.len();
        let stream = FramedRead::new(file, BytesCodec::new()).map_ok(|chunk| chunk.freeze());

        let url = format!("{}/{}", self.config.upload_url, key);
        let mut request = self
            .client
            .put(&url)
            .header(reqwest::header::CONTENT_TYPE, "video/mp4")
            .header(reqwest::header::CONTENT_LENGTH, length)
            .body(reqwest::Body::wrap_stream(stream));

        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }

        request
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| PipelineError::PublishFailed(err.to_string()))?;

        info!("uploaded {} ({} bytes) to {}", path.display(), length, url);

        Ok(self.public_url(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer, token: Option<&str>) -> StorageConfig {
        StorageConfig {
            upload_url: format!("{}/bucket", server.uri()),
            public_url: "https://cdn.example.com".to_owned(),
            token: token.map(str::to_owned),
        }
    }

    #[test]
    fn key_embeds_job_and_timestamp() {
        let id = Uuid::nil();
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(
            object_key(id, at),
            "videos/00000000-0000-0000-0000-000000000000-20260304050607.mp4"
        );
    }

    #[actix_web::test]
    async fn uploads_file_and_returns_public_url() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/bucket/videos/a.mp4"))
            .and(header("authorization", "Bearer secret"))
            .and(header("content-type", "video/mp4"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("final.mp4");
        tokio::fs::write(&file, b"not really an mp4").await.unwrap();

        let publisher = HttpPublisher::new(config(&server, Some("secret")));
        let url = publisher.publish(&file, "videos/a.mp4").await.unwrap();
        assert_eq!(url, "https://cdn.example.com/videos/a.mp4");

        let received = server.received_requests().await.unwrap();
        assert_eq!(received[0].body, b"not really an mp4");
    }

    #[actix_web::test]
    async fn rejected_upload_is_publish_failure() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("final.mp4");
        tokio::fs::write(&file, b"x").await.unwrap();

        let publisher = HttpPublisher::new(config(&server, None));
        let result = publisher.publish(&file, "videos/b.mp4").await;
        assert!(matches!(result, Err(PipelineError::PublishFailed(_))));
    }
}
