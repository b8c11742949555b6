use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

use crate::models::AssetManifest;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("manifest {0} was not found")]
    NotFound(String),

    #[error("manifest {0} is not locked yet")]
    NotLocked(String),

    #[error("manifest {id} is invalid: {reason}")]
    Invalid { id: String, reason: String },
}

/// Turns an upstream reference id into a finished asset manifest.
#[async_trait]
pub trait ManifestResolver: Send + Sync {
    async fn resolve(&self, reference_id: &str) -> Result<AssetManifest, ResolveError>;
}

#[derive(Deserialize)]
struct ManifestRecord {
    #[serde(default)]
    locked: bool,
    #[serde(flatten)]
    manifest: AssetManifest,
}

/// Reads `<dir>/<reference id>.json`, as exported by the creative workflow.
pub struct FileManifestResolver {
    dir: PathBuf,
}

impl FileManifestResolver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[async_trait]
impl ManifestResolver for FileManifestResolver {
    async fn resolve(&self, reference_id: &str) -> Result<AssetManifest, ResolveError> {
        if !is_safe_id(reference_id) {
            return Err(ResolveError::NotFound(reference_id.to_owned()));
        }

        let path = self.dir.join(format!("{reference_id}.json"));
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|_| ResolveError::NotFound(reference_id.to_owned()))?;

        let record: ManifestRecord = serde_json::from_slice(&bytes).map_err(|err| ResolveError::Invalid {
            id: reference_id.to_owned(),
            reason: err.to_string(),
        })?;

        if !record.locked {
            return Err(ResolveError::NotLocked(reference_id.to_owned()));
        }

        let mut manifest = record.manifest;
        if manifest.job_reference_id.is_empty() {
            manifest.job_reference_id = reference_id.to_owned();
        }

        manifest.validate().map_err(|reason| ResolveError::Invalid {
            id: reference_id.to_owned(),
            reason,
        })?;

        Ok(manifest)
    }
}
