use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

use crate::models::VideoRole;

pub enum ScratchFile<'a> {
    /// Downloaded asset, named by what it is (`hook`, `voiceover`, `sfx_0`...).
    Source { stem: &'a str, extension: &'a str },
    Normalized(VideoRole),
    ConcatList,
    Combined,
    Mixed,
    Captioned,
    Effects,
    Final,
}

impl ScratchFile<'_> {
    pub fn file_name(&self) -> String {
        match self {
            ScratchFile::Source { stem, extension } => format!("source_{stem}.{extension}"),
            ScratchFile::Normalized(role) => format!("normalized_{role}.mp4"),
            ScratchFile::ConcatList => "concat.txt".to_owned(),
            ScratchFile::Combined => "combined.mp4".to_owned(),
            ScratchFile::Mixed => "mixed.mp4".to_owned(),
            ScratchFile::Captioned => "captioned.mp4".to_owned(),
            ScratchFile::Effects => "effects.mp4".to_owned(),
            ScratchFile::Final => "final.mp4".to_owned(),
        }
    }
}

/// A job's private working directory, `<root>/<job id>`. Call `cleanup` on
/// every exit path; dropping without it still removes the directory.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
    removed: bool,
}

impl ScratchDir {
    pub async fn create(root: &Path, job_id: Uuid) -> std::io::Result<Self> {
        let path = std::path::absolute(root.join(job_id.to_string()))?;
        if tokio::fs::try_exists(&path).await? {
            tokio::fs::remove_dir_all(&path).await?;
        }
        tokio::fs::create_dir_all(&path).await?;
        Ok(Self {
            path,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&self, file: ScratchFile<'_>) -> PathBuf {
        self.path.join(file.file_name())
    }

    pub async fn cleanup(mut self) -> std::io::Result<()> {
        self.removed = true;
        match tokio::fs::remove_dir_all(&self.path).await {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Err(err) = std::fs::remove_dir_all(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!("could not remove scratch dir {}: {}", self.path.display(), err);
            }
        }
    }
}
