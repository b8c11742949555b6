use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

/// Narrative slot a clip fills in the finished ad. Declaration order is the
/// concatenation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoRole {
    Hook,
    Story,
    ProductDemo,
    Cta,
}

impl VideoRole {
    pub const ALL: [VideoRole; 4] = [
        VideoRole::Hook,
        VideoRole::Story,
        VideoRole::ProductDemo,
        VideoRole::Cta,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VideoRole::Hook => "hook",
            VideoRole::Story => "story",
            VideoRole::ProductDemo => "product_demo",
            VideoRole::Cta => "cta",
        }
    }
}

impl std::fmt::Display for VideoRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoundEffect {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
    pub timing_seconds: f64,
    pub volume: f64,
}

/// Everything needed to build one video. Never mutated once resolved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetManifest {
    #[serde(default)]
    pub job_reference_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub hook: Option<String>,
    #[serde(default)]
    pub story: Option<String>,
    #[serde(default)]
    pub product_demo: Option<String>,
    #[serde(default)]
    pub cta: Option<String>,
    #[serde(default)]
    pub voiceover: Option<String>,
    #[serde(default)]
    pub background_music: Option<String>,
    #[serde(default)]
    pub sound_effects: Vec<SoundEffect>,
    // Carried through untouched; rendering always uses the static template.
    #[serde(default)]
    pub caption_style: Option<String>,
    #[serde(default)]
    pub transition_style: Option<String>,
}

impl AssetManifest {
    pub fn video_url(&self, role: VideoRole) -> Option<&str> {
        let url = match role {
            VideoRole::Hook => &self.hook,
            VideoRole::Story => &self.story,
            VideoRole::ProductDemo => &self.product_demo,
            VideoRole::Cta => &self.cta,
        };
        url.as_deref().filter(|url| !url.trim().is_empty())
    }

    /// Present video sources in concatenation order, regardless of how the
    /// manifest was written.
    pub fn video_sources(&self) -> Vec<(VideoRole, &str)> {
        VideoRole::ALL
            .iter()
            .filter_map(|role| self.video_url(*role).map(|url| (*role, url)))
            .collect()
    }

    pub fn voiceover_url(&self) -> Option<&str> {
        self.voiceover.as_deref().filter(|url| !url.trim().is_empty())
    }

    pub fn background_music_url(&self) -> Option<&str> {
        self.background_music
            .as_deref()
            .filter(|url| !url.trim().is_empty())
    }

    pub fn has_any_asset(&self) -> bool {
        !self.video_sources().is_empty()
            || self.voiceover_url().is_some()
            || self.background_music_url().is_some()
            || !self.sound_effects.is_empty()
    }

    pub fn validate(&self) -> Result<(), String> {
        for effect in &self.sound_effects {
            if effect.url.trim().is_empty() {
                return Err(format!("sound effect {} has no url", effect.id));
            }
            if !effect.timing_seconds.is_finite() || effect.timing_seconds < 0.0 {
                return Err(format!(
                    "sound effect {} has invalid timing {}",
                    effect.id, effect.timing_seconds
                ));
            }
            if !(0.0..=1.0).contains(&effect.volume) {
                return Err(format!(
                    "sound effect {} has volume {} outside 0..=1",
                    effect.id, effect.volume
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalSoundEffect {
    pub local_path: PathBuf,
    pub timing_seconds: f64,
    pub volume: f64,
    pub name: Option<String>,
}

/// Local copies of the manifest's assets, filled in once by the fetch stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DownloadedAssetSet {
    pub videos: BTreeMap<VideoRole, PathBuf>,
    pub voiceover: Option<PathBuf>,
    pub background_music: Option<PathBuf>,
    pub sound_effects: Vec<LocalSoundEffect>,
}

impl DownloadedAssetSet {
    pub fn has_audio(&self) -> bool {
        self.voiceover.is_some() || self.background_music.is_some() || !self.sound_effects.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Downloading,
    Processing,
    Encoding,
    Uploading,
    Complete,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Downloading => "downloading",
            JobStatus::Processing => "processing",
            JobStatus::Encoding => "encoding",
            JobStatus::Uploading => "uploading",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted record the polling client reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoEditingJob {
    pub id: Uuid,
    pub manifest_reference_id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub current_step: Option<String>,
    pub final_video_url: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl VideoEditingJob {
    pub fn new(manifest_reference_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            manifest_reference_id: manifest_reference_id.into(),
            status: JobStatus::Queued,
            progress: 0,
            current_step: Some("Queued".to_owned()),
            final_video_url: None,
            error_message: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
