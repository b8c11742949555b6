//! The assembly pipeline: an ordered list of stages, each taking the
//! working state and handing back an updated one.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::command::{FfmpegCommand, MediaRunner};
use crate::error::{PipelineError, PipelineResult};
use crate::fetch::AssetFetcher;
use crate::models::{AssetManifest, DownloadedAssetSet, VideoRole};
use crate::scratch::ScratchDir;
use crate::storage::Publisher;
use crate::template::Template;
use crate::tracker::JobTracker;

mod assemble;
mod download;
mod effects;
mod encode;
mod mix;
mod normalize;
mod overlay;
mod publish;

pub use assemble::AssembleStage;
pub use download::DownloadStage;
pub use effects::EffectsStage;
pub use encode::EncodeStage;
pub use mix::MixStage;
pub use normalize::NormalizeStage;
pub use overlay::OverlayStage;
pub use publish::PublishStage;

/// Everything a stage may use besides the state itself.
pub struct StageContext<'a> {
    pub tracker: &'a JobTracker,
    pub scratch: &'a ScratchDir,
    pub media: &'a dyn MediaRunner,
    pub fetcher: &'a AssetFetcher,
    pub publisher: &'a dyn Publisher,
    pub template: &'a Template,
    pub caption_font: &'a Path,
    pub cancel: &'a CancellationToken,
}

/// Working state threaded through the stages.
#[derive(Debug, Clone)]
pub struct AssemblyState {
    pub manifest: AssetManifest,
    pub assets: DownloadedAssetSet,
    pub normalized: Vec<(VideoRole, PathBuf)>,
    /// Latest composed video file.
    pub video: Option<PathBuf>,
    pub published_url: Option<String>,
}

impl AssemblyState {
    pub fn new(manifest: AssetManifest) -> Self {
        Self {
            manifest,
            assets: DownloadedAssetSet::default(),
            normalized: Vec::new(),
            video: None,
            published_url: None,
        }
    }

    pub fn current_video(&self) -> PipelineResult<&Path> {
        self.video.as_deref().ok_or(PipelineError::NoVideoSource)
    }
}

#[async_trait(?Send)]
pub trait Stage {
    fn name(&self) -> &'static str;

    async fn run(&self, ctx: &StageContext<'_>, state: AssemblyState) -> PipelineResult<AssemblyState>;
}

pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self { stages }
    }

    /// Download, normalize, concatenate, mix, caption, effects, encode, upload.
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(DownloadStage),
            Box::new(NormalizeStage),
            Box::new(AssembleStage),
            Box::new(MixStage),
            Box::new(OverlayStage),
            Box::new(EffectsStage),
            Box::new(EncodeStage),
            Box::new(PublishStage),
        ])
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// Runs every stage in order, stopping at the first error or once the
    /// job has been cancelled.
    pub async fn run(&self, ctx: &StageContext<'_>, mut state: AssemblyState) -> PipelineResult<AssemblyState> {
        let job_id = ctx.tracker.job_id();

        for stage in &self.stages {
            if ctx.cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            info!(job_id = %job_id, stage = stage.name(), "stage started");
            state = stage.run(ctx, state).await?;
            info!(job_id = %job_id, stage = stage.name(), "stage finished");
        }

        Ok(state)
    }
}

/// Fast x264 settings for passes that get re-encoded later.
pub(crate) fn intermediate_video(command: FfmpegCommand, template: &Template) -> FfmpegCommand {
    command
        .video_codec("libx264")
        .preset(template.intermediate.preset)
        .crf(template.intermediate.crf)
        .arg("-pix_fmt")
        .arg("yuv420p")
}
