use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::warn;

use super::{intermediate_video, AssemblyState, Stage, StageContext};
use crate::command::FfmpegCommand;
use crate::error::PipelineResult;
use crate::filters::drawtext;
use crate::models::JobStatus;
use crate::scratch::ScratchFile;

/// Burns the template captions into the video.
pub struct OverlayStage;

async fn usable_font(candidate: &Path) -> Option<PathBuf> {
    match tokio::fs::try_exists(candidate).await {
        Ok(true) => Some(candidate.to_path_buf()),
        _ => {
            warn!("caption font {} not found, using default font", candidate.display());
            None
        }
    }
}

#[async_trait(?Send)]
impl Stage for OverlayStage {
    fn name(&self) -> &'static str {
        "overlay"
    }

    async fn run(&self, ctx: &StageContext<'_>, mut state: AssemblyState) -> PipelineResult<AssemblyState> {
        let overlays = ctx.template.overlays;
        if overlays.is_empty() {
            return Ok(state);
        }

        ctx.tracker.advance(
            JobStatus::Processing,
            70,
            format!("Adding {} captions", overlays.len()),
        );

        let mut filters = Vec::with_capacity(overlays.len());
        for overlay in overlays {
            let candidate = overlay.font.map(Path::new).unwrap_or(ctx.caption_font);
            let font = usable_font(candidate).await;
            filters.push(drawtext(overlay, font.as_deref()));
        }

        let output = ctx.scratch.file(ScratchFile::Captioned);
        let command = intermediate_video(
            FfmpegCommand::new(&output)
                .input(state.current_video()?)
                .video_filter(filters.join(",")),
            ctx.template,
        )
        .audio_codec("copy");

        ctx.media.run(&command, "render captions", ctx.cancel).await?;
        state.video = Some(output);

        Ok(state)
    }
}
