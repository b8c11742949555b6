use async_trait::async_trait;

use super::{intermediate_video, AssemblyState, Stage, StageContext};
use crate::command::FfmpegCommand;
use crate::error::PipelineResult;
use crate::filters::normalize_filter;
use crate::models::JobStatus;
use crate::scratch::ScratchFile;

/// Re-encodes each clip to the template frame, frame rate and pixel format,
/// dropping its audio, one role at a time in concatenation order.
pub struct NormalizeStage;

#[async_trait(?Send)]
impl Stage for NormalizeStage {
    fn name(&self) -> &'static str {
        "normalize"
    }

    async fn run(&self, ctx: &StageContext<'_>, mut state: AssemblyState) -> PipelineResult<AssemblyState> {
        let filter = normalize_filter(ctx.template);
        let total = state.assets.videos.len();

        for (i, (role, source)) in state.assets.videos.iter().enumerate() {
            ctx.tracker.advance(
                JobStatus::Processing,
                30 + (20 * i / total.max(1)) as u8,
                format!("Normalizing {role} clip ({} of {total})", i + 1),
            );

            let output = ctx.scratch.file(ScratchFile::Normalized(*role));
            let command = intermediate_video(
                FfmpegCommand::new(&output).input(source).video_filter(filter.as_str()),
                ctx.template,
            )
            .arg("-an");

            ctx.media
                .run(&command, &format!("normalize {role}"), ctx.cancel)
                .await?;
            state.normalized.push((*role, output));
        }

        Ok(state)
    }
}
