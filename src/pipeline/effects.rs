use async_trait::async_trait;

use super::{intermediate_video, AssemblyState, Stage, StageContext};
use crate::command::FfmpegCommand;
use crate::error::PipelineResult;
use crate::filters::effects_filter;
use crate::models::JobStatus;
use crate::scratch::ScratchFile;

/// Applies each template effect over its own time window.
pub struct EffectsStage;

#[async_trait(?Send)]
impl Stage for EffectsStage {
    fn name(&self) -> &'static str {
        "effects"
    }

    async fn run(&self, ctx: &StageContext<'_>, mut state: AssemblyState) -> PipelineResult<AssemblyState> {
        let Some(filter) = effects_filter(ctx.template.effects) else {
            return Ok(state);
        };

        ctx.tracker.advance(JobStatus::Processing, 80, "Applying effects");

        let output = ctx.scratch.file(ScratchFile::Effects);
        let command = intermediate_video(
            FfmpegCommand::new(&output)
                .input(state.current_video()?)
                .video_filter(filter),
            ctx.template,
        )
        .audio_codec("copy");

        ctx.media.run(&command, "apply effects", ctx.cancel).await?;
        state.video = Some(output);

        Ok(state)
    }
}
