use async_trait::async_trait;

use super::{AssemblyState, Stage, StageContext};
use crate::command::FfmpegCommand;
use crate::error::{PipelineError, PipelineResult};
use crate::filters::concat_list;
use crate::models::JobStatus;
use crate::scratch::ScratchFile;

/// Stream-copies the normalized clips into one silent track.
pub struct AssembleStage;

#[async_trait(?Send)]
impl Stage for AssembleStage {
    fn name(&self) -> &'static str {
        "assemble"
    }

    async fn run(&self, ctx: &StageContext<'_>, mut state: AssemblyState) -> PipelineResult<AssemblyState> {
        if state.normalized.is_empty() {
            return Err(PipelineError::NoVideoSource);
        }

        ctx.tracker.advance(
            JobStatus::Processing,
            55,
            format!("Joining {} clips", state.normalized.len()),
        );

        // Role order, whatever order the clips were produced in.
        state.normalized.sort_by_key(|(role, _)| *role);
        let paths: Vec<_> = state.normalized.iter().map(|(_, path)| path).collect();

        let list = ctx.scratch.file(ScratchFile::ConcatList);
        tokio::fs::write(&list, concat_list(&paths)).await?;

        let output = ctx.scratch.file(ScratchFile::Combined);
        let command = FfmpegCommand::new(&output)
            .input_with(["-f", "concat", "-safe", "0"], &list)
            .args(["-c", "copy", "-an"]);

        ctx.media.run(&command, "concatenate clips", ctx.cancel).await?;
        state.video = Some(output);

        Ok(state)
    }
}
