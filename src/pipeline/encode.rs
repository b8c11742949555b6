use async_trait::async_trait;

use super::{AssemblyState, Stage, StageContext};
use crate::command::FfmpegCommand;
use crate::error::PipelineResult;
use crate::models::JobStatus;
use crate::scratch::ScratchFile;

/// Delivery encode: H.264 high@4.1, yuv420p, AAC, moov atom up front.
pub struct EncodeStage;

#[async_trait(?Send)]
impl Stage for EncodeStage {
    fn name(&self) -> &'static str {
        "encode"
    }

    async fn run(&self, ctx: &StageContext<'_>, mut state: AssemblyState) -> PipelineResult<AssemblyState> {
        ctx.tracker
            .advance(JobStatus::Encoding, 85, "Encoding final video");

        let delivery = &ctx.template.delivery;
        let output = ctx.scratch.file(ScratchFile::Final);
        let command = FfmpegCommand::new(&output)
            .input(state.current_video()?)
            .video_codec("libx264")
            .preset(delivery.preset)
            .crf(delivery.crf)
            .args(["-profile:v", "high", "-level:v", "4.1", "-pix_fmt", "yuv420p"])
            .audio_codec("aac")
            .audio_bitrate(ctx.template.mix.audio_bitrate)
            .args(["-movflags", "+faststart"]);

        ctx.media.run(&command, "final encode", ctx.cancel).await?;
        state.video = Some(output);

        Ok(state)
    }
}
