use async_trait::async_trait;
use tracing::info;

use super::{intermediate_video, AssemblyState, Stage, StageContext};
use crate::command::FfmpegCommand;
use crate::error::PipelineResult;
use crate::filters::{audio_mix_graph, MixSource};
use crate::models::JobStatus;
use crate::scratch::ScratchFile;

/// Holds shorter than this are not worth a re-encode.
const MIN_HOLD_SECONDS: f64 = 0.05;

/// Lays voiceover, music and timed sound effects under the joined video.
/// With no audio at all the video passes through untouched.
pub struct MixStage;

impl MixStage {
    /// How long the mix runs: the length of the first present source.
    async fn mix_length(ctx: &StageContext<'_>, state: &AssemblyState) -> PipelineResult<f64> {
        let assets = &state.assets;

        if let Some(voiceover) = &assets.voiceover {
            return ctx.media.probe_duration(voiceover, ctx.cancel).await;
        }
        if let Some(music) = &assets.background_music {
            return ctx.media.probe_duration(music, ctx.cancel).await;
        }
        match assets.sound_effects.first() {
            Some(effect) => {
                let length = ctx.media.probe_duration(&effect.local_path, ctx.cancel).await?;
                Ok(effect.timing_seconds + length)
            }
            None => Ok(0.0),
        }
    }
}

#[async_trait(?Send)]
impl Stage for MixStage {
    fn name(&self) -> &'static str {
        "mix"
    }

    async fn run(&self, ctx: &StageContext<'_>, mut state: AssemblyState) -> PipelineResult<AssemblyState> {
        if !state.assets.has_audio() {
            ctx.tracker
                .advance(JobStatus::Processing, 60, "No audio sources, keeping silent track");
            return Ok(state);
        }

        ctx.tracker.advance(JobStatus::Processing, 60, "Mixing audio");

        let video = state.current_video()?.to_path_buf();
        let video_length = ctx.media.probe_duration(&video, ctx.cancel).await?;
        let audio_length = Self::mix_length(ctx, &state).await?;
        let hold = match audio_length - video_length {
            extra if extra > MIN_HOLD_SECONDS => extra,
            _ => 0.0,
        };

        let assets = &state.assets;
        let mut sources = Vec::new();
        let mut command = FfmpegCommand::new(ctx.scratch.file(ScratchFile::Mixed)).input(&video);

        if let Some(voiceover) = &assets.voiceover {
            sources.push(MixSource::Voiceover);
            command = command.input(voiceover);
        }
        if let Some(music) = &assets.background_music {
            sources.push(MixSource::Music);
            command = command.input(music);
        }
        for effect in &assets.sound_effects {
            sources.push(MixSource::Effect {
                timing_seconds: effect.timing_seconds,
                volume: effect.volume,
            });
            command = command.input(&effect.local_path);
        }

        let Some(graph) = audio_mix_graph(&sources, &ctx.template.mix, hold) else {
            return Ok(state);
        };

        info!(
            job_id = %ctx.tracker.job_id(),
            video_length, audio_length, hold, "mixing {} audio sources", sources.len()
        );

        command = command.filter_complex(graph.filter);
        command = match &graph.video_label {
            Some(label) => intermediate_video(command.map(label.as_str()), ctx.template),
            None => command.map("0:v").video_codec("copy"),
        };
        let command = command
            .map(graph.audio_label.as_str())
            .audio_codec("aac")
            .audio_bitrate(ctx.template.mix.audio_bitrate);

        ctx.media.run(&command, "mix audio", ctx.cancel).await?;
        state.video = Some(command.output().to_path_buf());

        Ok(state)
    }
}
