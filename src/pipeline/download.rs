use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{AssemblyState, Stage, StageContext};
use crate::error::{PipelineError, PipelineResult};
use crate::fetch::source_extension;
use crate::models::{JobStatus, LocalSoundEffect, VideoRole};
use crate::scratch::ScratchFile;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Slot {
    Video(VideoRole),
    Voiceover,
    Music,
    Effect(usize),
}

struct Download {
    asset: String,
    url: String,
    destination: PathBuf,
    slot: Slot,
}

fn progress(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 25;
    }
    5 + (20 * done / total) as u8
}

/// Pulls every referenced asset into the scratch directory at once. Any
/// single failure fails the job.
pub struct DownloadStage;

impl DownloadStage {
    fn plan(ctx: &StageContext<'_>, state: &AssemblyState) -> Vec<Download> {
        let manifest = &state.manifest;
        let mut downloads = Vec::new();
        let mut push = |stem: String, url: &str, fallback: &str, slot: Slot| {
            let destination = ctx.scratch.file(ScratchFile::Source {
                stem: &stem,
                extension: source_extension(url, fallback),
            });
            downloads.push(Download {
                asset: stem,
                url: url.to_owned(),
                destination,
                slot,
            });
        };

        for (role, url) in manifest.video_sources() {
            push(role.as_str().to_owned(), url, "mp4", Slot::Video(role));
        }
        if let Some(url) = manifest.voiceover_url() {
            push("voiceover".to_owned(), url, "mp3", Slot::Voiceover);
        }
        if let Some(url) = manifest.background_music_url() {
            push("background_music".to_owned(), url, "mp3", Slot::Music);
        }
        for (i, effect) in manifest.sound_effects.iter().enumerate() {
            push(format!("sfx_{i}"), &effect.url, "mp3", Slot::Effect(i));
        }

        downloads
    }
}

#[async_trait(?Send)]
impl Stage for DownloadStage {
    fn name(&self) -> &'static str {
        "download"
    }

    async fn run(&self, ctx: &StageContext<'_>, mut state: AssemblyState) -> PipelineResult<AssemblyState> {
        if state.manifest.video_sources().is_empty() {
            return Err(PipelineError::NoVideoSource);
        }

        let downloads = Self::plan(ctx, &state);
        let total = downloads.len();
        ctx.tracker.advance(
            JobStatus::Downloading,
            progress(0, total),
            format!("Downloading {total} assets"),
        );

        let completed = AtomicUsize::new(0);
        let fetches = downloads.iter().map(|download| {
            let completed = &completed;
            async move {
                let path = ctx
                    .fetcher
                    .fetch(&download.asset, &download.url, &download.destination, ctx.cancel)
                    .await?;
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                ctx.tracker.advance(
                    JobStatus::Downloading,
                    progress(done, total),
                    format!("Downloaded {done} of {total} assets"),
                );
                Ok::<_, PipelineError>((download.slot, path))
            }
        });

        let fetched = tokio::select! {
            result = futures::future::try_join_all(fetches) => result?,
            _ = ctx.cancel.cancelled() => return Err(PipelineError::Cancelled),
        };

        for (slot, path) in fetched {
            match slot {
                Slot::Video(role) => {
                    state.assets.videos.insert(role, path);
                }
                Slot::Voiceover => state.assets.voiceover = Some(path),
                Slot::Music => state.assets.background_music = Some(path),
                Slot::Effect(i) => {
                    let effect = &state.manifest.sound_effects[i];
                    state.assets.sound_effects.push(LocalSoundEffect {
                        local_path: path,
                        timing_seconds: effect.timing_seconds,
                        volume: effect.volume,
                        name: effect.name.clone(),
                    });
                }
            }
        }

        Ok(state)
    }
}
