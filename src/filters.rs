//! ffmpeg filter strings for each render pass.
//!
//! Everything here is pure string building so the exact graphs can be
//! checked without running ffmpeg.

use std::path::Path;

use crate::template::{EffectKind, MixSettings, Position, Template, TextOverlay, TimedEffect};

/// Formats seconds without trailing zeros (`3`, `0.5`, `2.25`).
pub fn seconds(value: f64) -> String {
    let text = format!("{:.3}", value);
    let text = text.trim_end_matches('0').trim_end_matches('.');
    if text.is_empty() || text == "-" {
        "0".to_owned()
    } else {
        text.to_owned()
    }
}

/// Scale-to-fit, black pad to the template frame, constant frame rate and
/// pixel format so the results can be stream-copied together.
pub fn normalize_filter(template: &Template) -> String {
    let (w, h) = (template.width, template.height);
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,\
         pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:color=black,\
         setsar=1,fps={fps},format=yuv420p",
        fps = template.fps
    )
}

/// Concat demuxer list: one `file '<path>'` line per clip, forward slashes.
pub fn concat_list<P: AsRef<Path>>(paths: &[P]) -> String {
    paths
        .iter()
        .map(|path| {
            let path = path.as_ref().to_string_lossy().replace('\\', "/");
            format!("file '{}'\n", path.replace('\'', "'\\''"))
        })
        .collect()
}

/// One audio input to the mix, in the order it is passed to ffmpeg.
#[derive(Debug, Clone, PartialEq)]
pub enum MixSource {
    Voiceover,
    Music,
    Effect { timing_seconds: f64, volume: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MixGraph {
    pub filter: String,
    pub audio_label: String,
    /// Set when the video needs its last frame held to cover the audio.
    pub video_label: Option<String>,
}

/// Builds the mixing graph. Input 0 is the video; `sources[i]` is input `i + 1`.
/// The mix lasts as long as the first source, so callers order sources
/// voiceover, music, then effects.
pub fn audio_mix_graph(sources: &[MixSource], mix: &MixSettings, hold_video: f64) -> Option<MixGraph> {
    if sources.is_empty() {
        return None;
    }

    let mut chains = Vec::new();

    let video_label = if hold_video > 0.0 {
        chains.push(format!(
            "[0:v]tpad=stop_mode=clone:stop_duration={}[vout]",
            seconds(hold_video)
        ));
        Some("[vout]".to_owned())
    } else {
        None
    };

    for (i, source) in sources.iter().enumerate() {
        let shaping = match source {
            MixSource::Voiceover => format!("volume={}", seconds(mix.voiceover_volume)),
            MixSource::Music => format!(
                "volume={},afade=t=in:st=0:d={},afade=t=out:st={}:d={}",
                seconds(mix.music_volume),
                seconds(mix.music_fade_in),
                seconds(mix.music_fade_out_start),
                seconds(mix.music_fade_out)
            ),
            MixSource::Effect {
                timing_seconds,
                volume,
            } => {
                let delay_ms = (timing_seconds * 1000.0).round() as u64;
                format!("adelay={delay_ms}|{delay_ms},volume={}", seconds(*volume))
            }
        };
        chains.push(format!(
            "[{input}:a]aresample={rate},aformat=channel_layouts=stereo,{shaping}[a{i}]",
            input = i + 1,
            rate = mix.sample_rate
        ));
    }

    let audio_label = if sources.len() == 1 {
        "[a0]".to_owned()
    } else {
        let labels: String = (0..sources.len()).map(|i| format!("[a{i}]")).collect();
        chains.push(format!(
            "{labels}amix=inputs={}:duration=first:dropout_transition=2:normalize=0[aout]",
            sources.len()
        ));
        "[aout]".to_owned()
    };

    Some(MixGraph {
        filter: chains.join(";"),
        audio_label,
        video_label,
    })
}

/// Escapes a value for an unquoted drawtext option inside a filtergraph.
/// Two parsing levels apply: the filtergraph (`\ ' , ; [ ]`) and the option
/// string (`\ ' :`).
pub fn escape_filter_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len() * 2);
    for c in value.chars() {
        match c {
            '\\' => out.push_str(r"\\\\"),
            '\'' => out.push_str(r"\\\'"),
            ':' => out.push_str(r"\\:"),
            ',' | ';' | '[' | ']' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

fn window(start: f64, end: f64) -> String {
    format!("gte(t,{})*lt(t,{})", seconds(start), seconds(end))
}

fn position(axis: Position, centered: &str) -> String {
    match axis {
        Position::Pixels(px) => px.to_string(),
        Position::Centered => centered.to_owned(),
    }
}

/// A single time-gated caption. `font` is `None` when no font file is
/// available and ffmpeg's default font should be used.
pub fn drawtext(overlay: &TextOverlay, font: Option<&Path>) -> String {
    let mut filter = format!(
        "drawtext=expansion=none:text={}",
        escape_filter_value(overlay.text)
    );

    if let Some(font) = font {
        let font = font.to_string_lossy().replace('\\', "/");
        filter.push_str(&format!(":fontfile={}", escape_filter_value(&font)));
    }

    filter.push_str(&format!(
        ":fontsize={}:fontcolor={}",
        overlay.font_size, overlay.color
    ));

    if let Some(background) = overlay.background {
        filter.push_str(&format!(":box=1:boxcolor={background}:boxborderw=24"));
    }

    filter.push_str(&format!(
        ":x={}:y={}:enable='{}'",
        position(overlay.x, "(w-text_w)/2"),
        position(overlay.y, "(h-text_h)/2"),
        window(overlay.start, overlay.end)
    ));

    filter
}

/// Chains every effect, each gated to its own window.
pub fn effects_filter(effects: &[TimedEffect]) -> Option<String> {
    if effects.is_empty() {
        return None;
    }

    let chain: Vec<String> = effects
        .iter()
        .map(|effect| match effect.kind {
            EffectKind::Grayscale => {
                format!("hue=s=0:enable='{}'", window(effect.start, effect.end))
            }
        })
        .collect();

    Some(chain.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::TEMPLATE;

    #[test]
    fn seconds_are_compact() {
        assert_eq!(seconds(3.0), "3");
        assert_eq!(seconds(0.5), "0.5");
        assert_eq!(seconds(0.28), "0.28");
        assert_eq!(seconds(0.0), "0");
        assert_eq!(seconds(2.12345), "2.123");
    }

    #[test]
    fn normalize_targets_vertical_frame() {
        let filter = normalize_filter(&TEMPLATE);
        assert!(filter.starts_with("scale=1080:1920:force_original_aspect_ratio=decrease"));
        assert!(filter.contains("pad=1080:1920:(ow-iw)/2:(oh-ih)/2:color=black"));
        assert!(filter.contains("fps=30"));
        assert!(filter.ends_with("format=yuv420p"));
    }

    #[test]
    fn concat_list_uses_forward_slashes_and_quotes() {
        let list = concat_list(&[r"C:\jobs\a\hook.mp4", "/tmp/it's/cta.mp4"]);
        assert_eq!(
            list,
            "file 'C:/jobs/a/hook.mp4'\nfile '/tmp/it'\\''s/cta.mp4'\n"
        );
    }

    #[test]
    fn music_fades_in_from_silence_to_ceiling() {
        let graph = audio_mix_graph(&[MixSource::Music], &TEMPLATE.mix, 0.0).unwrap();
        assert!(graph
            .filter
            .contains("volume=0.28,afade=t=in:st=0:d=2,afade=t=out:st=67:d=3"));
        assert_eq!(graph.audio_label, "[a0]");
        assert!(graph.video_label.is_none());
        assert!(!graph.filter.contains("amix"));
    }

    #[test]
    fn effects_are_delayed_on_both_channels() {
        let sources = [
            MixSource::Voiceover,
            MixSource::Effect {
                timing_seconds: 10.0,
                volume: 0.6,
            },
        ];
        let graph = audio_mix_graph(&sources, &TEMPLATE.mix, 0.0).unwrap();

        assert!(graph.filter.contains("[1:a]aresample=44100,aformat=channel_layouts=stereo,volume=1[a0]"));
        assert!(graph.filter.contains("[2:a]aresample=44100,aformat=channel_layouts=stereo,adelay=10000|10000,volume=0.6[a1]"));
        assert!(graph
            .filter
            .ends_with("[a0][a1]amix=inputs=2:duration=first:dropout_transition=2:normalize=0[aout]"));
        assert_eq!(graph.audio_label, "[aout]");
    }

    #[test]
    fn holds_video_when_audio_is_longer() {
        let graph = audio_mix_graph(&[MixSource::Voiceover], &TEMPLATE.mix, 3.0).unwrap();
        assert!(graph
            .filter
            .starts_with("[0:v]tpad=stop_mode=clone:stop_duration=3[vout];"));
        assert_eq!(graph.video_label.as_deref(), Some("[vout]"));
    }

    #[test]
    fn no_sources_means_no_graph() {
        assert!(audio_mix_graph(&[], &TEMPLATE.mix, 5.0).is_none());
    }

    #[test]
    fn escapes_special_characters() {
        assert_eq!(escape_filter_value("Tap: now"), r"Tap\\: now");
        assert_eq!(escape_filter_value("it's"), r"it\\\'s");
        assert_eq!(escape_filter_value(r"a\b"), r"a\\\\b");
        assert_eq!(escape_filter_value("a,b;[c]"), r"a\,b\;\[c\]");
        assert_eq!(escape_filter_value("\"quoted\""), "\"quoted\"");
    }

    #[test]
    fn drawtext_is_time_gated_and_centered() {
        let overlay = &TEMPLATE.overlays[0];
        let filter = drawtext(overlay, Some(Path::new("/fonts/Bold.ttf")));
        assert!(filter.starts_with("drawtext=expansion=none:text=Sound familiar?"));
        assert!(filter.contains(":fontfile=/fonts/Bold.ttf"));
        assert!(filter.contains(":box=1:boxcolor=black@0.55"));
        assert!(filter.contains(":x=(w-text_w)/2:y=320"));
        assert!(filter.ends_with(":enable='gte(t,0.5)*lt(t,3)'"));
    }

    #[test]
    fn drawtext_without_font_uses_default() {
        let filter = drawtext(&TEMPLATE.overlays[1], None);
        assert!(!filter.contains("fontfile"));
    }

    #[test]
    fn grayscale_window_only() {
        let filter = effects_filter(TEMPLATE.effects).unwrap();
        assert_eq!(filter, "hue=s=0:enable='gte(t,3)*lt(t,6)'");
        assert!(effects_filter(&[]).is_none());
    }

    #[test]
    fn every_effect_gets_its_own_window() {
        let effects = [
            TimedEffect {
                kind: EffectKind::Grayscale,
                start: 1.0,
                end: 2.0,
            },
            TimedEffect {
                kind: EffectKind::Grayscale,
                start: 8.0,
                end: 9.5,
            },
        ];
        assert_eq!(
            effects_filter(&effects).unwrap(),
            "hue=s=0:enable='gte(t,1)*lt(t,2)',hue=s=0:enable='gte(t,8)*lt(t,9.5)'"
        );
    }
}
