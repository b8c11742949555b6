/// Where a caption sits on one axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Position {
    Pixels(i32),
    /// Centered using the rendered text size at draw time.
    Centered,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextOverlay {
    pub text: &'static str,
    /// Font file for this caption; `None` uses the configured caption font.
    pub font: Option<&'static str>,
    pub font_size: u32,
    pub color: &'static str,
    pub background: Option<&'static str>,
    pub x: Position,
    pub y: Position,
    /// Visible for `start <= t < end`, in seconds.
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectKind {
    /// Luma-preserving desaturation.
    Grayscale,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimedEffect {
    pub kind: EffectKind,
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MixSettings {
    pub voiceover_volume: f64,
    pub music_volume: f64,
    pub music_fade_in: f64,
    pub music_fade_out_start: f64,
    pub music_fade_out: f64,
    pub sample_rate: u32,
    pub audio_bitrate: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncodeSettings {
    pub preset: &'static str,
    pub crf: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub overlays: &'static [TextOverlay],
    pub effects: &'static [TimedEffect],
    pub mix: MixSettings,
    /// Used for every pass except the delivery encode.
    pub intermediate: EncodeSettings,
    pub delivery: EncodeSettings,
}

pub static TEMPLATE: Template = Template {
    width: 1080,
    height: 1920,
    fps: 30,
    overlays: &[
        TextOverlay {
            text: "Sound familiar?",
            font: None,
            font_size: 72,
            color: "white",
            background: Some("black@0.55"),
            x: Position::Centered,
            y: Position::Pixels(320),
            start: 0.5,
            end: 3.0,
        },
        TextOverlay {
            text: "There's a better way",
            font: None,
            font_size: 64,
            color: "white",
            background: Some("black@0.55"),
            x: Position::Centered,
            y: Position::Pixels(320),
            start: 6.0,
            end: 9.0,
        },
        TextOverlay {
            text: "Tap \"Shop Now\" today!",
            font: None,
            font_size: 68,
            color: "yellow",
            background: Some("black@0.6"),
            x: Position::Centered,
            y: Position::Pixels(1560),
            start: 60.0,
            end: 70.0,
        },
    ],
    effects: &[TimedEffect {
        kind: EffectKind::Grayscale,
        start: 3.0,
        end: 6.0,
    }],
    mix: MixSettings {
        voiceover_volume: 1.0,
        music_volume: 0.28,
        music_fade_in: 2.0,
        music_fade_out_start: 67.0,
        music_fade_out: 3.0,
        sample_rate: 44100,
        audio_bitrate: "192k",
    },
    intermediate: EncodeSettings {
        preset: "veryfast",
        crf: 20,
    },
    delivery: EncodeSettings {
        preset: "slow",
        crf: 18,
    },
};
