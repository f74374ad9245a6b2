//! Raw option shapes as clients send them.
//!
//! Every field is optional here; required fields and defaults are enforced
//! when the raw options are turned into a [`Descriptor`](super::Descriptor).
//! Operations that historically took a nested `overlay`/`options` object also
//! accept the same fields flat on the operation.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::loose::{Flag, OneOrMany, Scalar};

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct TrimOptions {
    pub start_sec: Option<Scalar>,
    /// `-1` runs to the end of the media
    pub end_sec: Option<Scalar>,
    /// Overrides `end_sec` when present
    pub duration: Option<Scalar>,
}

/// Look of a text line
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct TextStyleOptions {
    pub fontsize: Option<Scalar>,
    /// Horizontal position, a number or an expression such as `(w-text_w)/2`
    pub x: Option<Scalar>,
    pub y: Option<Scalar>,
    pub fontfile: Option<String>,
    pub fontcolor: Option<String>,
    /// Draw a box behind the text
    #[serde(alias = "box")]
    pub background: Option<Flag>,
    pub boxcolor: Option<String>,
    pub boxborderw: Option<Scalar>,
    pub fade_in_ms: Option<Scalar>,
    pub fade_out_ms: Option<Scalar>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct TextSegmentOptions {
    pub text: Option<String>,
    pub start_sec: Option<Scalar>,
    pub end_sec: Option<Scalar>,
    #[serde(flatten)]
    pub style: TextStyleOptions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct TextOptions {
    #[serde(alias = "segments")]
    pub segment: Option<OneOrMany<TextSegmentOptions>>,
    /// A single segment given inline
    #[serde(flatten)]
    pub inline: TextSegmentOptions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct TextSequenceOptions {
    pub items: Option<Vec<TextSegmentOptions>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct WordOptions {
    pub word: Option<String>,
    pub start_sec: Option<Scalar>,
    pub end_sec: Option<Scalar>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct KaraokeOptions {
    pub sentence: Option<String>,
    /// Explicit word timings; distributed evenly over the sentence when absent
    #[serde(alias = "word_timings")]
    pub words: Option<Vec<WordOptions>>,
    pub start_sec: Option<Scalar>,
    pub end_sec: Option<Scalar>,
    pub fontsize: Option<Scalar>,
    pub fontcolor: Option<String>,
    pub fontfile: Option<String>,
    pub x: Option<Scalar>,
    pub y: Option<Scalar>,
    pub highlight_fontcolor: Option<String>,
    pub highlight_boxcolor: Option<String>,
    pub highlight_boxborderw: Option<Scalar>,
    /// Vertical position of the highlighted word
    pub highlight_y: Option<Scalar>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SpeedSegmentOptions {
    pub start_sec: Option<Scalar>,
    pub end_sec: Option<Scalar>,
    pub speed: Option<Scalar>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SpeedOptions {
    #[serde(alias = "segments")]
    pub segment: Option<OneOrMany<SpeedSegmentOptions>>,
    /// Whole-clip speed factor
    pub speed: Option<Scalar>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct WatermarkFields {
    pub path: Option<String>,
    /// Named position (`TOP_LEFT` ... `SAFE_BOTTOM`) or an `x:y` expression
    pub position: Option<String>,
    pub opacity: Option<Scalar>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct WatermarkOptions {
    pub overlay: Option<WatermarkFields>,
    #[serde(flatten)]
    pub inline: WatermarkFields,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct AudioFields {
    pub path: Option<String>,
    pub mix_volume: Option<Scalar>,
    #[serde(rename = "loop")]
    pub looped: Option<Flag>,
    /// Replace the source audio instead of mixing with it
    pub mute_source: Option<Flag>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct AudioOptions {
    pub overlay: Option<AudioFields>,
    #[serde(flatten)]
    pub inline: AudioFields,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct BackgroundColorFields {
    pub color: Option<String>,
    /// Show only the color, dropping the source picture
    pub only_color: Option<Flag>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct BackgroundColorOptions {
    pub overlay: Option<BackgroundColorFields>,
    #[serde(flatten)]
    pub inline: BackgroundColorFields,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct EncodeFields {
    #[serde(alias = "video_codec")]
    pub codec: Option<String>,
    pub preset: Option<String>,
    pub crf: Option<Scalar>,
    pub audio_codec: Option<String>,
    pub audio_bitrate: Option<Scalar>,
    pub movflags: Option<String>,
    /// Scale filter size, e.g. `1280:-1`
    pub scale: Option<Scalar>,
    /// Size budget of the output in megabytes
    pub target_size_mb: Option<Scalar>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct EncodeOptions {
    pub options: Option<EncodeFields>,
    #[serde(flatten)]
    pub inline: EncodeFields,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ConcatOptions {
    /// Media appended after the current stream, in order
    #[serde(alias = "input_refs", alias = "paths")]
    pub inputs: Option<Vec<String>>,
    /// Fit every input to the canvas and frame rate first (default `true`)
    pub normalize: Option<Flag>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ExtractAudioOptions {
    /// `mp3`, `aac`, `wav` or `flac`
    pub format: Option<String>,
    pub bitrate: Option<Scalar>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct GifOptions {
    #[serde(alias = "start_sec")]
    pub start_time: Option<Scalar>,
    pub duration: Option<Scalar>,
    pub fps: Option<Scalar>,
    pub scale: Option<Scalar>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct DownloadOptions {
    /// Page to download; the request media is used when absent
    pub url: Option<String>,
    /// `best`, `NNNp` or a raw format selector
    pub quality: Option<String>,
    /// Container extension such as `mp4` or `webm`
    pub format: Option<String>,
    pub audio_only: Option<Flag>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct PlatformOptions {
    #[serde(alias = "platform")]
    pub platform_preset: Option<String>,
}
