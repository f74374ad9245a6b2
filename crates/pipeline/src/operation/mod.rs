//! Operation catalog and validated descriptors.
//!
//! Raw request entries (`{"op": "...", ...}`) are dispatched on their name to
//! a closed [`OpKind`] and turned into immutable [`Descriptor`] values with
//! every default filled in.

pub mod loose;
pub mod options;
mod validate;

use clipper_common::{Dimensions, TimeSegment};
use schemars::JsonSchema;
use schemars::schema::RootSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr, VariantNames};

use crate::error::CompileError;

pub use validate::parse;

/// Every operation the compiler understands
#[derive(
    Debug, Clone, Copy,
    Serialize, Deserialize, JsonSchema,
    Display, EnumString, EnumIter, VariantNames, IntoStaticStr,
    PartialEq, Eq, Hash
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum OpKind {
    Trim,
    Text,
    TextSequence,
    Karaoke,
    Speed,
    Watermark,
    Audio,
    BackgroundColor,
    Transcode,
    Compress,
    Concat,
    ExtractAudio,
    Gif,
    #[serde(rename = "download_from_youtube")]
    #[strum(to_string = "download_from_youtube")]
    DownloadFromYoutube,
    ConvertToPlatform,
}

/// Whether an operation carries one item or a list of timed segments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Cardinality {
    Single,
    List,
}

/// Stream an operation needs in the current layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StreamRequirement {
    Any,
    Video,
    Audio,
}

impl OpKind {
    pub fn name(&self) -> &'static str {
        self.into()
    }

    pub fn cardinality(&self) -> Cardinality {
        match self {
            OpKind::Text | OpKind::TextSequence | OpKind::Speed | OpKind::Concat => {
                Cardinality::List
            }
            _ => Cardinality::Single,
        }
    }

    /// Terminal operations decide the encode of a pass; a pass holds one
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OpKind::Transcode | OpKind::Compress | OpKind::Gif | OpKind::ExtractAudio
        )
    }

    pub fn requirement(&self) -> StreamRequirement {
        match self {
            OpKind::Text
            | OpKind::TextSequence
            | OpKind::Karaoke
            | OpKind::Watermark
            | OpKind::BackgroundColor
            | OpKind::Gif
            | OpKind::ConvertToPlatform => StreamRequirement::Video,
            OpKind::ExtractAudio => StreamRequirement::Audio,
            _ => StreamRequirement::Any,
        }
    }

    /// JSON schema of the options the operation accepts
    pub fn schema(&self) -> RootSchema {
        use schemars::schema_for;
        match self {
            OpKind::Trim => schema_for!(options::TrimOptions),
            OpKind::Text => schema_for!(options::TextOptions),
            OpKind::TextSequence => schema_for!(options::TextSequenceOptions),
            OpKind::Karaoke => schema_for!(options::KaraokeOptions),
            OpKind::Speed => schema_for!(options::SpeedOptions),
            OpKind::Watermark => schema_for!(options::WatermarkOptions),
            OpKind::Audio => schema_for!(options::AudioOptions),
            OpKind::BackgroundColor => schema_for!(options::BackgroundColorOptions),
            OpKind::Transcode | OpKind::Compress => schema_for!(options::EncodeOptions),
            OpKind::Concat => schema_for!(options::ConcatOptions),
            OpKind::ExtractAudio => schema_for!(options::ExtractAudioOptions),
            OpKind::Gif => schema_for!(options::GifOptions),
            OpKind::DownloadFromYoutube => schema_for!(options::DownloadOptions),
            OpKind::ConvertToPlatform => schema_for!(options::PlatformOptions),
        }
    }
}

/// Operation index and kind, used to attribute errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpContext {
    pub index: usize,
    pub kind: OpKind,
}

impl OpContext {
    pub fn new(index: usize, kind: OpKind) -> Self {
        Self { index, kind }
    }

    pub fn invalid(&self, field: impl Into<String>, message: impl Into<String>) -> CompileError {
        CompileError::invalid(self.index, self.kind.name(), field, message)
    }

    pub fn missing(&self, field: &str) -> CompileError {
        self.invalid(field, "missing required field")
    }

    pub fn unsupported(&self, conflicts_with: Option<usize>, message: impl Into<String>) -> CompileError {
        CompileError::UnsupportedCombination {
            index: self.index,
            op: self.kind.name().to_string(),
            conflicts_with,
            message: message.into(),
        }
    }

    pub fn conflict(&self, field: &str, first: usize, second: usize, message: impl Into<String>) -> CompileError {
        CompileError::ConflictingTimeRange {
            index: self.index,
            op: self.kind.name().to_string(),
            field: field.to_string(),
            first,
            second,
            message: message.into(),
        }
    }
}

/// Opaque engine expression (coordinates, sizes).
///
/// The compiler never evaluates it; it only rejects strings that would
/// break out of a filter argument.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct Expr(String);

impl Expr {
    pub fn parse(value: &str) -> Result<Self, String> {
        let value = value.trim();
        if value.is_empty() {
            return Err("expression must not be empty".to_string());
        }
        if let Some(bad) = value.chars().find(|c| matches!(c, ';' | '[' | ']' | '\'' | '\\' | ':' | '\n')) {
            return Err(format!("character `{bad}` is not allowed in `{value}`"));
        }
        let mut depth = 0i32;
        for c in value.chars() {
            match c {
                '(' => depth += 1,
                ')' => depth -= 1,
                _ => {}
            }
            if depth < 0 {
                return Err(format!("unbalanced parentheses in `{value}`"));
            }
        }
        if depth != 0 {
            return Err(format!("unbalanced parentheses in `{value}`"));
        }
        Ok(Self(value.to_string()))
    }

    /// Size of a scale filter: `width` or `width:height`.
    ///
    /// It is written unquoted, so neither side may hold option or filter
    /// separators.
    pub fn parse_size(value: &str) -> Result<Self, String> {
        let value = value.trim();
        let sides: Vec<&str> = value.split(':').map(str::trim).collect();
        if sides.len() > 2 {
            return Err(format!("`{value}` is not a `width:height` size"));
        }
        for side in &sides {
            Self::parse(side)?;
            if let Some(bad) = side.chars().find(|c| matches!(c, ',' | '=')) {
                return Err(format!("character `{bad}` is not allowed in `{value}`"));
            }
        }
        Ok(Self(sides.join(":")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Check an engine color: a name, `#RRGGBB[AA]` or `0xRRGGBB[AA]`, with an
/// optional `@alpha` within 0..1
pub fn parse_color(value: &str) -> Result<String, String> {
    let value = value.trim();
    let (color, alpha) = match value.split_once('@') {
        Some((color, alpha)) => (color, Some(alpha)),
        None => (value, None),
    };
    let valid = match color.strip_prefix('#').or_else(|| color.strip_prefix("0x")) {
        Some(digits) => matches!(digits.len(), 6 | 8) && digits.chars().all(|c| c.is_ascii_hexdigit()),
        None => {
            color.starts_with(|c: char| c.is_ascii_alphabetic())
                && color.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
    };
    if !valid {
        return Err(format!("`{value}` is not a color name or #RRGGBB[AA]"));
    }
    if let Some(alpha) = alpha {
        match alpha.parse::<f64>() {
            Ok(level) if (0.0..=1.0).contains(&level) => {}
            _ => return Err(format!("alpha of `{value}` must be within 0..1")),
        }
    }
    Ok(value.to_string())
}

impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trim {
    pub segment: TimeSegment,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextStyle {
    pub fontsize: u32,
    pub fontcolor: Option<String>,
    pub fontfile: Option<String>,
    pub boxed: bool,
    pub boxcolor: Option<String>,
    pub boxborderw: Option<u32>,
}

/// Opacity ramps at the edges of a text segment
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Fade {
    pub in_ms: u32,
    pub out_ms: u32,
}

impl Fade {
    pub fn is_none(&self) -> bool {
        self.in_ms == 0 && self.out_ms == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextSegment {
    pub segment: TimeSegment,
    pub text: String,
    pub x: Expr,
    pub y: Expr,
    pub style: TextStyle,
    pub fade: Fade,
}

/// Shared by `text` and `textSequence`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextOverlay {
    pub segments: Vec<TextSegment>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WordTiming {
    pub word: String,
    pub segment: TimeSegment,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Karaoke {
    pub sentence: String,
    pub words: Option<Vec<WordTiming>>,
    pub segment: TimeSegment,
    pub x: Expr,
    pub y: Expr,
    pub style: TextStyle,
    pub highlight: TextStyle,
    pub highlight_y: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpeedSegment {
    pub segment: TimeSegment,
    pub speed: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Speed {
    pub segments: Vec<SpeedSegment>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlayPosition {
    pub x: Expr,
    pub y: Expr,
}

impl OverlayPosition {
    /// Named anchor or a custom `x:y` pair
    pub fn parse(value: &str) -> Result<Self, String> {
        let named = match value.trim().to_ascii_uppercase().as_str() {
            "TOP_LEFT" => Some(("10", "10")),
            "TOP_CENTER" => Some(("(W-w)/2", "10")),
            "TOP_RIGHT" => Some(("W-w-10", "10")),
            "MIDDLE_LEFT" => Some(("10", "(H-h)/2")),
            "CENTER" => Some(("(W-w)/2", "(H-h)/2")),
            "MIDDLE_RIGHT" => Some(("W-w-10", "(H-h)/2")),
            "BOTTOM_LEFT" => Some(("10", "H-h-10")),
            "BOTTOM_CENTER" => Some(("(W-w)/2", "H-h-10")),
            "BOTTOM_RIGHT" => Some(("W-w-10", "H-h-10")),
            "SAFE_TOP" => Some(("(W-w)/2", "80")),
            "SAFE_BOTTOM" => Some(("(W-w)/2", "H-h-80")),
            _ => None,
        };
        if let Some((x, y)) = named {
            return Ok(Self { x: Expr::parse(x)?, y: Expr::parse(y)? });
        }
        let (x, y) = value
            .split_once(':')
            .ok_or_else(|| format!("`{value}` is neither a named position nor `x:y`"))?;
        Ok(Self { x: Expr::parse(x)?, y: Expr::parse(y)? })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Watermark {
    pub path: String,
    pub position: OverlayPosition,
    pub opacity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioOverlay {
    pub path: String,
    pub mix_volume: f64,
    pub looped: bool,
    pub mute_source: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackgroundColor {
    pub color: String,
    pub only_color: bool,
}

/// Encoder parameters of `transcode` and `compress`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Encode {
    pub video_codec: String,
    pub preset: String,
    pub crf: u32,
    pub audio_codec: String,
    pub audio_bitrate: Option<String>,
    pub movflags: Option<String>,
    pub scale: Option<Expr>,
    pub target_size_mb: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Concat {
    pub inputs: Vec<String>,
    pub normalize: bool,
}

#[derive(
    Debug, Clone, Copy, Default,
    Serialize, Deserialize, JsonSchema,
    Display, EnumString, EnumIter, VariantNames, IntoStaticStr,
    PartialEq, Eq
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum AudioFormat {
    #[default]
    Mp3,
    Aac,
    Wav,
    Flac,
}

impl AudioFormat {
    pub fn codec(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "libmp3lame",
            AudioFormat::Aac => "aac",
            AudioFormat::Wav => "pcm_s16le",
            AudioFormat::Flac => "flac",
        }
    }

    /// Muxer name passed to `-f`
    pub fn container(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Aac => "ipod",
            AudioFormat::Wav => "wav",
            AudioFormat::Flac => "flac",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Aac => "m4a",
            other => other.container(),
        }
    }

    /// Lossless formats ignore a bitrate
    pub fn uses_bitrate(&self) -> bool {
        matches!(self, AudioFormat::Mp3 | AudioFormat::Aac)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractAudio {
    pub format: AudioFormat,
    pub bitrate: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Gif {
    pub start_time: f64,
    pub duration: Option<f64>,
    pub fps: u32,
    pub scale: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Download {
    pub url: Option<String>,
    pub quality: String,
    pub format: Option<String>,
    pub audio_only: bool,
}

#[derive(
    Debug, Clone, Copy,
    Serialize, Deserialize, JsonSchema,
    Display, EnumString, EnumIter, VariantNames, IntoStaticStr,
    PartialEq, Eq
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Platform {
    Tiktok,
    Reels,
    Shorts,
    Youtube,
    InstagramSquare,
    InstagramPortrait,
    Twitter,
}

impl Platform {
    pub fn dimensions(&self) -> Dimensions {
        match self {
            Platform::Tiktok | Platform::Reels | Platform::Shorts => Dimensions::new(1080, 1920),
            Platform::Youtube => Dimensions::new(1920, 1080),
            Platform::InstagramSquare => Dimensions::new(1080, 1080),
            Platform::InstagramPortrait => Dimensions::new(1080, 1350),
            Platform::Twitter => Dimensions::new(1280, 720),
        }
    }

    pub fn frame_rate(&self) -> u32 {
        30
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConvertToPlatform {
    pub platform: Platform,
}

/// A validated operation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", content = "params", rename_all = "camelCase")]
pub enum Descriptor {
    Trim(Trim),
    Text(TextOverlay),
    TextSequence(TextOverlay),
    Karaoke(Karaoke),
    Speed(Speed),
    Watermark(Watermark),
    Audio(AudioOverlay),
    BackgroundColor(BackgroundColor),
    Transcode(Encode),
    Compress(Encode),
    Concat(Concat),
    ExtractAudio(ExtractAudio),
    Gif(Gif),
    #[serde(rename = "download_from_youtube")]
    DownloadFromYoutube(Download),
    ConvertToPlatform(ConvertToPlatform),
}

impl Descriptor {
    pub fn kind(&self) -> OpKind {
        match self {
            Descriptor::Trim(_) => OpKind::Trim,
            Descriptor::Text(_) => OpKind::Text,
            Descriptor::TextSequence(_) => OpKind::TextSequence,
            Descriptor::Karaoke(_) => OpKind::Karaoke,
            Descriptor::Speed(_) => OpKind::Speed,
            Descriptor::Watermark(_) => OpKind::Watermark,
            Descriptor::Audio(_) => OpKind::Audio,
            Descriptor::BackgroundColor(_) => OpKind::BackgroundColor,
            Descriptor::Transcode(_) => OpKind::Transcode,
            Descriptor::Compress(_) => OpKind::Compress,
            Descriptor::Concat(_) => OpKind::Concat,
            Descriptor::ExtractAudio(_) => OpKind::ExtractAudio,
            Descriptor::Gif(_) => OpKind::Gif,
            Descriptor::DownloadFromYoutube(_) => OpKind::DownloadFromYoutube,
            Descriptor::ConvertToPlatform(_) => OpKind::ConvertToPlatform,
        }
    }

    /// A color-only background creates its own picture
    pub fn requirement(&self) -> StreamRequirement {
        match self {
            Descriptor::BackgroundColor(BackgroundColor { only_color: true, .. }) => {
                StreamRequirement::Any
            }
            other => other.kind().requirement(),
        }
    }
}
