use std::fs;
use std::path::Path;

use clipper_common::Dimensions;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
    #[error("Invalid setting `{field}`: {message}")]
    Invalid { field: &'static str, message: String },
}

/// Knobs of the compiler that are not part of a request.
///
/// Every field has a default so a partial TOML table is enough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct CompilerSettings {
    /// Frame size used for generated sources when the probe reports none
    pub canvas: Dimensions,
    /// Frame rate of generated sources and normalized streams
    pub frame_rate: u32,
    /// Output container of video passes (`-f`)
    pub video_format: String,
    /// movflags for video passes (fragmented output can be streamed)
    pub movflags: String,
    /// Encoder settings of passes without an explicit encode operation
    pub video_codec: String,
    pub audio_codec: String,
    pub preset: String,
    pub crf: u32,
    /// Bitrate of `extractAudio` when the operation does not set one
    pub extract_audio_bitrate: String,
    /// Audio share subtracted from a `target_size_mb` budget
    pub compress_audio_kbps: u32,
    /// Floor of a computed video bitrate
    pub min_video_kbps: u32,
    /// Per-word duration for karaoke sentences without a known end
    pub karaoke_word_sec: f64,
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            canvas: Dimensions::new(1920, 1080),
            frame_rate: 30,
            video_format: "mp4".to_string(),
            movflags: "+frag_keyframe+empty_moov".to_string(),
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
            preset: "medium".to_string(),
            crf: 23,
            extract_audio_bitrate: "192k".to_string(),
            compress_audio_kbps: 128,
            min_video_kbps: 100,
            karaoke_word_sec: 0.5,
        }
    }
}

impl CompilerSettings {
    /// Load settings from a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load settings from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let settings: CompilerSettings = toml::from_str(content)?;
        settings.check()?;
        Ok(settings)
    }

    pub fn check(&self) -> Result<(), SettingsError> {
        if self.canvas.width == 0 || self.canvas.height == 0 {
            return Err(SettingsError::Invalid {
                field: "canvas",
                message: format!("{} has a zero dimension", self.canvas),
            });
        }
        if self.frame_rate == 0 {
            return Err(SettingsError::Invalid {
                field: "frame_rate",
                message: "must be positive".to_string(),
            });
        }
        if !(self.karaoke_word_sec.is_finite() && self.karaoke_word_sec > 0.0) {
            return Err(SettingsError::Invalid {
                field: "karaoke_word_sec",
                message: format!("must be a positive number, got {}", self.karaoke_word_sec),
            });
        }
        Ok(())
    }
}
