use pipeline::settings::SettingsError;
use pipeline::{CompilerSettings, EditRequest};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClipperError {
    #[error(transparent)]
    SerdeError(#[from] serde_json::Error),
    #[error(transparent)]
    TomlDeError(#[from] toml::de::Error),
    #[error(transparent)]
    TomlSerError(#[from] toml::ser::Error),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error("Unsupported file format. Please use .toml or .json files")]
    UnsupportedFileFormat,
}

/// Locations of the external tools; looked up on `PATH` when unset
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct ToolPaths {
    pub ffmpeg: Option<String>,
    pub ffprobe: Option<String>,
    #[serde(rename = "yt-dlp")]
    pub ytdlp: Option<String>,
}

/// Contents of `clipper.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct ClipperConfig {
    pub compiler: CompilerSettings,
    pub ffmpeg: ToolPaths,
}

impl ClipperConfig {
    pub fn from_toml(content: &str) -> Result<Self, ClipperError> {
        let config: ClipperConfig = toml::from_str(content)?;
        config.compiler.check()?;
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self, ClipperError> {
        let config: ClipperConfig = serde_json::from_str(content)?;
        config.compiler.check()?;
        Ok(config)
    }

    /// Auto-detect file format and load configuration
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ClipperError> {
        let path = path.as_ref();
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml(&fs::read_to_string(path)?),
            Some("json") => Self::from_json(&fs::read_to_string(path)?),
            _ => Err(ClipperError::UnsupportedFileFormat),
        }
    }

    pub fn to_toml(&self) -> Result<String, ClipperError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Read an edit request from a `.json` or `.toml` file
pub fn load_request<P: AsRef<Path>>(path: P) -> Result<EditRequest, ClipperError> {
    let path = path.as_ref();
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => Ok(EditRequest::from_json(&fs::read_to_string(path)?)?),
        Some("toml") => Ok(toml::from_str(&fs::read_to_string(path)?)?),
        _ => Err(ClipperError::UnsupportedFileFormat),
    }
}
