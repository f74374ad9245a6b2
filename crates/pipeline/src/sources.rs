use std::fmt::Debug;
use std::path::Path;

use clipper_common::utils::is_remote;

use crate::driver::DriverError;

/// Where a driver reads media from
pub trait Source: Debug + Clone {
    /// Check that the source can be read
    fn validate(&self) -> Result<(), DriverError>;

    /// Human-readable description for logs
    fn description(&self) -> String;
}

/// Where a driver writes the final artifact
pub trait Sink: Debug + Clone {
    /// Check that the sink can be written to
    fn validate(&self) -> Result<(), DriverError>;

    fn description(&self) -> String;
}

/// A local file or an `http(s)` URL
#[derive(Debug, Clone)]
pub struct MediaSource {
    pub media: String,
}

impl MediaSource {
    pub fn new(media: impl Into<String>) -> Self {
        Self { media: media.into() }
    }

    pub fn is_remote(&self) -> bool {
        is_remote(&self.media)
    }
}

impl Source for MediaSource {
    fn validate(&self) -> Result<(), DriverError> {
        // URLs are left to the engine
        if self.is_remote() || Path::new(&self.media).exists() {
            Ok(())
        } else {
            Err(DriverError::Execution(format!("Input file not found: {}", self.media)))
        }
    }

    fn description(&self) -> String {
        if self.is_remote() {
            format!("URL: {}", self.media)
        } else {
            format!("File: {}", self.media)
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileSink {
    pub path: String,
}

impl FileSink {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl Sink for FileSink {
    fn validate(&self) -> Result<(), DriverError> {
        if let Some(parent) = Path::new(&self.path).parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| DriverError::Execution(format!("Cannot create output directory: {}", e)))?;
        }
        Ok(())
    }

    fn description(&self) -> String {
        format!("File: {}", self.path)
    }
}
