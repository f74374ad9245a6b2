//! # Clipper Common - Shared Types and Utilities
//!
//! Data structures shared by the pipeline compiler and the command line
//! front end: time segments with the end-of-media sentinel, probed media
//! metadata, frame dimensions and execution reports.
//!
//! ## Example
//!
//! ```rust
//! use clipper_common::{MediaInfo, TimeSegment};
//!
//! // `-1` means "until the end of the media"
//! let segment = TimeSegment::new(2.0, -1.0).unwrap();
//! let media = MediaInfo::with_duration(10.0);
//!
//! let range = segment.resolve(Some(media.duration));
//! assert_eq!(range.start, 2.0);
//! assert_eq!(range.end, Some(10.0));
//! ```

use serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use thiserror::Error;

// Re-exports for convenience
pub use chrono::{DateTime, Utc};

/// Result type for shared operations
pub type Result<T> = std::result::Result<T, CommonError>;

/// Marker value for an end time that runs until the end of the media.
pub const END_OF_MEDIA: f64 = -1.0;

/// Standard error type for shared operations
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("Invalid time range: start {start} >= end {end}")]
    InvalidTimeRange { start: f64, end: f64 },

    #[error("Invalid value: {message}")]
    InvalidValue { message: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

/// A time segment in seconds as supplied by a client.
///
/// A negative `end_sec` (conventionally `-1`) is the end-of-media sentinel and
/// is only turned into a concrete time once the timeline length is known.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TimeSegment {
    /// Start time in seconds
    pub start_sec: f64,
    /// End time in seconds, `-1` for end of media
    pub end_sec: f64,
}

impl TimeSegment {
    /// Create a new segment, rejecting negative or non-finite starts
    pub fn new(start_sec: f64, end_sec: f64) -> Result<Self> {
        if !start_sec.is_finite() || start_sec < 0.0 {
            return Err(CommonError::InvalidValue {
                message: format!("start must be a non-negative number, got {start_sec}"),
            });
        }
        if !end_sec.is_finite() {
            return Err(CommonError::InvalidValue {
                message: format!("end must be a finite number, got {end_sec}"),
            });
        }
        if end_sec >= 0.0 && end_sec <= start_sec {
            return Err(CommonError::InvalidTimeRange { start: start_sec, end: end_sec });
        }
        Ok(Self { start_sec, end_sec })
    }

    /// Segment running from `start_sec` to the end of the media
    pub fn open_ended(start_sec: f64) -> Self {
        Self { start_sec, end_sec: END_OF_MEDIA }
    }

    /// Whether the end is the end-of-media sentinel
    pub fn is_open_ended(&self) -> bool {
        self.end_sec < 0.0
    }

    /// Resolve against a (possibly unknown) timeline length.
    ///
    /// Concrete ends are clamped to the duration when it is known. An open end
    /// stays open when the duration is unknown.
    pub fn resolve(&self, duration: Option<f64>) -> ResolvedRange {
        let end = if self.is_open_ended() {
            duration
        } else {
            Some(match duration {
                Some(duration) => self.end_sec.min(duration),
                None => self.end_sec,
            })
        };
        ResolvedRange { start: self.start_sec, end }
    }
}

/// A time range after sentinel resolution. `end == None` runs to the end of
/// the stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ResolvedRange {
    pub start: f64,
    pub end: Option<f64>,
}

impl ResolvedRange {
    pub fn new(start: f64, end: Option<f64>) -> Self {
        Self { start, end }
    }

    /// Length of the range, if bounded
    pub fn duration(&self) -> Option<f64> {
        self.end.map(|end| end - self.start)
    }

    /// A bounded range that contains no time at all
    pub fn is_empty(&self) -> bool {
        matches!(self.end, Some(end) if end <= self.start)
    }

    /// Check if this range overlaps with another (touching ends do not overlap)
    pub fn overlaps(&self, other: &ResolvedRange) -> bool {
        self.start < other.end.unwrap_or(f64::INFINITY)
            && other.start < self.end.unwrap_or(f64::INFINITY)
    }
}

/// Frame size in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Metadata of a probed source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MediaInfo {
    /// Duration in seconds
    pub duration: f64,
    /// File size in bytes
    pub size: Option<u64>,
    /// Container bitrate in bits per second
    pub bitrate: Option<u64>,
    /// Width in pixels
    pub width: Option<u32>,
    /// Height in pixels
    pub height: Option<u32>,
    /// Video codec (e.g., "h264", "hevc")
    pub codec: Option<String>,
    /// Frame rate (frames per second)
    pub fps: Option<f64>,
    pub has_video: bool,
    pub has_audio: bool,
}

impl MediaInfo {
    /// Metadata for a video with audio of which only the duration is known
    pub fn with_duration(duration: f64) -> Self {
        Self {
            duration,
            size: None,
            bitrate: None,
            width: None,
            height: None,
            codec: None,
            fps: None,
            has_video: true,
            has_audio: true,
        }
    }

    /// Frame size, when both dimensions were reported
    pub fn dimensions(&self) -> Option<Dimensions> {
        match (self.width, self.height) {
            (Some(width), Some(height)) if width > 0 && height > 0 => {
                Some(Dimensions::new(width, height))
            }
            _ => None,
        }
    }
}

/// Timing of one pipeline execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Wall clock time in seconds
    pub processing_time: f64,
    /// Number of engine passes that ran
    pub passes: usize,
}

impl ExecutionReport {
    pub fn new(started_at: DateTime<Utc>, finished_at: DateTime<Utc>, passes: usize) -> Self {
        let processing_time = (finished_at - started_at)
            .to_std()
            .map(|elapsed| elapsed.as_secs_f64())
            .unwrap_or(0.0);
        Self {
            started_at,
            finished_at,
            processing_time,
            passes,
        }
    }
}

/// Utility functions for time formatting
pub mod utils {
    use super::*;

    /// Format seconds as HH:MM:SS.mmm
    pub fn format_timestamp(seconds: f64) -> String {
        let total_millis = (seconds.max(0.0) * 1000.0).round() as u64;
        let total_seconds = total_millis / 1000;
        let hours = total_seconds / 3600;
        let minutes = (total_seconds % 3600) / 60;
        let secs = total_seconds % 60;
        let millis = total_millis % 1000;

        format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, secs, millis)
    }

    /// Parse a rational frame rate such as `30000/1001` or `30/1`.
    ///
    /// Malformed input and a zero denominator yield `None`.
    pub fn parse_frame_rate(rate: &str) -> Option<f64> {
        let (num, den) = rate.split_once('/')?;
        let num: i64 = num.trim().parse().ok()?;
        let den: i64 = den.trim().parse().ok()?;
        if den == 0 {
            return None;
        }
        Some(num as f64 / den as f64)
    }

    /// Parse a loose numeric value (`"2.5"`, `" 10 "`)
    pub fn parse_seconds(value: &str) -> Result<f64> {
        value
            .trim()
            .parse::<f64>()
            .map_err(|_| CommonError::Parse(format!("`{value}` is not a number")))
    }

    /// Format file size in human-readable format
    pub fn format_file_size(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];

        if bytes == 0 {
            return "0 B".to_string();
        }

        let base = 1024_f64;
        let exp = (bytes as f64).log(base).floor() as usize;
        let exp = exp.min(UNITS.len() - 1);

        let size = bytes as f64 / base.powi(exp as i32);
        format!("{:.1} {}", size, UNITS[exp])
    }

    /// Whether a media reference points at a remote resource
    pub fn is_remote(media: &str) -> bool {
        let lower = media.to_ascii_lowercase();
        lower.starts_with("http://") || lower.starts_with("https://")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_resolves_to_duration() {
        let segment = TimeSegment::new(2.0, END_OF_MEDIA).unwrap();
        assert!(segment.is_open_ended());

        let range = segment.resolve(Some(10.0));
        assert_eq!(range, ResolvedRange::new(2.0, Some(10.0)));
        assert_eq!(range.duration(), Some(8.0));
    }

    #[test]
    fn test_sentinel_without_duration_stays_open() {
        let range = TimeSegment::open_ended(3.0).resolve(None);
        assert_eq!(range.end, None);
        assert!(!range.is_empty());
    }

    #[test]
    fn test_concrete_end_is_clamped() {
        let range = TimeSegment::new(4.0, 25.0).unwrap().resolve(Some(12.0));
        assert_eq!(range.end, Some(12.0));

        let past_end = TimeSegment::new(14.0, 25.0).unwrap().resolve(Some(12.0));
        assert!(past_end.is_empty());
    }

    #[test]
    fn test_invalid_segments() {
        assert!(TimeSegment::new(-1.0, 5.0).is_err());
        assert!(TimeSegment::new(5.0, 5.0).is_err());
        assert!(TimeSegment::new(5.0, 2.0).is_err());
        assert!(TimeSegment::new(f64::NAN, 2.0).is_err());
    }

    #[test]
    fn test_range_overlap() {
        let first = ResolvedRange::new(0.0, Some(5.0));
        let second = ResolvedRange::new(3.0, Some(8.0));
        let touching = ResolvedRange::new(5.0, Some(9.0));
        let open = ResolvedRange::new(7.0, None);

        assert!(first.overlaps(&second));
        assert!(!first.overlaps(&touching));
        assert!(open.overlaps(&touching));
        assert!(!open.overlaps(&first));
    }

    #[test]
    fn test_dimensions_display() {
        assert_eq!(Dimensions::new(1920, 1080).to_string(), "1920x1080");
    }

    #[test]
    fn test_media_dimensions() {
        let mut media = MediaInfo::with_duration(30.0);
        assert_eq!(media.dimensions(), None);

        media.width = Some(1280);
        media.height = Some(720);
        assert_eq!(media.dimensions(), Some(Dimensions::new(1280, 720)));
    }

    #[test]
    fn test_execution_report() {
        let started_at = Utc::now();
        let finished_at = started_at + chrono::Duration::milliseconds(1500);
        let report = ExecutionReport::new(started_at, finished_at, 2);
        assert!((report.processing_time - 1.5).abs() < 1e-9);
        assert_eq!(report.passes, 2);
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(utils::format_timestamp(125.5), "00:02:05.500");
        assert_eq!(utils::format_timestamp(3665.0), "01:01:05.000");
        assert_eq!(utils::format_timestamp(1.9996), "00:00:02.000");
        assert_eq!(utils::format_timestamp(59.9999), "00:01:00.000");
    }

    #[test]
    fn test_parse_frame_rate() {
        assert_eq!(utils::parse_frame_rate("30/1"), Some(30.0));
        assert_eq!(utils::parse_frame_rate("0/0"), None);
        assert_eq!(utils::parse_frame_rate("30"), None);
        let ntsc = utils::parse_frame_rate("30000/1001").unwrap();
        assert!((ntsc - 29.97).abs() < 0.01);
    }

    #[test]
    fn test_parse_seconds() {
        assert_eq!(utils::parse_seconds(" 2.5 ").unwrap(), 2.5);
        assert!(utils::parse_seconds("soon").is_err());
    }

    #[test]
    fn test_file_utilities() {
        assert_eq!(utils::format_file_size(1536), "1.5 KB");
        assert_eq!(utils::format_file_size(2048576), "2.0 MB");
        assert!(utils::is_remote("HTTPS://bucket/video.mp4"));
        assert!(!utils::is_remote("/tmp/video.mp4"));
    }
}
