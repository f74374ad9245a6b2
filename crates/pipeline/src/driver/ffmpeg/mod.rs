mod filter;

pub use filter::{FilterGraph, atempo_chain, encode_args, escape_text, ffmpeg_args, filter_graph, node_filter, ytdlp_args};

use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::Utc;
use clipper_common::utils::parse_frame_rate;
use clipper_common::{ExecutionReport, MediaInfo};
use serde::Deserialize;
use tracing::{debug, info};

use crate::driver::{Driver, DriverError, MediaProbe};
use crate::graph::{CompiledPlan, InputSource, NodeOp, Pass};
use crate::sources::{FileSink, MediaSource, Sink, Source};

#[derive(Debug, Default, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
    size: Option<String>,
    bit_rate: Option<String>,
}

fn parse_number<T: std::str::FromStr>(value: Option<&String>) -> Option<T> {
    value.and_then(|value| value.trim().parse().ok())
}

/// Turn `ffprobe -print_format json` output into [`MediaInfo`]
pub fn parse_probe_output(json: &str) -> Result<MediaInfo, DriverError> {
    let output: ProbeOutput =
        serde_json::from_str(json).map_err(|e| DriverError::Probe(format!("Unreadable ffprobe output: {e}")))?;
    let format = output.format.unwrap_or_default();
    let video = output
        .streams
        .iter()
        .find(|stream| stream.codec_type.as_deref() == Some("video"));
    let has_audio = output
        .streams
        .iter()
        .any(|stream| stream.codec_type.as_deref() == Some("audio"));

    let duration = parse_number::<f64>(format.duration.as_ref())
        .or_else(|| output.streams.iter().find_map(|stream| parse_number(stream.duration.as_ref())))
        .filter(|duration| duration.is_finite() && *duration > 0.0)
        .ok_or_else(|| DriverError::Probe("Invalid or zero duration".to_string()))?;

    Ok(MediaInfo {
        duration,
        size: parse_number(format.size.as_ref()),
        bitrate: parse_number(format.bit_rate.as_ref()),
        width: video.and_then(|stream| stream.width),
        height: video.and_then(|stream| stream.height),
        codec: video.and_then(|stream| stream.codec_name.clone()),
        fps: video
            .and_then(|stream| stream.r_frame_rate.as_deref())
            .and_then(parse_frame_rate)
            .filter(|fps| *fps > 0.0),
        has_video: video.is_some(),
        has_audio,
    })
}

/// Runs compiled plans with the ffmpeg command line tools
#[derive(Debug, Clone)]
pub struct FFmpegDriver {
    ffmpeg_path: String,
    ffprobe_path: String,
    ytdlp_path: String,
}

impl FFmpegDriver {
    pub fn new() -> Result<Self, DriverError> {
        Ok(Self {
            ffmpeg_path: Self::find_executable("ffmpeg")?,
            ffprobe_path: Self::find_executable("ffprobe")?,
            // Only needed for downloads; resolved by PATH at run time
            ytdlp_path: Self::find_executable("yt-dlp").unwrap_or_else(|_| "yt-dlp".to_string()),
        })
    }

    /// Use explicit tool paths; `None` falls back to the lookup of [`FFmpegDriver::new`]
    pub fn with_paths(
        ffmpeg: Option<&str>,
        ffprobe: Option<&str>,
        ytdlp: Option<&str>,
    ) -> Result<Self, DriverError> {
        let resolve = |path: Option<&str>, name: &str| match path {
            Some(path) if Path::new(path).exists() => Ok(path.to_string()),
            Some(path) => Err(DriverError::Initialization(format!("{name} executable not found at: {path}"))),
            None => Self::find_executable(name),
        };
        Ok(Self {
            ffmpeg_path: resolve(ffmpeg, "ffmpeg")?,
            ffprobe_path: resolve(ffprobe, "ffprobe")?,
            ytdlp_path: match ytdlp {
                Some(_) => resolve(ytdlp, "yt-dlp")?,
                None => Self::find_executable("yt-dlp").unwrap_or_else(|_| "yt-dlp".to_string()),
            },
        })
    }

    fn find_executable(name: &str) -> Result<String, DriverError> {
        if let Ok(output) = Command::new("which").arg(name).output() {
            if output.status.success() {
                let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path.is_empty() {
                    return Ok(path);
                }
            }
        }

        ["/usr/bin", "/usr/local/bin", "/opt/homebrew/bin"]
            .iter()
            .map(|dir| Path::new(dir).join(name))
            .find(|path| path.exists())
            .map(|path| path.to_string_lossy().into_owned())
            .ok_or_else(|| {
                DriverError::Initialization(format!(
                    "{name} executable not found. Please install it or specify the path."
                ))
            })
    }

    fn build_pass_command(&self, pass: &Pass, inputs: &[String], output: &Path) -> Result<Command, DriverError> {
        let args = ffmpeg_args(pass, inputs, &output.to_string_lossy())?;
        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.args(args);
        Ok(cmd)
    }

    fn execute_command(&self, mut cmd: Command) -> Result<Vec<u8>, DriverError> {
        debug!(command = ?cmd, "Executing");

        let output = cmd
            .output()
            .map_err(|e| DriverError::Execution(format!("Failed to start {:?}: {}", cmd.get_program(), e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(100).collect();
            let tail: Vec<&str> = tail.into_iter().rev().collect();
            return Err(DriverError::Execution(format!(
                "{:?} exited with {}: {}",
                cmd.get_program(),
                output.status,
                tail.join("\n")
            )));
        }
        Ok(output.stdout)
    }

    /// Resolve the inputs of a pass against the request media and earlier artifacts
    fn pass_inputs(pass: &Pass, artifacts: &[PathBuf]) -> Result<Vec<String>, DriverError> {
        pass.inputs
            .iter()
            .map(|input| match &input.source {
                InputSource::Media(media) => Ok(media.clone()),
                InputSource::Pass(index) => artifacts
                    .get(*index)
                    .map(|path| path.to_string_lossy().into_owned())
                    .ok_or_else(|| {
                        DriverError::Execution(format!("pass {} reads pass {index}, which has not run", pass.index))
                    }),
            })
            .collect()
    }
}

impl MediaProbe for FFmpegDriver {
    fn probe(&self, media: &str) -> Result<MediaInfo, DriverError> {
        let mut cmd = Command::new(&self.ffprobe_path);
        cmd.args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams", media]);
        let stdout = self
            .execute_command(cmd)
            .map_err(|e| DriverError::Probe(e.to_string()))?;
        let info = parse_probe_output(&String::from_utf8_lossy(&stdout))?;
        debug!(media, duration = info.duration, has_video = info.has_video, has_audio = info.has_audio, "Probed");
        Ok(info)
    }
}

impl Driver for FFmpegDriver {
    type Source = MediaSource;
    type Sink = FileSink;

    fn load(&self, source: &Self::Source) -> Result<MediaInfo, DriverError> {
        source.validate()?;
        self.probe(&source.media)
    }

    fn render(&self, plan: &CompiledPlan, sink: &Self::Sink) -> Result<ExecutionReport, DriverError> {
        sink.validate()?;
        let started_at = Utc::now();
        let workdir = tempfile::tempdir()
            .map_err(|e| DriverError::Execution(format!("Cannot create work directory: {e}")))?;

        let mut artifacts: Vec<PathBuf> = Vec::with_capacity(plan.passes.len());
        for (position, pass) in plan.passes.iter().enumerate() {
            pass.validate()?;
            let last = position + 1 == plan.passes.len();
            let terminal = pass.terminal().map(|node| &node.op);
            info!(pass = pass.index, nodes = pass.nodes.len(), last, "Running pass");

            let artifact = match terminal {
                Some(NodeOp::Download(spec)) => {
                    let template = workdir.path().join(format!("pass_{}.%(ext)s", pass.index));
                    let mut cmd = Command::new(&self.ytdlp_path);
                    cmd.args(ytdlp_args(spec, &template.to_string_lossy()));
                    self.execute_command(cmd)?;

                    let downloaded = workdir.path().join(format!("pass_{}.{}", pass.index, spec.extension));
                    if last {
                        std::fs::copy(&downloaded, &sink.path).map_err(|e| {
                            DriverError::Execution(format!("Cannot write {}: {e}", sink.description()))
                        })?;
                        PathBuf::from(&sink.path)
                    } else {
                        downloaded
                    }
                }
                Some(NodeOp::Encode(spec)) => {
                    let output = if last {
                        PathBuf::from(&sink.path)
                    } else {
                        workdir.path().join(format!("pass_{}.{}", pass.index, spec.extension))
                    };
                    let inputs = Self::pass_inputs(pass, &artifacts)?;
                    let cmd = self.build_pass_command(pass, &inputs, &output)?;
                    self.execute_command(cmd)?;
                    output
                }
                _ => {
                    return Err(DriverError::Execution(format!(
                        "pass {} has no terminal node",
                        pass.index
                    )));
                }
            };
            artifacts.push(artifact);
        }

        let report = ExecutionReport::new(started_at, Utc::now(), plan.passes.len());
        info!(
            output = %sink.description(),
            passes = report.passes,
            seconds = report.processing_time,
            "Render finished"
        );
        Ok(report)
    }
}
