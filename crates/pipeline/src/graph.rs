//! Compiled plan: passes of labeled filter nodes.

use std::collections::HashSet;

use clipper_common::{Dimensions, ResolvedRange};
use schemars::JsonSchema;
use serde::Serialize;
use thiserror::Error;

/// Output label of the terminal node of every pass
pub const OUTPUT_LABEL: &str = "out";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("pass {pass}: label `{label}` is produced twice")]
    DuplicateLabel { pass: usize, label: String },
    #[error("pass {pass}: node {node} reads `{label}` which is neither an input stream nor an earlier output")]
    UnknownInput { pass: usize, node: usize, label: String },
    #[error("pass {pass}: expected exactly one terminal node at the end, found {found}")]
    Terminal { pass: usize, found: usize },
    #[error("pass {pass}: output `{label}` of node {node} is never read")]
    UnusedOutput { pass: usize, node: usize, label: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Video,
    Audio,
}

impl StreamKind {
    pub fn prefix(&self) -> char {
        match self {
            StreamKind::Video => 'v',
            StreamKind::Audio => 'a',
        }
    }
}

/// Streams present at some point of a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
pub struct StreamLayout {
    pub video: bool,
    pub audio: bool,
}

impl StreamLayout {
    pub const BOTH: StreamLayout = StreamLayout { video: true, audio: true };
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct DrawText {
    pub text: String,
    pub start: f64,
    pub end: Option<f64>,
    pub fontsize: u32,
    pub x: String,
    pub y: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fontfile: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fontcolor: Option<String>,
    pub boxed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boxcolor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boxborderw: Option<u32>,
    /// Opacity expression for fades
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alpha: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, JsonSchema)]
pub struct BitrateBudget {
    pub video_kbps: u32,
    pub maxrate_kbps: u32,
    pub bufsize_kbps: u32,
}

impl BitrateBudget {
    /// Video bitrate that keeps `target_size_mb` for `duration` seconds,
    /// leaving `audio_kbps` for the audio track
    pub fn for_target_size(target_size_mb: f64, duration: f64, audio_kbps: u32, min_video_kbps: u32) -> Self {
        let total_kbps = (target_size_mb * 8192.0 / duration).floor() as i64;
        let video_kbps = (total_kbps.saturating_sub(audio_kbps as i64))
            .clamp(min_video_kbps as i64, u32::MAX as i64) as u32;
        Self {
            video_kbps,
            maxrate_kbps: video_kbps.saturating_mul(3) / 2,
            bufsize_kbps: video_kbps.saturating_mul(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct EncodeSpec {
    /// Stream copy; every other field is ignored
    pub copy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_codec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crf: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<BitrateBudget>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_codec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_bitrate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub movflags: Option<String>,
    /// Stop at the shortest stream (unbounded generated sources)
    pub shortest: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loop_count: Option<i32>,
    /// File extension of the artifact
    pub extension: String,
}

impl EncodeSpec {
    pub fn copy(extension: impl Into<String>) -> Self {
        Self {
            copy: true,
            video_codec: None,
            preset: None,
            crf: None,
            bitrate: None,
            audio_codec: None,
            audio_bitrate: None,
            format: None,
            movflags: None,
            shortest: false,
            loop_count: None,
            extension: extension.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct DownloadSpec {
    pub url: String,
    /// yt-dlp format selector
    pub selector: String,
    pub audio_only: bool,
    pub extension: String,
}

impl DownloadSpec {
    /// Format selection rules of the downloader
    pub fn new(url: impl Into<String>, quality: &str, format: Option<&str>, audio_only: bool) -> Self {
        let url = url.into();
        if audio_only {
            return Self {
                url,
                selector: "bestaudio/best".to_string(),
                audio_only,
                extension: "mp3".to_string(),
            };
        }
        let quality = quality.trim();
        let selector = if let Some(format) = format {
            format!("bestvideo[ext={format}]+bestaudio[ext={format}]/best[ext={format}]/best")
        } else if let Some(height) = quality
            .strip_suffix('p')
            .filter(|height| !height.is_empty() && height.chars().all(|c| c.is_ascii_digit()))
        {
            format!("bestvideo[height<={height}]+bestaudio/best[height<={height}]")
        } else if quality.is_empty() || quality.eq_ignore_ascii_case("best") {
            "bestvideo+bestaudio/best".to_string()
        } else {
            quality.to_string()
        };
        Self {
            url,
            selector,
            audio_only,
            extension: format.unwrap_or("mp4").to_string(),
        }
    }
}

/// Operation performed by one node
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
#[serde(tag = "kind", content = "params", rename_all = "snake_case")]
pub enum NodeOp {
    Trim { start: f64, end: Option<f64> },
    Atrim { start: f64, end: Option<f64> },
    /// Video timestamps divided by `factor`, optionally cut to `range` first
    Speed { range: Option<ResolvedRange>, factor: f64 },
    Aspeed { range: Option<ResolvedRange>, factor: f64 },
    Concat { n: usize },
    Aconcat { n: usize },
    DrawText(DrawText),
    Color { color: String, size: Dimensions, duration: Option<f64>, rate: u32 },
    Opacity { opacity: f64 },
    Overlay { x: String, y: String, shortest: bool },
    Amix { mix_weight: f64 },
    Volume { level: f64 },
    Scale { size: String, flags: Option<String> },
    /// Letterbox into `size` keeping the aspect ratio
    Fit { size: Dimensions, color: String },
    Fps { rate: u32 },
    Aformat { sample_rate: u32, channel_layout: String },
    Palettegen,
    Paletteuse,
    Encode(EncodeSpec),
    Download(DownloadSpec),
}

impl NodeOp {
    /// Kind of stream on the output label
    pub fn stream(&self) -> StreamKind {
        match self {
            NodeOp::Atrim { .. }
            | NodeOp::Aspeed { .. }
            | NodeOp::Aconcat { .. }
            | NodeOp::Amix { .. }
            | NodeOp::Volume { .. }
            | NodeOp::Aformat { .. } => StreamKind::Audio,
            _ => StreamKind::Video,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeOp::Encode(_) | NodeOp::Download(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct FilterNode {
    pub id: usize,
    #[serde(flatten)]
    pub op: NodeOp,
    pub inputs: Vec<String>,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum InputSource {
    /// Request media or a secondary file
    Media(String),
    /// Artifact of an earlier pass
    Pass(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct PassInput {
    pub index: usize,
    pub source: InputSource,
    /// Repeat the input indefinitely
    pub looped: bool,
}

/// One run of the engine producing one artifact
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct Pass {
    pub index: usize,
    pub inputs: Vec<PassInput>,
    pub nodes: Vec<FilterNode>,
    pub output: String,
    /// Streams in the artifact
    pub layout: StreamLayout,
}

/// Reference to a stream of a pass input: `1`, `0:v` or `0:a`
pub fn parse_input_ref(label: &str) -> Option<(usize, Option<StreamKind>)> {
    let (index, stream) = match label.split_once(':') {
        Some((index, "v")) => (index, Some(StreamKind::Video)),
        Some((index, "a")) => (index, Some(StreamKind::Audio)),
        Some(_) => return None,
        None => (label, None),
    };
    index.parse().ok().map(|index| (index, stream))
}

impl Pass {
    pub fn terminal(&self) -> Option<&FilterNode> {
        self.nodes.last().filter(|node| node.op.is_terminal())
    }

    /// Kind of the stream behind a label of this pass
    pub fn stream_of(&self, label: &str) -> Option<StreamKind> {
        if let Some((_, stream)) = parse_input_ref(label) {
            return Some(stream.unwrap_or(StreamKind::Video));
        }
        self.nodes
            .iter()
            .find(|node| node.output == label)
            .map(|node| node.op.stream())
    }

    /// Remove nodes whose output never reaches the terminal node and renumber
    /// the rest. Returns the removed labels.
    pub fn prune_unused(&mut self) -> Vec<String> {
        let mut live: HashSet<String> = HashSet::new();
        let mut keep = vec![false; self.nodes.len()];
        for (position, node) in self.nodes.iter().enumerate().rev() {
            if node.op.is_terminal() || live.contains(&node.output) {
                keep[position] = true;
                live.extend(node.inputs.iter().cloned());
            }
        }

        let mut removed = Vec::new();
        let mut kept = Vec::with_capacity(self.nodes.len());
        for (node, keep) in self.nodes.drain(..).zip(keep) {
            if keep {
                kept.push(node);
            } else {
                removed.push(node.output);
            }
        }
        for (id, node) in kept.iter_mut().enumerate() {
            node.id = id;
        }
        self.nodes = kept;
        removed
    }

    /// Check that labels are unique, every node only reads input streams or
    /// outputs of earlier nodes, and every output is read
    pub fn validate(&self) -> Result<(), GraphError> {
        let mut produced: HashSet<&str> = HashSet::new();
        for (position, node) in self.nodes.iter().enumerate() {
            for input in &node.inputs {
                let is_source = parse_input_ref(input).is_some_and(|(index, _)| index < self.inputs.len());
                if !is_source && !produced.contains(input.as_str()) {
                    return Err(GraphError::UnknownInput {
                        pass: self.index,
                        node: position,
                        label: input.clone(),
                    });
                }
            }
            if parse_input_ref(&node.output).is_some() || !produced.insert(node.output.as_str()) {
                return Err(GraphError::DuplicateLabel {
                    pass: self.index,
                    label: node.output.clone(),
                });
            }
        }

        let terminals = self.nodes.iter().filter(|node| node.op.is_terminal()).count();
        if terminals != 1 || self.terminal().is_none() {
            return Err(GraphError::Terminal {
                pass: self.index,
                found: terminals,
            });
        }

        let read: HashSet<&str> = self
            .nodes
            .iter()
            .flat_map(|node| node.inputs.iter().map(String::as_str))
            .collect();
        let unused = self
            .nodes
            .iter()
            .enumerate()
            .find(|(_, node)| !node.op.is_terminal() && !read.contains(node.output.as_str()));
        if let Some((position, node)) = unused {
            return Err(GraphError::UnusedOutput {
                pass: self.index,
                node: position,
                label: node.output.clone(),
            });
        }
        Ok(())
    }
}

/// Everything the engine needs to produce the requested artifact
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct CompiledPlan {
    pub media: String,
    pub passes: Vec<Pass>,
}

impl CompiledPlan {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn node_count(&self) -> usize {
        self.passes.iter().map(|pass| pass.nodes.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: usize, op: NodeOp, inputs: &[&str], output: &str) -> FilterNode {
        FilterNode {
            id,
            op,
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            output: output.to_string(),
        }
    }

    fn pass(nodes: Vec<FilterNode>) -> Pass {
        Pass {
            index: 0,
            inputs: vec![PassInput {
                index: 0,
                source: InputSource::Media("a.mp4".into()),
                looped: false,
            }],
            nodes,
            output: OUTPUT_LABEL.to_string(),
            layout: StreamLayout::BOTH,
        }
    }

    #[test]
    fn test_valid_pass() {
        let pass = pass(vec![
            node(0, NodeOp::Trim { start: 0.0, end: Some(5.0) }, &["0:v"], "v0"),
            node(1, NodeOp::Atrim { start: 0.0, end: Some(5.0) }, &["0:a"], "a1"),
            node(2, NodeOp::Encode(EncodeSpec::copy("mp4")), &["v0", "a1"], OUTPUT_LABEL),
        ]);
        assert!(pass.validate().is_ok());
        assert_eq!(pass.stream_of("a1"), Some(StreamKind::Audio));
        assert_eq!(pass.stream_of("0:v"), Some(StreamKind::Video));
    }

    #[test]
    fn test_forward_reference_is_rejected() {
        let pass = pass(vec![
            node(0, NodeOp::Fps { rate: 30 }, &["v1"], "v0"),
            node(1, NodeOp::Fps { rate: 30 }, &["0:v"], "v1"),
            node(2, NodeOp::Encode(EncodeSpec::copy("mp4")), &["v0"], OUTPUT_LABEL),
        ]);
        assert!(matches!(pass.validate(), Err(GraphError::UnknownInput { node: 0, .. })));
    }

    #[test]
    fn test_unknown_source_and_duplicate_labels() {
        let missing_input = pass(vec![
            node(0, NodeOp::Fps { rate: 30 }, &["2:v"], "v0"),
            node(1, NodeOp::Encode(EncodeSpec::copy("mp4")), &["v0"], OUTPUT_LABEL),
        ]);
        assert!(matches!(missing_input.validate(), Err(GraphError::UnknownInput { .. })));

        let duplicate = pass(vec![
            node(0, NodeOp::Fps { rate: 30 }, &["0:v"], "v0"),
            node(1, NodeOp::Fps { rate: 25 }, &["v0"], "v0"),
            node(2, NodeOp::Encode(EncodeSpec::copy("mp4")), &["v0"], OUTPUT_LABEL),
        ]);
        assert!(matches!(duplicate.validate(), Err(GraphError::DuplicateLabel { .. })));
    }

    #[test]
    fn test_pass_needs_trailing_terminal() {
        let pass = pass(vec![node(0, NodeOp::Fps { rate: 30 }, &["0:v"], "v0")]);
        assert!(matches!(pass.validate(), Err(GraphError::Terminal { found: 0, .. })));
    }

    #[test]
    fn test_unread_output_is_rejected() {
        let pass = pass(vec![
            node(0, NodeOp::Volume { level: 0.3 }, &["0:a"], "a0"),
            node(1, NodeOp::Encode(EncodeSpec::copy("mp4")), &["0:v"], OUTPUT_LABEL),
        ]);
        assert_eq!(
            pass.validate(),
            Err(GraphError::UnusedOutput { pass: 0, node: 0, label: "a0".to_string() })
        );
    }

    #[test]
    fn test_prune_drops_dead_branches() {
        let mut pass = pass(vec![
            node(0, NodeOp::Trim { start: 1.0, end: None }, &["0:v"], "v0"),
            node(1, NodeOp::Atrim { start: 1.0, end: None }, &["0:a"], "a1"),
            node(2, NodeOp::Fps { rate: 10 }, &["v0"], "v2"),
            node(3, NodeOp::Encode(EncodeSpec::copy("gif")), &["v2"], OUTPUT_LABEL),
        ]);
        assert_eq!(pass.prune_unused(), vec!["a1".to_string()]);
        assert_eq!(pass.nodes.iter().map(|node| node.id).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(pass.nodes[1].output, "v2");
        assert!(pass.validate().is_ok());
    }

    #[test]
    fn test_node_serialization_shape() {
        let json = serde_json::to_value(node(3, NodeOp::Trim { start: 2.0, end: Some(10.0) }, &["0:v"], "v3")).unwrap();
        assert_eq!(json["id"], 3);
        assert_eq!(json["kind"], "trim");
        assert_eq!(json["params"]["start"], 2.0);
        assert_eq!(json["params"]["end"], 10.0);
        assert_eq!(json["inputs"][0], "0:v");
        assert_eq!(json["output"], "v3");
    }

    #[test]
    fn test_bitrate_budget() {
        let budget = BitrateBudget::for_target_size(10.0, 40.0, 128, 100);
        assert_eq!(budget.video_kbps, 2048 - 128);
        assert_eq!(budget.maxrate_kbps, 2880);
        assert_eq!(budget.bufsize_kbps, 3840);

        let floor = BitrateBudget::for_target_size(1.0, 600.0, 128, 100);
        assert_eq!(floor.video_kbps, 100);

        let huge = BitrateBudget::for_target_size(1e12, 1.0, 128, 100);
        assert_eq!(huge.video_kbps, u32::MAX);
        assert_eq!(huge.maxrate_kbps, u32::MAX / 2);
    }

    #[test]
    fn test_download_selectors() {
        assert_eq!(DownloadSpec::new("u", "best", None, true).selector, "bestaudio/best");
        assert_eq!(
            DownloadSpec::new("u", "best", Some("webm"), false).selector,
            "bestvideo[ext=webm]+bestaudio[ext=webm]/best[ext=webm]/best"
        );
        assert_eq!(
            DownloadSpec::new("u", "720p", None, false).selector,
            "bestvideo[height<=720]+bestaudio/best[height<=720]"
        );
        assert_eq!(DownloadSpec::new("u", "worst", None, false).selector, "worst");
        assert_eq!(DownloadSpec::new("u", "best", None, false).extension, "mp4");
    }

    #[test]
    fn test_input_refs() {
        assert_eq!(parse_input_ref("1"), Some((1, None)));
        assert_eq!(parse_input_ref("0:a"), Some((0, Some(StreamKind::Audio))));
        assert_eq!(parse_input_ref("v3"), None);
        assert_eq!(parse_input_ref("0:s"), None);
    }
}
