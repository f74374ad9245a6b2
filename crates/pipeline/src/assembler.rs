//! Graph assembly.
//!
//! Descriptors are walked in submission order. Each fragment reads the
//! current video/audio labels of the [`PassBuilder`] and moves them forward.
//! A pass ends in exactly one terminal node; a second terminal operation, or
//! any operation after one that changes the artifact (`gif`, `extractAudio`),
//! starts a new pass reading the previous artifact.

use clipper_common::{Dimensions, MediaInfo};
use tracing::{debug, info};

use crate::error::{CompileError, Result};
use crate::fragment;
use crate::graph::{
    BitrateBudget, CompiledPlan, DownloadSpec, EncodeSpec, FilterNode, InputSource, NodeOp,
    OUTPUT_LABEL, Pass, PassInput, StreamKind, StreamLayout,
};
use crate::operation::{
    Descriptor, Encode, ExtractAudio, Gif, OpContext, OpKind, StreamRequirement,
};
use crate::settings::CompilerSettings;

/// Terminal operation recorded for the pass being built
#[derive(Debug, Clone)]
pub(crate) enum Terminal {
    Encode { ctx: OpContext, encode: Encode },
    Gif { ctx: OpContext, gif: Gif },
    ExtractAudio { ctx: OpContext, extract: ExtractAudio },
}

impl Terminal {
    /// Whether later operations must read the finished artifact
    fn closes_pass(&self) -> bool {
        !matches!(self, Terminal::Encode { .. })
    }
}

/// State carried from one pass into the next
#[derive(Debug, Clone, Copy)]
pub(crate) struct Carry {
    layout: StreamLayout,
    timeline: Option<f64>,
    canvas: Dimensions,
    video_dropped_by: Option<usize>,
    audio_dropped_by: Option<usize>,
}

pub(crate) struct PassBuilder<'a> {
    pub settings: &'a CompilerSettings,
    index: usize,
    inputs: Vec<PassInput>,
    nodes: Vec<FilterNode>,
    next_label: usize,
    /// Current video label, `None` once the stream is gone
    pub video: Option<String>,
    pub audio: Option<String>,
    /// Length of the timeline at this point, when known
    pub timeline: Option<f64>,
    /// Frame size generated sources and normalization use
    pub canvas: Dimensions,
    /// Some generated source has no end; the encode stops at the shortest stream
    pub unbounded: bool,
    terminal: Option<Terminal>,
    video_dropped_by: Option<usize>,
    audio_dropped_by: Option<usize>,
    /// Last operation applied, blamed when the pass fails validation
    last_op: Option<OpContext>,
}

impl<'a> PassBuilder<'a> {
    fn new(settings: &'a CompilerSettings, index: usize, source: InputSource, carry: Carry) -> Self {
        Self {
            settings,
            index,
            inputs: vec![PassInput {
                index: 0,
                source,
                looped: false,
            }],
            nodes: Vec::new(),
            next_label: 0,
            video: carry.layout.video.then(|| "0:v".to_string()),
            audio: carry.layout.audio.then(|| "0:a".to_string()),
            timeline: carry.timeline,
            canvas: carry.canvas,
            unbounded: false,
            terminal: None,
            video_dropped_by: carry.video_dropped_by,
            audio_dropped_by: carry.audio_dropped_by,
            last_op: None,
        }
    }

    /// Register a secondary input and return its index
    pub fn add_input(&mut self, source: InputSource, looped: bool) -> usize {
        let index = self.inputs.len();
        self.inputs.push(PassInput { index, source, looped });
        index
    }

    /// Append a node and return its output label
    pub fn push(&mut self, op: NodeOp, inputs: Vec<String>) -> String {
        let output = format!("{}{}", op.stream().prefix(), self.next_label);
        self.next_label += 1;
        self.nodes.push(FilterNode {
            id: self.nodes.len(),
            op,
            inputs,
            output: output.clone(),
        });
        output
    }

    fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.terminal.is_none()
    }

    pub fn set_terminal(&mut self, terminal: Terminal) {
        match &terminal {
            Terminal::Gif { ctx, .. } => self.drop_stream(StreamKind::Audio, ctx.index),
            Terminal::ExtractAudio { ctx, .. } => self.drop_stream(StreamKind::Video, ctx.index),
            Terminal::Encode { .. } => {}
        }
        self.terminal = Some(terminal);
    }

    fn drop_stream(&mut self, stream: StreamKind, by: usize) {
        match stream {
            StreamKind::Video if self.video_dropped_by.is_none() => self.video_dropped_by = Some(by),
            StreamKind::Audio if self.audio_dropped_by.is_none() => self.audio_dropped_by = Some(by),
            _ => {}
        }
    }

    /// Refuse to bring back a stream an earlier terminal left out of the
    /// artifact
    pub fn forbid_dropped(&self, ctx: &OpContext, stream: StreamKind) -> Result<()> {
        let (dropped_by, name) = match stream {
            StreamKind::Video => (self.video_dropped_by, "video"),
            StreamKind::Audio => (self.audio_dropped_by, "audio"),
        };
        match dropped_by {
            Some(by) => Err(ctx.unsupported(
                Some(by),
                format!("adds a {name} stream, but operation {by} produces an artifact without one"),
            )),
            None => Ok(()),
        }
    }

    fn has(&self, stream: StreamKind) -> bool {
        match stream {
            StreamKind::Video => self.video.is_some() && self.video_dropped_by.is_none(),
            StreamKind::Audio => self.audio.is_some() && self.audio_dropped_by.is_none(),
        }
    }

    /// Reject an operation whose stream is missing from the current layout
    pub fn require(&self, ctx: &OpContext, requirement: StreamRequirement) -> Result<()> {
        let (stream, dropped_by) = match requirement {
            StreamRequirement::Any => return Ok(()),
            StreamRequirement::Video => (StreamKind::Video, self.video_dropped_by),
            StreamRequirement::Audio => (StreamKind::Audio, self.audio_dropped_by),
        };
        if self.has(stream) {
            return Ok(());
        }
        let name = match stream {
            StreamKind::Video => "video",
            StreamKind::Audio => "audio",
        };
        Err(match dropped_by {
            Some(by) => ctx.unsupported(
                Some(by),
                format!("needs a {name} stream, but operation {by} leaves none"),
            ),
            None => ctx.unsupported(None, format!("needs a {name} stream, but the source has none")),
        })
    }

    /// Current video label of an operation that needs video
    pub fn video_label(&self, ctx: &OpContext) -> Result<String> {
        self.require(ctx, StreamRequirement::Video)?;
        self.video
            .clone()
            .ok_or_else(|| ctx.unsupported(None, "needs a video stream"))
    }

    /// Current video label, if the layout still has video
    pub fn video_stream(&self) -> Option<String> {
        self.has(StreamKind::Video).then(|| self.video.clone()).flatten()
    }

    /// Current audio label, if the layout still has audio
    pub fn audio_stream(&self) -> Option<String> {
        self.has(StreamKind::Audio).then(|| self.audio.clone()).flatten()
    }

    fn layout(&self) -> StreamLayout {
        StreamLayout {
            video: self.has(StreamKind::Video),
            audio: self.has(StreamKind::Audio),
        }
    }

    /// Close the pass with its terminal node and hand back what the next pass
    /// starts from
    fn finish(mut self) -> Result<(Pass, Carry)> {
        let terminal = self.terminal.take();
        let (spec, timeline) = match terminal {
            None if self.nodes.is_empty() => (EncodeSpec::copy(&self.settings.video_format), self.timeline),
            None => (self.default_encode(), self.timeline),
            Some(Terminal::Encode { ctx, encode }) => self.finish_encode(&ctx, &encode)?,
            Some(Terminal::Gif { gif, .. }) => self.finish_gif(&gif)?,
            Some(Terminal::ExtractAudio { extract, .. }) => (self.extract_audio_spec(&extract), self.timeline),
        };

        let layout = self.layout();
        let mut inputs = Vec::with_capacity(2);
        if layout.video {
            inputs.extend(self.video.clone());
        }
        if layout.audio {
            inputs.extend(self.audio.clone());
        }
        self.nodes.push(FilterNode {
            id: self.nodes.len(),
            op: NodeOp::Encode(spec),
            inputs,
            output: OUTPUT_LABEL.to_string(),
        });

        let mut pass = Pass {
            index: self.index,
            inputs: self.inputs,
            nodes: self.nodes,
            output: OUTPUT_LABEL.to_string(),
            layout,
        };
        let pruned = pass.prune_unused();
        if !pruned.is_empty() {
            debug!(pass = pass.index, labels = ?pruned, "Pruned streams left out of the artifact");
        }
        pass.validate().map_err(|error| match self.last_op {
            Some(ctx) => ctx.unsupported(None, error.to_string()),
            None => CompileError::UnsupportedCombination {
                index: 0,
                op: String::new(),
                conflicts_with: None,
                message: error.to_string(),
            },
        })?;
        debug!(pass = pass.index, nodes = pass.nodes.len(), "Assembled pass");

        let carry = Carry {
            layout,
            timeline,
            canvas: self.canvas,
            video_dropped_by: self.video_dropped_by,
            audio_dropped_by: self.audio_dropped_by,
        };
        Ok((pass, carry))
    }

    fn video_encode(&self, codec: &str, preset: &str, crf: u32) -> EncodeSpec {
        EncodeSpec {
            copy: false,
            video_codec: Some(codec.to_string()),
            preset: Some(preset.to_string()),
            crf: Some(crf),
            bitrate: None,
            audio_codec: Some(self.settings.audio_codec.clone()),
            audio_bitrate: None,
            format: Some(self.settings.video_format.clone()),
            movflags: Some(self.settings.movflags.clone()),
            shortest: self.unbounded,
            loop_count: None,
            extension: self.settings.video_format.clone(),
        }
    }

    fn default_encode(&self) -> EncodeSpec {
        let settings = self.settings;
        self.video_encode(&settings.video_codec, &settings.preset, settings.crf)
    }

    fn finish_encode(&mut self, ctx: &OpContext, encode: &Encode) -> Result<(EncodeSpec, Option<f64>)> {
        if let (Some(scale), Some(video)) = (&encode.scale, self.video_stream()) {
            let scaled = self.push(
                NodeOp::Scale {
                    size: scale.as_str().to_string(),
                    flags: None,
                },
                vec![video],
            );
            self.video = Some(scaled);
        }

        let mut spec = self.video_encode(&encode.video_codec, &encode.preset, encode.crf);
        spec.audio_codec = Some(encode.audio_codec.clone());
        spec.audio_bitrate = encode.audio_bitrate.clone();
        if let Some(movflags) = &encode.movflags {
            spec.movflags = Some(movflags.clone());
        }
        if ctx.kind == OpKind::Compress && spec.audio_bitrate.is_none() {
            spec.audio_bitrate = Some(format!("{}k", self.settings.compress_audio_kbps));
        }

        if let Some(target_size_mb) = encode.target_size_mb {
            let duration = self.timeline.ok_or_else(|| CompileError::ProbeFailure {
                index: Some(ctx.index),
                message: "target_size_mb needs the media duration, which is unknown".to_string(),
            })?;
            spec.crf = None;
            spec.bitrate = Some(BitrateBudget::for_target_size(
                target_size_mb,
                duration,
                self.settings.compress_audio_kbps,
                self.settings.min_video_kbps,
            ));
        }
        Ok((spec, self.timeline))
    }

    fn finish_gif(&mut self, gif: &Gif) -> Result<(EncodeSpec, Option<f64>)> {
        let Some(mut video) = self.video_stream() else {
            return Ok((self.default_encode(), self.timeline));
        };

        let end = gif.duration.map(|duration| gif.start_time + duration);
        let end = match (end, self.timeline) {
            (Some(end), Some(timeline)) => Some(end.min(timeline)),
            (end, timeline) => end.or(timeline),
        };
        if gif.start_time > 0.0 || gif.duration.is_some() {
            video = self.push(NodeOp::Trim { start: gif.start_time, end }, vec![video]);
        }
        video = self.push(NodeOp::Fps { rate: gif.fps }, vec![video]);
        video = self.push(
            NodeOp::Scale {
                size: gif.scale.as_str().to_string(),
                flags: Some("lanczos".to_string()),
            },
            vec![video],
        );
        let palette = self.push(NodeOp::Palettegen, vec![video.clone()]);
        video = self.push(NodeOp::Paletteuse, vec![video, palette]);
        self.video = Some(video);

        let timeline = end.map(|end| (end - gif.start_time).max(0.0));
        let spec = EncodeSpec {
            copy: false,
            video_codec: None,
            preset: None,
            crf: None,
            bitrate: None,
            audio_codec: None,
            audio_bitrate: None,
            format: Some("gif".to_string()),
            movflags: None,
            shortest: false,
            loop_count: Some(0),
            extension: "gif".to_string(),
        };
        Ok((spec, timeline))
    }

    fn extract_audio_spec(&self, extract: &ExtractAudio) -> EncodeSpec {
        let bitrate = extract.format.uses_bitrate().then(|| {
            extract
                .bitrate
                .clone()
                .unwrap_or_else(|| self.settings.extract_audio_bitrate.clone())
        });
        EncodeSpec {
            copy: false,
            video_codec: None,
            preset: None,
            crf: None,
            bitrate: None,
            audio_codec: Some(extract.format.codec().to_string()),
            audio_bitrate: bitrate,
            format: Some(extract.format.container().to_string()),
            movflags: None,
            shortest: self.unbounded,
            loop_count: None,
            extension: extract.format.extension().to_string(),
        }
    }
}

fn download_pass(ctx: &OpContext, media: &str, download: &crate::operation::Download) -> Result<Pass> {
    let url = download.url.as_deref().unwrap_or(media);
    if url.trim().is_empty() {
        return Err(ctx.missing("url"));
    }
    let spec = DownloadSpec::new(url, &download.quality, download.format.as_deref(), download.audio_only);
    let layout = StreamLayout {
        video: !download.audio_only,
        audio: true,
    };
    let pass = Pass {
        index: 0,
        inputs: Vec::new(),
        nodes: vec![FilterNode {
            id: 0,
            op: NodeOp::Download(spec),
            inputs: Vec::new(),
            output: OUTPUT_LABEL.to_string(),
        }],
        output: OUTPUT_LABEL.to_string(),
        layout,
    };
    pass.validate().map_err(|error| ctx.unsupported(None, error.to_string()))?;
    Ok(pass)
}

/// Build the plan for validated descriptors.
///
/// `media` describes the source when it was probed; without it the timeline
/// length is unknown and both streams are assumed present.
pub fn assemble(
    source: &str,
    descriptors: &[Descriptor],
    media: Option<&MediaInfo>,
    settings: &CompilerSettings,
) -> Result<CompiledPlan> {
    let mut passes = Vec::new();
    let mut carry = Carry {
        layout: media
            .map(|info| StreamLayout {
                video: info.has_video,
                audio: info.has_audio,
            })
            .unwrap_or(StreamLayout::BOTH),
        timeline: media.map(|info| info.duration),
        canvas: media.and_then(MediaInfo::dimensions).unwrap_or(settings.canvas),
        video_dropped_by: None,
        audio_dropped_by: None,
    };
    let mut input = InputSource::Media(source.to_string());
    let mut ops = descriptors.iter().enumerate().peekable();

    if let Some((index, Descriptor::DownloadFromYoutube(download))) = ops.peek() {
        let ctx = OpContext::new(*index, OpKind::DownloadFromYoutube);
        passes.push(download_pass(&ctx, source, download)?);
        carry.layout = passes[0].layout;
        carry.timeline = None;
        carry.canvas = settings.canvas;
        input = InputSource::Pass(0);
        ops.next();
    }

    let mut builder = PassBuilder::new(settings, passes.len(), input, carry);
    for (index, descriptor) in ops {
        let ctx = OpContext::new(index, descriptor.kind());
        let split = match &builder.terminal {
            Some(terminal) => terminal.closes_pass() || ctx.kind.is_terminal(),
            None => false,
        };
        if split {
            let (pass, carry) = builder.finish()?;
            info!(pass = pass.index, operation = index, op = %ctx.kind, "Starting a new pass");
            let previous = pass.index;
            passes.push(pass);
            builder = PassBuilder::new(settings, passes.len(), InputSource::Pass(previous), carry);
        }
        builder.last_op = Some(ctx);
        fragment::apply(&mut builder, &ctx, descriptor)?;
    }
    // A download with nothing after it is already the artifact
    if !(builder.is_empty() && !passes.is_empty()) {
        let (pass, _) = builder.finish()?;
        passes.push(pass);
    }

    Ok(CompiledPlan {
        media: source.to_string(),
        passes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::parse;
    use serde_json::json;

    fn descriptors(ops: serde_json::Value) -> Vec<Descriptor> {
        ops.as_array()
            .unwrap()
            .iter()
            .enumerate()
            .map(|(i, op)| parse(i, op).unwrap())
            .collect()
    }

    fn compile(ops: serde_json::Value, duration: Option<f64>) -> Result<CompiledPlan> {
        let media = duration.map(MediaInfo::with_duration);
        assemble("a.mp4", &descriptors(ops), media.as_ref(), &CompilerSettings::default())
    }

    fn encode_of(pass: &Pass) -> &EncodeSpec {
        match &pass.terminal().unwrap().op {
            NodeOp::Encode(spec) => spec,
            other => panic!("expected encode, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_pipeline_copies() {
        let plan = compile(json!([]), Some(10.0)).unwrap();
        assert_eq!(plan.passes.len(), 1);
        let pass = &plan.passes[0];
        assert_eq!(pass.nodes.len(), 1);
        assert!(encode_of(pass).copy);
        assert_eq!(pass.nodes[0].inputs, vec!["0:v", "0:a"]);
    }

    #[test]
    fn test_filters_get_default_encode() {
        let plan = compile(json!([{"op": "trim", "start_sec": 1, "end_sec": 3}]), Some(10.0)).unwrap();
        let spec = encode_of(&plan.passes[0]);
        assert!(!spec.copy);
        assert_eq!(spec.video_codec.as_deref(), Some("libx264"));
        assert_eq!(spec.movflags.as_deref(), Some("+frag_keyframe+empty_moov"));
    }

    #[test]
    fn test_second_terminal_opens_pass() {
        let plan = compile(
            json!([{"op": "transcode", "codec": "h264"}, {"op": "gif", "duration": 2}]),
            Some(10.0),
        )
        .unwrap();
        assert_eq!(plan.passes.len(), 2);
        assert_eq!(plan.passes[1].inputs[0].source, InputSource::Pass(0));
        assert_eq!(encode_of(&plan.passes[0]).video_codec.as_deref(), Some("h264"));
        assert_eq!(encode_of(&plan.passes[1]).format.as_deref(), Some("gif"));
        assert!(!plan.passes[1].layout.audio);
    }

    #[test]
    fn test_filters_after_transcode_share_the_pass() {
        let plan = compile(
            json!([{"op": "transcode", "crf": 28}, {"op": "text", "text": "hi", "start_sec": 0, "end_sec": 1}]),
            Some(10.0),
        )
        .unwrap();
        assert_eq!(plan.passes.len(), 1);
        assert_eq!(encode_of(&plan.passes[0]).crf, Some(28));
    }

    #[test]
    fn test_video_operation_after_extract_audio() {
        let error = compile(
            json!([{"op": "extractAudio"}, {"op": "watermark", "path": "logo.png"}]),
            Some(10.0),
        )
        .unwrap_err();
        match error {
            CompileError::UnsupportedCombination { index, conflicts_with, .. } => {
                assert_eq!(index, 1);
                assert_eq!(conflicts_with, Some(0));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_extract_audio_needs_audio() {
        let mut info = MediaInfo::with_duration(10.0);
        info.has_audio = false;
        let error = assemble(
            "a.mp4",
            &descriptors(json!([{"op": "extractAudio", "format": "mp3"}])),
            Some(&info),
            &CompilerSettings::default(),
        )
        .unwrap_err();
        assert!(matches!(error, CompileError::UnsupportedCombination { conflicts_with: None, .. }));
    }

    #[test]
    fn test_extract_audio_encode() {
        let plan = compile(json!([{"op": "extractAudio", "format": "aac"}]), Some(10.0)).unwrap();
        let pass = &plan.passes[0];
        let spec = encode_of(pass);
        assert_eq!(spec.audio_codec.as_deref(), Some("aac"));
        assert_eq!(spec.format.as_deref(), Some("ipod"));
        assert_eq!(spec.audio_bitrate.as_deref(), Some("192k"));
        assert_eq!(pass.terminal().unwrap().inputs, vec!["0:a"]);
    }

    #[test]
    fn test_compress_budget_needs_duration() {
        let plan = compile(json!([{"op": "compress", "target_size_mb": 10}]), Some(40.0)).unwrap();
        let spec = encode_of(&plan.passes[0]);
        assert_eq!(spec.bitrate.unwrap().video_kbps, 1920);
        assert_eq!(spec.crf, None);
        assert_eq!(spec.audio_bitrate.as_deref(), Some("128k"));

        let error = compile(json!([{"op": "compress", "target_size_mb": 10}]), None).unwrap_err();
        assert!(matches!(error, CompileError::ProbeFailure { index: Some(0), .. }));
    }

    #[test]
    fn test_download_must_come_first() {
        let only = compile(json!([{"op": "download_from_youtube", "audio_only": true}]), None).unwrap();
        assert_eq!(only.passes.len(), 1);
        assert!(!only.passes[0].layout.video);

        let plan = compile(json!([{"op": "download_from_youtube", "quality": "720p"}, {"op": "gif"}]), None).unwrap();
        assert_eq!(plan.passes.len(), 2);
        assert!(matches!(plan.passes[0].nodes[0].op, NodeOp::Download(_)));
        assert_eq!(plan.passes[1].inputs[0].source, InputSource::Pass(0));

        let error = compile(json!([{"op": "trim", "start_sec": 1}, {"op": "download_from_youtube"}]), None).unwrap_err();
        assert!(matches!(error, CompileError::UnsupportedCombination { index: 1, .. }));
    }

    #[test]
    fn test_gif_tail() {
        let plan = compile(json!([{"op": "gif", "start_time": 1, "duration": 3, "fps": 12}]), Some(10.0)).unwrap();
        let kinds: Vec<&NodeOp> = plan.passes[0].nodes.iter().map(|node| &node.op).collect();
        assert!(matches!(kinds[0], NodeOp::Trim { start, end: Some(end) } if *start == 1.0 && *end == 4.0));
        assert!(matches!(kinds[1], NodeOp::Fps { rate: 12 }));
        assert!(matches!(kinds[3], NodeOp::Palettegen));
        assert!(matches!(kinds[4], NodeOp::Paletteuse));
        assert_eq!(plan.passes[0].terminal().unwrap().inputs, vec!["v4"]);
    }
}
