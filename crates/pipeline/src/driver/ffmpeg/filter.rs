//! Rendering of a [`Pass`] into ffmpeg and yt-dlp arguments.
//!
//! Node labels are used as filter pad names. ffmpeg lets a filter output be
//! consumed only once, so labels read by several nodes (or by a node and the
//! encoder) get a `split`/`asplit` right after the node producing them.

use std::collections::{HashMap, VecDeque};

use crate::driver::DriverError;
use crate::graph::{
    DownloadSpec, DrawText, EncodeSpec, GraphError, NodeOp, Pass, StreamKind, parse_input_ref,
};

const ATEMPO_MIN: f64 = 0.5;
const ATEMPO_MAX: f64 = 2.0;

/// `-filter_complex` and `-map` arguments of one pass
#[derive(Debug, Clone, PartialEq)]
pub struct FilterGraph {
    pub filter_complex: Option<String>,
    pub maps: Vec<String>,
}

/// Print a float the way filters read it, keeping one decimal on whole numbers
fn number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

/// Escape free text for an option value inside a filtergraph.
///
/// The graph parser and the option parser each strip one level of
/// backslashes, so every special character gets three.
pub fn escape_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '\'' | ':' | ',' | ';' | '[' | ']' | '=') {
            escaped.push_str("\\\\\\");
        }
        escaped.push(c);
    }
    escaped
}

/// `atempo` only accepts factors in `[0.5, 2.0]`; larger changes are chained
pub fn atempo_chain(factor: f64) -> String {
    let mut stages = Vec::new();
    let mut remaining = factor;
    while remaining > ATEMPO_MAX {
        stages.push(format!("atempo={}", number(ATEMPO_MAX)));
        remaining /= ATEMPO_MAX;
    }
    while remaining < ATEMPO_MIN {
        stages.push(format!("atempo={}", number(ATEMPO_MIN)));
        remaining /= ATEMPO_MIN;
    }
    if (remaining - 1.0).abs() > f64::EPSILON || stages.is_empty() {
        stages.push(format!("atempo={}", number(remaining)));
    }
    stages.join(",")
}

fn trim_args(start: f64, end: Option<f64>) -> String {
    match end {
        Some(end) => format!("start={}:end={}", number(start), number(end)),
        None => format!("start={}", number(start)),
    }
}

fn drawtext(draw: &DrawText) -> String {
    let mut options = vec![
        format!("text={}", escape_text(&draw.text)),
        "expansion=none".to_string(),
        format!("fontsize={}", draw.fontsize),
        format!("x='{}'", draw.x),
        format!("y='{}'", draw.y),
    ];
    if let Some(fontfile) = &draw.fontfile {
        options.push(format!("fontfile={}", escape_text(fontfile)));
    }
    if let Some(fontcolor) = &draw.fontcolor {
        options.push(format!("fontcolor={fontcolor}"));
    }
    if draw.boxed {
        options.push("box=1".to_string());
    }
    if let Some(boxcolor) = &draw.boxcolor {
        options.push(format!("boxcolor={boxcolor}"));
    }
    if let Some(boxborderw) = draw.boxborderw {
        options.push(format!("boxborderw={boxborderw}"));
    }
    if let Some(alpha) = &draw.alpha {
        options.push(format!("alpha='{alpha}'"));
    }
    let enable = match draw.end {
        Some(end) => format!("between(t,{},{})", number(draw.start), number(end)),
        None => format!("gte(t,{})", number(draw.start)),
    };
    options.push(format!("enable='{enable}'"));
    format!("drawtext={}", options.join(":"))
}

/// Filter chain of one node, without pads
pub fn node_filter(op: &NodeOp) -> Option<String> {
    let filter = match op {
        NodeOp::Trim { start, end } => format!("trim={},setpts=PTS-STARTPTS", trim_args(*start, *end)),
        NodeOp::Atrim { start, end } => format!("atrim={},asetpts=PTS-STARTPTS", trim_args(*start, *end)),
        NodeOp::Speed { range, factor } => {
            let speed = format!("setpts=PTS/{}", number(*factor));
            match range {
                Some(range) => format!("trim={},setpts=PTS-STARTPTS,{speed}", trim_args(range.start, range.end)),
                None => speed,
            }
        }
        NodeOp::Aspeed { range, factor } => {
            let tempo = atempo_chain(*factor);
            match range {
                Some(range) => format!("atrim={},asetpts=PTS-STARTPTS,{tempo}", trim_args(range.start, range.end)),
                None => tempo,
            }
        }
        NodeOp::Concat { n } => format!("concat=n={n}:v=1:a=0"),
        NodeOp::Aconcat { n } => format!("concat=n={n}:v=0:a=1"),
        NodeOp::DrawText(draw) => drawtext(draw),
        NodeOp::Color { color, size, duration, rate } => match duration {
            Some(duration) => format!("color=c={color}:s={size}:d={}:r={rate}", number(*duration)),
            None => format!("color=c={color}:s={size}:r={rate}"),
        },
        NodeOp::Opacity { opacity } => format!("format=rgba,colorchannelmixer=aa={opacity}"),
        NodeOp::Overlay { x, y, shortest } => {
            let mut filter = format!("overlay=x='{x}':y='{y}'");
            if *shortest {
                filter.push_str(":shortest=1");
            }
            filter
        }
        NodeOp::Amix { mix_weight } => format!("amix=inputs=2:duration=first:weights='1 {mix_weight}'"),
        NodeOp::Volume { level } => format!("volume={level}"),
        NodeOp::Scale { size, flags } => match flags {
            Some(flags) => format!("scale={size}:flags={flags}"),
            None => format!("scale={size}"),
        },
        NodeOp::Fit { size, color } => format!(
            "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:color={color},setsar=1",
            w = size.width,
            h = size.height
        ),
        NodeOp::Fps { rate } => format!("fps={rate}"),
        NodeOp::Aformat { sample_rate, channel_layout } => {
            format!("aformat=sample_rates={sample_rate}:channel_layouts={channel_layout}")
        }
        NodeOp::Palettegen => "palettegen".to_string(),
        NodeOp::Paletteuse => "paletteuse".to_string(),
        NodeOp::Encode(_) | NodeOp::Download(_) => return None,
    };
    Some(filter)
}

/// Pad name usable as a split output; `0:v` is only valid as an input pad
fn pad_name(label: &str) -> String {
    label.replace(':', "_")
}

/// `split` of a label read `count` times, with the pads it hands out
fn split_chain(label: &str, kind: StreamKind, count: usize) -> Option<(String, VecDeque<String>)> {
    if count < 2 {
        return None;
    }
    let outputs: VecDeque<String> = (0..count).map(|i| format!("{}_s{i}", pad_name(label))).collect();
    let filter = match kind {
        StreamKind::Video => "split",
        StreamKind::Audio => "asplit",
    };
    let pads: String = outputs.iter().map(|pad| format!("[{pad}]")).collect();
    Some((format!("[{label}]{filter}={count}{pads}"), outputs))
}

fn next_pad(pads: &mut HashMap<String, VecDeque<String>>, label: &str) -> String {
    pads.get_mut(label)
        .and_then(VecDeque::pop_front)
        .unwrap_or_else(|| label.to_string())
}

/// Build the filter graph of a pass.
///
/// Source streams read only by the encoder are mapped directly.
pub fn filter_graph(pass: &Pass) -> Result<FilterGraph, DriverError> {
    let terminal = pass.terminal().ok_or(GraphError::Terminal {
        pass: pass.index,
        found: 0,
    })?;
    let filters = &pass.nodes[..pass.nodes.len() - 1];

    let mut readers: HashMap<&str, usize> = HashMap::new();
    for node in filters {
        for input in &node.inputs {
            *readers.entry(input.as_str()).or_default() += 1;
        }
    }
    for input in &terminal.inputs {
        if parse_input_ref(input).is_none() {
            *readers.entry(input.as_str()).or_default() += 1;
        }
    }
    let count = |label: &str| readers.get(label).copied().unwrap_or(0);

    let mut chains = Vec::new();
    let mut pads: HashMap<String, VecDeque<String>> = HashMap::new();

    let mut sources: Vec<&str> = filters
        .iter()
        .flat_map(|node| node.inputs.iter().map(String::as_str))
        .filter(|label| parse_input_ref(label).is_some())
        .collect();
    sources.sort_unstable();
    sources.dedup();
    for label in sources {
        let kind = pass.stream_of(label).unwrap_or(StreamKind::Video);
        if let Some((chain, outputs)) = split_chain(label, kind, count(label)) {
            chains.push(chain);
            pads.insert(label.to_string(), outputs);
        }
    }

    let mut dangling = Vec::new();
    for node in filters {
        let filter = node_filter(&node.op).ok_or(GraphError::Terminal {
            pass: pass.index,
            found: 2,
        })?;
        let inputs: String = node
            .inputs
            .iter()
            .map(|input| format!("[{}]", next_pad(&mut pads, input)))
            .collect();
        chains.push(format!("{inputs}{filter}[{}]", node.output));

        let readers = count(&node.output);
        if readers == 0 {
            dangling.push(node);
        }
        if let Some((chain, outputs)) = split_chain(&node.output, node.op.stream(), readers) {
            chains.push(chain);
            pads.insert(node.output.clone(), outputs);
        }
    }
    for node in dangling {
        let sink = match node.op.stream() {
            StreamKind::Video => "nullsink",
            StreamKind::Audio => "anullsink",
        };
        chains.push(format!("[{}]{sink}", node.output));
    }

    let maps = terminal
        .inputs
        .iter()
        .map(|input| match parse_input_ref(input) {
            Some(_) => format!("{input}?"),
            None => format!("[{}]", next_pad(&mut pads, input)),
        })
        .collect();

    Ok(FilterGraph {
        filter_complex: (!chains.is_empty()).then(|| chains.join(";")),
        maps,
    })
}

/// Output arguments of an encode node
pub fn encode_args(spec: &EncodeSpec, pass: &Pass) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    let mut push = |flag: &str, value: String| {
        args.push(flag.to_string());
        args.push(value);
    };
    if spec.copy {
        push("-c", "copy".to_string());
    } else {
        if pass.layout.video {
            if let Some(codec) = &spec.video_codec {
                push("-c:v", codec.clone());
            }
            if let Some(preset) = &spec.preset {
                push("-preset", preset.clone());
            }
            if let Some(crf) = spec.crf {
                push("-crf", crf.to_string());
            }
            if let Some(budget) = spec.bitrate {
                push("-b:v", format!("{}k", budget.video_kbps));
                push("-maxrate", format!("{}k", budget.maxrate_kbps));
                push("-bufsize", format!("{}k", budget.bufsize_kbps));
            }
        }
        if pass.layout.audio {
            if let Some(codec) = &spec.audio_codec {
                push("-c:a", codec.clone());
            }
            if let Some(bitrate) = &spec.audio_bitrate {
                push("-b:a", bitrate.clone());
            }
        }
    }
    if let Some(format) = &spec.format {
        push("-f", format.clone());
    }
    if let Some(movflags) = &spec.movflags {
        push("-movflags", movflags.clone());
    }
    if let Some(loop_count) = spec.loop_count {
        push("-loop", loop_count.to_string());
    }
    if !pass.layout.video {
        args.push("-vn".to_string());
    }
    if !pass.layout.audio {
        args.push("-an".to_string());
    }
    if spec.shortest {
        args.push("-shortest".to_string());
    }
    args
}

/// Full ffmpeg argument list for an encode pass
pub fn ffmpeg_args(pass: &Pass, inputs: &[String], output: &str) -> Result<Vec<String>, DriverError> {
    let terminal = pass.terminal().ok_or(GraphError::Terminal {
        pass: pass.index,
        found: 0,
    })?;
    let NodeOp::Encode(spec) = &terminal.op else {
        return Err(DriverError::Execution(format!(
            "pass {} does not end in an encode node",
            pass.index
        )));
    };
    if inputs.len() != pass.inputs.len() {
        return Err(DriverError::Execution(format!(
            "pass {} needs {} inputs, got {}",
            pass.index,
            pass.inputs.len(),
            inputs.len()
        )));
    }

    let mut args = vec!["-hide_banner".to_string(), "-y".to_string()];
    for (input, path) in pass.inputs.iter().zip(inputs) {
        if input.looped {
            args.extend(["-stream_loop".to_string(), "-1".to_string()]);
        }
        args.extend(["-i".to_string(), path.clone()]);
    }

    let graph = filter_graph(pass)?;
    if let Some(filter_complex) = graph.filter_complex {
        args.extend(["-filter_complex".to_string(), filter_complex]);
    }
    for map in graph.maps {
        args.extend(["-map".to_string(), map]);
    }
    args.extend(encode_args(spec, pass));
    args.push(output.to_string());
    Ok(args)
}

/// yt-dlp arguments writing to `template` (which should end in `.%(ext)s`)
pub fn ytdlp_args(spec: &DownloadSpec, template: &str) -> Vec<String> {
    let mut args = vec!["--no-playlist".to_string(), "-f".to_string(), spec.selector.clone()];
    if spec.audio_only {
        args.extend(["-x", "--audio-format", "mp3"].map(String::from));
    } else {
        args.extend(["--merge-output-format".to_string(), spec.extension.clone()]);
    }
    args.extend(["-o".to_string(), template.to_string(), spec.url.clone()]);
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{FilterNode, InputSource, OUTPUT_LABEL, PassInput, StreamLayout};
    use clipper_common::Dimensions;

    fn node(id: usize, op: NodeOp, inputs: &[&str], output: &str) -> FilterNode {
        FilterNode {
            id,
            op,
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            output: output.to_string(),
        }
    }

    fn encode() -> EncodeSpec {
        EncodeSpec {
            copy: false,
            video_codec: Some("libx264".to_string()),
            preset: Some("medium".to_string()),
            crf: Some(23),
            bitrate: None,
            audio_codec: Some("aac".to_string()),
            audio_bitrate: None,
            format: Some("mp4".to_string()),
            movflags: Some("+frag_keyframe+empty_moov".to_string()),
            shortest: false,
            loop_count: None,
            extension: "mp4".to_string(),
        }
    }

    fn pass(inputs: usize, nodes: Vec<FilterNode>) -> Pass {
        Pass {
            index: 0,
            inputs: (0..inputs)
                .map(|index| PassInput {
                    index,
                    source: InputSource::Media(format!("in{index}.mp4")),
                    looped: false,
                })
                .collect(),
            nodes,
            output: OUTPUT_LABEL.to_string(),
            layout: StreamLayout::BOTH,
        }
    }

    #[test]
    fn test_atempo_chain() {
        assert_eq!(atempo_chain(4.0), "atempo=2.0,atempo=2.0");
        assert_eq!(atempo_chain(1.5), "atempo=1.5");
        assert_eq!(atempo_chain(0.25), "atempo=0.5,atempo=0.5");
        assert_eq!(atempo_chain(1.0), "atempo=1.0");
    }

    #[test]
    fn test_escape_text() {
        assert_eq!(escape_text("I am"), "I am");
        assert_eq!(escape_text("it's 5:00"), "it\\\\\\'s 5\\\\\\:00");
    }

    #[test]
    fn test_drawtext_filter() {
        let draw = DrawText {
            text: "hi".to_string(),
            start: 0.0,
            end: Some(1.5),
            fontsize: 24,
            x: "10".to_string(),
            y: "(h-text_h)/2".to_string(),
            fontfile: None,
            fontcolor: Some("white".to_string()),
            boxed: true,
            boxcolor: Some("black@0.6".to_string()),
            boxborderw: Some(12),
            alpha: None,
        };
        assert_eq!(
            node_filter(&NodeOp::DrawText(draw)).unwrap(),
            "drawtext=text=hi:expansion=none:fontsize=24:x='10':y='(h-text_h)/2':fontcolor=white:box=1:boxcolor=black@0.6:boxborderw=12:enable='between(t,0.0,1.5)'"
        );
    }

    #[test]
    fn test_simple_filters() {
        assert_eq!(
            node_filter(&NodeOp::Trim { start: 2.0, end: Some(10.0) }).unwrap(),
            "trim=start=2.0:end=10.0,setpts=PTS-STARTPTS"
        );
        assert_eq!(
            node_filter(&NodeOp::Opacity { opacity: 0.7 }).unwrap(),
            "format=rgba,colorchannelmixer=aa=0.7"
        );
        assert_eq!(
            node_filter(&NodeOp::Amix { mix_weight: 0.5 }).unwrap(),
            "amix=inputs=2:duration=first:weights='1 0.5'"
        );
        assert_eq!(
            node_filter(&NodeOp::Color {
                color: "black".to_string(),
                size: Dimensions::new(1920, 1080),
                duration: Some(5.0),
                rate: 30,
            })
            .unwrap(),
            "color=c=black:s=1920x1080:d=5.0:r=30"
        );
        assert_eq!(node_filter(&NodeOp::Speed { range: None, factor: 2.0 }).unwrap(), "setpts=PTS/2.0");
        assert!(node_filter(&NodeOp::Encode(encode())).is_none());
    }

    #[test]
    fn test_copy_pass_maps_sources() {
        let pass = pass(
            1,
            vec![node(0, NodeOp::Encode(EncodeSpec::copy("mp4")), &["0:v", "0:a"], OUTPUT_LABEL)],
        );
        let graph = filter_graph(&pass).unwrap();
        assert_eq!(graph.filter_complex, None);
        assert_eq!(graph.maps, vec!["0:v?", "0:a?"]);

        let args = ffmpeg_args(&pass, &["in.mp4".to_string()], "out.mp4").unwrap();
        assert_eq!(args, ["-hide_banner", "-y", "-i", "in.mp4", "-map", "0:v?", "-map", "0:a?", "-c", "copy", "out.mp4"]);
    }

    #[test]
    fn test_chain_and_untouched_audio() {
        let pass = pass(
            1,
            vec![
                node(0, NodeOp::Fps { rate: 30 }, &["0:v"], "v0"),
                node(1, NodeOp::Scale { size: "480:-1".to_string(), flags: None }, &["v0"], "v1"),
                node(2, NodeOp::Encode(encode()), &["v1", "0:a"], OUTPUT_LABEL),
            ],
        );
        let graph = filter_graph(&pass).unwrap();
        assert_eq!(graph.filter_complex.as_deref(), Some("[0:v]fps=30[v0];[v0]scale=480:-1[v1]"));
        assert_eq!(graph.maps, vec!["[v1]", "0:a?"]);
    }

    #[test]
    fn test_shared_labels_are_split() {
        let pass = pass(
            1,
            vec![
                node(0, NodeOp::Palettegen, &["0:v"], "v0"),
                node(1, NodeOp::Paletteuse, &["0:v", "v0"], "v1"),
                node(2, NodeOp::Encode(encode()), &["v1"], OUTPUT_LABEL),
            ],
        );
        let graph = filter_graph(&pass).unwrap();
        assert_eq!(
            graph.filter_complex.as_deref(),
            Some("[0:v]split=2[0_v_s0][0_v_s1];[0_v_s0]palettegen[v0];[0_v_s1][v0]paletteuse[v1]")
        );
    }

    #[test]
    fn test_label_read_by_node_and_encoder() {
        let pass = pass(
            1,
            vec![
                node(0, NodeOp::Volume { level: 0.5 }, &["0:a"], "a0"),
                node(1, NodeOp::Aformat { sample_rate: 48000, channel_layout: "stereo".to_string() }, &["a0"], "a1"),
                node(2, NodeOp::Encode(encode()), &["0:v", "a0"], OUTPUT_LABEL),
            ],
        );
        let graph = filter_graph(&pass).unwrap();
        assert_eq!(
            graph.filter_complex.as_deref(),
            Some("[0:a]volume=0.5[a0];[a0]asplit=2[a0_s0][a0_s1];[a0_s0]aformat=sample_rates=48000:channel_layouts=stereo[a1];[a1]anullsink")
        );
        assert_eq!(graph.maps, vec!["0:v?", "[a0_s1]"]);
    }

    #[test]
    fn test_looped_input_and_output_flags() {
        let mut pass = pass(
            2,
            vec![
                node(0, NodeOp::Volume { level: 1.0 }, &["1:a"], "a0"),
                node(1, NodeOp::Encode(EncodeSpec { shortest: true, ..encode() }), &["0:v", "a0"], OUTPUT_LABEL),
            ],
        );
        pass.inputs[1].looped = true;
        let args = ffmpeg_args(&pass, &["a.mp4".to_string(), "song.mp3".to_string()], "out.mp4").unwrap();
        let joined = args.join(" ");
        assert!(joined.contains("-i a.mp4 -stream_loop -1 -i song.mp3"));
        assert!(joined.contains("-c:v libx264 -preset medium -crf 23 -c:a aac"));
        assert!(joined.contains("-movflags +frag_keyframe+empty_moov"));
        assert!(joined.ends_with("-shortest out.mp4"));
    }

    #[test]
    fn test_audio_only_layout() {
        let mut pass = pass(1, vec![node(0, NodeOp::Encode(encode()), &["0:a"], OUTPUT_LABEL)]);
        pass.layout = StreamLayout { video: false, audio: true };
        let args = encode_args(&encode(), &pass);
        assert!(!args.contains(&"-c:v".to_string()));
        assert!(args.contains(&"-vn".to_string()));
    }

    #[test]
    fn test_input_count_mismatch() {
        let pass = pass(2, vec![node(0, NodeOp::Encode(encode()), &["0:v"], OUTPUT_LABEL)]);
        assert!(matches!(
            ffmpeg_args(&pass, &["a.mp4".to_string()], "out.mp4"),
            Err(DriverError::Execution(_))
        ));
    }

    #[test]
    fn test_ytdlp_args() {
        let spec = DownloadSpec::new("https://youtu.be/x", "720p", None, false);
        assert_eq!(
            ytdlp_args(&spec, "/tmp/pass_0.%(ext)s"),
            [
                "--no-playlist",
                "-f",
                "bestvideo[height<=720]+bestaudio/best[height<=720]",
                "--merge-output-format",
                "mp4",
                "-o",
                "/tmp/pass_0.%(ext)s",
                "https://youtu.be/x",
            ]
        );
        let audio = DownloadSpec::new("https://youtu.be/x", "best", None, true);
        assert!(ytdlp_args(&audio, "t").join(" ").contains("-f bestaudio/best -x --audio-format mp3"));
    }
}
