use std::collections::HashSet;

use clipper_common::MediaInfo;
use pipeline::driver::{DriverError, MediaProbe};
use pipeline::graph::{DrawText, InputSource, NodeOp, Pass};
use pipeline::{CompileError, CompiledPlan, Compiler, EditRequest, ErrorKind};
use serde_json::{Value, json};

const DEMO: &str = include_str!("../../../demos/launch.json");

/// Probe stand-in returning fixed metadata
struct StaticProbe {
    info: MediaInfo,
}

impl MediaProbe for StaticProbe {
    fn probe(&self, _media: &str) -> Result<MediaInfo, DriverError> {
        Ok(self.info.clone())
    }
}

fn request(operations: Value) -> EditRequest {
    EditRequest::new("a.mp4", operations.as_array().cloned().unwrap_or_default())
}

fn compile(operations: Value, duration: f64) -> Result<CompiledPlan, CompileError> {
    Compiler::default().compile(&request(operations), Some(&MediaInfo::with_duration(duration)))
}

fn drawtexts(pass: &Pass) -> Vec<&DrawText> {
    pass.nodes
        .iter()
        .filter_map(|node| match &node.op {
            NodeOp::DrawText(draw) => Some(draw),
            _ => None,
        })
        .collect()
}

fn assert_close(actual: f64, expected: f64) {
    assert!((actual - expected).abs() < 1e-9, "{actual} != {expected}");
}

#[test]
fn test_compile_is_deterministic() {
    let request = EditRequest::from_json(DEMO).unwrap();
    let media = MediaInfo::with_duration(20.0);
    let first = Compiler::default().compile(&request, Some(&media)).unwrap();
    let second = Compiler::default().compile(&request, Some(&media)).unwrap();
    assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());
}

#[test]
fn test_labels_are_unique_under_karaoke_expansion() {
    let plan = compile(
        json!([
            {"op": "karaoke", "sentence": "one two three four five six", "start_sec": 0, "end_sec": 3},
            {"op": "karaoke", "sentence": "seven eight nine", "start_sec": 3, "end_sec": 6},
            {"op": "text", "segments": [
                {"text": "a", "start_sec": 0, "end_sec": 1},
                {"text": "b", "start_sec": 0.5, "end_sec": 2}
            ]},
            {"op": "speed", "segments": [{"start_sec": 1, "end_sec": 2, "speed": 2}]}
        ]),
        10.0,
    )
    .unwrap();

    for pass in &plan.passes {
        let mut seen = HashSet::new();
        for node in &pass.nodes {
            assert!(seen.insert(node.output.as_str()), "duplicate label {}", node.output);
        }
        pass.validate().unwrap();
    }
    // 1 + 6 words, 1 + 3 words, 2 segments
    assert_eq!(drawtexts(&plan.passes[0]).len(), 7 + 4 + 2);
}

#[test]
fn test_karaoke_words_cover_the_range() {
    let plan = compile(
        json!([{"op": "karaoke", "sentence": "a b c d e f g", "start_sec": 1, "end_sec": 4.3}]),
        10.0,
    )
    .unwrap();
    let draws = drawtexts(&plan.passes[0]);
    let words = &draws[1..];
    assert_eq!(words.len(), 7);

    let total: f64 = words.iter().map(|w| w.end.unwrap() - w.start).sum();
    assert_close(total, 3.3);
    assert_close(words[0].start, 1.0);
    assert_close(words[6].end.unwrap(), 4.3);
    for pair in words.windows(2) {
        assert_eq!(pair[0].end, Some(pair[1].start));
    }
}

#[test]
fn test_overlapping_speed_segments_conflict() {
    let err = compile(
        json!([{"op": "speed", "segments": [
            {"start_sec": 0, "end_sec": 5, "speed": 1.0},
            {"start_sec": 3, "end_sec": 8, "speed": 2.0}
        ]}]),
        10.0,
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConflictingTimeRange);
    assert_eq!(err.index(), Some(0));
    match err {
        CompileError::ConflictingTimeRange { first, second, .. } => assert_eq!((first, second), (0, 1)),
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn test_touching_speed_segments_are_allowed() {
    let plan = compile(
        json!([{"op": "speed", "segments": [
            {"start_sec": 0, "end_sec": 5, "speed": 1.5},
            {"start_sec": 5, "end_sec": 8, "speed": 2.0}
        ]}]),
        10.0,
    )
    .unwrap();
    let pass = &plan.passes[0];
    pass.validate().unwrap();
    let factors: Vec<f64> = pass
        .nodes
        .iter()
        .filter_map(|node| match node.op {
            NodeOp::Speed { factor, .. } => Some(factor),
            _ => None,
        })
        .collect();
    assert_eq!(factors, vec![1.5, 2.0, 1.0]);
}

fn unsupported(err: CompileError) -> (usize, Option<usize>) {
    match err {
        CompileError::UnsupportedCombination { index, conflicts_with, .. } => (index, conflicts_with),
        other => panic!("expected UnsupportedCombination, got {other:?}"),
    }
}

#[test]
fn test_audio_after_gif_is_rejected() {
    let err = compile(json!([{"op": "gif", "fps": 10}, {"op": "audio", "path": "m.mp3"}]), 10.0).unwrap_err();
    assert_eq!(unsupported(err), (1, Some(0)));
}

#[test]
fn test_color_picture_after_extract_audio_is_rejected() {
    let err = compile(
        json!([{"op": "extractAudio"}, {"op": "backgroundColor", "color": "red", "only_color": true}]),
        10.0,
    )
    .unwrap_err();
    assert_eq!(unsupported(err), (1, Some(0)));
}

#[test]
fn test_gif_prunes_the_audio_branch() {
    let plan = compile(json!([{"op": "trim", "start_sec": 1, "end_sec": 4}, {"op": "gif"}]), 10.0).unwrap();
    let pass = &plan.passes[0];
    pass.validate().unwrap();
    assert!(!pass.layout.audio);
    assert!(pass.nodes.iter().all(|node| !matches!(node.op, NodeOp::Atrim { .. })));
    for (id, node) in pass.nodes.iter().enumerate() {
        assert_eq!(node.id, id);
    }
}

#[test]
fn test_filter_separators_in_values_are_rejected() {
    let cases = [
        json!([{"op": "text", "text": "hi", "fontcolor": "white:textfile=/etc/passwd"}]),
        json!([{"op": "backgroundColor", "color": "black,vflip"}]),
        json!([{"op": "trim", "end_sec": 2}, {"op": "transcode", "scale": "1280:-1,vflip"}]),
        json!([{"op": "watermark", "path": "logo.png", "position": "10:10:enable=0"}]),
    ];
    for operations in cases {
        let last = operations.as_array().unwrap().len() - 1;
        let err = compile(operations, 10.0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidDescriptor);
        assert_eq!(err.index(), Some(last));
    }
}

#[test]
fn test_end_sentinel_resolves_to_duration() {
    let plan = compile(json!([{"op": "trim", "start_sec": 2, "end_sec": -1}]), 10.0).unwrap();
    let trims: Vec<_> = plan.passes[0]
        .nodes
        .iter()
        .filter_map(|node| match node.op {
            NodeOp::Trim { start, end } | NodeOp::Atrim { start, end } => Some((start, end)),
            _ => None,
        })
        .collect();
    assert_eq!(trims, vec![(2.0, Some(10.0)), (2.0, Some(10.0))]);
}

#[test]
fn test_unknown_operation_is_reported_with_its_index() {
    let err = compile(json!([{"op": "not_a_real_op"}]), 10.0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownOperation);
    assert_eq!(err.index(), Some(0));

    let report = serde_json::to_value(err.report()).unwrap();
    assert_eq!(report["kind"], "UnknownOperation");
    assert_eq!(report["index"], 0);
}

#[test]
fn test_two_encodes_run_as_two_passes() {
    let plan = compile(
        json!([{"op": "transcode", "codec": "h264"}, {"op": "gif", "duration": 3}]),
        10.0,
    )
    .unwrap();
    assert_eq!(plan.passes.len(), 2);
    assert_eq!(plan.passes[1].inputs[0].source, InputSource::Pass(0));
    for pass in &plan.passes {
        assert_eq!(pass.nodes.iter().filter(|node| node.op.is_terminal()).count(), 1);
    }
}

#[test]
fn test_trim_then_karaoke_scenario() {
    let request = EditRequest::from_json(
        r#"{"media":"a.mp4","operations":[{"op":"trim","start_sec":0,"end_sec":5},{"op":"karaoke","sentence":"I am working","start_sec":0,"end_sec":1.5}]}"#,
    )
    .unwrap();
    let plan = Compiler::default()
        .compile(&request, Some(&MediaInfo::with_duration(30.0)))
        .unwrap();

    let draws = drawtexts(&plan.passes[0]);
    assert_eq!(draws.len(), 4);
    assert_eq!(draws[0].text, "I am working");
    assert_close(draws[0].start, 0.0);
    assert_close(draws[0].end.unwrap(), 1.5);

    let expected = [("I", 0.0, 0.5), ("am", 0.5, 1.0), ("working", 1.0, 1.5)];
    for (draw, (word, start, end)) in draws[1..].iter().zip(expected) {
        assert_eq!(draw.text, word);
        assert_close(draw.start, start);
        assert_close(draw.end.unwrap(), end);
    }
}

#[test]
fn test_compile_with_a_probe() {
    let probe = StaticProbe {
        info: MediaInfo {
            width: Some(1280),
            height: Some(720),
            ..MediaInfo::with_duration(8.0)
        },
    };
    let plan = Compiler::default()
        .compile_with_probe(
            &request(json!([{"op": "backgroundColor", "color": "red"}])),
            &probe,
        )
        .unwrap();
    let color = plan.passes[0]
        .nodes
        .iter()
        .find_map(|node| match &node.op {
            NodeOp::Color { size, duration, .. } => Some((size.to_string(), *duration)),
            _ => None,
        })
        .unwrap();
    assert_eq!(color, ("1280x720".to_string(), Some(8.0)));
}

#[test]
fn test_audio_only_source_rejects_video_operations() {
    let probe = StaticProbe {
        info: MediaInfo {
            has_video: false,
            ..MediaInfo::with_duration(8.0)
        },
    };
    let err = Compiler::default()
        .compile_with_probe(
            &request(json!([{"op": "trim", "end_sec": 4}, {"op": "text", "text": "hi"}])),
            &probe,
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedCombination);
    assert_eq!(err.index(), Some(1));
}

#[test]
fn test_demo_request() {
    let request = EditRequest::from_json(DEMO).unwrap();
    let plan = Compiler::default()
        .compile(&request, Some(&MediaInfo::with_duration(20.0)))
        .unwrap();
    assert_eq!(plan.passes.len(), 1);

    let pass = &plan.passes[0];
    pass.validate().unwrap();
    // The music track is looped and the watermark image is a second input
    assert_eq!(pass.inputs.len(), 3);
    assert!(pass.inputs[2].looped);

    match &pass.terminal().unwrap().op {
        NodeOp::Encode(spec) => {
            assert!(spec.bitrate.is_some());
            assert_eq!(spec.crf, None);
        }
        other => panic!("expected an encode, got {other:?}"),
    }
}

#[cfg(feature = "ffmpeg")]
#[test]
fn test_demo_renders_to_ffmpeg_arguments() {
    use pipeline::driver::ffmpeg::ffmpeg_args;

    let request = EditRequest::from_json(DEMO).unwrap();
    let plan = Compiler::default()
        .compile(&request, Some(&MediaInfo::with_duration(20.0)))
        .unwrap();
    let pass = &plan.passes[0];
    let inputs = vec!["launch.mp4".to_string(), "logo.png".to_string(), "music.mp3".to_string()];
    let args = ffmpeg_args(pass, &inputs, "out.mp4").unwrap();

    let joined = args.join(" ");
    assert!(joined.contains("-stream_loop -1 -i music.mp3"));
    assert!(joined.contains("-filter_complex"));
    assert!(joined.contains("-b:v"));
    assert!(joined.ends_with("out.mp4"));
}
