//! Operations that change the length of the timeline.

use clipper_common::Dimensions;
use tracing::debug;

use crate::assembler::PassBuilder;
use crate::error::Result;
use crate::graph::{InputSource, NodeOp};
use crate::operation::{Concat, OpContext, Speed, Trim};
use crate::timing::{self, EPSILON, SpeedSlot};

const NORMALIZED_SAMPLE_RATE: u32 = 48_000;

pub(super) fn trim(builder: &mut PassBuilder<'_>, ctx: &OpContext, trim: &Trim) -> Result<()> {
    let range = trim.segment.resolve(builder.timeline);
    if range.is_empty() {
        return Err(ctx.invalid(
            "end_sec",
            format!(
                "[{}, {}] leaves nothing of a {}s timeline",
                trim.segment.start_sec,
                trim.segment.end_sec,
                builder.timeline.unwrap_or_default()
            ),
        ));
    }

    if let Some(video) = builder.video_stream() {
        builder.video = Some(builder.push(
            NodeOp::Trim {
                start: range.start,
                end: range.end,
            },
            vec![video],
        ));
    }
    if let Some(audio) = builder.audio_stream() {
        builder.audio = Some(builder.push(
            NodeOp::Atrim {
                start: range.start,
                end: range.end,
            },
            vec![audio],
        ));
    }
    builder.timeline = range.duration();
    Ok(())
}

fn covers_timeline(slots: &[SpeedSlot], timeline: Option<f64>) -> bool {
    match slots {
        [slot] => slot.range.start <= EPSILON && slot.range.end == timeline,
        _ => false,
    }
}

pub(super) fn speed(builder: &mut PassBuilder<'_>, ctx: &OpContext, speed: &Speed) -> Result<()> {
    let slots = timing::schedule_speed(&speed.segments, builder.timeline).map_err(|overlap| {
        ctx.conflict(
            "segment",
            overlap.first,
            overlap.second,
            format!(
                "[{}, {:?}] and [{}, {:?}] would play at two speeds at once",
                overlap.first_range.start,
                overlap.first_range.end,
                overlap.second_range.start,
                overlap.second_range.end
            ),
        )
    })?;
    if slots.is_empty() {
        return Ok(());
    }
    let video = builder.video_stream();
    let audio = builder.audio_stream();

    if covers_timeline(&slots, builder.timeline) {
        let factor = slots[0].speed;
        if (factor - 1.0).abs() > EPSILON {
            if let Some(video) = video {
                builder.video = Some(builder.push(NodeOp::Speed { range: None, factor }, vec![video]));
            }
            if let Some(audio) = audio {
                builder.audio = Some(builder.push(NodeOp::Aspeed { range: None, factor }, vec![audio]));
            }
        }
    } else {
        debug!(operation = ctx.index, slots = slots.len(), "Cutting timeline for speed change");
        let mut video_parts = Vec::new();
        let mut audio_parts = Vec::new();
        for slot in &slots {
            if let Some(video) = &video {
                video_parts.push(builder.push(
                    NodeOp::Speed {
                        range: Some(slot.range),
                        factor: slot.speed,
                    },
                    vec![video.clone()],
                ));
            }
            if let Some(audio) = &audio {
                audio_parts.push(builder.push(
                    NodeOp::Aspeed {
                        range: Some(slot.range),
                        factor: slot.speed,
                    },
                    vec![audio.clone()],
                ));
            }
        }
        if !video_parts.is_empty() {
            let n = video_parts.len();
            builder.video = Some(builder.push(NodeOp::Concat { n }, video_parts));
        }
        if !audio_parts.is_empty() {
            let n = audio_parts.len();
            builder.audio = Some(builder.push(NodeOp::Aconcat { n }, audio_parts));
        }
    }
    builder.timeline = timing::speed_timeline(&slots);
    Ok(())
}

fn normalize_video(builder: &mut PassBuilder<'_>, label: String, canvas: Dimensions) -> String {
    let fitted = builder.push(
        NodeOp::Fit {
            size: canvas,
            color: "black".to_string(),
        },
        vec![label],
    );
    let rate = builder.settings.frame_rate;
    builder.push(NodeOp::Fps { rate }, vec![fitted])
}

fn normalize_audio(builder: &mut PassBuilder<'_>, label: String) -> String {
    builder.push(
        NodeOp::Aformat {
            sample_rate: NORMALIZED_SAMPLE_RATE,
            channel_layout: "stereo".to_string(),
        },
        vec![label],
    )
}

pub(super) fn concat(builder: &mut PassBuilder<'_>, ctx: &OpContext, concat: &Concat) -> Result<()> {
    let video = builder.video_stream();
    let audio = builder.audio_stream();
    if video.is_none() && audio.is_none() {
        return Err(ctx.unsupported(None, "there is no stream left to append to"));
    }

    let mut parts = vec![(video.clone(), audio.clone())];
    for path in &concat.inputs {
        let index = builder.add_input(InputSource::Media(path.clone()), false);
        parts.push((
            video.as_ref().map(|_| format!("{index}:v")),
            audio.as_ref().map(|_| format!("{index}:a")),
        ));
    }

    let canvas = builder.canvas;
    let mut video_parts = Vec::with_capacity(parts.len());
    let mut audio_parts = Vec::with_capacity(parts.len());
    for (video, audio) in parts {
        if let Some(label) = video {
            video_parts.push(if concat.normalize {
                normalize_video(builder, label, canvas)
            } else {
                label
            });
        }
        if let Some(label) = audio {
            audio_parts.push(if concat.normalize {
                normalize_audio(builder, label)
            } else {
                label
            });
        }
    }

    if !video_parts.is_empty() {
        let n = video_parts.len();
        builder.video = Some(builder.push(NodeOp::Concat { n }, video_parts));
    }
    if !audio_parts.is_empty() {
        let n = audio_parts.len();
        builder.audio = Some(builder.push(NodeOp::Aconcat { n }, audio_parts));
    }
    // Appended media has not been probed
    builder.timeline = None;
    Ok(())
}
