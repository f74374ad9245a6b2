use tracing::debug;

use crate::assembler::PassBuilder;
use crate::error::Result;
use crate::graph::{InputSource, NodeOp, StreamKind};
use crate::operation::{AudioOverlay, BackgroundColor, ConvertToPlatform, OpContext, Watermark};

const CENTER_X: &str = "(W-w)/2";
const CENTER_Y: &str = "(H-h)/2";

pub(super) fn watermark(builder: &mut PassBuilder<'_>, ctx: &OpContext, watermark: &Watermark) -> Result<()> {
    let video = builder.video_label(ctx)?;
    let index = builder.add_input(InputSource::Media(watermark.path.clone()), false);
    let image = builder.push(
        NodeOp::Opacity {
            opacity: watermark.opacity,
        },
        vec![format!("{index}:v")],
    );
    let composed = builder.push(
        NodeOp::Overlay {
            x: watermark.position.x.to_string(),
            y: watermark.position.y.to_string(),
            shortest: false,
        },
        vec![video, image],
    );
    builder.video = Some(composed);
    Ok(())
}

/// Mix or replace the soundtrack with an external track.
///
/// A replacement track is cut to the timeline when its length is known. A
/// looped replacement of unknown length leaves the encode to stop at the
/// shortest stream.
pub(super) fn audio(builder: &mut PassBuilder<'_>, ctx: &OpContext, audio: &AudioOverlay) -> Result<()> {
    builder.forbid_dropped(ctx, StreamKind::Audio)?;
    let index = builder.add_input(InputSource::Media(audio.path.clone()), audio.looped);
    let track = format!("{index}:a");

    let mixed = match builder.audio_stream() {
        Some(source) if !audio.mute_source => builder.push(
            NodeOp::Amix {
                mix_weight: audio.mix_volume,
            },
            vec![source, track],
        ),
        _ => {
            debug!(operation = ctx.index, "Replacing the source soundtrack");
            let mut label = builder.push(NodeOp::Volume { level: audio.mix_volume }, vec![track]);
            match builder.timeline {
                Some(end) => label = builder.push(NodeOp::Atrim { start: 0.0, end: Some(end) }, vec![label]),
                None if audio.looped => builder.unbounded = true,
                None => {}
            }
            label
        }
    };
    builder.audio = Some(mixed);
    Ok(())
}

pub(super) fn background_color(
    builder: &mut PassBuilder<'_>,
    ctx: &OpContext,
    background: &BackgroundColor,
) -> Result<()> {
    builder.forbid_dropped(ctx, StreamKind::Video)?;
    let color = builder.push(
        NodeOp::Color {
            color: background.color.clone(),
            size: builder.canvas,
            duration: builder.timeline,
            rate: builder.settings.frame_rate,
        },
        Vec::new(),
    );
    if builder.timeline.is_none() {
        builder.unbounded = true;
    }

    let video = match builder.video_stream() {
        Some(video) if !background.only_color => builder.push(
            NodeOp::Overlay {
                x: CENTER_X.to_string(),
                y: CENTER_Y.to_string(),
                shortest: true,
            },
            vec![color, video],
        ),
        _ => {
            debug!(operation = ctx.index, color = %background.color, "Solid color replaces the picture");
            color
        }
    };
    builder.video = Some(video);
    Ok(())
}

pub(super) fn platform(builder: &mut PassBuilder<'_>, ctx: &OpContext, convert: &ConvertToPlatform) -> Result<()> {
    let video = builder.video_label(ctx)?;
    let size = convert.platform.dimensions();
    debug!(operation = ctx.index, platform = %convert.platform, %size, "Fitting to platform frame");

    let fitted = builder.push(
        NodeOp::Fit {
            size,
            color: "black".to_string(),
        },
        vec![video],
    );
    let rate = convert.platform.frame_rate();
    builder.video = Some(builder.push(NodeOp::Fps { rate }, vec![fitted]));
    builder.canvas = size;
    Ok(())
}
