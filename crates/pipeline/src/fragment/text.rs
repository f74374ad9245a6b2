//! drawtext fragments for text overlays and karaoke captions.

use clipper_common::ResolvedRange;
use tracing::{debug, warn};

use crate::assembler::PassBuilder;
use crate::error::Result;
use crate::graph::{DrawText, NodeOp};
use crate::operation::{Fade, Karaoke, OpContext, TextOverlay, TextStyle};
use crate::timing::{self, WordSlot};

const HIGHLIGHT_X: &str = "(w-text_w)/2";

fn draw_text(text: &str, range: ResolvedRange, x: &str, y: &str, style: &TextStyle) -> DrawText {
    DrawText {
        text: text.to_string(),
        start: range.start,
        end: range.end,
        fontsize: style.fontsize,
        x: x.to_string(),
        y: y.to_string(),
        fontfile: style.fontfile.clone(),
        fontcolor: style.fontcolor.clone(),
        boxed: style.boxed,
        boxcolor: style.boxcolor.clone(),
        boxborderw: style.boxborderw,
        alpha: None,
    }
}

/// Opacity ramp for a fade in and out over `range`.
///
/// A fade-out needs a known end and is skipped otherwise.
fn fade_alpha(range: ResolvedRange, fade: &Fade) -> Option<String> {
    let start = range.start;
    let fade_in = (fade.in_ms > 0).then(|| f64::from(fade.in_ms) / 1000.0);
    let fade_out = match (fade.out_ms, range.end) {
        (0, _) | (_, None) => None,
        (ms, Some(end)) => Some((end, f64::from(ms) / 1000.0)),
    };

    let tail = match fade_out {
        Some((end, out)) => format!("if(gt(t,{}),({end}-t)/{out},1)", end - out),
        None => "1".to_string(),
    };
    match (fade_in, fade_out) {
        (None, None) => None,
        (Some(fade_in), _) => Some(format!("if(lt(t,{}),(t-{start})/{fade_in},{tail})", start + fade_in)),
        (None, Some(_)) => Some(tail),
    }
}

pub(super) fn overlay(builder: &mut PassBuilder<'_>, ctx: &OpContext, overlay: &TextOverlay) -> Result<()> {
    let mut video = builder.video_label(ctx)?;
    let scheduled = timing::schedule(&overlay.segments, |segment| segment.segment, builder.timeline);
    debug!(operation = ctx.index, segments = scheduled.len(), "Chaining text segments");

    for slot in scheduled {
        let segment = slot.item;
        let mut draw = draw_text(
            &segment.text,
            slot.range,
            segment.x.as_str(),
            segment.y.as_str(),
            &segment.style,
        );
        draw.alpha = fade_alpha(slot.range, &segment.fade);
        video = builder.push(NodeOp::DrawText(draw), vec![video]);
    }
    builder.video = Some(video);
    Ok(())
}

/// Resolve the word slots of a caption shown over `range`
fn word_slots(karaoke: &Karaoke, range: ResolvedRange, fallback_word_sec: f64) -> Vec<WordSlot> {
    match &karaoke.words {
        Some(words) => timing::schedule(words, |word| word.segment, range.end)
            .into_iter()
            .map(|slot| WordSlot {
                word: slot.item.word.clone(),
                range: slot.range,
            })
            .collect(),
        None => timing::distribute_words(&karaoke.sentence, range.start, range.end, fallback_word_sec),
    }
}

/// One always-visible sentence plus one highlight per word on top of it
pub(super) fn karaoke(builder: &mut PassBuilder<'_>, ctx: &OpContext, karaoke: &Karaoke) -> Result<()> {
    let mut video = builder.video_label(ctx)?;
    let range = karaoke.segment.resolve(builder.timeline);
    if range.is_empty() {
        warn!(operation = ctx.index, start = range.start, "Karaoke range is empty, skipping");
        return Ok(());
    }

    let words = word_slots(karaoke, range, builder.settings.karaoke_word_sec);
    debug!(operation = ctx.index, words = words.len(), "Expanding karaoke caption");

    let base = draw_text(
        &karaoke.sentence,
        range,
        karaoke.x.as_str(),
        karaoke.y.as_str(),
        &karaoke.style,
    );
    video = builder.push(NodeOp::DrawText(base), vec![video]);

    for slot in words {
        let highlight = draw_text(
            &slot.word,
            slot.range,
            HIGHLIGHT_X,
            karaoke.highlight_y.as_str(),
            &karaoke.highlight,
        );
        video = builder.push(NodeOp::DrawText(highlight), vec![video]);
    }
    builder.video = Some(video);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: f64, end: Option<f64>) -> ResolvedRange {
        ResolvedRange::new(start, end)
    }

    #[test]
    fn test_no_fade_has_no_alpha() {
        assert_eq!(fade_alpha(range(1.0, Some(3.0)), &Fade::default()), None);
    }

    #[test]
    fn test_fade_in_and_out() {
        let alpha = fade_alpha(range(1.0, Some(3.0)), &Fade { in_ms: 500, out_ms: 250 }).unwrap();
        assert_eq!(alpha, "if(lt(t,1.5),(t-1)/0.5,if(gt(t,2.75),(3-t)/0.25,1))");
    }

    #[test]
    fn test_fade_out_skipped_without_end() {
        let alpha = fade_alpha(range(0.0, None), &Fade { in_ms: 0, out_ms: 400 });
        assert_eq!(alpha, None);
        let alpha = fade_alpha(range(0.0, None), &Fade { in_ms: 200, out_ms: 400 }).unwrap();
        assert_eq!(alpha, "if(lt(t,0.2),(t-0)/0.2,1)");
    }
}
