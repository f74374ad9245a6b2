//! Time-range resolution.
//!
//! Segments are resolved against the length of the timeline at the point of
//! the pipeline where they are used. An unknown length keeps `-1` ends open.

use clipper_common::utils::format_timestamp;
use clipper_common::{ResolvedRange, TimeSegment};
use serde::Serialize;
use tracing::warn;

use crate::operation::SpeedSegment;

/// Slack for comparing boundaries computed from floating point arithmetic
pub const EPSILON: f64 = 1e-9;

/// A resolved item that keeps its submission position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scheduled<'a, T> {
    pub position: usize,
    pub range: ResolvedRange,
    pub item: &'a T,
}

/// Resolve, sort by start (stable for ties) and drop empty ranges
pub fn schedule<'a, T, F>(items: &'a [T], segment_of: F, duration: Option<f64>) -> Vec<Scheduled<'a, T>>
where
    F: Fn(&T) -> TimeSegment,
{
    let mut scheduled: Vec<Scheduled<'a, T>> = items
        .iter()
        .enumerate()
        .map(|(position, item)| Scheduled {
            position,
            range: segment_of(item).resolve(duration),
            item,
        })
        .collect();
    scheduled.sort_by(|a, b| a.range.start.total_cmp(&b.range.start));
    scheduled.retain(|entry| {
        if entry.range.is_empty() {
            warn!(
                position = entry.position,
                "Dropping segment at {} outside of the timeline",
                format_timestamp(entry.range.start)
            );
            false
        } else {
            true
        }
    });
    scheduled
}

/// One cut of a speed change; filler slots run at 1.0x
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpeedSlot {
    pub range: ResolvedRange,
    pub speed: f64,
    /// Position of the requested segment, `None` for filler
    pub position: Option<usize>,
}

/// Two requested segments that claim the same time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Overlap {
    pub first: usize,
    pub second: usize,
    pub first_range: ResolvedRange,
    pub second_range: ResolvedRange,
}

/// Lay speed segments out over the whole timeline.
///
/// Overlapping segments are rejected. Uncovered time, including the tail, is
/// filled with 1.0x slots so no part of the stream is lost.
pub fn schedule_speed(segments: &[SpeedSegment], duration: Option<f64>) -> Result<Vec<SpeedSlot>, Overlap> {
    let scheduled = schedule(segments, |segment| segment.segment, duration);

    for pair in scheduled.windows(2) {
        if pair[0].range.overlaps(&pair[1].range) {
            return Err(Overlap {
                first: pair[0].position.min(pair[1].position),
                second: pair[0].position.max(pair[1].position),
                first_range: pair[0].range,
                second_range: pair[1].range,
            });
        }
    }

    let mut slots = Vec::with_capacity(scheduled.len() * 2 + 1);
    let mut cursor = Some(0.0);
    for entry in &scheduled {
        if let Some(at) = cursor {
            if entry.range.start > at + EPSILON {
                slots.push(SpeedSlot {
                    range: ResolvedRange::new(at, Some(entry.range.start)),
                    speed: 1.0,
                    position: None,
                });
            }
        }
        slots.push(SpeedSlot {
            range: entry.range,
            speed: entry.item.speed,
            position: Some(entry.position),
        });
        cursor = entry.range.end;
    }

    if let Some(at) = cursor {
        match duration {
            Some(total) if total > at + EPSILON => slots.push(SpeedSlot {
                range: ResolvedRange::new(at, Some(total)),
                speed: 1.0,
                position: None,
            }),
            Some(_) => {}
            None => slots.push(SpeedSlot {
                range: ResolvedRange::new(at, None),
                speed: 1.0,
                position: None,
            }),
        }
    }
    Ok(slots)
}

/// Output length after the speed change, when every slot is bounded
pub fn speed_timeline(slots: &[SpeedSlot]) -> Option<f64> {
    slots
        .iter()
        .map(|slot| slot.range.duration().map(|length| length / slot.speed))
        .sum()
}

/// A word of a karaoke sentence and the time it is highlighted
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WordSlot {
    pub word: String,
    pub range: ResolvedRange,
}

/// Split a sentence on whitespace and spread the words evenly over
/// `[start, end]`.
///
/// Boundaries are `start + span * i / n` with the last one pinned to `end`,
/// so the slots are contiguous and their lengths add up to the span. Without
/// an end each word gets `fallback_word_sec`.
pub fn distribute_words(sentence: &str, start: f64, end: Option<f64>, fallback_word_sec: f64) -> Vec<WordSlot> {
    let words: Vec<&str> = sentence.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }
    let count = words.len();
    let end = end.unwrap_or(start + fallback_word_sec * count as f64);
    let span = end - start;

    let boundary = |i: usize| {
        if i == count {
            end
        } else {
            start + span * i as f64 / count as f64
        }
    };

    words
        .into_iter()
        .enumerate()
        .map(|(i, word)| WordSlot {
            word: word.to_string(),
            range: ResolvedRange::new(boundary(i), Some(boundary(i + 1))),
        })
        .collect()
}
