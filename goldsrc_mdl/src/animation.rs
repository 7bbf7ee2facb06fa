use tracing::trace;

use crate::binary_utils::Cursor;
use crate::model::Sequence;
use crate::Result;

/// Expands one run-length encoded animation curve starting at the cursor position.
///
/// The stream is a series of runs, each a `(valid, total)` byte pair followed by
/// `valid` explicit `i16` values. A run emits `total` frames: the explicit values
/// first, then the last explicit value repeated. A run with `total == 0` ends the
/// stream. The result always holds exactly `frame_count` values; a stream that
/// ends early is padded with zeros.
///
/// # Errors
///
/// Returns `Err` if the stream runs past the end of the buffer.
pub fn decompress_curve(cursor: &mut Cursor<'_>, frame_count: usize) -> Result<Vec<i16>> {
    let mut values = Vec::new();
    let mut explicit = Vec::new();

    while values.len() < frame_count {
        let valid = cursor.read_u8()?;
        let total = cursor.read_u8()?;

        if total == 0 {
            break;
        }

        explicit.clear();
        for _ in 0..valid {
            explicit.push(cursor.read_i16()?);
        }

        let remaining = frame_count - values.len();
        let last = explicit.last().copied().unwrap_or(0);

        values.extend(
            (0..usize::from(total).min(remaining))
                .map(|i| explicit.get(i).copied().unwrap_or(last)),
        );
    }

    if values.len() < frame_count {
        trace!(
            "curve stream ended after {} of {} frames, padding",
            values.len(),
            frame_count
        );
        values.resize(frame_count, 0);
    }

    Ok(values)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameAdvance {
    pub frame: f32,
    /// Set once a non-looping sequence reaches its last frame.
    pub ended: bool,
}

/// Steps a fractional frame forward by `elapsed` seconds at `rate` times the
/// sequence's own fps.
///
/// `loop_override` replaces the sequence's looping flag when set. Looping
/// sequences wrap in both directions; others clamp to the frame range.
#[must_use]
pub fn advance_frame(
    sequence: &Sequence,
    frame: f32,
    elapsed: f32,
    rate: f32,
    loop_override: Option<bool>,
) -> FrameAdvance {
    if sequence.frame_count <= 1 {
        return FrameAdvance {
            frame: 0.0,
            ended: true,
        };
    }

    let frame_count = sequence.frame_count as f32;
    let last_frame = frame_count - 1.0;
    let frame = frame + elapsed * rate * sequence.fps;

    if loop_override.unwrap_or_else(|| sequence.is_looping()) {
        let frame = frame.rem_euclid(frame_count);
        FrameAdvance {
            // tiny negative inputs round up to `frame_count`
            frame: if frame >= frame_count { 0.0 } else { frame },
            ended: false,
        }
    } else {
        FrameAdvance {
            frame: frame.clamp(0.0, last_frame),
            ended: frame >= last_frame,
        }
    }
}
