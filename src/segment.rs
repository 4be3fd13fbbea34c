use serde::{Deserialize, Serialize};

use crate::engine::EngineError;
use crate::model::*;

pub const DEFAULT_SEGMENT_MINUTES: i64 = 15;

/// Width of the reservation grid. A positive multiple of the default that
/// divides a day, so every day's grid lines up with the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentUnit {
    minutes: i64,
}

impl SegmentUnit {
    pub fn new(minutes: i64) -> Result<Self, EngineError> {
        if minutes <= 0 {
            return Err(EngineError::InvalidSegment(format!(
                "segment must be longer than 0 minutes, got {minutes}"
            )));
        }
        if minutes % DEFAULT_SEGMENT_MINUTES != 0 {
            return Err(EngineError::InvalidSegment(format!(
                "segment must be a multiple of {DEFAULT_SEGMENT_MINUTES} minutes, got {minutes}"
            )));
        }
        if DAY_MS % (minutes * MINUTE_MS) != 0 {
            return Err(EngineError::InvalidSegment(format!(
                "segment must divide a day evenly, got {minutes} minutes"
            )));
        }
        Ok(Self { minutes })
    }

    pub const fn default_segment() -> Self {
        Self {
            minutes: DEFAULT_SEGMENT_MINUTES,
        }
    }

    pub fn minutes(&self) -> i64 {
        self.minutes
    }

    pub fn duration_ms(&self) -> Ms {
        self.minutes * MINUTE_MS
    }
}

impl Default for SegmentUnit {
    fn default() -> Self {
        Self::default_segment()
    }
}

/// Snap `slot` outward onto the grid: start floored, end ceiled, both counted
/// from UTC midnight of the instant's own day. Never shorter than one unit.
pub fn normalize_to_segment_boundaries(slot: &TimeSlot, unit: SegmentUnit) -> TimeSlot {
    let start = floor_to_grid(slot.from, unit);
    let end = ceil_to_grid(slot.to, unit);
    let normalized = TimeSlot::new(start, end.max(start));
    let minimal = TimeSlot::new(start, start + unit.duration_ms());
    if normalized.within(&minimal) {
        return minimal;
    }
    normalized
}

/// Normalize, then cut into consecutive unit-wide segments.
pub fn split(slot: &TimeSlot, unit: SegmentUnit) -> Vec<TimeSlot> {
    let normalized = normalize_to_segment_boundaries(slot, unit);
    let step = unit.duration_ms();
    let count = (normalized.duration_ms() + step - 1) / step;

    let mut segments = Vec::with_capacity(count as usize);
    let mut current = normalized.from;
    while current < normalized.to {
        let end = (current + step).min(normalized.to);
        segments.push(TimeSlot::new(current, end));
        current += step;
    }
    segments
}

fn floor_to_grid(t: Ms, unit: SegmentUnit) -> Ms {
    let midnight = t - t.rem_euclid(DAY_MS);
    let offset = t - midnight;
    midnight + (offset / unit.duration_ms()) * unit.duration_ms()
}

fn ceil_to_grid(t: Ms, unit: SegmentUnit) -> Ms {
    let floored = floor_to_grid(t, unit);
    if floored == t { t } else { floored + unit.duration_ms() }
}
