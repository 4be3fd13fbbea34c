use std::fmt;

use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::engine::EngineError;

/// Unix milliseconds (UTC). The only time type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;
pub const DAY_MS: Ms = 24 * HOUR_MS;

/// Half-open interval `[from, to)`. `from == to` is the empty slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeSlot {
    pub from: Ms,
    pub to: Ms,
}

impl TimeSlot {
    pub fn new(from: Ms, to: Ms) -> Self {
        debug_assert!(from <= to, "TimeSlot from must not be after to");
        Self { from, to }
    }

    pub fn try_new(from: Ms, to: Ms) -> Result<Self, EngineError> {
        if from > to {
            return Err(EngineError::InvalidSlot { from, to });
        }
        Ok(Self { from, to })
    }

    pub fn empty() -> Self {
        Self { from: 0, to: 0 }
    }

    /// The whole UTC day `year-month-day`. `None` for an invalid date.
    pub fn daily_at_utc(year: i32, month: u32, day: u32) -> Option<Self> {
        let from = midnight_ms(NaiveDate::from_ymd_opt(year, month, day)?)?;
        Some(Self::new(from, from + DAY_MS))
    }

    /// The whole UTC month, from its first midnight to the next month's.
    pub fn monthly_at_utc(year: i32, month: u32) -> Option<Self> {
        let first = NaiveDate::from_ymd_opt(year, month, 1)?;
        let next = first.checked_add_months(Months::new(1))?;
        Some(Self::new(midnight_ms(first)?, midnight_ms(next)?))
    }

    pub fn duration_ms(&self) -> Ms {
        self.to - self.from
    }

    pub fn is_empty(&self) -> bool {
        self.from == self.to
    }

    /// A slot is within itself.
    pub fn within(&self, other: &TimeSlot) -> bool {
        self.from >= other.from && self.to <= other.to
    }

    /// Closed-bound test: slots that merely touch count as overlapping.
    pub fn overlaps(&self, other: &TimeSlot) -> bool {
        self.from <= other.to && self.to >= other.from
    }

    /// What remains of both slots once their common part is cut out.
    ///
    /// Identical slots leave nothing. Slots that do not overlap are returned
    /// as `[self, other]` untouched.
    pub fn leftover_after_removing_common_with(&self, other: &TimeSlot) -> Vec<TimeSlot> {
        if self == other {
            return Vec::new();
        }
        if !other.overlaps(self) {
            return vec![*self, *other];
        }
        let mut result = Vec::with_capacity(2);
        if self.from < other.from {
            result.push(TimeSlot::new(self.from, other.from));
        } else if other.from < self.from {
            result.push(TimeSlot::new(other.from, self.from));
        }
        if self.to > other.to {
            result.push(TimeSlot::new(other.to, self.to));
        } else if other.to > self.to {
            result.push(TimeSlot::new(self.to, other.to));
        }
        result
    }

    /// Intersection; an empty slot at `self.from` when there is none.
    pub fn common_part_with(&self, other: &TimeSlot) -> TimeSlot {
        if !self.overlaps(other) {
            return TimeSlot::new(self.from, self.from);
        }
        TimeSlot::new(self.from.max(other.from), self.to.min(other.to))
    }

    pub fn stretch(&self, by_ms: Ms) -> TimeSlot {
        TimeSlot::new(self.from - by_ms, self.to + by_ms)
    }
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.from, self.to)
    }
}

fn midnight_ms(date: NaiveDate) -> Option<Ms> {
    Some(date.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis())
}
