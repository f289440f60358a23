use serde::{Deserialize, Serialize};

use crate::problem::{DurationValue, TimeValue};

/// Half-open time interval `[time_start, time_end)`.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Default, Serialize, Deserialize,
)]
pub struct TimeInterval {
    pub time_start: TimeValue,
    pub time_end: TimeValue,
}

impl TimeInterval {
    pub fn new(time_start: TimeValue, time_end: TimeValue) -> TimeInterval {
        TimeInterval {
            time_start,
            time_end,
        }
    }

    pub fn duration(start: TimeValue, duration: DurationValue) -> TimeInterval {
        TimeInterval {
            time_start: start,
            time_end: start + duration,
        }
    }

    pub fn overlap(&self, other: &Self) -> bool {
        !(self.time_end <= other.time_start || other.time_end <= self.time_start)
    }

    pub fn contains(&self, t: TimeValue) -> bool {
        self.time_start <= t && t < self.time_end
    }

    pub fn envelope(&self, other: &Self) -> Self {
        Self {
            time_start: self.time_start.min(other.time_start),
            time_end: self.time_end.max(other.time_end),
        }
    }

    pub fn length(&self) -> DurationValue {
        self.time_end - self.time_start
    }
}
