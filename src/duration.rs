//! Length of a wall-clock interval, with a single wrap past midnight.

use serde::Serialize;

use crate::engine::EngineError;
use crate::model::{Minutes, TimeOfDay, MINUTES_PER_DAY};

/// Duration between two times of day, total and broken down.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DurationBreakdown {
    pub total_minutes: Minutes,
    /// Fractional hours, e.g. `8.5`.
    pub hours: f64,
    pub days: Minutes,
    pub whole_hours: Minutes,
    pub minutes: Minutes,
}

impl DurationBreakdown {
    pub fn from_minutes(total: Minutes) -> Self {
        let total = total.max(0);
        Self {
            total_minutes: total,
            hours: total as f64 / 60.0,
            days: total / MINUTES_PER_DAY,
            whole_hours: (total % MINUTES_PER_DAY) / 60,
            minutes: total % 60,
        }
    }
}

/// Minutes from `start` to `end`. An `end` at or before `start` is read as
/// the next day's time. Equal times are an empty interval, never 24 hours.
pub fn duration(start: TimeOfDay, end: TimeOfDay) -> Result<DurationBreakdown, EngineError> {
    if start == end {
        return Err(EngineError::EmptyInterval);
    }
    let start = start.minutes();
    let mut end = end.minutes();
    if end <= start {
        end += MINUTES_PER_DAY;
    }
    Ok(DurationBreakdown::from_minutes(end - start))
}

/// [`duration`] over raw `HH:MM` strings.
pub fn duration_str(start: &str, end: &str) -> Result<DurationBreakdown, EngineError> {
    duration(start.parse()?, end.parse()?)
}
