use crate::model::*;

use super::EngineError;

/// Outcome of checking a candidate against existing intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResult {
    NoConflict,
    Conflict { with: Interval },
}

impl ConflictResult {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ConflictResult::Conflict { .. })
    }

    /// End of the conflicting interval, for "try after HH:MM" messaging.
    pub fn available_after(&self) -> Option<TimeOfDay> {
        match self {
            ConflictResult::NoConflict => None,
            ConflictResult::Conflict { with } => Some(with.end),
        }
    }
}

/// Half-open overlap check of `candidate` against `existing`.
///
/// Both sides are split into same-day segments first, so an interval that
/// wraps past midnight is compared against the right calendar date on each
/// side of it. Touching intervals do not conflict. Returns the first
/// conflicting interval in `existing` order.
pub fn check_conflict(candidate: &Interval, existing: &[Interval]) -> ConflictResult {
    let ours = candidate.segments();
    for other in existing {
        let hit = other
            .segments()
            .iter()
            .any(|theirs| ours.iter().any(|seg| seg.overlaps(theirs)));
        if hit {
            return ConflictResult::Conflict { with: *other };
        }
    }
    ConflictResult::NoConflict
}

pub(crate) fn validate_interval(interval: &Interval) -> Result<(), EngineError> {
    if interval.is_empty() {
        return Err(EngineError::EmptyInterval);
    }
    Ok(())
}

/// Check `candidate` against the venue's active bookings, and its blocks too
/// when `include_blocked`.
pub(crate) fn check_no_conflict(
    vs: &VenueState,
    candidate: &Interval,
    include_blocked: bool,
) -> Result<(), EngineError> {
    let existing = vs.occupied_near(candidate, include_blocked);
    match check_conflict(candidate, &existing) {
        ConflictResult::NoConflict => Ok(()),
        ConflictResult::Conflict { with } => Err(EngineError::Conflict {
            with,
            available_after: with.end,
        }),
    }
}
