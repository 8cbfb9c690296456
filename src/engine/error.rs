use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{BookingStatus, Interval, TimeOfDay};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    InvalidTimeFormat(String),
    EmptyInterval,
    PastDate(NaiveDate),
    Conflict {
        with: Interval,
        available_after: TimeOfDay,
    },
    /// Passed the optimistic pre-check, then lost the serialized insert.
    ReservationRaceLost {
        with: Interval,
    },
    VenueUnavailable(Ulid),
    /// Could not reach the venue's serialization point in time.
    LockTimeout(Ulid),
    NotFound(Ulid),
    AlreadyExists(Ulid),
    HasActiveBookings(Ulid),
    InvalidTransition {
        id: Ulid,
        from: BookingStatus,
        to: BookingStatus,
    },
    NotYetElapsed(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Whether retrying the same request may succeed without user input.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::ReservationRaceLost { .. } | EngineError::LockTimeout(_)
        )
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidTimeFormat(s) => write!(f, "invalid time of day {s:?}, expected HH:MM"),
            EngineError::EmptyInterval => write!(f, "interval start and end are equal"),
            EngineError::PastDate(date) => write!(f, "{date} is in the past"),
            EngineError::Conflict { with, available_after } => {
                write!(f, "conflicts with {with}; available after {available_after}")
            }
            EngineError::ReservationRaceLost { with } => {
                write!(f, "lost reservation race to {with}")
            }
            EngineError::VenueUnavailable(id) => write!(f, "venue {id} is not accepting bookings"),
            EngineError::LockTimeout(id) => write!(f, "timed out waiting for venue {id}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::HasActiveBookings(id) => {
                write!(f, "cannot delete venue {id}: has active bookings")
            }
            EngineError::InvalidTransition { id, from, to } => {
                write!(f, "booking {id} cannot move from {from} to {to}")
            }
            EngineError::NotYetElapsed(id) => write!(f, "booking {id} has not ended yet"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
