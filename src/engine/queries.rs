use async_trait::async_trait;
use chrono::NaiveDateTime;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::repository::SlotRepository;

use super::view::{build_view, DayView};
use super::{Engine, EngineError};

fn check_range(range: &DateRange) -> Result<(), EngineError> {
    if range.first > range.last {
        return Err(EngineError::LimitExceeded("date range ends before it starts"));
    }
    if range.len_days() > MAX_VIEW_DAYS {
        return Err(EngineError::LimitExceeded("date range too wide"));
    }
    Ok(())
}

impl Engine {
    pub async fn list_venues(&self) -> Vec<VenueInfo> {
        let venues: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(venues.len());
        for vs in venues {
            let guard = vs.read().await;
            out.push(VenueInfo {
                id: guard.id,
                name: guard.name.clone(),
                rate_per_hour: guard.rate_per_hour,
                accepting_bookings: guard.accepting_bookings,
            });
        }
        out
    }

    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let venue_id = self.get_venue_for_entity(&id).ok_or(EngineError::NotFound(id))?;
        let guard = self.read_venue(venue_id).await?;
        guard
            .entry(id)
            .and_then(|e| e.to_booking(venue_id))
            .ok_or(EngineError::NotFound(id))
    }

    /// Every booking, cancelled ones included, starting on a date in `range`.
    pub async fn bookings_for(&self, venue_id: Ulid, range: DateRange) -> Result<Vec<Booking>, EngineError> {
        check_range(&range)?;
        let guard = self.read_venue(venue_id).await?;
        Ok(guard
            .overlapping(&range.span())
            .filter(|e| range.contains(e.interval.date))
            .filter_map(|e| e.to_booking(venue_id))
            .collect())
    }

    /// Snapshot of the slots touching `range`: windows, blocks, and bookings
    /// that are not cancelled. Includes intervals wrapping in from the day
    /// before the range.
    pub async fn slots_in(&self, venue_id: Ulid, range: DateRange) -> Result<Vec<Slot>, EngineError> {
        check_range(&range)?;
        let guard = self.read_venue(venue_id).await?;
        Ok(guard
            .overlapping(&range.span())
            .map(|e| e.to_slot(venue_id))
            .filter(|s| s.kind != SlotKind::Booked(BookingStatus::Cancelled))
            .collect())
    }

    /// Calendar for `range` as of `now`, read straight from current state.
    pub async fn availability(
        &self,
        venue_id: Ulid,
        range: DateRange,
        now: NaiveDateTime,
    ) -> Result<Vec<DayView>, EngineError> {
        let slots = self.slots_in(venue_id, range).await?;
        Ok(build_view(venue_id, range, now, &slots))
    }
}

#[async_trait]
impl SlotRepository for Engine {
    async fn slots(&self, venue_id: Ulid, range: DateRange) -> Result<Vec<Slot>, EngineError> {
        self.slots_in(venue_id, range).await
    }
}
