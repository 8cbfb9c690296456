use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDateTime;
use dashmap::mapref::entry::Entry as MapEntry;
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::duration::duration;
use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::pricing::price;

use super::conflict::{check_no_conflict, validate_interval};
use super::view::{ensure_not_past, is_elapsed};
use super::{Engine, EngineError, WalCommand};

/// Result of cancelling a booking, for the payment collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cancellation {
    pub booking: Booking,
    /// The booking had been paid for and the payment should be reversed.
    pub refund_due: bool,
}

impl Engine {
    // ── Venues ───────────────────────────────────────────────

    pub async fn create_venue(
        &self,
        id: Ulid,
        name: Option<String>,
        rate_per_hour: Money,
    ) -> Result<(), EngineError> {
        if self.state.len() >= MAX_VENUES {
            return Err(EngineError::LimitExceeded("too many venues"));
        }
        validate_venue_fields(name.as_deref(), rate_per_hour)?;
        let _membership = self.membership.lock().await;
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::VenueCreated { id, name: name.clone(), rate_per_hour };
        self.wal_append(&event).await?;
        let vs = VenueState::new(id, name, rate_per_hour);
        self.state.insert(id, Arc::new(RwLock::new(vs)));
        self.notify.send(id, &event);
        metrics::gauge!(observability::VENUES_ACTIVE).set(self.state.len() as f64);
        info!("venue {id} created at {rate_per_hour}/h");
        Ok(())
    }

    pub async fn update_venue(
        &self,
        id: Ulid,
        name: Option<String>,
        rate_per_hour: Money,
        accepting_bookings: bool,
    ) -> Result<(), EngineError> {
        validate_venue_fields(name.as_deref(), rate_per_hour)?;
        let mut guard = self.write_venue(id).await?;
        let event = Event::VenueUpdated { id, name, rate_per_hour, accepting_bookings };
        self.persist_and_apply(id, &mut guard, &event).await
    }

    /// Owner switch for taking new reservations. Existing bookings are kept.
    pub async fn set_accepting(&self, id: Ulid, accepting_bookings: bool) -> Result<(), EngineError> {
        let mut guard = self.write_venue(id).await?;
        let event = Event::VenueUpdated {
            id,
            name: guard.name.clone(),
            rate_per_hour: guard.rate_per_hour,
            accepting_bookings,
        };
        self.persist_and_apply(id, &mut guard, &event).await?;
        info!("venue {id} accepting_bookings={accepting_bookings}");
        Ok(())
    }

    pub async fn delete_venue(&self, id: Ulid) -> Result<(), EngineError> {
        let _membership = self.membership.lock().await;
        let guard = self.write_venue(id).await?;
        if guard.has_active_bookings() {
            return Err(EngineError::HasActiveBookings(id));
        }

        let event = Event::VenueDeleted { id };
        self.wal_append(&event).await?;
        for entry in &guard.entries {
            self.entity_to_venue.remove(&entry.id);
        }
        self.state.remove(&id);
        drop(guard);
        self.notify.send(id, &event);
        self.notify.remove(&id);
        metrics::gauge!(observability::VENUES_ACTIVE).set(self.state.len() as f64);
        info!("venue {id} deleted");
        Ok(())
    }

    // ── Owner-declared slots ─────────────────────────────────

    /// Declare a bookable window.
    pub async fn open_window(&self, id: Ulid, venue_id: Ulid, interval: Interval) -> Result<(), EngineError> {
        validate_interval(&interval)?;
        self.ensure_new_entity(id)?;
        let mut guard = self.write_venue(venue_id).await?;
        ensure_room(&guard)?;

        let event = Event::WindowOpened { id, venue_id, interval };
        self.persist_new_entity(id, venue_id, &mut guard, &event).await
    }

    /// Declare owner unavailability. Must not cover an active booking.
    pub async fn block(&self, id: Ulid, venue_id: Ulid, interval: Interval) -> Result<(), EngineError> {
        validate_interval(&interval)?;
        self.ensure_new_entity(id)?;
        let mut guard = self.write_venue(venue_id).await?;
        ensure_room(&guard)?;
        check_no_conflict(&guard, &interval, false)?;

        let event = Event::SlotBlocked { id, venue_id, interval };
        self.persist_new_entity(id, venue_id, &mut guard, &event).await
    }

    /// Remove a window or block. Bookings are released through [`Engine::cancel`].
    pub async fn remove_slot(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (venue_id, mut guard) = self.resolve_entity_write(&id).await?;
        match guard.entry(id).map(|e| &e.kind) {
            Some(EntryKind::Window | EntryKind::Blocked) => {}
            _ => return Err(EngineError::NotFound(id)),
        }
        let event = Event::SlotRemoved { id, venue_id };
        self.persist_and_apply(venue_id, &mut guard, &event).await?;
        Ok(venue_id)
    }

    // ── Bookings ─────────────────────────────────────────────

    /// Create a pending booking for `candidate`.
    ///
    /// The conflict check runs twice: optimistically under a read guard, then
    /// again under the venue's write guard together with the insert. Only the
    /// second check is authoritative; a conflict it finds that the first did
    /// not is reported as [`EngineError::ReservationRaceLost`].
    pub async fn reserve(
        &self,
        id: Ulid,
        venue_id: Ulid,
        requester_id: Ulid,
        candidate: Interval,
        now: NaiveDateTime,
    ) -> Result<Booking, EngineError> {
        let started = Instant::now();
        let result = self.try_reserve(id, venue_id, requester_id, candidate, now).await;
        metrics::counter!(observability::RESERVATIONS_TOTAL, "outcome" => observability::reserve_outcome_label(&result))
            .increment(1);
        metrics::histogram!(observability::RESERVE_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        match &result {
            Ok(b) => info!("booking {} reserved on venue {venue_id} for {} ({})", b.id, b.interval, b.total_amount),
            Err(e) => debug!("reserve on venue {venue_id} for {candidate} refused: {e}"),
        }
        result
    }

    async fn try_reserve(
        &self,
        id: Ulid,
        venue_id: Ulid,
        requester_id: Ulid,
        candidate: Interval,
        now: NaiveDateTime,
    ) -> Result<Booking, EngineError> {
        validate_interval(&candidate)?;
        ensure_not_past(&candidate, now)?;
        self.ensure_new_entity(id)?;

        {
            let snapshot = self.read_venue(venue_id).await?;
            if !snapshot.accepting_bookings {
                return Err(EngineError::VenueUnavailable(venue_id));
            }
            check_no_conflict(&snapshot, &candidate, true)?;
        }

        let mut guard = self.write_venue(venue_id).await?;
        if !guard.accepting_bookings {
            return Err(EngineError::VenueUnavailable(venue_id));
        }
        ensure_room(&guard)?;
        if let Err(EngineError::Conflict { with, .. }) = check_no_conflict(&guard, &candidate, true) {
            return Err(EngineError::ReservationRaceLost { with });
        }

        let length = duration(candidate.start, candidate.end)?;
        let total_amount = price(length.hours, guard.rate_per_hour).amount;
        let event = Event::BookingRequested {
            id,
            venue_id,
            requester_id,
            interval: candidate,
            total_amount,
            created_at: now,
        };
        self.persist_new_entity(id, venue_id, &mut guard, &event).await?;

        Ok(Booking {
            id,
            venue_id,
            requester_id,
            interval: candidate,
            status: BookingStatus::Pending,
            total_amount,
            created_at: now,
        })
    }

    /// pending → confirmed, once payment has gone through.
    pub async fn confirm_payment(&self, id: Ulid) -> Result<Booking, EngineError> {
        let (venue_id, mut guard) = self.resolve_entity_write(&id).await?;
        let booking = booking_in(&guard, venue_id, id)?;
        if booking.status != BookingStatus::Pending {
            return Err(EngineError::InvalidTransition {
                id,
                from: booking.status,
                to: BookingStatus::Confirmed,
            });
        }
        self.set_status(venue_id, &mut guard, booking, BookingStatus::Confirmed).await
    }

    /// confirmed → completed, once the booked interval has ended.
    pub async fn complete(&self, id: Ulid, now: NaiveDateTime) -> Result<Booking, EngineError> {
        let (venue_id, mut guard) = self.resolve_entity_write(&id).await?;
        let booking = booking_in(&guard, venue_id, id)?;
        if booking.status != BookingStatus::Confirmed {
            return Err(EngineError::InvalidTransition {
                id,
                from: booking.status,
                to: BookingStatus::Completed,
            });
        }
        if !is_elapsed(&booking.interval, now) {
            return Err(EngineError::NotYetElapsed(id));
        }
        self.set_status(venue_id, &mut guard, booking, BookingStatus::Completed).await
    }

    /// Release a booking's interval. Cancelling twice is a no-op.
    pub async fn cancel(&self, id: Ulid) -> Result<Cancellation, EngineError> {
        let (venue_id, mut guard) = self.resolve_entity_write(&id).await?;
        let booking = booking_in(&guard, venue_id, id)?;
        let refund_due = match booking.status {
            BookingStatus::Cancelled => {
                return Ok(Cancellation { booking, refund_due: false });
            }
            BookingStatus::Completed => {
                return Err(EngineError::InvalidTransition {
                    id,
                    from: BookingStatus::Completed,
                    to: BookingStatus::Cancelled,
                });
            }
            BookingStatus::Pending => false,
            BookingStatus::Confirmed => true,
        };
        let booking = self.set_status(venue_id, &mut guard, booking, BookingStatus::Cancelled).await?;
        metrics::counter!(observability::CANCELLATIONS_TOTAL).increment(1);
        info!("booking {id} on venue {venue_id} cancelled (refund_due={refund_due})");
        Ok(Cancellation { booking, refund_due })
    }

    async fn set_status(
        &self,
        venue_id: Ulid,
        guard: &mut VenueState,
        mut booking: Booking,
        status: BookingStatus,
    ) -> Result<Booking, EngineError> {
        let event = Event::BookingStatusChanged { id: booking.id, venue_id, status };
        self.persist_and_apply(venue_id, guard, &event).await?;
        booking.status = status;
        Ok(booking)
    }

    fn ensure_new_entity(&self, id: Ulid) -> Result<(), EngineError> {
        if self.entity_to_venue.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        Ok(())
    }

    /// Claim `id` for `venue_id`, then persist the event creating it. The claim
    /// is atomic across venues and released again if the write fails.
    async fn persist_new_entity(
        &self,
        id: Ulid,
        venue_id: Ulid,
        vs: &mut VenueState,
        event: &Event,
    ) -> Result<(), EngineError> {
        match self.entity_to_venue.entry(id) {
            MapEntry::Occupied(_) => return Err(EngineError::AlreadyExists(id)),
            MapEntry::Vacant(slot) => {
                slot.insert(venue_id);
            }
        }
        let result = self.persist_and_apply(venue_id, vs, event).await;
        if result.is_err() {
            self.entity_to_venue.remove(&id);
        }
        result
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate current state.
    ///
    /// Every venue stays write-locked, and venue creation and deletion stay
    /// blocked, until the compacted file has replaced the old one. Otherwise
    /// a write landing between the snapshot and the swap would be lost.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _membership = self.membership.lock().await;
        let mut venues: Vec<_> = self.state.iter().map(|e| (*e.key(), e.value().clone())).collect();
        venues.sort_by_key(|(id, _)| *id);
        let mut guards = Vec::with_capacity(venues.len());
        for (id, vs) in venues {
            guards.push((id, vs.write_owned().await));
        }

        let mut events = Vec::new();
        for (id, guard) in &guards {
            let id = *id;
            events.push(Event::VenueCreated {
                id,
                name: guard.name.clone(),
                rate_per_hour: guard.rate_per_hour,
            });
            if !guard.accepting_bookings {
                events.push(Event::VenueUpdated {
                    id,
                    name: guard.name.clone(),
                    rate_per_hour: guard.rate_per_hour,
                    accepting_bookings: false,
                });
            }
            for entry in &guard.entries {
                match &entry.kind {
                    EntryKind::Window => events.push(Event::WindowOpened {
                        id: entry.id,
                        venue_id: id,
                        interval: entry.interval,
                    }),
                    EntryKind::Blocked => events.push(Event::SlotBlocked {
                        id: entry.id,
                        venue_id: id,
                        interval: entry.interval,
                    }),
                    EntryKind::Booking {
                        requester_id,
                        status,
                        total_amount,
                        created_at,
                    } => {
                        events.push(Event::BookingRequested {
                            id: entry.id,
                            venue_id: id,
                            requester_id: *requester_id,
                            interval: entry.interval,
                            total_amount: *total_amount,
                            created_at: *created_at,
                        });
                        if *status != BookingStatus::Pending {
                            events.push(Event::BookingStatusChanged {
                                id: entry.id,
                                venue_id: id,
                                status: *status,
                            });
                        }
                    }
                }
            }
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        drop(guards);
        info!("WAL compacted to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> Result<u64, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))
    }
}

fn validate_venue_fields(name: Option<&str>, rate_per_hour: Money) -> Result<(), EngineError> {
    if name.is_some_and(|n| n.len() > MAX_NAME_LEN) {
        return Err(EngineError::LimitExceeded("venue name too long"));
    }
    if rate_per_hour < 0 {
        return Err(EngineError::LimitExceeded("negative hourly rate"));
    }
    Ok(())
}

fn ensure_room(vs: &VenueState) -> Result<(), EngineError> {
    if vs.entries.len() >= MAX_SLOTS_PER_VENUE {
        return Err(EngineError::LimitExceeded("too many slots on venue"));
    }
    Ok(())
}

fn booking_in(vs: &VenueState, venue_id: Ulid, id: Ulid) -> Result<Booking, EngineError> {
    vs.entry(id)
        .and_then(|e| e.to_booking(venue_id))
        .ok_or(EngineError::NotFound(id))
}
