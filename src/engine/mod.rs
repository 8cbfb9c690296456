mod conflict;
mod error;
mod mutations;
mod queries;
mod view;

pub use conflict::{check_conflict, ConflictResult};
pub use error::EngineError;
pub use mutations::Cancellation;
pub use view::{build_view, ensure_not_past, is_elapsed, DayStatus, DayView, SlotTiming, SlotView};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedVenueState = Arc<RwLock<VenueState>>;

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Owns the WAL. Appends that arrive while a flush is pending share one fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush of {} events failed: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so buffered bytes of a failed batch
    // never ride along with the next one.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// The booking orchestrator and in-process slot repository.
///
/// Each venue's state sits behind its own `RwLock`; holding the write guard is
/// the serialization point for every mutation on that venue. Venues never
/// share a lock.
pub struct Engine {
    pub state: DashMap<Ulid, SharedVenueState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: entry (window/block/booking) id → venue id
    pub(super) entity_to_venue: DashMap<Ulid, Ulid>,
    /// Held while venues are added or removed, and for the whole of a WAL
    /// compaction.
    pub(super) membership: Mutex<()>,
    pub(super) lock_timeout: Duration,
}

/// Apply an event to a venue (no locking — caller holds the write guard).
fn apply_to_venue(vs: &mut VenueState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::WindowOpened { id, venue_id, interval } => {
            vs.insert_entry(Entry {
                id: *id,
                interval: *interval,
                kind: EntryKind::Window,
            });
            entity_map.insert(*id, *venue_id);
        }
        Event::SlotBlocked { id, venue_id, interval } => {
            vs.insert_entry(Entry {
                id: *id,
                interval: *interval,
                kind: EntryKind::Blocked,
            });
            entity_map.insert(*id, *venue_id);
        }
        Event::SlotRemoved { id, .. } => {
            vs.remove_entry(*id);
            entity_map.remove(id);
        }
        Event::BookingRequested {
            id,
            venue_id,
            requester_id,
            interval,
            total_amount,
            created_at,
        } => {
            vs.insert_entry(Entry {
                id: *id,
                interval: *interval,
                kind: EntryKind::Booking {
                    requester_id: *requester_id,
                    status: BookingStatus::Pending,
                    total_amount: *total_amount,
                    created_at: *created_at,
                },
            });
            entity_map.insert(*id, *venue_id);
        }
        // Cancelled bookings stay in place so a repeated cancel stays a no-op.
        Event::BookingStatusChanged { id, status: new_status, .. } => {
            if let Some(Entry {
                kind: EntryKind::Booking { status, .. },
                ..
            }) = vs.entry_mut(*id)
            {
                *status = *new_status;
            }
        }
        Event::VenueUpdated {
            name,
            rate_per_hour,
            accepting_bookings,
            ..
        } => {
            vs.name = name.clone();
            vs.rate_per_hour = *rate_per_hour;
            vs.accepting_bookings = *accepting_bookings;
        }
        // Created/Deleted are handled at the DashMap level
        Event::VenueCreated { .. } | Event::VenueDeleted { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            entity_to_venue: DashMap::new(),
            membership: Mutex::new(()),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        };

        // Sole owner of every Arc during replay, so try_write never contends.
        for event in &events {
            match event {
                Event::VenueCreated { id, name, rate_per_hour } => {
                    let vs = VenueState::new(*id, name.clone(), *rate_per_hour);
                    engine.state.insert(*id, Arc::new(RwLock::new(vs)));
                }
                Event::VenueDeleted { id } => {
                    if let Some((_, vs)) = engine.state.remove(id)
                        && let Ok(guard) = vs.try_read()
                    {
                        for entry in &guard.entries {
                            engine.entity_to_venue.remove(&entry.id);
                        }
                    }
                }
                other => {
                    if let Some(entry) = engine.state.get(&other.venue_id()) {
                        let vs = entry.value().clone();
                        drop(entry);
                        if let Ok(mut guard) = vs.try_write() {
                            apply_to_venue(&mut guard, other, &engine.entity_to_venue);
                        }
                    }
                }
            }
        }

        metrics::gauge!(crate::observability::VENUES_ACTIVE).set(engine.state.len() as f64);
        tracing::info!("engine ready: {} venues replayed from {} events", engine.state.len(), events.len());
        Ok(engine)
    }

    /// Bound on waiting for a venue's lock in `reserve` and other writes.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_venue(&self, id: &Ulid) -> Option<SharedVenueState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_venue_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_venue.get(entity_id).map(|e| *e.value())
    }

    /// WAL-append, apply, notify. Caller holds the venue's write guard.
    pub(super) async fn persist_and_apply(
        &self,
        venue_id: Ulid,
        vs: &mut VenueState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_venue(vs, event, &self.entity_to_venue);
        self.notify.send(venue_id, event);
        Ok(())
    }

    /// Read guard on a venue, bounded by the lock timeout.
    pub(super) async fn read_venue(
        &self,
        venue_id: Ulid,
    ) -> Result<OwnedRwLockReadGuard<VenueState>, EngineError> {
        let vs = self.get_venue(&venue_id).ok_or(EngineError::NotFound(venue_id))?;
        tokio::time::timeout(self.lock_timeout, vs.read_owned())
            .await
            .map_err(|_| self.lock_timed_out(venue_id))
    }

    /// Write guard on a venue, bounded by the lock timeout.
    pub(super) async fn write_venue(
        &self,
        venue_id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<VenueState>, EngineError> {
        let vs = self.get_venue(&venue_id).ok_or(EngineError::NotFound(venue_id))?;
        let guard = tokio::time::timeout(self.lock_timeout, vs.write_owned())
            .await
            .map_err(|_| self.lock_timed_out(venue_id))?;
        // Deleted while we waited.
        if !self.state.contains_key(&venue_id) {
            return Err(EngineError::NotFound(venue_id));
        }
        Ok(guard)
    }

    fn lock_timed_out(&self, venue_id: Ulid) -> EngineError {
        metrics::counter!(crate::observability::LOCK_TIMEOUTS_TOTAL).increment(1);
        tracing::warn!("lock timeout on venue {venue_id} after {:?}", self.lock_timeout);
        EngineError::LockTimeout(venue_id)
    }

    /// Lookup entity → venue, then take the venue's write guard.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, OwnedRwLockWriteGuard<VenueState>), EngineError> {
        let venue_id = self
            .get_venue_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let guard = self.write_venue(venue_id).await?;
        Ok((venue_id, guard))
    }
}
