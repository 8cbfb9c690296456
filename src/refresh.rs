//! Bounded-staleness snapshot cache for the read path.
//!
//! Snapshots are re-polled every period, and evicted as soon as the engine
//! broadcasts a committed change for their venue. Either source alone keeps
//! staleness under the configured bound.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use dashmap::DashMap;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::engine::{build_view, DayView, EngineError};
use crate::model::{DateRange, Event, Slot};
use crate::observability;
use crate::repository::SlotRepository;

#[derive(Clone)]
struct CachedSnapshot {
    range: DateRange,
    slots: Arc<Vec<Slot>>,
    fetched_at: Instant,
}

pub struct SnapshotCache {
    entries: DashMap<Ulid, CachedSnapshot>,
    max_staleness: Duration,
}

impl SnapshotCache {
    pub fn new(max_staleness: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            max_staleness,
        }
    }

    pub fn max_staleness(&self) -> Duration {
        self.max_staleness
    }

    /// Slots for `range`, from cache when a fresh enough snapshot covers it.
    /// A cached snapshot may cover more dates than asked for.
    pub async fn snapshot(
        &self,
        repo: &dyn SlotRepository,
        venue_id: Ulid,
        range: DateRange,
    ) -> Result<Arc<Vec<Slot>>, EngineError> {
        let cached = self.entries.get(&venue_id).map(|e| e.value().clone());
        if let Some(hit) = cached
            && hit.range.covers(&range)
            && hit.fetched_at.elapsed() <= self.max_staleness
        {
            metrics::counter!(observability::SNAPSHOT_CACHE_HITS_TOTAL).increment(1);
            return Ok(hit.slots);
        }

        metrics::counter!(observability::SNAPSHOT_CACHE_MISSES_TOTAL).increment(1);
        // Age counts from the start of the fetch; the data may predate its end.
        let fetched_at = Instant::now();
        let slots = Arc::new(repo.slots(venue_id, range).await?);
        self.entries.insert(
            venue_id,
            CachedSnapshot {
                range,
                slots: slots.clone(),
                fetched_at,
            },
        );
        Ok(slots)
    }

    /// Calendar view over a possibly cached snapshot.
    pub async fn view(
        &self,
        repo: &dyn SlotRepository,
        venue_id: Ulid,
        range: DateRange,
        now: NaiveDateTime,
    ) -> Result<Vec<DayView>, EngineError> {
        let slots = self.snapshot(repo, venue_id, range).await?;
        Ok(build_view(venue_id, range, now, &slots))
    }

    pub fn invalidate(&self, venue_id: &Ulid) {
        self.entries.remove(venue_id);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Re-fetch every cached venue. Venues whose fetch fails are evicted and
    /// returned with their error.
    pub async fn refresh_all(&self, repo: &dyn SlotRepository) -> Vec<(Ulid, EngineError)> {
        let targets: Vec<(Ulid, DateRange)> = self
            .entries
            .iter()
            .map(|e| (*e.key(), e.value().range))
            .collect();

        let fetches = targets.into_iter().map(|(venue_id, range)| async move {
            let fetched_at = Instant::now();
            (venue_id, range, fetched_at, repo.slots(venue_id, range).await)
        });

        let mut failures = Vec::new();
        for (venue_id, range, fetched_at, result) in futures::future::join_all(fetches).await {
            match result {
                Ok(slots) => {
                    self.entries.insert(
                        venue_id,
                        CachedSnapshot {
                            range,
                            slots: Arc::new(slots),
                            fetched_at,
                        },
                    );
                }
                Err(e) => {
                    self.entries.remove(&venue_id);
                    failures.push((venue_id, e));
                }
            }
        }
        failures
    }
}

/// Poll every cached snapshot once per `period`.
pub async fn run_refresher(repo: Arc<dyn SlotRepository>, cache: Arc<SnapshotCache>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        for (venue_id, e) in cache.refresh_all(repo.as_ref()).await {
            warn!("snapshot refresh for venue {venue_id} failed, evicted: {e}");
        }
    }
}

/// Evict a venue's snapshot on every committed event for it. `rx` comes from
/// [`NotifyHub::subscribe_all`]; returns once the hub is dropped.
pub async fn run_invalidator(cache: Arc<SnapshotCache>, mut rx: broadcast::Receiver<Event>) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                let venue_id = event.venue_id();
                debug!("invalidating snapshot for venue {venue_id}");
                cache.invalidate(&venue_id);
            }
            Err(RecvError::Lagged(missed)) => {
                warn!("invalidator lagged by {missed} events, clearing snapshot cache");
                cache.clear();
            }
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::NaiveDate;

    use crate::model::{Interval, SlotKind};
    use crate::notify::NotifyHub;

    struct CountingRepo {
        calls: AtomicUsize,
        fail: bool,
        delay: Duration,
    }

    impl CountingRepo {
        fn new(fail: bool) -> Self {
            Self { calls: AtomicUsize::new(0), fail, delay: Duration::ZERO }
        }

        fn slow(delay: Duration) -> Self {
            Self { delay, ..Self::new(false) }
        }
    }

    #[async_trait]
    impl SlotRepository for CountingRepo {
        async fn slots(&self, venue_id: Ulid, range: DateRange) -> Result<Vec<Slot>, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                return Err(EngineError::NotFound(venue_id));
            }
            Ok(vec![Slot {
                id: Ulid::new(),
                venue_id,
                interval: Interval::parse(range.first, "10:00", "11:00").unwrap(),
                kind: SlotKind::Available,
            }])
        }
    }

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, day).unwrap()
    }

    #[tokio::test]
    async fn fresh_covering_snapshot_is_reused() {
        let repo = CountingRepo::new(false);
        let cache = SnapshotCache::new(Duration::from_secs(30));
        let venue = Ulid::new();

        cache.snapshot(&repo, venue, DateRange::new(d(20), d(26))).await.unwrap();
        cache.snapshot(&repo, venue, DateRange::single(d(22))).await.unwrap();
        assert_eq!(repo.calls.load(Ordering::SeqCst), 1);

        // Wider than cached → refetch.
        cache.snapshot(&repo, venue, DateRange::new(d(20), d(30))).await.unwrap();
        assert_eq!(repo.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stale_snapshot_is_refetched() {
        let repo = CountingRepo::new(false);
        let cache = SnapshotCache::new(Duration::ZERO);
        let venue = Ulid::new();
        cache.snapshot(&repo, venue, DateRange::single(d(20))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.snapshot(&repo, venue, DateRange::single(d(20))).await.unwrap();
        assert_eq!(repo.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn snapshot_age_includes_fetch_time() {
        let repo = CountingRepo::slow(Duration::from_millis(60));
        let cache = SnapshotCache::new(Duration::from_millis(50));
        let venue = Ulid::new();
        cache.snapshot(&repo, venue, DateRange::single(d(20))).await.unwrap();
        // Already older than the bound on arrival.
        cache.snapshot(&repo, venue, DateRange::single(d(20))).await.unwrap();
        assert_eq!(repo.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fetch_error_is_returned_not_cached() {
        let repo = CountingRepo::new(true);
        let cache = SnapshotCache::new(Duration::from_secs(30));
        let venue = Ulid::new();
        let err = cache.snapshot(&repo, venue, DateRange::single(d(20))).await.unwrap_err();
        assert_eq!(err, EngineError::NotFound(venue));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn refresh_all_reports_and_evicts_failures() {
        let ok_repo = CountingRepo::new(false);
        let cache = SnapshotCache::new(Duration::from_secs(30));
        let venue = Ulid::new();
        cache.snapshot(&ok_repo, venue, DateRange::single(d(20))).await.unwrap();

        assert!(cache.refresh_all(&ok_repo).await.is_empty());
        assert_eq!(ok_repo.calls.load(Ordering::SeqCst), 2);

        let failing = CountingRepo::new(true);
        let failures = cache.refresh_all(&failing).await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, venue);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn invalidator_evicts_on_event() {
        let repo = CountingRepo::new(false);
        let cache = Arc::new(SnapshotCache::new(Duration::from_secs(30)));
        let notify = Arc::new(NotifyHub::new());
        let venue = Ulid::new();
        cache.snapshot(&repo, venue, DateRange::single(d(20))).await.unwrap();

        let task = tokio::spawn(run_invalidator(cache.clone(), notify.subscribe_all()));
        notify.send(venue, &Event::SlotRemoved { id: Ulid::new(), venue_id: venue });

        let deadline = Instant::now() + Duration::from_secs(2);
        while !cache.is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(cache.is_empty());

        drop(notify);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn view_uses_snapshot() {
        let repo = CountingRepo::new(false);
        let cache = SnapshotCache::new(Duration::from_secs(30));
        let venue = Ulid::new();
        let now = d(20).and_hms_opt(8, 0, 0).unwrap();
        let view = cache.view(&repo, venue, DateRange::single(d(21)), now).await.unwrap();
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].slots.len(), 1);
        assert!(view[0].slots[0].is_bookable());
    }
}
