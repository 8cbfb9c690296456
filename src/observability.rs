use std::net::SocketAddr;

use crate::engine::EngineError;
use crate::model::Booking;

// ── Booking path ────────────────────────────────────────────────

/// Counter: reserve calls. Labels: outcome.
pub const RESERVATIONS_TOTAL: &str = "hallslot_reservations_total";

/// Histogram: reserve latency in seconds, lock wait included.
pub const RESERVE_DURATION_SECONDS: &str = "hallslot_reserve_duration_seconds";

/// Counter: bookings moved to cancelled.
pub const CANCELLATIONS_TOTAL: &str = "hallslot_cancellations_total";

/// Counter: writes that gave up waiting for a venue lock.
pub const LOCK_TIMEOUTS_TOTAL: &str = "hallslot_lock_timeouts_total";

/// Gauge: venues loaded.
pub const VENUES_ACTIVE: &str = "hallslot_venues_active";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "hallslot_wal_flush_duration_seconds";

/// Histogram: events per WAL flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "hallslot_wal_flush_batch_size";

// ── Read path ───────────────────────────────────────────────────

/// Counter: snapshot requests served from cache.
pub const SNAPSHOT_CACHE_HITS_TOTAL: &str = "hallslot_snapshot_cache_hits_total";

/// Counter: snapshot requests that went to the repository.
pub const SNAPSHOT_CACHE_MISSES_TOTAL: &str = "hallslot_snapshot_cache_misses_total";

/// Install the Prometheus exporter on `port`. No-op if `port` is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short label for the outcome of a reserve call.
pub fn reserve_outcome_label(result: &Result<Booking, EngineError>) -> &'static str {
    match result {
        Ok(_) => "reserved",
        Err(EngineError::Conflict { .. }) => "conflict",
        Err(EngineError::ReservationRaceLost { .. }) => "race_lost",
        Err(EngineError::PastDate(_)) => "past_date",
        Err(EngineError::VenueUnavailable(_)) => "venue_unavailable",
        Err(EngineError::LockTimeout(_)) => "lock_timeout",
        Err(EngineError::EmptyInterval | EngineError::InvalidTimeFormat(_)) => "invalid_interval",
        Err(_) => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ulid::Ulid;

    #[test]
    fn outcome_labels_separate_race_from_conflict() {
        let with = crate::model::Interval::parse(
            NaiveDate::from_ymd_opt(2026, 10, 20).unwrap(),
            "10:00",
            "11:00",
        )
        .unwrap();
        let conflict = Err(EngineError::Conflict { with, available_after: with.end });
        let race = Err(EngineError::ReservationRaceLost { with });
        assert_eq!(reserve_outcome_label(&conflict), "conflict");
        assert_eq!(reserve_outcome_label(&race), "race_lost");
        assert_eq!(reserve_outcome_label(&Err(EngineError::LockTimeout(Ulid::new()))), "lock_timeout");
    }
}
