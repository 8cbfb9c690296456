use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use tokio_test::{assert_err, assert_ok};
use ulid::Ulid;

use hallslot::engine::{Engine, EngineError};
use hallslot::model::{BookingStatus, DateRange, Interval};
use hallslot::notify::NotifyHub;

// ── Test infrastructure ──────────────────────────────────────

fn wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("hallslot_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir.join(name)
}

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2031, 6, 14).unwrap()
}

fn now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2031, 6, 1).unwrap().and_hms_opt(9, 0, 0).unwrap()
}

async fn engine_with_venues(name: &str, count: usize) -> (Arc<Engine>, Vec<Ulid>) {
    let engine = Arc::new(Engine::new(wal_path(name), Arc::new(NotifyHub::new())).unwrap());
    let mut venues = Vec::with_capacity(count);
    for i in 0..count {
        let id = Ulid::new();
        engine.create_venue(id, Some(format!("Hall {i}")), 1000).await.unwrap();
        venues.push(id);
    }
    (engine, venues)
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_reserves_have_exactly_one_winner() {
    let (engine, venues) = engine_with_venues("one_winner.wal", 1).await;
    let venue = venues[0];
    let candidate = Interval::parse(date(), "18:00", "22:00").unwrap();

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine.reserve(Ulid::new(), venue, Ulid::new(), candidate, now()).await
            })
        })
        .collect();

    let mut winners = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(booking) => {
                assert_eq!(booking.status, BookingStatus::Pending);
                winners += 1;
            }
            Err(EngineError::Conflict { with, .. } | EngineError::ReservationRaceLost { with }) => {
                assert_eq!(with, candidate);
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(winners, 1);

    let stored = assert_ok!(engine.bookings_for(venue, DateRange::single(date())).await);
    assert_eq!(stored.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn partially_overlapping_reserves_never_double_book() {
    let (engine, venues) = engine_with_venues("staggered.wal", 1).await;
    let venue = venues[0];

    // Two-hour candidates starting every half hour; many overlap pairwise.
    let starts = ["10:00", "10:30", "11:00", "11:30", "12:00", "12:30", "13:00", "13:30"];
    let ends = ["12:00", "12:30", "13:00", "13:30", "14:00", "14:30", "15:00", "15:30"];
    let tasks: Vec<_> = starts
        .iter()
        .zip(ends.iter())
        .flat_map(|(s, e)| {
            let candidate = Interval::parse(date(), s, e).unwrap();
            (0..4).map(move |_| candidate)
        })
        .map(|candidate| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine.reserve(Ulid::new(), venue, Ulid::new(), candidate, now()).await
            })
        })
        .collect();

    for task in tasks {
        let _ = task.await.unwrap();
    }

    let stored = assert_ok!(engine.bookings_for(venue, DateRange::single(date())).await);
    assert!(!stored.is_empty());
    let intervals: Vec<Interval> = stored.iter().map(|b| b.interval).collect();
    for (i, a) in intervals.iter().enumerate() {
        for b in &intervals[i + 1..] {
            assert!(
                !hallslot::engine::check_conflict(a, std::slice::from_ref(b)).is_conflict(),
                "{a} and {b} were both booked"
            );
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_venues_book_in_parallel() {
    let (engine, venues) = engine_with_venues("parallel_venues.wal", 8).await;
    let candidate = Interval::parse(date(), "18:00", "22:00").unwrap();

    let tasks: Vec<_> = venues
        .iter()
        .map(|&venue| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine.reserve(Ulid::new(), venue, Ulid::new(), candidate, now()).await
            })
        })
        .collect();

    for task in tasks {
        assert_ok!(task.await.unwrap());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_and_rebook_race_stays_consistent() {
    let (engine, venues) = engine_with_venues("cancel_rebook.wal", 1).await;
    let venue = venues[0];
    let candidate = Interval::parse(date(), "09:00", "11:00").unwrap();
    let first = assert_ok!(engine.reserve(Ulid::new(), venue, Ulid::new(), candidate, now()).await);

    let canceller = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.cancel(first.id).await })
    };
    let rebookers: Vec<_> = (0..8)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine.reserve(Ulid::new(), venue, Ulid::new(), candidate, now()).await
            })
        })
        .collect();

    assert_ok!(canceller.await.unwrap());
    let mut rebooked = 0;
    for task in rebookers {
        if task.await.unwrap().is_ok() {
            rebooked += 1;
        }
    }
    assert!(rebooked <= 1);

    let active = assert_ok!(engine.bookings_for(venue, DateRange::single(date())).await)
        .into_iter()
        .filter(|b| b.status.is_active())
        .count();
    assert_eq!(active, rebooked);
}

#[tokio::test]
async fn past_and_empty_rejected_before_locking() {
    let (engine, venues) = engine_with_venues("rejects.wal", 1).await;
    let venue = venues[0];
    let yesterday = NaiveDate::from_ymd_opt(2031, 5, 31).unwrap();
    let past = Interval::parse(yesterday, "10:00", "12:00").unwrap();
    assert_err!(engine.reserve(Ulid::new(), venue, Ulid::new(), past, now()).await);
    assert_err!(Interval::parse(date(), "10:00", "10:00"));
    assert_err!(Interval::parse(date(), "9am", "10:00"));
}
