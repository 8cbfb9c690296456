use chrono::NaiveDateTime;
use serde::Serialize;
use ulid::Ulid;

use crate::model::*;

use super::conflict::check_conflict;
use super::EngineError;

// ── Calendar view ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DayStatus {
    Past,
    TodayPartial,
    Future,
}

/// Whether a slot can still be acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SlotTiming {
    Past,
    Upcoming,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotView {
    pub id: Ulid,
    pub interval: Interval,
    pub kind: SlotKind,
    pub timing: SlotTiming,
    /// An upcoming open window that no active booking or block overlaps.
    pub bookable: bool,
}

impl SlotView {
    pub fn is_bookable(&self) -> bool {
        self.bookable
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayView {
    pub date: chrono::NaiveDate,
    pub status: DayStatus,
    pub slots: Vec<SlotView>,
}

/// True once the interval's end has passed `now`.
pub fn is_elapsed(interval: &Interval, now: NaiveDateTime) -> bool {
    interval.ends_at() <= now
}

/// The past-date rule shared by the view and the write path: a date before
/// today is past, and so is an interval today whose end has elapsed.
pub fn ensure_not_past(interval: &Interval, now: NaiveDateTime) -> Result<(), EngineError> {
    if interval.date < now.date() || is_elapsed(interval, now) {
        return Err(EngineError::PastDate(interval.date));
    }
    Ok(())
}

/// Classify a snapshot of slots into one view per day of `range`.
///
/// Days before `now`'s date are left out entirely. A slot is listed on every
/// date it covers, so one wrapping past midnight also shows up the next day.
/// Slots whose end has elapsed are marked [`SlotTiming::Past`]. Cancelled
/// bookings and other venues' slots are dropped. Slots within a day are
/// ordered by where they start on that day, ties kept in snapshot order.
pub fn build_view(
    venue_id: Ulid,
    range: DateRange,
    now: NaiveDateTime,
    slots: &[Slot],
) -> Vec<DayView> {
    let today = now.date();
    let ours: Vec<&Slot> = slots
        .iter()
        .filter(|s| s.venue_id == venue_id)
        .filter(|s| s.kind != SlotKind::Booked(BookingStatus::Cancelled))
        .collect();
    let occupied: Vec<Interval> = ours
        .iter()
        .filter(|s| s.is_occupying())
        .map(|s| s.interval)
        .collect();

    range
        .days()
        .filter(|date| *date >= today)
        .map(|date| {
            let mut placed: Vec<(Minutes, &Slot)> = ours
                .iter()
                .filter_map(|s| {
                    s.interval
                        .segments()
                        .into_iter()
                        .find(|seg| seg.date == date)
                        .map(|seg| (seg.start, *s))
                })
                .collect();
            placed.sort_by_key(|(start, _)| *start);

            let day_slots = placed
                .into_iter()
                .map(|(_, s)| {
                    let timing = if is_elapsed(&s.interval, now) {
                        SlotTiming::Past
                    } else {
                        SlotTiming::Upcoming
                    };
                    let bookable = timing == SlotTiming::Upcoming
                        && s.kind == SlotKind::Available
                        && !check_conflict(&s.interval, &occupied).is_conflict();
                    SlotView {
                        id: s.id,
                        interval: s.interval,
                        kind: s.kind,
                        timing,
                        bookable,
                    }
                })
                .collect();
            DayView {
                date,
                status: if date == today {
                    DayStatus::TodayPartial
                } else {
                    DayStatus::Future
                },
                slots: day_slots,
            }
        })
        .collect()
}
