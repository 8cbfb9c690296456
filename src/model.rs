use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Days, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::EngineError;

/// Whole minutes — the only duration unit.
pub type Minutes = i64;

/// Whole currency units. Fractional units are not supported.
pub type Money = i64;

pub const MINUTES_PER_DAY: Minutes = 1440;

// ── Time of day ──────────────────────────────────────────────────

/// 24-hour wall-clock time with no date, written `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    pub const MIDNIGHT: TimeOfDay = TimeOfDay(0);

    pub fn new(hour: u32, minute: u32) -> Result<Self, EngineError> {
        if hour > 23 || minute > 59 {
            return Err(EngineError::InvalidTimeFormat(format!("{hour}:{minute:02}")));
        }
        Ok(Self((hour * 60 + minute) as u16))
    }

    /// Minutes since midnight, `0..1440`.
    pub fn minutes(self) -> Minutes {
        self.0 as Minutes
    }

    pub fn hour(self) -> u32 {
        self.0 as u32 / 60
    }

    pub fn minute(self) -> u32 {
        self.0 as u32 % 60
    }

    /// Truncates seconds.
    pub fn from_time(t: NaiveTime) -> Self {
        Self((t.hour() * 60 + t.minute()) as u16)
    }

    pub fn to_time(self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour(), self.minute(), 0).unwrap_or(NaiveTime::MIN)
    }
}

impl FromStr for TimeOfDay {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || EngineError::InvalidTimeFormat(s.to_string());
        let (h, m) = s.trim().split_once(':').ok_or_else(bad)?;
        let digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
        if !digits(h) || h.len() > 2 || !digits(m) || m.len() != 2 {
            return Err(bad());
        }
        let hour: u32 = h.parse().map_err(|_| bad())?;
        let minute: u32 = m.parse().map_err(|_| bad())?;
        if hour > 23 || minute > 59 {
            return Err(bad());
        }
        Ok(Self((hour * 60 + minute) as u16))
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = EngineError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(t: TimeOfDay) -> Self {
        t.to_string()
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

// ── Absolute spans ───────────────────────────────────────────────

/// Index of a calendar date in whole days, used to place intervals on one axis.
pub fn day_index(date: NaiveDate) -> Minutes {
    date.num_days_from_ce() as Minutes
}

/// Half-open `[start, end)` in absolute minutes (`day_index * 1440 + minute`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Minutes,
    pub end: Minutes,
}

impl Span {
    pub fn new(start: Minutes, end: Minutes) -> Self {
        debug_assert!(start <= end, "Span start must not be after end");
        Self { start, end }
    }

    /// Every minute of the given dates, inclusive of `last`.
    pub fn days(first: NaiveDate, last: NaiveDate) -> Self {
        Self::new(
            day_index(first) * MINUTES_PER_DAY,
            (day_index(last) + 1) * MINUTES_PER_DAY,
        )
    }

    pub fn duration(&self) -> Minutes {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

// ── Intervals ────────────────────────────────────────────────────

/// A date-scoped, half-open `[start, end)` range. When `end <= start` the
/// end time belongs to the following date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interval {
    pub date: NaiveDate,
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

/// The part of an interval that falls on a single calendar date, in minutes
/// since that date's midnight. `end` may be 1440.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaySegment {
    pub date: NaiveDate,
    pub start: Minutes,
    pub end: Minutes,
}

impl DaySegment {
    pub fn overlaps(&self, other: &DaySegment) -> bool {
        self.date == other.date && self.start < other.end && self.end > other.start
    }
}

impl Interval {
    /// Rejects zero-length intervals.
    pub fn new(date: NaiveDate, start: TimeOfDay, end: TimeOfDay) -> Result<Self, EngineError> {
        if start == end {
            return Err(EngineError::EmptyInterval);
        }
        Ok(Self { date, start, end })
    }

    pub fn parse(date: NaiveDate, start: &str, end: &str) -> Result<Self, EngineError> {
        Self::new(date, start.parse()?, end.parse()?)
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// True when the interval crosses midnight into the next date.
    pub fn wraps(&self) -> bool {
        !self.is_empty() && self.end <= self.start
    }

    pub fn end_date(&self) -> NaiveDate {
        if self.wraps() {
            self.date.checked_add_days(Days::new(1)).unwrap_or(self.date)
        } else {
            self.date
        }
    }

    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.start.to_time())
    }

    pub fn ends_at(&self) -> NaiveDateTime {
        self.end_date().and_time(self.end.to_time())
    }

    pub fn span(&self) -> Span {
        Span::new(
            day_index(self.date) * MINUTES_PER_DAY + self.start.minutes(),
            day_index(self.end_date()) * MINUTES_PER_DAY + self.end.minutes(),
        )
    }

    /// Split into same-day pieces: one for a same-day interval, two for a
    /// wrapping one, none for an empty one.
    pub fn segments(&self) -> Vec<DaySegment> {
        if self.is_empty() {
            return Vec::new();
        }
        if !self.wraps() {
            return vec![DaySegment {
                date: self.date,
                start: self.start.minutes(),
                end: self.end.minutes(),
            }];
        }
        let mut out = vec![DaySegment {
            date: self.date,
            start: self.start.minutes(),
            end: MINUTES_PER_DAY,
        }];
        if self.end != TimeOfDay::MIDNIGHT {
            out.push(DaySegment {
                date: self.end_date(),
                start: 0,
                end: self.end.minutes(),
            });
        }
        out
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}-{}", self.date, self.start, self.end)
    }
}

// ── Date ranges ──────────────────────────────────────────────────

/// Inclusive range of calendar dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub first: NaiveDate,
    pub last: NaiveDate,
}

impl DateRange {
    pub fn new(first: NaiveDate, last: NaiveDate) -> Self {
        debug_assert!(first <= last, "DateRange first must not be after last");
        Self { first, last }
    }

    pub fn single(date: NaiveDate) -> Self {
        Self::new(date, date)
    }

    pub fn len_days(&self) -> i64 {
        (self.last - self.first).num_days() + 1
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.first <= date && date <= self.last
    }

    pub fn covers(&self, other: &DateRange) -> bool {
        self.first <= other.first && other.last <= self.last
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + use<> {
        let last = self.last;
        self.first.iter_days().take_while(move |d| *d <= last)
    }

    pub fn span(&self) -> Span {
        Span::days(self.first, self.last)
    }
}

// ── Slots and bookings ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl BookingStatus {
    /// Active bookings occupy their interval.
    pub fn is_active(self) -> bool {
        !matches!(self, BookingStatus::Cancelled)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a slot represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotKind {
    /// Owner-declared bookable window.
    Available,
    /// Customer reservation.
    Booked(BookingStatus),
    /// Owner-declared unavailability.
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub id: Ulid,
    pub venue_id: Ulid,
    pub interval: Interval,
    pub kind: SlotKind,
}

impl Slot {
    /// Whether this slot keeps a candidate out of its interval.
    pub fn is_occupying(&self) -> bool {
        match self.kind {
            SlotKind::Available => false,
            SlotKind::Booked(status) => status.is_active(),
            SlotKind::Blocked => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub venue_id: Ulid,
    pub requester_id: Ulid,
    pub interval: Interval,
    pub status: BookingStatus,
    pub total_amount: Money,
    pub created_at: NaiveDateTime,
}

// ── Per-venue state ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    Window,
    Blocked,
    Booking {
        requester_id: Ulid,
        status: BookingStatus,
        total_amount: Money,
        created_at: NaiveDateTime,
    },
}

/// One stored interval on a venue. Windows, blocks and bookings share a list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub id: Ulid,
    pub interval: Interval,
    pub kind: EntryKind,
}

impl Entry {
    pub fn span(&self) -> Span {
        self.interval.span()
    }

    /// Active bookings and blocks.
    pub fn is_occupying(&self) -> bool {
        match &self.kind {
            EntryKind::Window => false,
            EntryKind::Blocked => true,
            EntryKind::Booking { status, .. } => status.is_active(),
        }
    }

    pub fn is_active_booking(&self) -> bool {
        matches!(&self.kind, EntryKind::Booking { status, .. } if status.is_active())
    }

    pub fn to_slot(&self, venue_id: Ulid) -> Slot {
        let kind = match &self.kind {
            EntryKind::Window => SlotKind::Available,
            EntryKind::Blocked => SlotKind::Blocked,
            EntryKind::Booking { status, .. } => SlotKind::Booked(*status),
        };
        Slot {
            id: self.id,
            venue_id,
            interval: self.interval,
            kind,
        }
    }

    pub fn to_booking(&self, venue_id: Ulid) -> Option<Booking> {
        match &self.kind {
            EntryKind::Booking {
                requester_id,
                status,
                total_amount,
                created_at,
            } => Some(Booking {
                id: self.id,
                venue_id,
                requester_id: *requester_id,
                interval: self.interval,
                status: *status,
                total_amount: *total_amount,
                created_at: *created_at,
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VenueState {
    pub id: Ulid,
    pub name: Option<String>,
    pub rate_per_hour: Money,
    /// Owner switch; `false` rejects new reservations.
    pub accepting_bookings: bool,
    /// All entries, sorted by absolute start.
    pub entries: Vec<Entry>,
}

impl VenueState {
    pub fn new(id: Ulid, name: Option<String>, rate_per_hour: Money) -> Self {
        Self {
            id,
            name,
            rate_per_hour,
            accepting_bookings: true,
            entries: Vec::new(),
        }
    }

    /// Insert keeping order by absolute start; equal starts keep insertion order.
    pub fn insert_entry(&mut self, entry: Entry) {
        let start = entry.span().start;
        let pos = self.entries.partition_point(|e| e.span().start <= start);
        self.entries.insert(pos, entry);
    }

    pub fn remove_entry(&mut self, id: Ulid) -> Option<Entry> {
        let pos = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(pos))
    }

    pub fn entry(&self, id: Ulid) -> Option<&Entry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn entry_mut(&mut self, id: Ulid) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }

    /// Entries whose span overlaps the query window.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Entry> {
        let right_bound = self.entries.partition_point(|e| e.span().start < query.end);
        let query_start = query.start;
        self.entries[..right_bound]
            .iter()
            .filter(move |e| e.span().end > query_start)
    }

    /// Intervals that keep `candidate` out: active bookings, plus blocks when
    /// `include_blocked`.
    pub fn occupied_near(&self, candidate: &Interval, include_blocked: bool) -> Vec<Interval> {
        self.overlapping(&candidate.span())
            .filter(|e| {
                if include_blocked {
                    e.is_occupying()
                } else {
                    e.is_active_booking()
                }
            })
            .map(|e| e.interval)
            .collect()
    }

    pub fn has_active_bookings(&self) -> bool {
        self.entries.iter().any(Entry::is_active_booking)
    }
}

// ── WAL records ──────────────────────────────────────────────────

/// Flat event log. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    VenueCreated {
        id: Ulid,
        name: Option<String>,
        rate_per_hour: Money,
    },
    VenueUpdated {
        id: Ulid,
        name: Option<String>,
        rate_per_hour: Money,
        accepting_bookings: bool,
    },
    VenueDeleted {
        id: Ulid,
    },
    WindowOpened {
        id: Ulid,
        venue_id: Ulid,
        interval: Interval,
    },
    SlotBlocked {
        id: Ulid,
        venue_id: Ulid,
        interval: Interval,
    },
    SlotRemoved {
        id: Ulid,
        venue_id: Ulid,
    },
    BookingRequested {
        id: Ulid,
        venue_id: Ulid,
        requester_id: Ulid,
        interval: Interval,
        total_amount: Money,
        created_at: NaiveDateTime,
    },
    BookingStatusChanged {
        id: Ulid,
        venue_id: Ulid,
        status: BookingStatus,
    },
}

impl Event {
    /// The venue an event belongs to.
    pub fn venue_id(&self) -> Ulid {
        match self {
            Event::VenueCreated { id, .. }
            | Event::VenueUpdated { id, .. }
            | Event::VenueDeleted { id } => *id,
            Event::WindowOpened { venue_id, .. }
            | Event::SlotBlocked { venue_id, .. }
            | Event::SlotRemoved { venue_id, .. }
            | Event::BookingRequested { venue_id, .. }
            | Event::BookingStatusChanged { venue_id, .. } => *venue_id,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VenueInfo {
    pub id: Ulid,
    pub name: Option<String>,
    pub rate_per_hour: Money,
    pub accepting_bookings: bool,
}
