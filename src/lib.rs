//! Time-slot availability and booking-conflict engine for venue reservations.
//!
//! The pure pieces ([`duration`], [`pricing`], [`engine::check_conflict`],
//! [`engine::build_view`]) work over caller-supplied values and take `now`
//! explicitly. [`engine::Engine`] is the stateful orchestrator: it serializes
//! writes per venue, persists them to a WAL, and serves snapshots through
//! [`repository::SlotRepository`].

pub mod compactor;
pub mod config;
pub mod duration;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod pricing;
pub mod refresh;
pub mod repository;
pub mod wal;
