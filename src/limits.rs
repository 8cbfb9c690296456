//! Hard caps on engine inputs.

pub const MAX_VENUES: usize = 100_000;
pub const MAX_SLOTS_PER_VENUE: usize = 50_000;
pub const MAX_NAME_LEN: usize = 256;
/// Widest date range a view or snapshot may cover, in days.
pub const MAX_VIEW_DAYS: i64 = 366;
/// Largest WAL payload replay will allocate for.
pub const MAX_WAL_RECORD_LEN: usize = 16 * 1024 * 1024;
