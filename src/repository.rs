//! Pull-based source of slot snapshots.
//!
//! The view builder only ever sees what a repository hands back, so a cached,
//! polled, or push-invalidated source can stand in for the engine without the
//! pure components changing.

use std::sync::Arc;

use async_trait::async_trait;
use ulid::Ulid;

use crate::engine::EngineError;
use crate::model::{DateRange, Slot};

#[async_trait]
pub trait SlotRepository: Send + Sync {
    /// Slots of `venue_id` touching any date in `range`. Cancelled bookings
    /// are left out.
    async fn slots(&self, venue_id: Ulid, range: DateRange) -> Result<Vec<Slot>, EngineError>;
}

#[async_trait]
impl<T: SlotRepository + ?Sized> SlotRepository for Arc<T> {
    async fn slots(&self, venue_id: Ulid, range: DateRange) -> Result<Vec<Slot>, EngineError> {
        (**self).slots(venue_id, range).await
    }
}
