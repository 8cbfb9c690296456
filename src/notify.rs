use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast of committed events, per venue and across all venues.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
    all: broadcast::Sender<Event>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            all: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Subscribe to one venue's events. Creates the channel if needed.
    pub fn subscribe(&self, venue_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(venue_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Subscribe to every venue's events.
    pub fn subscribe_all(&self) -> broadcast::Receiver<Event> {
        self.all.subscribe()
    }

    /// No-op for channels nobody listens on.
    pub fn send(&self, venue_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&venue_id) {
            let _ = sender.send(event.clone());
        }
        let _ = self.all.send(event.clone());
    }

    /// Drop a venue's channel once the venue is gone.
    pub fn remove(&self, venue_id: &Ulid) {
        self.channels.remove(venue_id);
    }
}
