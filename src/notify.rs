use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

const CHANNEL_CAPACITY: usize = 256;

/// A write to one key of the shared local store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    pub key: String,
    /// `None` when the key was removed.
    pub value: Option<String>,
    /// The tab that made the write.
    pub origin: Ulid,
}

/// Broadcast hub for store changes, one channel per key.
#[derive(Default)]
pub struct NotifyHub {
    channels: DashMap<String, broadcast::Sender<StoreChange>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to changes of a key. Creates the channel if needed.
    pub fn subscribe(&self, key: &str) -> broadcast::Receiver<StoreChange> {
        let sender = self
            .channels
            .entry(key.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, change: &StoreChange) {
        if let Some(sender) = self.channels.get(&change.key) {
            let _ = sender.send(change.clone());
        }
    }
}
