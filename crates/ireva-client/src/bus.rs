use tokio::sync::broadcast;

use ireva_types::envelope::{QueryKey, Severity};

/// Per-subscriber queue depth. Bursts of same-type events are buffered up to
/// this bound rather than collapsed to the latest one; a subscriber that
/// falls further behind sees a `Lagged` error, not silent loss.
const CHANNEL_CAPACITY: usize = 64;

/// A user-visible toast.
#[derive(Debug, Clone)]
pub struct Toast {
    pub title: String,
    pub message: String,
    pub severity: Severity,
}

/// Cache lifecycle events, keyed so watchers can filter.
#[derive(Debug, Clone)]
pub enum CacheEvent {
    Updated(QueryKey),
    Invalidated(QueryKey),
}

impl CacheEvent {
    pub fn key(&self) -> &QueryKey {
        match self {
            CacheEvent::Updated(key) | CacheEvent::Invalidated(key) => key,
        }
    }
}

/// Connection-health events for the status indicator and banners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// An outbound send was attempted while disconnected.
    Issue,
    /// Automatic reconnects are exhausted; user intervention needed.
    Lost,
}

/// Small per-type event bus: one bounded broadcast channel per event kind.
#[derive(Clone)]
pub struct EventBus {
    toasts: broadcast::Sender<Toast>,
    cache: broadcast::Sender<CacheEvent>,
    connection: broadcast::Sender<ConnectionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (toasts, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (cache, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (connection, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            toasts,
            cache,
            connection,
        }
    }

    pub fn subscribe_toasts(&self) -> broadcast::Receiver<Toast> {
        self.toasts.subscribe()
    }

    pub fn subscribe_cache(&self) -> broadcast::Receiver<CacheEvent> {
        self.cache.subscribe()
    }

    pub fn subscribe_connection(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.connection.subscribe()
    }

    // Publishing to a bus with no subscribers is fine; the event is dropped.

    pub fn publish_toast(&self, toast: Toast) {
        let _ = self.toasts.send(toast);
    }

    pub fn publish_cache(&self, event: CacheEvent) {
        let _ = self.cache.send(event);
    }

    pub fn publish_connection(&self, event: ConnectionEvent) {
        let _ = self.connection.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
