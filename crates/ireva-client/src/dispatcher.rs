use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use ireva_types::envelope::{ClientEnvelope, NotificationPayload, ServerEnvelope};

use crate::bus::{CacheEvent, EventBus, Toast};
use crate::cache::QueryCache;

/// Interprets each received envelope and performs exactly one category of
/// side effect per message type. The envelope set is closed: adding a type
/// means adding a variant and a match arm here, checked at compile time.
#[derive(Clone)]
pub struct Dispatcher {
    cache: Arc<QueryCache>,
    bus: EventBus,
}

impl Dispatcher {
    pub fn new(cache: Arc<QueryCache>, bus: EventBus) -> Self {
        Self { cache, bus }
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Handle one raw text frame. A parse failure is logged and the frame
    /// dropped; it never affects the connection or other messages.
    pub fn handle(&self, text: &str, reply: &mpsc::UnboundedSender<ClientEnvelope>) {
        let envelope = match serde_json::from_str::<ServerEnvelope>(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                let preview: String = text.chars().take(200).collect();
                warn!("dropping malformed envelope: {} (raw: {})", e, preview);
                return;
            }
        };

        match envelope {
            ServerEnvelope::DataUpdate {
                query_key, payload, ..
            } => {
                // An embedded notification rides along with the data refresh
                if let Some(embedded) = payload.get("notification") {
                    match serde_json::from_value::<NotificationPayload>(embedded.clone()) {
                        Ok(notification) => self.toast(&notification),
                        Err(e) => debug!("ignoring malformed embedded notification: {}", e),
                    }
                }
                self.cache.set(&query_key, payload);
                self.bus.publish_cache(CacheEvent::Updated(query_key));
            }

            ServerEnvelope::Notification { payload, .. } => {
                self.toast(&payload);
                // The unread badge refetches from the durable store
                let key = "notifications".into();
                self.cache.invalidate(&key);
                self.bus.publish_cache(CacheEvent::Invalidated(key));
            }

            ServerEnvelope::InvalidateQuery { query_key, .. } => {
                self.cache.invalidate(&query_key);
                self.bus.publish_cache(CacheEvent::Invalidated(query_key));
            }

            ServerEnvelope::Ping { .. } => {
                let _ = reply.send(ClientEnvelope::Pong {
                    timestamp: Utc::now(),
                });
            }
        }
    }

    fn toast(&self, notification: &NotificationPayload) {
        self.bus.publish_toast(Toast {
            title: notification.title.clone(),
            message: notification.message.clone(),
            severity: notification.severity,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ireva_types::envelope::{QueryKey, Severity};
    use serde_json::json;

    fn dispatcher() -> (Dispatcher, mpsc::UnboundedReceiver<ClientEnvelope>, mpsc::UnboundedSender<ClientEnvelope>) {
        let dispatcher = Dispatcher::new(Arc::new(QueryCache::new()), EventBus::new());
        let (tx, rx) = mpsc::unbounded_channel();
        (dispatcher, rx, tx)
    }

    fn frame(value: serde_json::Value) -> String {
        value.to_string()
    }

    #[tokio::test]
    async fn data_update_overwrites_the_cached_value() {
        let (dispatcher, _rx, tx) = dispatcher();
        let key: QueryKey = "wallet".into();
        dispatcher.cache().set(&key, json!({"balance": 100, "pending": true}));

        dispatcher.handle(
            &frame(json!({
                "type": "data_update",
                "queryKey": "wallet",
                "payload": {"balance": 500},
                "timestamp": "2025-06-01T10:00:00Z"
            })),
            &tx,
        );

        assert_eq!(dispatcher.cache().get(&key).unwrap(), json!({"balance": 500}));
    }

    #[tokio::test]
    async fn data_update_with_embedded_notification_also_toasts() {
        let (dispatcher, _rx, tx) = dispatcher();
        let mut toasts = dispatcher.bus().subscribe_toasts();

        dispatcher.handle(
            &frame(json!({
                "type": "data_update",
                "queryKey": "wallet",
                "payload": {
                    "balance": 500,
                    "notification": {"title": "Deposit", "message": "Funds received", "severity": "success"}
                },
                "timestamp": "2025-06-01T10:00:00Z"
            })),
            &tx,
        );

        let toast = toasts.recv().await.unwrap();
        assert_eq!(toast.title, "Deposit");
        assert_eq!(toast.severity, Severity::Success);
    }

    #[tokio::test]
    async fn notification_toasts_and_marks_badge_cache_stale() {
        let (dispatcher, _rx, tx) = dispatcher();
        let mut toasts = dispatcher.bus().subscribe_toasts();

        dispatcher.handle(
            &frame(json!({
                "type": "notification",
                "payload": {"title": "KYC", "message": "Approved"},
                "timestamp": "2025-06-01T10:00:00Z"
            })),
            &tx,
        );

        assert_eq!(toasts.recv().await.unwrap().title, "KYC");
        assert!(dispatcher.cache().is_stale(&"notifications".into()));
    }

    #[tokio::test]
    async fn invalidate_query_marks_stale_without_data() {
        let (dispatcher, _rx, tx) = dispatcher();
        let key: QueryKey = vec!["wallet-transactions".to_string(), "w1".to_string()].into();
        dispatcher.cache().set(&key, json!([1, 2, 3]));

        dispatcher.handle(
            &frame(json!({
                "type": "invalidate_query",
                "queryKey": ["wallet-transactions", "w1"],
                "timestamp": "2025-06-01T10:00:00Z"
            })),
            &tx,
        );

        assert!(dispatcher.cache().is_stale(&key));
        // Stale data stays readable until the refetch lands
        assert_eq!(dispatcher.cache().get(&key).unwrap(), json!([1, 2, 3]));
    }

    #[tokio::test]
    async fn ping_gets_exactly_one_pong() {
        let (dispatcher, mut rx, tx) = dispatcher();

        dispatcher.handle(
            &frame(json!({"type": "ping", "timestamp": "2025-06-01T10:00:00Z"})),
            &tx,
        );

        match rx.recv().await.unwrap() {
            ClientEnvelope::Pong { timestamp } => {
                // Fresh timestamp, not an echo of the ping's
                assert!(timestamp > "2025-06-01T10:00:00Z".parse::<chrono::DateTime<Utc>>().unwrap());
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn malformed_frames_are_dropped_silently() {
        let (dispatcher, mut rx, tx) = dispatcher();
        let mut toasts = dispatcher.bus().subscribe_toasts();

        dispatcher.handle("{not json", &tx);
        dispatcher.handle(r#"{"type":"mystery","timestamp":"2025-01-01T00:00:00Z"}"#, &tx);

        assert!(rx.try_recv().is_err());
        assert!(toasts.try_recv().is_err());
    }
}
