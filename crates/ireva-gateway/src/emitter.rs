use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use ireva_db::Database;
use ireva_push::{PushMessage, PushProvider, TokenOutcome};
use ireva_types::api::DeliveryStats;
use ireva_types::envelope::{NotificationPayload, QueryKey, ServerEnvelope, Severity};

use crate::registry::Registry;

/// Delivers a notification to a user through whichever channels are
/// available, in a fixed order:
///
/// 1. durable notification row (source of truth — failure here aborts),
/// 2. `notification` envelope on every live socket,
/// 3. multicast push across all registered device tokens.
///
/// Socket and push delivery are best-effort amplifiers; neither failing
/// rolls back the row.
#[derive(Clone)]
pub struct RealtimeEmitter {
    db: Arc<Database>,
    registry: Registry,
    push: Arc<dyn PushProvider>,
}

impl RealtimeEmitter {
    pub fn new(db: Arc<Database>, registry: Registry, push: Arc<dyn PushProvider>) -> Self {
        Self { db, registry, push }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Notify one user. Returns per-channel delivery stats.
    pub async fn notify(
        &self,
        user_id: Uuid,
        title: &str,
        message: &str,
        link: Option<&str>,
    ) -> Result<DeliveryStats> {
        let notification_id = Uuid::new_v4();

        // Durable row first: the database record is the delivery guarantee.
        // A write failure propagates to the caller and nothing else runs.
        {
            let db = self.db.clone();
            let (id, uid) = (notification_id.to_string(), user_id.to_string());
            let (title, message) = (title.to_string(), message.to_string());
            let link = link.map(str::to_string);
            tokio::task::spawn_blocking(move || {
                db.insert_notification(&id, &uid, &title, &message, link.as_deref())
            })
            .await??;
        }

        // Live sockets, if any.
        let payload = NotificationPayload {
            id: Some(notification_id),
            title: title.to_string(),
            message: message.to_string(),
            severity: Severity::Info,
            link: link.map(str::to_string),
        };
        let sockets_notified = self
            .registry
            .send_to_user(
                user_id,
                ServerEnvelope::Notification {
                    payload,
                    timestamp: Utc::now(),
                },
            )
            .await;

        // Push fan-out across registered device tokens.
        let tokens = {
            let db = self.db.clone();
            let uid = user_id.to_string();
            tokio::task::spawn_blocking(move || db.push_tokens_for_user(&uid)).await??
        };

        let mut stats = DeliveryStats {
            total: tokens.len(),
            sockets_notified,
            ..Default::default()
        };

        if !tokens.is_empty() {
            let mut push_message = PushMessage::new(title, message);
            if let Some(link) = link {
                push_message = push_message.with_click_action(link);
            }

            let reports = self.push.send_multicast(&tokens, &push_message).await;
            for report in reports {
                match report.outcome {
                    TokenOutcome::Delivered => stats.succeeded += 1,
                    TokenOutcome::Invalid => {
                        stats.failed += 1;
                        self.prune_token(&report.token).await;
                    }
                    TokenOutcome::Failed(reason) => {
                        stats.failed += 1;
                        warn!("push send failed for token: {}", reason);
                    }
                }
            }
        }

        info!(
            "notified {}: {} sockets, {}/{} push deliveries",
            user_id, stats.sockets_notified, stats.succeeded, stats.total
        );
        Ok(stats)
    }

    /// Push a cache overwrite to a user's live sockets (wallet balances,
    /// investment status). No persistence — best-effort only. Returns the
    /// number of sockets reached.
    pub async fn data_update(
        &self,
        user_id: Uuid,
        query_key: QueryKey,
        payload: serde_json::Value,
    ) -> usize {
        self.registry
            .send_to_user(
                user_id,
                ServerEnvelope::DataUpdate {
                    query_key,
                    payload,
                    timestamp: Utc::now(),
                },
            )
            .await
    }

    /// Mark a user's cache entry stale so the client refetches.
    pub async fn invalidate(&self, user_id: Uuid, query_key: QueryKey) -> usize {
        self.registry
            .send_to_user(
                user_id,
                ServerEnvelope::InvalidateQuery {
                    query_key,
                    timestamp: Utc::now(),
                },
            )
            .await
    }

    async fn prune_token(&self, token: &str) {
        let db = self.db.clone();
        let token = token.to_string();
        let result =
            tokio::task::spawn_blocking(move || db.delete_push_token_everywhere(&token)).await;
        match result {
            Ok(Ok(removed)) if removed > 0 => {
                info!("pruned {} stale push subscription(s)", removed);
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => error!("failed to prune push token: {}", e),
            Err(e) => error!("prune task panicked: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ireva_push::SendReport;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Provider double: tokens in `invalid` come back as dead, the rest
    /// deliver. Records every batch it was asked to send.
    struct FakeProvider {
        invalid: HashSet<String>,
        batches: Mutex<Vec<Vec<String>>>,
    }

    impl FakeProvider {
        fn new(invalid: &[&str]) -> Self {
            Self {
                invalid: invalid.iter().map(|s| s.to_string()).collect(),
                batches: Mutex::new(Vec::new()),
            }
        }

        fn batches_sent(&self) -> usize {
            self.batches.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl PushProvider for FakeProvider {
        async fn send_multicast(
            &self,
            tokens: &[String],
            _message: &PushMessage,
        ) -> Vec<SendReport> {
            self.batches.lock().unwrap().push(tokens.to_vec());
            tokens
                .iter()
                .map(|token| SendReport {
                    token: token.clone(),
                    outcome: if self.invalid.contains(token) {
                        TokenOutcome::Invalid
                    } else {
                        TokenOutcome::Delivered
                    },
                })
                .collect()
        }
    }

    fn setup(invalid: &[&str]) -> (Arc<Database>, Registry, Arc<FakeProvider>, RealtimeEmitter) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let registry = Registry::new();
        let provider = Arc::new(FakeProvider::new(invalid));
        let emitter = RealtimeEmitter::new(db.clone(), registry.clone(), provider.clone());
        (db, registry, provider, emitter)
    }

    #[tokio::test]
    async fn offline_user_with_one_token_gets_row_and_push_only() {
        let (db, _registry, provider, emitter) = setup(&[]);
        let user = Uuid::new_v4();
        db.create_user(&user.to_string(), "amara", "hash", false)
            .unwrap();
        db.upsert_push_token(&user.to_string(), "tok-1").unwrap();

        let stats = emitter
            .notify(user, "Deposit", "Your wallet was funded", None)
            .await
            .unwrap();

        assert_eq!(stats.sockets_notified, 0);
        assert_eq!(stats.total, 1);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(provider.batches_sent(), 1);
        assert_eq!(db.list_notifications(&user.to_string(), 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn one_invalid_token_out_of_two_is_counted_and_pruned() {
        let (db, _registry, _provider, emitter) = setup(&["tok-dead"]);
        let user = Uuid::new_v4();
        db.create_user(&user.to_string(), "amara", "hash", false)
            .unwrap();
        db.upsert_push_token(&user.to_string(), "tok-dead").unwrap();
        db.upsert_push_token(&user.to_string(), "tok-live").unwrap();

        let stats = emitter
            .notify(user, "KYC", "Verification approved", Some("/kyc"))
            .await
            .unwrap();

        assert_eq!(stats.total, 2);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 1);

        // Dead token pruned, live one kept
        assert_eq!(
            db.push_tokens_for_user(&user.to_string()).unwrap(),
            vec!["tok-live".to_string()]
        );
    }

    #[tokio::test]
    async fn live_socket_receives_the_notification_envelope() {
        let (db, registry, provider, emitter) = setup(&[]);
        let user = Uuid::new_v4();
        db.create_user(&user.to_string(), "amara", "hash", false)
            .unwrap();

        let (_conn, mut rx) = registry.register(user).await;

        let stats = emitter
            .notify(user, "Investment", "Shares allocated", None)
            .await
            .unwrap();
        assert_eq!(stats.sockets_notified, 1);
        assert_eq!(stats.total, 0);
        assert_eq!(provider.batches_sent(), 0);

        match rx.recv().await.unwrap() {
            ServerEnvelope::Notification { payload, .. } => {
                assert_eq!(payload.title, "Investment");
                assert!(payload.id.is_some());
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[tokio::test]
    async fn row_write_failure_propagates_and_skips_delivery() {
        let (_db, _registry, provider, emitter) = setup(&[]);
        // No such user: the foreign key constraint rejects the insert.
        let result = emitter
            .notify(Uuid::new_v4(), "Deposit", "Funds received", None)
            .await;
        assert!(result.is_err());
        assert_eq!(provider.batches_sent(), 0);
    }

    #[tokio::test]
    async fn data_update_reaches_live_sockets() {
        let (_db, registry, _provider, emitter) = setup(&[]);
        let user = Uuid::new_v4();
        let (_conn, mut rx) = registry.register(user).await;

        let reached = emitter
            .data_update(user, "wallet".into(), serde_json::json!({"balance": 500}))
            .await;
        assert_eq!(reached, 1);

        match rx.recv().await.unwrap() {
            ServerEnvelope::DataUpdate { query_key, payload, .. } => {
                assert_eq!(query_key.normalized(), "wallet");
                assert_eq!(payload["balance"], 500);
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
    }
}
