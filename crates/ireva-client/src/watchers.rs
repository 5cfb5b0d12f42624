use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::warn;

use ireva_types::envelope::QueryKey;

use crate::bus::{CacheEvent, EventBus};
use crate::cache::QueryCache;

/// Wallet balances are also refreshed on a timer, as a backstop for missed
/// push updates (best-effort delivery means an envelope can simply be lost
/// across a reconnect).
const WALLET_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

const WALLET_KEY: &str = "wallet";
const WALLET_TRANSACTIONS_KEY: &str = "wallet-transactions";

/// Periodically invalidate the wallet cache entry so its consumer refetches,
/// independent of push-driven invalidation.
pub fn spawn_wallet_refresh(cache: Arc<QueryCache>, bus: EventBus) -> JoinHandle<()> {
    spawn_wallet_refresh_every(WALLET_REFRESH_INTERVAL, cache, bus)
}

fn spawn_wallet_refresh_every(
    period: Duration,
    cache: Arc<QueryCache>,
    bus: EventBus,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await; // skip the immediate first tick
        loop {
            interval.tick().await;
            let key: QueryKey = WALLET_KEY.into();
            cache.invalidate(&key);
            bus.publish_cache(CacheEvent::Invalidated(key));
        }
    })
}

/// Run `on_change` whenever the transaction list of one specific wallet is
/// updated or invalidated. Other cache keys are filtered out.
pub fn watch_wallet_transactions(
    bus: &EventBus,
    wallet_id: &str,
    on_change: impl Fn(&CacheEvent) + Send + 'static,
) -> JoinHandle<()> {
    let mut events = bus.subscribe_cache();
    let wallet_id = wallet_id.to_string();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if is_transactions_key(event.key(), &wallet_id) {
                        on_change(&event);
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    warn!("transaction watcher lagged by {} events", n);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn is_transactions_key(key: &QueryKey, wallet_id: &str) -> bool {
    match key {
        QueryKey::Path(parts) => {
            parts.len() == 2 && parts[0] == WALLET_TRANSACTIONS_KEY && parts[1] == wallet_id
        }
        QueryKey::One(_) => false,
    }
}
