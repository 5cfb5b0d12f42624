use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use ireva_types::envelope::ServerEnvelope;

/// Tracks every live WebSocket connection, keyed by user.
///
/// A user may hold several concurrent connections (multiple tabs/devices);
/// targeted sends reach all of them. Entries mutate only on connect and
/// disconnect — emits are read-only over the map.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    connections: RwLock<HashMap<Uuid, Vec<ConnectionHandle>>>,
}

struct ConnectionHandle {
    conn_id: Uuid,
    tx: mpsc::UnboundedSender<ServerEnvelope>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                connections: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Register an authenticated connection. Returns (conn_id, receiver);
    /// envelopes sent to this user arrive on the receiver.
    pub async fn register(&self, user_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<ServerEnvelope>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .connections
            .write()
            .await
            .entry(user_id)
            .or_default()
            .push(ConnectionHandle { conn_id, tx });
        (conn_id, rx)
    }

    /// Remove one connection. Other connections of the same user are kept.
    pub async fn unregister(&self, user_id: Uuid, conn_id: Uuid) {
        let mut connections = self.inner.connections.write().await;
        if let Some(handles) = connections.get_mut(&user_id) {
            handles.retain(|h| h.conn_id != conn_id);
            if handles.is_empty() {
                connections.remove(&user_id);
            }
        }
    }

    /// Push an envelope to every live connection of a user.
    /// Returns how many connections were reached. Zero is not an error —
    /// callers fall back to durable/push channels.
    pub async fn send_to_user(&self, user_id: Uuid, envelope: ServerEnvelope) -> usize {
        let connections = self.inner.connections.read().await;
        let Some(handles) = connections.get(&user_id) else {
            return 0;
        };
        let mut sent = 0;
        for handle in handles {
            if handle.tx.send(envelope.clone()).is_ok() {
                sent += 1;
            }
        }
        sent
    }

    /// Number of live connections for a user.
    pub async fn connection_count(&self, user_id: Uuid) -> usize {
        self.inner
            .connections
            .read()
            .await
            .get(&user_id)
            .map_or(0, Vec::len)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
