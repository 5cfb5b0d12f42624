use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A cache location: either a single string key or a hierarchical path
/// (e.g. `["wallet-transactions", "<wallet_id>"]`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryKey {
    One(String),
    Path(Vec<String>),
}

impl QueryKey {
    /// Flatten to a single cache-map key. Path segments join with '/'.
    pub fn normalized(&self) -> String {
        match self {
            QueryKey::One(s) => s.clone(),
            QueryKey::Path(parts) => parts.join("/"),
        }
    }

    /// First path segment (the whole key for the string form).
    pub fn head(&self) -> &str {
        match self {
            QueryKey::One(s) => s,
            QueryKey::Path(parts) => parts.first().map(String::as_str).unwrap_or(""),
        }
    }
}

impl From<&str> for QueryKey {
    fn from(s: &str) -> Self {
        QueryKey::One(s.to_string())
    }
}

impl From<Vec<String>> for QueryKey {
    fn from(parts: Vec<String>) -> Self {
        QueryKey::Path(parts)
    }
}

/// Severity attached to a toast-able notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Info
    }
}

/// Notification content carried inside `notification` envelopes and,
/// optionally, embedded under `payload.notification` of a `data_update`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPayload {
    /// Durable row id, when the notification was persisted before emit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

/// Envelopes pushed from the server to connected clients.
///
/// Closed set, tagged by `type` on the wire: adding a message type is a
/// compile-checked change here, not a runtime string branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEnvelope {
    /// Overwrite the cached value at `queryKey` with `payload` (no merge).
    DataUpdate {
        #[serde(rename = "queryKey")]
        query_key: QueryKey,
        payload: serde_json::Value,
        timestamp: DateTime<Utc>,
    },
    /// Surface a toast and invalidate the notifications cache entry.
    Notification {
        payload: NotificationPayload,
        timestamp: DateTime<Utc>,
    },
    /// Mark the cache entry at `queryKey` stale; the subscriber refetches.
    InvalidateQuery {
        #[serde(rename = "queryKey")]
        query_key: QueryKey,
        timestamp: DateTime<Utc>,
    },
    /// Liveness probe; the client answers with a `pong`.
    Ping { timestamp: DateTime<Utc> },
}

/// Envelopes sent from a client to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEnvelope {
    /// Post-connect authentication; the socket is not registered for
    /// targeted delivery until this validates.
    Authenticate {
        token: String,
        timestamp: DateTime<Utc>,
    },
    /// Reply to a server `ping`.
    Pong { timestamp: DateTime<Utc> },
}
