use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- JWT Claims --

/// JWT claims shared across ireva-api (REST middleware) and ireva-gateway
/// (WebSocket authentication). Canonical definition lives here in ireva-types
/// to eliminate duplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    #[serde(default)]
    pub is_admin: bool,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub username: String,
    pub token: String,
}

// -- Notifications --

#[derive(Debug, Serialize)]
pub struct NotificationResponse {
    pub id: Uuid,
    pub title: String,
    pub message: String,
    pub link: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct UnreadCountResponse {
    pub count: u64,
}

// -- Push subscriptions --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PushTokenRequest {
    pub token: String,
}

// -- Broadcast (admin) --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BroadcastRequest {
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub link: Option<String>,
    /// Specific recipients; omitted means every registered user.
    #[serde(default)]
    pub user_ids: Option<Vec<Uuid>>,
}

/// Aggregate outcome of one notification emit.
///
/// `total`/`succeeded`/`failed` count push devices; `sockets_notified` counts
/// live WebSocket connections that received the envelope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryStats {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub sockets_notified: usize,
}

impl DeliveryStats {
    pub fn merge(&mut self, other: DeliveryStats) {
        self.total += other.total;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.sockets_notified += other.sockets_notified;
    }
}

#[derive(Debug, Serialize)]
pub struct BroadcastResponse {
    pub users_targeted: usize,
    pub stats: DeliveryStats,
}
