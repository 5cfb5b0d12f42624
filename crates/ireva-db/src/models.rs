//! Database row types, mapping directly to SQLite rows. Distinct from the
//! ireva-types API models to keep the DB layer independent.

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub is_admin: bool,
    pub created_at: String,
}

pub struct NotificationRow {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub message: String,
    pub link: Option<String>,
    pub is_read: bool,
    pub created_at: String,
}

pub struct PushSubscriptionRow {
    pub user_id: String,
    pub token: String,
    pub created_at: String,
}
