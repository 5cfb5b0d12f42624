use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{error, warn};
use uuid::Uuid;

use ireva_types::api::{Claims, NotificationResponse, UnreadCountResponse};

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct NotificationQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

pub async fn list_notifications(
    State(state): State<AppState>,
    Query(query): Query<NotificationQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let user_id = claims.sub.to_string();
    let limit = query.limit.min(200);

    // Run blocking DB reads off the async runtime
    let rows = tokio::task::spawn_blocking(move || db.list_notifications(&user_id, limit))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let notifications: Vec<NotificationResponse> = rows
        .into_iter()
        .map(|row| NotificationResponse {
            id: row.id.parse().unwrap_or_else(|e| {
                warn!("Corrupt notification id '{}': {}", row.id, e);
                Uuid::default()
            }),
            title: row.title,
            message: row.message,
            link: row.link,
            is_read: row.is_read,
            created_at: parse_sqlite_timestamp(&row.created_at).unwrap_or_else(|| {
                warn!("Corrupt created_at '{}' on notification '{}'", row.created_at, row.id);
                chrono::DateTime::default()
            }),
        })
        .collect();

    Ok(Json(notifications))
}

pub async fn unread_count(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let user_id = claims.sub.to_string();

    let count = tokio::task::spawn_blocking(move || db.unread_notification_count(&user_id))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(UnreadCountResponse { count }))
}

/// Mark one of the caller's notifications read. Reading is the only way a
/// notification's is_read flag ever flips — delivery does not touch it.
pub async fn mark_read(
    State(state): State<AppState>,
    Path(notification_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let user_id = claims.sub.to_string();
    let id = notification_id.to_string();

    let updated = tokio::task::spawn_blocking(move || db.mark_notification_read(&id, &user_id))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    if updated {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

/// SQLite stores timestamps as "YYYY-MM-DD HH:MM:SS" without timezone.
/// Accept RFC 3339 first, then fall back to naive UTC.
fn parse_sqlite_timestamp(raw: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    raw.parse::<chrono::DateTime<chrono::Utc>>().ok().or_else(|| {
        chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
            .map(|ndt| ndt.and_utc())
            .ok()
    })
}

#[cfg(test)]
mod tests {
    use super::parse_sqlite_timestamp;

    #[test]
    fn parses_sqlite_and_rfc3339_timestamps() {
        assert!(parse_sqlite_timestamp("2025-06-01 10:30:00").is_some());
        assert!(parse_sqlite_timestamp("2025-06-01T10:30:00Z").is_some());
        assert!(parse_sqlite_timestamp("not a date").is_none());
    }
}
