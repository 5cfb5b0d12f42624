use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::{error, info};
use uuid::Uuid;

use ireva_types::api::{BroadcastRequest, BroadcastResponse, Claims, DeliveryStats};

use crate::AppState;

/// Admin broadcast: emit the same notification to a set of users (or all of
/// them) and report aggregate delivery rates back to the admin tooling.
pub async fn broadcast(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<BroadcastRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if !claims.is_admin {
        return Err(StatusCode::FORBIDDEN);
    }
    if req.title.is_empty() || req.message.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let user_ids: Vec<Uuid> = match req.user_ids {
        Some(ids) => ids,
        None => {
            let db = state.db.clone();
            let raw = tokio::task::spawn_blocking(move || db.list_user_ids())
                .await
                .map_err(|e| {
                    error!("spawn_blocking join error: {}", e);
                    StatusCode::INTERNAL_SERVER_ERROR
                })?
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
            raw.iter().filter_map(|id| id.parse().ok()).collect()
        }
    };

    let mut stats = DeliveryStats::default();
    for user_id in &user_ids {
        // The durable row is the guarantee: a write failure fails the request.
        let user_stats = state
            .emitter
            .notify(*user_id, &req.title, &req.message, req.link.as_deref())
            .await
            .map_err(|e| {
                error!("broadcast notify failed for {}: {}", user_id, e);
                StatusCode::INTERNAL_SERVER_ERROR
            })?;
        stats.merge(user_stats);
    }

    info!(
        "broadcast '{}' to {} users: {}/{} push deliveries, {} sockets",
        req.title,
        user_ids.len(),
        stats.succeeded,
        stats.total,
        stats.sockets_notified
    );

    Ok(Json(BroadcastResponse {
        users_targeted: user_ids.len(),
        stats,
    }))
}
