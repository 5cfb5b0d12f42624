use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::error;

use ireva_types::api::{Claims, PushTokenRequest};

use crate::AppState;

/// Register a device push token for the caller. Called by the browser once
/// notification permission is granted; re-registration is a no-op.
pub async fn subscribe(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<PushTokenRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.token.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let user_id = claims.sub.to_string();

    tokio::task::spawn_blocking(move || db.upsert_push_token(&user_id, &req.token))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(StatusCode::CREATED)
}

/// Drop a device push token (token rotated or permission revoked).
pub async fn unsubscribe(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<PushTokenRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let user_id = claims.sub.to_string();

    let removed = tokio::task::spawn_blocking(move || db.delete_push_token(&user_id, &req.token))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    if removed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}
