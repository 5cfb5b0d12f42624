use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};

use ireva_types::api::Claims;
use ireva_types::envelope::{ClientEnvelope, ServerEnvelope};

use crate::registry::Registry;

/// Heartbeat interval: server sends a `ping` envelope every 15 seconds.
/// If 2 consecutive pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long a fresh socket may stay unauthenticated before being closed.
const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle a single WebSocket connection.
///
/// Authentication happens post-connect: the first envelope must be
/// `authenticate` carrying a JWT. Until it validates, the socket is not
/// registered and receives nothing.
pub async fn handle_socket(socket: WebSocket, registry: Registry, jwt_secret: String) {
    let (mut sender, mut receiver) = socket.split();

    let claims = match wait_for_authenticate(&mut receiver, &jwt_secret).await {
        Some(claims) => claims,
        None => {
            warn!("WebSocket client failed to authenticate, closing");
            return;
        }
    };

    let user_id = claims.sub;
    let username = claims.username;
    info!("{} ({}) connected to gateway", username, user_id);

    let (conn_id, mut user_rx) = registry.register(user_id).await;

    // Shared flag for heartbeat: set by the read task on pong, cleared by
    // the send task on every ping it emits.
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward targeted envelopes -> client, with envelope-level heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = user_rx.recv() => {
                    let envelope = match result {
                        Some(envelope) => envelope,
                        None => break,
                    };
                    let text = match serde_json::to_string(&envelope) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("failed to serialize envelope: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    let ping = ServerEnvelope::Ping { timestamp: Utc::now() };
                    let text = serde_json::to_string(&ping).unwrap_or_default();
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read envelopes from the client
    let username_recv = username.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientEnvelope>(&text) {
                    Ok(ClientEnvelope::Pong { .. }) => {
                        pong_flag_recv.store(true, Ordering::Release);
                    }
                    // Re-auth on an already-authenticated socket is a no-op
                    Ok(ClientEnvelope::Authenticate { .. }) => {}
                    Err(e) => {
                        // Malformed frames are dropped; the connection stays up
                        let preview: String = text.chars().take(200).collect();
                        warn!(
                            "{} ({}) bad envelope: {} (raw: {})",
                            username_recv, user_id, e, preview
                        );
                    }
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    registry.unregister(user_id, conn_id).await;
    info!("{} ({}) disconnected from gateway", username, user_id);
}

async fn wait_for_authenticate(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<Claims> {
    use jsonwebtoken::{DecodingKey, Validation, decode};

    let timeout = tokio::time::timeout(AUTH_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(ClientEnvelope::Authenticate { token, .. }) =
                    serde_json::from_str::<ClientEnvelope>(&text)
                {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;

                    return Some(token_data.claims);
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}
