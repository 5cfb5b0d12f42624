//! Run the gateway on loopback, connect the client core, and verify
//! envelopes flow end to end: authenticate, targeted data updates into the
//! query cache, and notification toasts.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use uuid::Uuid;

use ireva_client::bus::EventBus;
use ireva_client::cache::QueryCache;
use ireva_client::dispatcher::Dispatcher;
use ireva_client::manager::{ConnectionManager, ConnectionState, ManagerConfig};
use ireva_db::Database;
use ireva_gateway::connection;
use ireva_gateway::emitter::RealtimeEmitter;
use ireva_gateway::registry::Registry;
use ireva_push::fcm::{FcmClient, FcmConfig};

const JWT_SECRET: &str = "loopback-test-secret";

#[derive(Clone)]
struct GatewayState {
    registry: Registry,
    jwt_secret: String,
}

async fn ws_upgrade(State(state): State<GatewayState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_socket(socket, state.registry, state.jwt_secret))
}

/// Spin up a gateway-only server on an ephemeral port.
async fn start_gateway(registry: Registry) -> SocketAddr {
    let app = Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(GatewayState {
            registry,
            jwt_secret: JWT_SECRET.to_string(),
        });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn connect_client(addr: SocketAddr, token: String) -> ConnectionManager {
    let dispatcher = Dispatcher::new(Arc::new(QueryCache::new()), EventBus::new());
    let manager = ConnectionManager::new(
        ManagerConfig {
            url: format!("ws://{}/ws", addr),
            auth_token: Some(token),
        },
        dispatcher,
    );
    manager.connect();
    manager
}

async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test(flavor = "multi_thread")]
async fn client_authenticates_and_receives_targeted_updates() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let registry = Registry::new();
    let push = Arc::new(FcmClient::new(FcmConfig::new("test-key")));
    let emitter = RealtimeEmitter::new(db.clone(), registry.clone(), push);

    let addr = start_gateway(registry.clone()).await;

    let user_id = Uuid::new_v4();
    db.create_user(&user_id.to_string(), "amara", "hash", false)
        .unwrap();
    let token = ireva_api::auth::create_token(JWT_SECRET, user_id, "amara", false).unwrap();

    let manager = connect_client(addr, token);

    // Transport open, then the authenticate round trip registers the socket
    let mut state = manager.state();
    tokio::time::timeout(Duration::from_secs(5), async {
        state
            .wait_for(|s| *s == ConnectionState::Open)
            .await
            .unwrap();
    })
    .await
    .expect("connection never opened");

    let reg = registry.clone();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if reg.connection_count(user_id).await == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("socket never registered");

    // Targeted data update lands in the client's query cache, overwriting
    let cache = manager.dispatcher().cache().clone();
    cache.set(&"wallet".into(), serde_json::json!({"balance": 100}));

    let reached = emitter
        .data_update(user_id, "wallet".into(), serde_json::json!({"balance": 500}))
        .await;
    assert_eq!(reached, 1);

    wait_until("wallet cache update", || {
        cache.get(&"wallet".into()) == Some(serde_json::json!({"balance": 500}))
    })
    .await;

    // A notify() reaches the same socket as a toast and writes the row
    let mut toasts = manager.dispatcher().bus().subscribe_toasts();
    let stats = emitter
        .notify(user_id, "Deposit", "Your wallet was funded", None)
        .await
        .unwrap();
    assert_eq!(stats.sockets_notified, 1);
    assert_eq!(stats.total, 0);

    let toast = tokio::time::timeout(Duration::from_secs(5), toasts.recv())
        .await
        .expect("no toast arrived")
        .unwrap();
    assert_eq!(toast.title, "Deposit");
    assert_eq!(db.list_notifications(&user_id.to_string(), 10).unwrap().len(), 1);

    // Clean shutdown: the registry entry goes away, no retry loop kicks in
    manager.close();
    let reg = registry.clone();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if reg.connection_count(user_id).await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("socket never unregistered");
}

#[tokio::test(flavor = "multi_thread")]
async fn unauthenticated_sockets_are_never_registered() {
    let registry = Registry::new();
    let addr = start_gateway(registry.clone()).await;

    let user_id = Uuid::new_v4();
    // Token signed with the wrong secret
    let token = ireva_api::auth::create_token("wrong-secret", user_id, "mallory", false).unwrap();
    let manager = connect_client(addr, token);

    let mut state = manager.state();
    tokio::time::timeout(Duration::from_secs(5), async {
        state
            .wait_for(|s| *s == ConnectionState::Open)
            .await
            .unwrap();
    })
    .await
    .expect("transport never opened");

    // The transport opens, but the bad token keeps the socket unregistered
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(registry.connection_count(user_id).await, 0);
    manager.close();
}
