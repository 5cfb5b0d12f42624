use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{delete, get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use ireva_api::middleware::require_auth;
use ireva_api::{AppState, AppStateInner, auth, broadcast, notifications, push};
use ireva_gateway::connection;
use ireva_gateway::emitter::RealtimeEmitter;
use ireva_gateway::registry::Registry;
use ireva_push::fcm::{FcmClient, FcmConfig};

#[derive(Clone)]
struct ServerState {
    registry: Registry,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ireva=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("IREVA_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("IREVA_DB_PATH").unwrap_or_else(|_| "ireva.db".into());
    let host = std::env::var("IREVA_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("IREVA_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let fcm_server_key = std::env::var("IREVA_FCM_SERVER_KEY").unwrap_or_else(|_| {
        warn!("IREVA_FCM_SERVER_KEY not set; push sends will be rejected by the provider");
        String::new()
    });

    // Init database
    let db = Arc::new(ireva_db::Database::open(&PathBuf::from(&db_path))?);

    // Shared state
    let registry = Registry::new();
    let push_provider = Arc::new(FcmClient::new(FcmConfig::new(fcm_server_key)));
    let emitter = RealtimeEmitter::new(db.clone(), registry.clone(), push_provider);

    let app_state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret: jwt_secret.clone(),
        emitter,
    });

    let state = ServerState {
        registry,
        jwt_secret,
    };

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/notifications", get(notifications::list_notifications))
        .route("/notifications/unread-count", get(notifications::unread_count))
        .route(
            "/notifications/{notification_id}/read",
            post(notifications::mark_read),
        )
        .route("/push/subscriptions", post(push::subscribe))
        .route("/push/subscriptions", delete(push::unsubscribe))
        .route("/admin/broadcast", post(broadcast::broadcast))
        .layer(middleware::from_fn(require_auth))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("iREVA realtime server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(state): State<ServerState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_socket(socket, state.registry, state.jwt_secret))
}
