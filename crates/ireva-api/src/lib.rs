pub mod auth;
pub mod broadcast;
pub mod middleware;
pub mod notifications;
pub mod push;

use std::sync::Arc;

use ireva_db::Database;
use ireva_gateway::emitter::RealtimeEmitter;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    pub emitter: RealtimeEmitter,
}
