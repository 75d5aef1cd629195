use std::sync::Arc;

use courier_domain::config::Config;
use courier_supervisor::SessionSupervisor;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub supervisor: Arc<SessionSupervisor>,
    /// SHA-256 of the configured API token; `None` in dev mode (no token).
    pub api_token_hash: Option<[u8; 32]>,
}
