//! AppState construction extracted from `main.rs`.

use std::sync::Arc;

use anyhow::Context;
use sha2::{Digest, Sha256};

use courier_domain::config::{Config, ConfigSeverity};
use courier_store::Database;
use courier_supervisor::{ReconnectPolicy, SessionSupervisor};
use courier_transport::loopback::LoopbackTransport;
use courier_transport::Transport;

use crate::state::AppState;

/// Validate config, open the store, wire the supervisor, and return a
/// fully-built [`AppState`]. Sessions for known tenants are reopened so
/// a process restart picks up where it left off.
pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Store ────────────────────────────────────────────────────────
    let db = Database::open(&config.storage.db_path)
        .with_context(|| format!("opening database at {}", config.storage.db_path.display()))?;

    // ── Transport & supervisor ───────────────────────────────────────
    let transport: Arc<dyn Transport> = Arc::new(LoopbackTransport::new(
        config.transport.address_suffix.clone(),
        config.transport.auto_pair_ms,
    ));
    let supervisor = SessionSupervisor::new(
        transport,
        db,
        ReconnectPolicy::from_config(&config.reconnect),
    );
    supervisor
        .start_all()
        .await
        .context("reopening sessions at boot")?;

    // ── API token ────────────────────────────────────────────────────
    let api_token_hash = resolve_api_token(&config);
    if api_token_hash.is_none() {
        tracing::warn!(
            env = %config.server.api_token_env,
            "no API token configured — /v1 endpoints are unauthenticated"
        );
    }

    Ok(AppState {
        config,
        supervisor,
        api_token_hash,
    })
}

/// The API token comes from config, or from the env var named by
/// `server.api_token_env` when the config leaves it unset. Only the
/// SHA-256 digest is kept in memory.
fn resolve_api_token(config: &Config) -> Option<[u8; 32]> {
    let token = config
        .server
        .api_token
        .clone()
        .or_else(|| std::env::var(&config.server.api_token_env).ok())
        .filter(|t| !t.is_empty())?;
    Some(Sha256::digest(token.as_bytes()).into())
}
