//! Tenant session API endpoints.
//!
//! - `POST   /v1/tenants`               — register a tenant and open its session
//! - `GET    /v1/tenants`               — list tenants with session state
//! - `GET    /v1/tenants/:id/pairing`   — current pairing artifact
//! - `POST   /v1/tenants/:id/send`      — send a text message
//! - `GET    /v1/tenants/:id/messages`  — message history, newest first
//! - `POST   /v1/tenants/:id/restore`   — tear down and reopen the session
//! - `DELETE /v1/tenants/:id`           — reset the tenant (credentials always,
//!   messages only with `?purge_messages=true`)

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use courier_supervisor::SupervisorError;
use courier_transport::TransportError;

use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct CreateTenantBody {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct SendBody {
    /// Recipient: raw phone-number-like string or an already-normalized
    /// address.
    pub to: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    50
}

/// Hard cap on one page of history.
const MAX_LIMIT: u32 = 500;

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub purge_messages: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Build a standardized JSON error response: `{ "error": "<message>" }`.
fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

fn supervisor_error(err: SupervisorError) -> Response {
    let status = match &err {
        SupervisorError::SessionUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        SupervisorError::SendFailed {
            source: TransportError::InvalidAddress(_),
            ..
        } => StatusCode::BAD_REQUEST,
        SupervisorError::SendFailed { .. } | SupervisorError::TransportOpen { .. } => {
            StatusCode::BAD_GATEWAY
        }
        SupervisorError::CredentialLoad { .. } | SupervisorError::Store(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    api_error(status, err.to_string())
}

/// Tenant ids end up in URLs and log lines; keep them boring.
fn validate_tenant_id(id: &str) -> Result<(), Response> {
    if id.is_empty() || id.len() > 64 {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "tenant id must be 1-64 characters",
        ));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "tenant id may only contain letters, digits, '-', '_' and '.'",
        ));
    }
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/tenants
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Register a tenant and open its session. Idempotent: an already-live
/// tenant just reports its current state.
pub async fn create_tenant(
    State(state): State<AppState>,
    Json(body): Json<CreateTenantBody>,
) -> Response {
    if let Err(resp) = validate_tenant_id(&body.id) {
        return resp;
    }
    if let Err(e) = state.supervisor.ensure_session(&body.id).await {
        return supervisor_error(e);
    }
    Json(serde_json::json!({
        "tenant": body.id,
        "state": state.supervisor.session_state(&body.id),
    }))
    .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/tenants
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_tenants(State(state): State<AppState>) -> Response {
    match state.supervisor.list_sessions() {
        Ok(tenants) => Json(serde_json::json!({
            "count": tenants.len(),
            "tenants": tenants,
        }))
        .into_response(),
        Err(e) => supervisor_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/tenants/:id/pairing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The tenant's current pairing artifact. `pairing` is null once the
/// session has connected (the artifact is single-use).
pub async fn pairing(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let overview = match state.supervisor.session_overview(&id) {
        Ok(Some(o)) => o,
        Ok(None) => return api_error(StatusCode::NOT_FOUND, format!("unknown tenant {id:?}")),
        Err(e) => return supervisor_error(e),
    };
    Json(serde_json::json!({
        "tenant": id,
        "state": overview.state,
        "pairing": overview.record.pairing,
    }))
    .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/tenants/:id/send
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SendBody>,
) -> Response {
    if body.message.is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "message must not be empty");
    }
    match state
        .supervisor
        .send_message(&id, &body.to, &body.message)
        .await
    {
        Ok(address) => Json(serde_json::json!({
            "tenant": id,
            "to": address,
            "sent": true,
        }))
        .into_response(),
        Err(e) => supervisor_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/tenants/:id/messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Message history, most recent first. `limit` (default 50, max 500)
/// and `offset` page through older messages.
pub async fn list_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> Response {
    let limit = query.limit.min(MAX_LIMIT);
    match state.supervisor.list_messages(&id, limit, query.offset) {
        Ok(messages) => Json(serde_json::json!({
            "tenant": id,
            "count": messages.len(),
            "limit": limit,
            "offset": query.offset,
            "messages": messages,
        }))
        .into_response(),
        Err(e) => supervisor_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/tenants/:id/restore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tear down any live session for the tenant and open a fresh one.
/// Revives tenants parked in the terminated state.
pub async fn restore(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    if let Err(resp) = validate_tenant_id(&id) {
        return resp;
    }
    if let Err(e) = state.supervisor.restart_session(&id).await {
        return supervisor_error(e);
    }
    Json(serde_json::json!({
        "tenant": id,
        "restored": true,
        "state": state.supervisor.session_state(&id),
    }))
    .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DELETE /v1/tenants/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Reset the tenant: close the session and delete its credentials and
/// record. The message log survives unless `purge_messages=true`.
pub async fn delete_tenant(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> Response {
    match state
        .supervisor
        .reset_session(&id, query.purge_messages)
        .await
    {
        Ok(()) => Json(serde_json::json!({
            "tenant": id,
            "reset": true,
            "purged_messages": query.purge_messages,
        }))
        .into_response(),
        Err(e) => supervisor_error(e),
    }
}
