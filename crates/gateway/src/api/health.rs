//! Liveness probe.

use axum::response::{IntoResponse, Json};

/// `GET /health` — process is up and serving.
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
