pub mod auth;
pub mod health;
pub mod tenants;

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
///
/// `/health` is public; everything under `/v1` sits behind the
/// bearer-token middleware (a no-op in dev mode with no token set).
///
/// `state` is needed to wire up the auth middleware at build time.
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new().route("/health", get(health::health));

    let protected = Router::new()
        .route("/v1/tenants", post(tenants::create_tenant))
        .route("/v1/tenants", get(tenants::list_tenants))
        .route("/v1/tenants/:id", delete(tenants::delete_tenant))
        .route("/v1/tenants/:id/pairing", get(tenants::pairing))
        .route("/v1/tenants/:id/send", post(tenants::send_message))
        .route("/v1/tenants/:id/messages", get(tenants::list_messages))
        .route("/v1/tenants/:id/restore", post(tenants::restore))
        .layer(middleware::from_fn_with_state(
            state,
            auth::require_api_token,
        ));

    public.merge(protected)
}
