//! Bearer-token gate for the `/v1` routes.
//!
//! The token is resolved once at boot (`server.api_token`, falling back
//! to the env var named by `server.api_token_env`); only its SHA-256
//! digest lives in `AppState`. With no token configured the gate is a
//! pass-through and boot logs a warning.

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::state::AppState;

/// Middleware for `axum::middleware::from_fn_with_state`.
pub async fn require_api_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = &state.api_token_hash else {
        return next.run(req).await;
    };

    let provided = bearer_token(&req).unwrap_or("");
    if !token_matches(provided, expected) {
        return (
            StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({ "error": "invalid or missing API token" })),
        )
            .into_response();
    }

    next.run(req).await
}

fn bearer_token(req: &Request<Body>) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Compare against the configured digest in constant time. Hashing
/// first keeps the comparison fixed-length, so the token length does
/// not leak either.
fn token_matches(provided: &str, expected: &[u8; 32]) -> bool {
    let digest = Sha256::digest(provided.as_bytes());
    digest.ct_eq(&expected[..]).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(token: &str) -> [u8; 32] {
        Sha256::digest(token.as_bytes()).into()
    }

    #[test]
    fn bearer_token_requires_the_scheme_prefix() {
        let req = Request::builder()
            .header(header::AUTHORIZATION, "Bearer s3cret")
            .body(Body::empty())
            .unwrap();
        assert_eq!(bearer_token(&req), Some("s3cret"));

        let req = Request::builder()
            .header(header::AUTHORIZATION, "Basic s3cret")
            .body(Body::empty())
            .unwrap();
        assert_eq!(bearer_token(&req), None);

        let req = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(bearer_token(&req), None);
    }

    #[test]
    fn token_matches_accepts_only_the_exact_token() {
        let expected = digest("s3cret");
        assert!(token_matches("s3cret", &expected));
        assert!(!token_matches("s3cret ", &expected));
        assert!(!token_matches("", &expected));
    }
}
