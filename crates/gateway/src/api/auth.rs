//! API authentication middleware.
//!
//! `gateway.auth.mode = "none"` leaves the API open (dev mode). In `token`
//! mode every protected request must carry `Authorization: Bearer <token>`.
//! Tokens are hashed to fixed length and compared in constant time.

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use relay_domain::config::AuthMode;

use crate::state::AppState;

/// Constant-time token comparison via SHA-256 digests. Hashing normalizes
/// lengths so `ct_eq` always compares 32 bytes.
pub fn token_eq(a: &str, b: &str) -> bool {
    let ha = Sha256::digest(a.as_bytes());
    let hb = Sha256::digest(b.as_bytes());
    ha.ct_eq(&hb).into()
}

/// Axum middleware enforcing bearer-token auth on protected routes.
/// Attach via `axum::middleware::from_fn_with_state`.
pub async fn require_api_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let config = state.config.get();
    if config.gateway.auth.mode == AuthMode::None {
        return next.run(req).await;
    }

    let expected = config.gateway.auth.token.as_deref().unwrap_or("");
    let provided = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    if expected.is_empty() || !token_eq(provided, expected) {
        return (
            axum::http::StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({ "error": "invalid or missing API token" })),
        )
            .into_response();
    }

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_eq_matches_exact() {
        assert!(token_eq("secret", "secret"));
        assert!(!token_eq("secret", "Secret"));
        assert!(!token_eq("secret", "secret "));
        assert!(!token_eq("", "secret"));
    }
}
