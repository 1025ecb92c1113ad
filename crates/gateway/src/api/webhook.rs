//! External event ingestion: `POST /api/webhook`.
//!
//! Gated by its own token (`webhooks.token`), independent of API auth: the
//! endpoint is reachable without a bearer token but refuses anything that
//! does not present the webhook secret.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;

use crate::api::auth::token_eq;
use crate::api::chat::{context_stats, resolve_session};
use crate::runtime::{process_message, ToolAccess, TurnInput, TurnMode};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WebhookRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    /// Token may come in the body or as `Authorization: Bearer`.
    #[serde(default)]
    pub token: Option<String>,
}

pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<WebhookRequest>,
) -> impl IntoResponse {
    let config = state.config.get();
    if !config.webhooks.enabled {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "webhooks are disabled" })),
        )
            .into_response();
    }

    let expected = config.webhooks.token.as_deref().unwrap_or("");
    let provided = body
        .token
        .as_deref()
        .or_else(|| {
            headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
        })
        .unwrap_or("");

    if expected.is_empty() || !token_eq(provided, expected) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid or missing webhook token" })),
        )
            .into_response();
    }

    let session_key = resolve_session(&state, body.session_id.as_deref());
    tracing::info!(session = %session_key, "webhook event accepted");

    let input = TurnInput {
        session_key: session_key.clone(),
        user_message: Some(body.message),
        mode: TurnMode::NonStreaming,
        access: ToolAccess::Full,
        elevated_override: None,
    };
    let response = process_message(&state, input).await;

    Json(json!({
        "session_id": &session_key,
        "content": response.content,
        "tool_calls": response.tool_calls,
        "error": response.error,
        "context": context_stats(&state, &session_key),
    }))
    .into_response()
}
