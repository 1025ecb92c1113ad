//! Chat endpoints — the non-streaming HTTP interface to the agent loop.
//!
//! - `POST /api/chat`    — one-shot turn; slash commands are handled first
//! - `POST /api/command` — execute a slash command directly

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;

use crate::commands::handle_command;
use crate::runtime::{process_message, ToolAccess, TurnInput, TurnMode};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    /// Explicit session id (`channel:user`). Defaults to the main session,
    /// then to `api:default`.
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub command: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Resolve the target session for an HTTP chat: explicit id first, then the
/// main session, then the shared `api:default` session. Unknown explicit
/// ids are created (ids are `channel:user`).
pub fn resolve_session(state: &AppState, explicit: Option<&str>) -> String {
    if let Some(id) = explicit {
        if state.sessions.exists(id) {
            return id.to_owned();
        }
        let (channel, user) = id.split_once(':').unwrap_or(("api", id));
        return state.sessions.get_or_create(channel, user);
    }
    state
        .sessions
        .main_session_id()
        .unwrap_or_else(|| state.sessions.get_or_create("api", "default"))
}

pub fn context_stats(state: &AppState, session_key: &str) -> serde_json::Value {
    let tokens = state.sessions.estimate_tokens(session_key).unwrap_or(0);
    let limit = state.config.get().sessions.context_limit;
    json!({
        "tokens": tokens,
        "limit": limit,
        "percent": (tokens as f64 / limit as f64 * 100.0).min(100.0),
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/chat
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat(
    State(state): State<AppState>,
    Json(body): Json<ChatRequest>,
) -> impl IntoResponse {
    let session_key = resolve_session(&state, body.session_id.as_deref());

    // Slash commands never reach the LLM.
    if let Some(reply) = handle_command(&state, &session_key, &body.message).await {
        return Json(json!({
            "session_id": &session_key,
            "content": reply,
            "tool_calls": [],
            "usage": null,
            "context": context_stats(&state, &session_key),
        }))
        .into_response();
    }

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
        "usage": response.usage,
        "error": response.error,
        "interrupted": response.interrupted,
        "context": context_stats(&state, &session_key),
    }))
    .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/command
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn command(
    State(state): State<AppState>,
    Json(body): Json<CommandRequest>,
) -> impl IntoResponse {
    let session_key = resolve_session(&state, body.session_id.as_deref());

    // Accept with or without the leading slash.
    let normalized = if body.command.starts_with('/') {
        body.command.clone()
    } else {
        format!("/{}", body.command)
    };

    match handle_command(&state, &session_key, &normalized).await {
        Some(reply) => Json(json!({
            "session_id": session_key,
            "content": reply,
        }))
        .into_response(),
        None => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("unknown command \"{}\"", body.command) })),
        )
            .into_response(),
    }
}
