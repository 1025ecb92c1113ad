//! Provider listing and model switching.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;

use crate::state::AppState;

// ── GET /api/models ─────────────────────────────────────────────────

pub async fn list_models(State(state): State<AppState>) -> impl IntoResponse {
    let pool = state.pool();
    Json(json!({
        "models": pool.list_models(),
        "current_model": pool.current_model(),
    }))
}

// ── POST /api/models/switch ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SwitchRequest {
    /// Provider index, provider name, or model name (case-insensitive).
    pub model: String,
}

pub async fn switch_model(
    State(state): State<AppState>,
    Json(body): Json<SwitchRequest>,
) -> impl IntoResponse {
    match state.pool().switch_model(&body.model) {
        Some(status) => Json(json!({ "switched": status })).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("no provider or model matching \"{}\"", body.model) })),
        )
            .into_response(),
    }
}
