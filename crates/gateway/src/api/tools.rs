//! Per-session tool promotion and demotion over HTTP.

use axum::extract::State;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ToolRequest {
    pub session_id: String,
    pub name: String,
}

// ── POST /api/tools/load ────────────────────────────────────────────

pub async fn load_tool(
    State(state): State<AppState>,
    Json(body): Json<ToolRequest>,
) -> impl IntoResponse {
    let view = state.registry.session_view(body.session_id.clone());
    match view.promote(&body.name) {
        Ok(description) => {
            state.clients.data_update("tools", None);
            Json(json!({ "promoted": true, "description": description }))
        }
        Err(error) => Json(json!({ "promoted": false, "error": error })),
    }
}

// ── POST /api/tools/unload ──────────────────────────────────────────

pub async fn unload_tool(
    State(state): State<AppState>,
    Json(body): Json<ToolRequest>,
) -> impl IntoResponse {
    let view = state.registry.session_view(body.session_id.clone());
    match view.demote(&body.name) {
        Ok(()) => {
            state.clients.data_update("tools", None);
            Json(json!({ "unloaded": true }))
        }
        Err(error) => Json(json!({ "unloaded": false, "error": error })),
    }
}
