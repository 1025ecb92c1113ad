//! Session management endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;

use relay_sessions::SessionExport;

use crate::state::AppState;

fn not_found(id: &str) -> axum::response::Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("session not found: {id}") })),
    )
        .into_response()
}

// ── GET /api/sessions ───────────────────────────────────────────────

pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "sessions": state.sessions.list() }))
}

// ── GET /api/sessions/:id ───────────────────────────────────────────

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.sessions.get(&id) {
        Some(session) => Json(session).into_response(),
        None => not_found(&id),
    }
}

// ── DELETE /api/sessions/:id ────────────────────────────────────────

pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.sessions.delete_session(&id) {
        Ok(()) => {
            state.registry.drop_overlay(&id);
            state.clients.data_update("sessions", None);
            Json(json!({ "deleted": id })).into_response()
        }
        Err(_) => not_found(&id),
    }
}

// ── GET /api/sessions/:id/export ────────────────────────────────────

pub async fn export_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.sessions.export(&id) {
        Ok(export) => Json(export).into_response(),
        Err(_) => not_found(&id),
    }
}

// ── POST /api/sessions/import ───────────────────────────────────────

pub async fn import_session(
    State(state): State<AppState>,
    Json(export): Json<SessionExport>,
) -> impl IntoResponse {
    match state.sessions.import(export) {
        Ok(id) => {
            state.clients.data_update("sessions", None);
            Json(json!({ "imported": id })).into_response()
        }
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

// ── POST /api/sessions/:id/duplicate ────────────────────────────────

pub async fn duplicate_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.sessions.duplicate_session(&id) {
        Ok(new_id) => {
            state.clients.data_update("sessions", None);
            Json(json!({ "duplicated": new_id })).into_response()
        }
        Err(_) => not_found(&id),
    }
}

// ── GET/POST /api/sessions/main ─────────────────────────────────────

pub async fn get_main(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "main_session_id": state.sessions.main_session_id() }))
}

#[derive(Debug, Deserialize)]
pub struct SetMainRequest {
    /// `null` clears the designation.
    pub session_id: Option<String>,
}

pub async fn set_main(
    State(state): State<AppState>,
    Json(body): Json<SetMainRequest>,
) -> impl IntoResponse {
    match state.sessions.set_main_session(body.session_id.clone()) {
        Ok(()) => {
            state.clients.data_update("sessions", None);
            Json(json!({ "main_session_id": state.sessions.main_session_id() })).into_response()
        }
        Err(_) => not_found(body.session_id.as_deref().unwrap_or("")),
    }
}
