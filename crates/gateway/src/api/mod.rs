pub mod auth;
pub mod chat;
pub mod config;
pub mod models;
pub mod openai_compat;
pub mod sessions;
pub mod tools;
pub mod webhook;

use axum::extract::State;
use axum::middleware;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full router.
///
/// Everything under `/api/*` and the OpenAI shim is gated behind the
/// configured auth mode. The WebSocket upgrade and the webhook are public:
/// the webhook carries its own token, the upgrade authenticates nothing
/// per-request.
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/ws", get(crate::ws::ws_upgrade))
        .route("/api/webhook", post(webhook::webhook));

    let protected = Router::new()
        .route("/api/health", get(health))
        .route("/api/status", get(status))
        // Sessions
        .route("/api/sessions", get(sessions::list_sessions))
        .route("/api/sessions/main", get(sessions::get_main).post(sessions::set_main))
        .route("/api/sessions/import", post(sessions::import_session))
        .route(
            "/api/sessions/:id",
            get(sessions::get_session).delete(sessions::delete_session),
        )
        .route("/api/sessions/:id/export", get(sessions::export_session))
        .route("/api/sessions/:id/duplicate", post(sessions::duplicate_session))
        // Chat & commands
        .route("/api/chat", post(chat::chat))
        .route("/api/command", post(chat::command))
        // Config
        .route("/api/config", get(config::get_safe).put(config::put_config))
        .route("/api/config/full", get(config::get_full))
        // Models
        .route("/api/models", get(models::list_models))
        .route("/api/models/switch", post(models::switch_model))
        // Per-session tool views
        .route("/api/tools/load", post(tools::load_tool))
        .route("/api/tools/unload", post(tools::unload_tool))
        // OpenAI-compatible shim
        .route("/v1/chat/completions", post(openai_compat::chat_completions))
        .route("/v1/models", get(openai_compat::list_models))
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_api_token,
        ));

    public
        .merge(protected)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/health + /api/status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "uptime": state.uptime_secs(),
        "model": state.pool().current_model(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.registry.stats();
    Json(serde_json::json!({
        "sessions": state.sessions.session_count(),
        "clients": state.clients.client_count(),
        "processing": state.cancel_map.running_count(),
        "busy_sessions": state.clients.busy_sessions(),
        "jobs": state.scheduler.job_count(),
        "tools": stats,
        "heartbeat": {
            "enabled": state.heartbeat.is_enabled(),
            "last": state.heartbeat.last_record(),
        },
    }))
}
