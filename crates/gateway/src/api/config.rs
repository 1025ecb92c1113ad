//! Config endpoints.
//!
//! - `GET /api/config`      — curated summary, no secrets
//! - `GET /api/config/full` — the whole document with secrets masked `"***"`
//! - `PUT /api/config`      — deep-merge update: masked leaves mean
//!   "unchanged"; the merged document is validated, written atomically,
//!   swapped into the live pointer, and announced via `data_update`.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde_json::{json, Value};

use relay_domain::config::{deep_merge, mask_secrets, restore_masked, Config, ConfigSeverity};
use relay_providers::ProviderPool;

use crate::state::AppState;

// ── GET /api/config ─────────────────────────────────────────────────

pub async fn get_safe(State(state): State<AppState>) -> impl IntoResponse {
    let config = state.config.get();
    Json(json!({
        "agent": {
            "model": config.agent.model,
            "api_base": config.agent.api_base,
            "max_tokens": config.agent.max_tokens,
            "temperature": config.agent.temperature,
            "providers": config.agent.providers.iter().map(|p| json!({
                "name": p.name,
                "model": p.model,
                "priority": p.priority,
            })).collect::<Vec<_>>(),
        },
        "gateway": {
            "host": config.gateway.host,
            "port": config.gateway.port,
            "auth_mode": config.gateway.auth.mode,
        },
        "sessions": {
            "directory": config.sessions.directory,
            "context_limit": config.sessions.context_limit,
        },
        "features": {
            "browser": config.browser.enabled,
            "canvas": config.canvas.enabled,
            "tts": config.tts.enabled,
            "discord": config.channels.discord.enabled,
            "webhooks": config.webhooks.enabled,
            "cron": config.cron.enabled,
            "heartbeat": config.heartbeat.enabled,
            "plugins": config.plugins.enabled,
        },
    }))
}

// ── GET /api/config/full ────────────────────────────────────────────

pub async fn get_full(State(state): State<AppState>) -> impl IntoResponse {
    let config = state.config.get();
    match serde_json::to_value(&*config) {
        Ok(mut doc) => {
            mask_secrets(&mut doc);
            Json(doc).into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

// ── PUT /api/config ─────────────────────────────────────────────────

pub async fn put_config(
    State(state): State<AppState>,
    Json(patch): Json<Value>,
) -> impl IntoResponse {
    let current_config = state.config.get();
    let current = match serde_json::to_value(&*current_config) {
        Ok(v) => v,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response();
        }
    };

    // Merge the patch over the current document, then put the previous
    // values back wherever the patch carried a masked "***" leaf.
    let mut merged = current.clone();
    deep_merge(&mut merged, patch);
    restore_masked(&mut merged, &current);

    let new_config: Config = match serde_json::from_value(merged) {
        Ok(c) => c,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("invalid config: {e}") })),
            )
                .into_response();
        }
    };

    let issues = new_config.validate();
    if Config::has_errors(&issues) {
        let errors: Vec<String> = issues
            .iter()
            .filter(|i| i.severity == ConfigSeverity::Error)
            .map(|i| i.to_string())
            .collect();
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "config validation failed", "issues": errors })),
        )
            .into_response();
    }
    let warnings: Vec<String> = issues.iter().map(|i| i.to_string()).collect();

    if let Err(e) = persist_config(&state, &new_config) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": format!("failed to persist config: {e}") })),
        )
            .into_response();
    }

    // Hot-reload: swap the live pointer, rebuild what derives from it.
    match ProviderPool::from_config(&new_config.agent) {
        Ok(pool) => state.swap_pool(pool),
        Err(e) => tracing::warn!(error = %e, "provider pool not rebuilt after config update"),
    }
    state
        .registry
        .set_policy(new_config.tools.allow.clone(), new_config.tools.deny.clone());
    state.heartbeat.set_enabled(new_config.heartbeat.enabled);
    state.config.swap(new_config);

    state.clients.data_update("config", None);
    tracing::info!("config updated and reloaded");

    Json(json!({ "ok": true, "warnings": warnings })).into_response()
}

/// Atomic write: serialize to TOML in a temp file next to the target, then
/// rename over it.
pub fn persist_config(state: &AppState, config: &Config) -> anyhow::Result<()> {
    let path = state.config.path();
    let text = toml::to_string_pretty(config)?;

    let dir = path.parent().unwrap_or(std::path::Path::new("."));
    std::fs::create_dir_all(dir)?;
    let tmp = tempfile::NamedTempFile::new_in(dir)?;
    std::fs::write(tmp.path(), text)?;
    tmp.persist(path)?;
    Ok(())
}
