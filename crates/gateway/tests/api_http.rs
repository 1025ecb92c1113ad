//! Router integration tests: drive the axum app in-process with
//! `tower::ServiceExt::oneshot` — auth gating, config read/update,
//! per-session tool views, and the session endpoints.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use relay_domain::config::{AuthMode, Config};
use relay_gateway::api;
use relay_gateway::bootstrap::build_state;
use relay_gateway::state::AppState;
use relay_tools::{Tool, ToolContext, ToolOutcome};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn base_config(dir: &tempfile::TempDir) -> Config {
    let mut config = Config::default();
    config.sessions.directory = dir.path().join("sessions");
    config.cron.directory = dir.path().join("cron");
    config.memory.directory = dir.path().join("memory");
    config.skills.directory = dir.path().join("skills");
    config
}

fn state_with(config: Config, dir: &tempfile::TempDir) -> AppState {
    build_state(config, dir.path().join("config.toml")).unwrap()
}

fn app(state: &AppState) -> axum::Router {
    api::router(state.clone()).with_state(state.clone())
}

async fn send(
    app: axum::Router,
    method: &str,
    uri: &str,
    bearer: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(value) => builder
            .header("content-type", "application/json")
            .body(Body::from(value.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

struct EchoTool;

#[async_trait::async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "echoes input"
    }
    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }
    async fn execute(&self, args: Value, _ctx: &ToolContext) -> ToolOutcome {
        ToolOutcome::ok(args.to_string())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Auth
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn open_mode_serves_health_without_a_token() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_with(base_config(&dir), &dir);

    let (status, body) = send(app(&state), "GET", "/api/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn token_mode_rejects_missing_and_wrong_tokens() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(&dir);
    config.gateway.auth.mode = AuthMode::Token;
    config.gateway.auth.token = Some("sekrit".into());
    let state = state_with(config, &dir);

    let (status, _) = send(app(&state), "GET", "/api/health", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(app(&state), "GET", "/api/health", Some("wrong"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(app(&state), "GET", "/api/health", Some("sekrit"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn webhook_bypasses_api_auth_but_wants_its_own_token() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(&dir);
    config.gateway.auth.mode = AuthMode::Token;
    config.gateway.auth.token = Some("api-token".into());
    config.webhooks.enabled = true;
    config.webhooks.token = Some("hook-token".into());
    let state = state_with(config, &dir);

    // No API bearer, wrong webhook token: 401 from the webhook's own gate,
    // not from the API middleware.
    let (status, _) = send(
        app(&state),
        "POST",
        "/api/webhook",
        None,
        Some(json!({"message": "ping", "token": "nope"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn full_config_masks_secrets() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(&dir);
    config.agent.api_key = Some("sk-live-very-secret".into());
    let state = state_with(config, &dir);

    let (status, body) = send(app(&state), "GET", "/api/config/full", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["agent"]["api_key"], "***");
    assert_eq!(body["agent"]["model"], "gpt-4o");
}

#[tokio::test]
async fn putting_back_the_masked_document_changes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(&dir);
    config.agent.api_key = Some("sk-live-very-secret".into());
    let state = state_with(config, &dir);

    let (_, masked) = send(app(&state), "GET", "/api/config/full", None, None).await;
    let (status, body) = send(app(&state), "PUT", "/api/config", None, Some(masked)).await;
    assert_eq!(status, StatusCode::OK, "{body}");

    // The secret survived the masked round-trip.
    let live = state.config.get();
    assert_eq!(live.agent.api_key.as_deref(), Some("sk-live-very-secret"));
}

#[tokio::test]
async fn config_update_merges_and_hot_reloads() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_with(base_config(&dir), &dir);

    let patch = json!({
        "agent": { "model": "gpt-5" },
        "tools": { "deny": ["bash"] },
    });
    let (status, body) = send(app(&state), "PUT", "/api/config", None, Some(patch)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["ok"], true);

    let live = state.config.get();
    assert_eq!(live.agent.model, "gpt-5");
    assert_eq!(live.tools.deny, vec!["bash".to_owned()]);
    // Untouched keys keep their values.
    assert_eq!(live.gateway.port, 7710);
    // The pool was rebuilt from the merged agent section.
    assert_eq!(state.pool().current_model(), "gpt-5");
    // The document landed on disk.
    assert!(dir.path().join("config.toml").exists());
}

#[tokio::test]
async fn invalid_config_update_is_rejected_with_400() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_with(base_config(&dir), &dir);
    let before = state.config.get().gateway.port;

    let patch = json!({ "gateway": { "port": 0 } });
    let (status, body) = send(app(&state), "PUT", "/api/config", None, Some(patch)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["issues"].as_array().is_some_and(|a| !a.is_empty()));

    // Live config untouched.
    assert_eq!(state.config.get().gateway.port, before);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn session_export_delete_import_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_with(base_config(&dir), &dir);

    let id = state.sessions.get_or_create("ws", "alice");
    state
        .sessions
        .add_message(&id, relay_domain::message::Message::user("hi"))
        .unwrap();

    let (status, export) =
        send(app(&state), "GET", &format!("/api/sessions/{id}/export"), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(export["messages"][0]["content"], "hi");

    let (status, _) =
        send(app(&state), "DELETE", &format!("/api/sessions/{id}"), None, None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(app(&state), "GET", &format!("/api/sessions/{id}"), None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) =
        send(app(&state), "POST", "/api/sessions/import", None, Some(export)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["imported"], id);
    assert_eq!(state.sessions.message_count(&id).unwrap(), 1);
}

#[tokio::test]
async fn main_session_endpoints() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_with(base_config(&dir), &dir);
    let id = state.sessions.get_or_create("ws", "main");

    let (_, body) = send(app(&state), "GET", "/api/sessions/main", None, None).await;
    assert!(body["main_session_id"].is_null());

    let (status, body) = send(
        app(&state),
        "POST",
        "/api/sessions/main",
        None,
        Some(json!({"session_id": id})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["main_session_id"], id);

    // Unknown session: 404.
    let (status, _) = send(
        app(&state),
        "POST",
        "/api/sessions/main",
        None,
        Some(json!({"session_id": "ghost:x"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool views & models
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn load_tool_twice_then_unload() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_with(base_config(&dir), &dir);
    state
        .registry
        .register_deferred(Arc::new(EchoTool), "Echoes things", vec![]);

    let load = json!({"session_id": "ws:a", "name": "echo"});

    let (_, body) = send(app(&state), "POST", "/api/tools/load", None, Some(load.clone())).await;
    assert_eq!(body["promoted"], true);
    assert_eq!(body["description"], "echoes input");

    // Second promote is an error, not idempotent success.
    let (_, body) = send(app(&state), "POST", "/api/tools/load", None, Some(load.clone())).await;
    assert_eq!(body["promoted"], false);

    let (_, body) = send(app(&state), "POST", "/api/tools/unload", None, Some(load)).await;
    assert_eq!(body["unloaded"], true);

    // Meta tools refuse to unload.
    let (_, body) = send(
        app(&state),
        "POST",
        "/api/tools/unload",
        None,
        Some(json!({"session_id": "ws:a", "name": "load_tool"})),
    )
    .await;
    assert_eq!(body["unloaded"], false);
}

#[tokio::test]
async fn models_list_and_switch() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_with(base_config(&dir), &dir);

    let (status, body) = send(app(&state), "GET", "/api/models", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["models"][0]["name"], "default");

    let (status, _) = send(
        app(&state),
        "POST",
        "/api/models/switch",
        None,
        Some(json!({"model": "no-such-model"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(
        app(&state),
        "POST",
        "/api/models/switch",
        None,
        Some(json!({"model": "0"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["switched"]["current"], true);
}
