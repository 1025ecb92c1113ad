//! OpenAI-compatible `/v1/chat/completions` and `/v1/models`.
//!
//! Accepts the standard chat-completion request shape, runs it through the
//! agent loop as a chat-only turn (no tools — OpenAI clients manage their
//! own), and answers in the OpenAI response shape, streaming or not. Each
//! request gets an ephemeral session, matching the stateless semantics of
//! the upstream API.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json};
use futures_util::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::runtime::{run_turn, ToolAccess, TurnEvent, TurnInput, TurnMode};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct CompletionRequest {
    #[serde(default)]
    pub model: Option<String>,
    pub messages: Vec<CompletionMessage>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Deserialize)]
pub struct CompletionMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Serialize)]
struct CompletionResponse {
    id: String,
    object: &'static str,
    created: i64,
    model: String,
    choices: Vec<Choice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    usage: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct Choice {
    index: u32,
    message: ChoiceMessage,
    finish_reason: &'static str,
}

#[derive(Debug, Serialize)]
struct ChoiceMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct Chunk {
    id: String,
    object: &'static str,
    created: i64,
    model: String,
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Serialize)]
struct ChunkChoice {
    index: u32,
    delta: ChunkDelta,
    finish_reason: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct ChunkDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/chat/completions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat_completions(
    State(state): State<AppState>,
    Json(body): Json<CompletionRequest>,
) -> axum::response::Response {
    let Some(user_message) = last_user_message(&body.messages) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": {
                    "message": "no user message found in messages array",
                    "type": "invalid_request_error",
                }
            })),
        )
            .into_response();
    };

    let uuid = uuid::Uuid::new_v4().simple().to_string();
    let session_key = state.sessions.get_or_create("openai", &uuid[..8]);

    let model = body
        .model
        .clone()
        .unwrap_or_else(|| state.pool().current_model());
    let input = TurnInput {
        session_key,
        user_message: Some(user_message),
        mode: if body.stream {
            TurnMode::Streaming
        } else {
            TurnMode::NonStreaming
        },
        access: ToolAccess::ChatOnly,
        elevated_override: None,
    };

    let completion_id = format!("chatcmpl-{}", uuid::Uuid::new_v4().simple());
    let created = chrono::Utc::now().timestamp();

    if body.stream {
        let rx = run_turn(state, input);
        let stream = sse_stream(rx, completion_id, created, model);
        return Sse::new(stream).keep_alive(KeepAlive::default()).into_response();
    }

    let response = crate::runtime::process_message(&state, input).await;
    if let Some(error) = response.error {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": { "message": error, "type": "server_error" } })),
        )
            .into_response();
    }

    Json(CompletionResponse {
        id: completion_id,
        object: "chat.completion",
        created,
        model,
        choices: vec![Choice {
            index: 0,
            message: ChoiceMessage {
                role: "assistant",
                content: response.content,
            },
            finish_reason: "stop",
        }],
        usage: response.usage.map(|u| {
            json!({
                "prompt_tokens": u.prompt_tokens,
                "completion_tokens": u.completion_tokens,
                "total_tokens": u.total_tokens,
            })
        }),
    })
    .into_response()
}

fn sse_stream(
    mut rx: tokio::sync::mpsc::Receiver<TurnEvent>,
    completion_id: String,
    created: i64,
    model: String,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        let chunk = |delta: ChunkDelta, finish: Option<&'static str>| Chunk {
            id: completion_id.clone(),
            object: "chat.completion.chunk",
            created,
            model: model.clone(),
            choices: vec![ChunkChoice { index: 0, delta, finish_reason: finish }],
        };

        // Leading chunk announcing the assistant role.
        let lead = chunk(ChunkDelta { role: Some("assistant"), content: None }, None);
        if let Ok(data) = serde_json::to_string(&lead) {
            yield Ok(Event::default().data(data));
        }

        while let Some(event) = rx.recv().await {
            match event {
                TurnEvent::Stream { content } => {
                    let c = chunk(ChunkDelta { role: None, content: Some(content) }, None);
                    if let Ok(data) = serde_json::to_string(&c) {
                        yield Ok(Event::default().data(data));
                    }
                }
                TurnEvent::Response { .. } | TurnEvent::Interrupted { .. } => {
                    let c = chunk(ChunkDelta { role: None, content: None }, Some("stop"));
                    if let Ok(data) = serde_json::to_string(&c) {
                        yield Ok(Event::default().data(data));
                    }
                }
                TurnEvent::Error { message } => {
                    let err = json!({ "error": { "message": message, "type": "server_error" } });
                    yield Ok(Event::default().data(err.to_string()));
                }
                TurnEvent::ToolCall { .. } => {}
            }
        }

        yield Ok(Event::default().data("[DONE]"));
    }
}

fn last_user_message(messages: &[CompletionMessage]) -> Option<String> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.content.clone())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/models
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_models(State(state): State<AppState>) -> impl IntoResponse {
    let data: Vec<serde_json::Value> = state
        .pool()
        .list_models()
        .iter()
        .map(|m| {
            json!({
                "id": m.model,
                "object": "model",
                "owned_by": m.name,
            })
        })
        .collect();
    Json(json!({ "object": "list", "data": data }))
}
