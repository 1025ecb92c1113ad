//! WebSocket endpoint: the session-routed message pump.
//!
//! JSON text frames both directions. Each connection gets a writer task fed
//! by the client registry and a reader loop here. A fresh client binds to
//! the main session when one is designated, otherwise to a newly minted
//! per-client session. Stream deltas, tool-call events, and responses fan
//! out to every client bound to the session.

use std::time::Duration;

use axum::extract::ws::{Message as WsFrame, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use relay_domain::message::{Message, Role};

use crate::api::chat::context_stats;
use crate::commands::handle_command;
use crate::runtime::{run_turn, ToolAccess, TurnEvent, TurnInput, TurnMode};
use crate::state::AppState;

/// How often a reconnecting client polls a busy session until it settles.
const RECONNECT_POLL: Duration = Duration::from_millis(2500);

pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Socket lifecycle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    let client_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_owned();

    // Bind to the main session when designated; mint otherwise.
    let session_key = match state.sessions.main_session_id() {
        Some(main) => main,
        None => state.sessions.get_or_create("ws", &client_id),
    };

    let (tx, mut rx) = mpsc::channel::<String>(256);
    state.clients.register(&client_id, &session_key, tx);
    tracing::info!(client = %client_id, session = %session_key, "ws client connected");

    // Writer task: forwards registry frames to the socket.
    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if ws_sink.send(WsFrame::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let processing = state.locks.is_processing(&session_key);
    state.clients.send_to(
        &client_id,
        &json!({
            "type": "connected",
            "session_id": &session_key,
            "client_id": &client_id,
            "presence": if processing { "busy" } else { "idle" },
            "context": context_stats(&state, &session_key),
            "processing": processing,
        }),
    );
    send_messages_frame(&state, &client_id, &session_key, "session_loaded");

    // Reconnect recovery: a client attaching to a mid-turn session polls
    // until the turn ends, then gets a fresh session_loaded.
    if processing {
        spawn_reconnect_poll(state.clone(), client_id.clone(), session_key.clone());
    }

    // Reader loop.
    while let Some(Ok(frame)) = ws_stream.next().await {
        match frame {
            WsFrame::Text(text) => match serde_json::from_str::<Value>(&text) {
                Ok(value) => handle_frame(&state, &client_id, value).await,
                Err(_) => {
                    tracing::debug!(client = %client_id, "ignoring unparseable ws frame");
                }
            },
            WsFrame::Close(_) => break,
            _ => {}
        }
    }

    writer.abort();
    state.clients.remove(&client_id);
    tracing::info!(client = %client_id, "ws client disconnected");
}

fn spawn_reconnect_poll(state: AppState, client_id: String, session_key: String) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(RECONNECT_POLL).await;
            // Client gone or moved on — stop polling.
            if state.clients.session_of(&client_id).as_deref() != Some(session_key.as_str()) {
                return;
            }
            if !state.locks.is_processing(&session_key) {
                send_messages_frame(&state, &client_id, &session_key, "session_loaded");
                return;
            }
        }
    });
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inbound frames
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn handle_frame(state: &AppState, client_id: &str, frame: Value) {
    let Some(session_key) = state.clients.session_of(client_id) else {
        return;
    };
    let frame_type = frame.get("type").and_then(|t| t.as_str()).unwrap_or("");

    match frame_type {
        "message" => {
            let content = frame
                .get("content")
                .and_then(|c| c.as_str())
                .unwrap_or("")
                .to_owned();
            if content.is_empty() {
                state.clients.send_to(
                    client_id,
                    &json!({ "type": "error", "message": "empty message" }),
                );
                return;
            }
            spawn_message_turn(state.clone(), session_key, content);
        }
        "typing" => {
            let active = frame.get("active").and_then(|a| a.as_bool()).unwrap_or(false);
            state.clients.broadcast_to_session(
                &session_key,
                &json!({ "type": "typing", "client_id": client_id, "active": active }),
                Some(client_id),
            );
        }
        "ping" => {
            state.clients.send_to(client_id, &json!({ "type": "pong" }));
        }
        "load_session" => {
            let target = frame
                .get("session_id")
                .and_then(|s| s.as_str())
                .unwrap_or("");
            if state.sessions.exists(target) {
                state.clients.set_session(client_id, target);
                send_messages_frame(state, client_id, target, "session_loaded");
            } else {
                state.clients.send_to(
                    client_id,
                    &json!({ "type": "error", "message": format!("session not found: {target}") }),
                );
            }
        }
        "interrupt" => {
            // Drop queued turns, then abort the in-flight one; the loop
            // emits the interrupted event with any partial text.
            state.locks.bump_epoch(&session_key);
            state.cancel_map.cancel(&session_key);
        }
        "delete_message" => {
            if let Some(index) = frame.get("index").and_then(|i| i.as_u64()) {
                match state.sessions.delete_message_at(&session_key, index as usize) {
                    Ok(()) => {
                        let _ = state.sessions.save_session(&session_key);
                        send_messages_broadcast(state, &session_key, "messages_updated");
                    }
                    Err(e) => send_error(state, client_id, &e.to_string()),
                }
            }
        }
        "edit_message" => {
            let index = frame.get("index").and_then(|i| i.as_u64());
            let content = frame.get("content").and_then(|c| c.as_str());
            if let (Some(index), Some(content)) = (index, content) {
                match state
                    .sessions
                    .edit_message_at(&session_key, index as usize, content)
                {
                    Ok(()) => {
                        let _ = state.sessions.save_session(&session_key);
                        send_messages_broadcast(state, &session_key, "messages_updated");
                    }
                    Err(e) => send_error(state, client_id, &e.to_string()),
                }
            }
        }
        "retry_message" => {
            if let Some(index) = frame.get("index").and_then(|i| i.as_u64()) {
                spawn_retry(state.clone(), client_id.to_owned(), session_key, index as usize);
            }
        }
        other => {
            tracing::debug!(client = %client_id, frame_type = other, "unknown ws frame type");
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn fanout
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn spawn_message_turn(state: AppState, session_key: String, content: String) {
    tokio::spawn(async move {
        // Slash commands answer immediately, without the LLM.
        if let Some(reply) = handle_command(&state, &session_key, &content).await {
            state.clients.broadcast_to_session(
                &session_key,
                &json!({
                    "type": "response",
                    "content": reply,
                    "tool_calls": [],
                    "usage": null,
                    "context": context_stats(&state, &session_key),
                    "done": true,
                }),
                None,
            );
            return;
        }

        let rx = run_turn(state.clone(), TurnInput::streaming(&session_key, content));
        forward_turn_events(&state, &session_key, rx).await;
    });
}

/// Fan turn events out to every client of the session, in emission order.
async fn forward_turn_events(
    state: &AppState,
    session_key: &str,
    mut rx: mpsc::Receiver<TurnEvent>,
) {
    while let Some(event) = rx.recv().await {
        let frame = match event {
            TurnEvent::Stream { content } => json!({ "type": "stream", "content": content }),
            TurnEvent::ToolCall {
                name,
                arguments,
                result,
            } => json!({
                "type": "tool_call",
                "name": name,
                "arguments": arguments,
                "result": result,
            }),
            TurnEvent::Response {
                content,
                tool_calls,
                usage,
            } => json!({
                "type": "response",
                "content": content,
                "tool_calls": tool_calls,
                "usage": usage,
                "context": context_stats(state, session_key),
                "done": true,
            }),
            TurnEvent::Interrupted { partial } => json!({
                "type": "interrupted",
                "session_id": session_key,
                "aborted": true,
                "partial": partial,
            }),
            TurnEvent::Error { message } => json!({ "type": "error", "message": message }),
        };
        state.clients.broadcast_to_session(session_key, &frame, None);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Retry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Re-run the turn for the user message at (or nearest before) `index`:
/// drop that turn's assistant reply and tool traffic, regenerate, then
/// splice the originally-following messages back on.
fn spawn_retry(state: AppState, client_id: String, session_key: String, index: usize) {
    tokio::spawn(async move {
        let log = match state.sessions.get_messages(&session_key) {
            Ok(log) => log,
            Err(e) => return send_error(&state, &client_id, &e.to_string()),
        };

        let Some(user_index) = log[..log.len().min(index + 1)]
            .iter()
            .rposition(|m| m.role == Role::User)
        else {
            return send_error(&state, &client_id, "no user message at or before that index");
        };

        // The regenerated turn spans up to the next user message.
        let trail_start = log[user_index + 1..]
            .iter()
            .position(|m| m.role == Role::User)
            .map(|offset| user_index + 1 + offset);

        let trailing: Vec<Message> = match trail_start {
            Some(start) => match state.sessions.truncate_after(&session_key, start) {
                Ok(tail) => tail,
                Err(e) => return send_error(&state, &client_id, &e.to_string()),
            },
            None => Vec::new(),
        };
        if let Err(e) = state.sessions.truncate_after(&session_key, user_index + 1) {
            return send_error(&state, &client_id, &e.to_string());
        }

        // Re-run over the log as it stands (the user message is the tail).
        let input = TurnInput {
            session_key: session_key.clone(),
            user_message: None,
            mode: TurnMode::Streaming,
            access: ToolAccess::Full,
            elevated_override: None,
        };
        let rx = run_turn(state.clone(), input);
        forward_turn_events(&state, &session_key, rx).await;

        if !trailing.is_empty() {
            if let Err(e) = state.sessions.extend_messages(&session_key, trailing) {
                return send_error(&state, &client_id, &e.to_string());
            }
        }
        let _ = state.sessions.save_session(&session_key);

        send_messages_broadcast(&state, &session_key, "retry_complete");
    });
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Frame helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn send_error(state: &AppState, client_id: &str, message: &str) {
    state
        .clients
        .send_to(client_id, &json!({ "type": "error", "message": message }));
}

fn messages_frame(state: &AppState, session_key: &str, frame_type: &str) -> Option<Value> {
    let log = state.sessions.get_messages(session_key).ok()?;
    Some(json!({
        "type": frame_type,
        "session_id": session_key,
        "messages": render_messages(&log),
        "context": context_stats(state, session_key),
    }))
}

fn send_messages_frame(state: &AppState, client_id: &str, session_key: &str, frame_type: &str) {
    if let Some(frame) = messages_frame(state, session_key, frame_type) {
        state.clients.send_to(client_id, &frame);
    }
}

fn send_messages_broadcast(state: &AppState, session_key: &str, frame_type: &str) {
    if let Some(frame) = messages_frame(state, session_key, frame_type) {
        state.clients.broadcast_to_session(session_key, &frame, None);
    }
}

/// Render a log for clients: assistant `tool_calls` entries are paired with
/// the results from their matching tool messages.
pub fn render_messages(log: &[Message]) -> Vec<Value> {
    log.iter()
        .enumerate()
        .map(|(i, msg)| {
            let mut rendered = json!({
                "role": msg.role,
                "content": msg.content,
            });
            if let Some(id) = &msg.tool_call_id {
                rendered["tool_call_id"] = json!(id);
            }
            if msg.has_tool_calls() {
                let calls: Vec<Value> = msg
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        // The paired result lives in a later tool message,
                        // before any subsequent user message.
                        let result = log[i + 1..]
                            .iter()
                            .take_while(|m| m.role != Role::User)
                            .find(|m| m.tool_call_id.as_deref() == Some(tc.id.as_str()))
                            .map(|m| m.content.clone())
                            .unwrap_or_default();
                        json!({
                            "id": tc.id,
                            "name": tc.name,
                            "arguments": tc.arguments,
                            "result": result,
                        })
                    })
                    .collect();
                rendered["tool_calls"] = json!(calls);
            }
            rendered
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_domain::message::ToolCall;

    #[test]
    fn render_pairs_results_with_assistant_calls() {
        let log = vec![
            Message::user("count files"),
            Message::assistant_with_tools(
                "",
                vec![ToolCall {
                    id: "t1".into(),
                    name: "bash".into(),
                    arguments: r#"{"cmd":"ls | wc -l"}"#.into(),
                }],
            ),
            Message::tool_result("t1", "42"),
            Message::assistant("42 files"),
        ];

        let rendered = render_messages(&log);
        assert_eq!(rendered.len(), 4);
        assert_eq!(rendered[1]["tool_calls"][0]["result"], "42");
        assert_eq!(rendered[2]["tool_call_id"], "t1");
        assert_eq!(rendered[3]["content"], "42 files");
    }

    #[test]
    fn render_does_not_pair_across_user_messages() {
        let log = vec![
            Message::assistant_with_tools(
                "",
                vec![ToolCall {
                    id: "a".into(),
                    name: "t".into(),
                    arguments: "{}".into(),
                }],
            ),
            Message::user("interjection"),
            Message::tool_result("a", "late"),
        ];
        let rendered = render_messages(&log);
        assert_eq!(rendered[0]["tool_calls"][0]["result"], "");
    }
}
