//! Turn execution — the reason/act loop that interleaves streaming
//! completions with parallel tool dispatch.
//!
//! Entry point: [`run_turn`] enqueues the turn behind the session's permit
//! and returns a channel of [`TurnEvent`]s. [`process_message`] drains that
//! channel into one [`AgentResponse`] for non-streaming callers. The loop
//! never raises: every failure path becomes an event.

use std::sync::Arc;

use futures_util::StreamExt;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use relay_domain::error::Error;
use relay_domain::message::{Message, ToolCall, ToolDef};
use relay_domain::stream::{StreamEvent, Usage};
use relay_providers::{CancelToken, ToolCallAssembler};
use relay_tools::ToolContext;

use crate::state::AppState;

use super::prompt;

/// Iteration caps per access mode.
const MAX_ITERATIONS: usize = 50;
const MAX_ITERATIONS_RESTRICTED: usize = 20;

const BLOCKED_REPLY: &str = "(message blocked by plugin middleware)";
const MAX_ITERATIONS_REPLY: &str = "(max tool iterations reached)";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which tools this turn may see.
#[derive(Debug, Clone)]
pub enum ToolAccess {
    /// The session view's full (policy-filtered) active set.
    Full,
    /// No tools at all.
    ChatOnly,
    /// Intersect with an explicit allow list; `"*"` = all. An elevated
    /// session bypasses the restriction.
    Restricted(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnMode {
    Streaming,
    NonStreaming,
}

pub struct TurnInput {
    pub session_key: String,
    /// `Some` appends a fresh user message; `None` re-runs the loop over
    /// the log as it stands (retry).
    pub user_message: Option<String>,
    pub mode: TurnMode,
    pub access: ToolAccess,
    /// Scheduler/heartbeat runs force elevation without touching prefs.
    pub elevated_override: Option<bool>,
}

impl TurnInput {
    pub fn streaming(session_key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            session_key: session_key.into(),
            user_message: Some(message.into()),
            mode: TurnMode::Streaming,
            access: ToolAccess::Full,
            elevated_override: None,
        }
    }

    pub fn non_streaming(session_key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            mode: TurnMode::NonStreaming,
            ..Self::streaming(session_key, message)
        }
    }
}

/// One tool invocation as reported in the final response.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallReport {
    pub name: String,
    pub arguments: Value,
    pub result: String,
}

/// Events emitted while a turn runs.
#[derive(Debug, Clone)]
pub enum TurnEvent {
    /// One streamed content delta.
    Stream { content: String },
    /// A tool call: emitted once with an empty `result` when dispatched and
    /// again with the result once it completes.
    ToolCall {
        name: String,
        arguments: Value,
        result: String,
    },
    /// The final assistant reply.
    Response {
        content: String,
        tool_calls: Vec<ToolCallReport>,
        usage: Option<Usage>,
    },
    /// The turn was aborted; carries any partially streamed text.
    Interrupted { partial: String },
    Error { message: String },
}

/// Aggregated result for non-streaming callers. Never an Err: errors land
/// in `error`.
#[derive(Debug, Clone, Serialize)]
pub struct AgentResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCallReport>,
    pub usage: Option<Usage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub interrupted: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entry points
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run one agent turn. The returned receiver yields events as they happen;
/// the turn waits FIFO behind any in-flight turn for the same session.
pub fn run_turn(state: AppState, input: TurnInput) -> mpsc::Receiver<TurnEvent> {
    let (tx, rx) = mpsc::channel::<TurnEvent>(64);

    tokio::spawn(async move {
        let session_key = input.session_key.clone();

        // Queue admission: capture the interrupt epoch before waiting so a
        // turn admitted after an interrupt knows it was dropped.
        let epoch = state.locks.epoch(&session_key);
        let _permit = state.locks.acquire(&session_key).await;
        if state.locks.epoch(&session_key) != epoch {
            let _ = tx
                .send(TurnEvent::Interrupted {
                    partial: String::new(),
                })
                .await;
            return;
        }

        run_turn_inner(&state, &input, &tx).await;
    });

    rx
}

/// Run a turn and drain it into one [`AgentResponse`].
pub async fn process_message(state: &AppState, input: TurnInput) -> AgentResponse {
    let mut rx = run_turn(state.clone(), input);

    let mut response = AgentResponse {
        content: String::new(),
        tool_calls: Vec::new(),
        usage: None,
        error: None,
        interrupted: false,
    };

    while let Some(event) = rx.recv().await {
        match event {
            TurnEvent::Response {
                content,
                tool_calls,
                usage,
            } => {
                response.content = content;
                response.tool_calls = tool_calls;
                response.usage = usage;
            }
            TurnEvent::Interrupted { partial } => {
                response.content = partial;
                response.interrupted = true;
            }
            TurnEvent::Error { message } => response.error = Some(message),
            TurnEvent::Stream { .. } | TurnEvent::ToolCall { .. } => {}
        }
    }

    response
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// The loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_turn_inner(state: &AppState, input: &TurnInput, tx: &mpsc::Sender<TurnEvent>) {
    let session_key = &input.session_key;

    // ── Pre-middleware ───────────────────────────────────────────
    let user_message = match &input.user_message {
        Some(text) => match &state.middleware {
            Some(mw) => match mw.before_message(session_key, text).await {
                Some(rewritten) => Some(rewritten),
                None => {
                    let _ = tx
                        .send(TurnEvent::Response {
                            content: BLOCKED_REPLY.into(),
                            tool_calls: Vec::new(),
                            usage: None,
                        })
                        .await;
                    return;
                }
            },
            None => Some(text.clone()),
        },
        None => None,
    };

    if let Some(text) = user_message {
        if let Err(e) = state.sessions.add_message(session_key, Message::user(text)) {
            let _ = tx.send(TurnEvent::Error { message: e.to_string() }).await;
            return;
        }
    }

    let cancel = state.cancel_map.register(session_key);
    state.clients.set_busy(session_key, true);

    run_loop(state, input, &cancel, tx).await;

    state.cancel_map.remove(session_key);
    state.clients.set_busy(session_key, false);

    if let Err(e) = state.sessions.save_session(session_key) {
        tracing::warn!(session = %session_key, error = %e, "failed to persist session");
    }
}

async fn run_loop(
    state: &AppState,
    input: &TurnInput,
    cancel: &CancelToken,
    tx: &mpsc::Sender<TurnEvent>,
) {
    let session_key = &input.session_key;
    let config = state.config.get();
    let pool = state.pool();

    let prefs = state.sessions.prefs(session_key).unwrap_or_default();
    let elevated = input.elevated_override.unwrap_or(prefs.elevated);

    let view = state.registry.session_view(session_key.clone());
    let ctx = ToolContext {
        session_key: session_key.clone(),
        workdir: std::env::current_dir().unwrap_or_else(|_| ".".into()),
        elevated,
    };

    let max_iterations = match input.access {
        ToolAccess::Restricted(_) => MAX_ITERATIONS_RESTRICTED,
        _ => MAX_ITERATIONS,
    };

    let mut reports: Vec<ToolCallReport> = Vec::new();
    let mut total_usage = Usage::default();
    let mut saw_usage = false;

    for iteration in 0..max_iterations {
        if cancel.is_cancelled() {
            let _ = tx
                .send(TurnEvent::Interrupted {
                    partial: String::new(),
                })
                .await;
            return;
        }
        tracing::debug!(session = %session_key, iteration, "loop iteration");

        // The system prompt is rebuilt each iteration: load_tool mutates the
        // catalog mid-turn and the clock moves.
        let system = prompt::build_system_prompt(&config, &state.context, &view, session_key, elevated);
        let log = match state.sessions.get_messages(session_key) {
            Ok(log) => log,
            Err(e) => {
                let _ = tx.send(TurnEvent::Error { message: e.to_string() }).await;
                return;
            }
        };
        let mut messages = Vec::with_capacity(log.len() + 1);
        messages.push(Message::system(system));
        messages.extend(log);

        let tool_defs: Vec<ToolDef> = match &input.access {
            ToolAccess::ChatOnly => Vec::new(),
            ToolAccess::Restricted(allowed) if !elevated => view.tool_defs_filtered(allowed),
            _ => view.tool_defs(),
        };

        // ── Provider call ────────────────────────────────────────
        let completion = match input.mode {
            TurnMode::Streaming => {
                stream_completion(&pool, &messages, &tool_defs, cancel, tx).await
            }
            TurnMode::NonStreaming => {
                match pool.chat(&messages, &tool_defs, None, cancel).await {
                    Ok(resp) => Ok(Completion {
                        content: resp.content,
                        tool_calls: resp.tool_calls,
                        usage: resp.usage,
                        cancelled: false,
                    }),
                    Err(Error::Cancelled) => Ok(Completion {
                        content: String::new(),
                        tool_calls: Vec::new(),
                        usage: None,
                        cancelled: true,
                    }),
                    Err(e) => Err(e),
                }
            }
        };

        let completion = match completion {
            Ok(c) => c,
            Err(e) => {
                let _ = tx.send(TurnEvent::Error { message: e.to_string() }).await;
                return;
            }
        };

        if completion.cancelled {
            // Partial assistant text is reported, never logged.
            let _ = tx
                .send(TurnEvent::Interrupted {
                    partial: completion.content,
                })
                .await;
            return;
        }

        if let Some(u) = &completion.usage {
            total_usage.add(u);
            saw_usage = true;
        }

        // ── No tool calls: final answer ──────────────────────────
        if completion.tool_calls.is_empty() {
            let content = match &state.middleware {
                Some(mw) => mw.after_response(session_key, &completion.content).await,
                None => completion.content,
            };
            if let Err(e) = state
                .sessions
                .add_message(session_key, Message::assistant(&content))
            {
                let _ = tx.send(TurnEvent::Error { message: e.to_string() }).await;
                return;
            }
            let _ = tx
                .send(TurnEvent::Response {
                    content,
                    tool_calls: reports,
                    usage: saw_usage.then(|| total_usage.clone()),
                })
                .await;
            return;
        }

        // ── Tool calls: append the assistant turn, dispatch in parallel ──
        if let Err(e) = state.sessions.add_message(
            session_key,
            Message::assistant_with_tools(&completion.content, completion.tool_calls.clone()),
        ) {
            let _ = tx.send(TurnEvent::Error { message: e.to_string() }).await;
            return;
        }

        let parsed_args: Vec<Value> = completion
            .tool_calls
            .iter()
            .map(|tc| parse_arguments(&tc.arguments))
            .collect();

        for (tc, args) in completion.tool_calls.iter().zip(&parsed_args) {
            if input.mode == TurnMode::Streaming {
                let _ = tx
                    .send(TurnEvent::Stream {
                        content: format!("\n[used tool: {}]\n", tc.name),
                    })
                    .await;
            }
            let _ = tx
                .send(TurnEvent::ToolCall {
                    name: tc.name.clone(),
                    arguments: args.clone(),
                    result: String::new(),
                })
                .await;
        }

        // All calls run concurrently; results come back in tool_calls
        // order regardless of completion order.
        let outcomes = futures_util::future::join_all(
            completion
                .tool_calls
                .iter()
                .zip(&parsed_args)
                .map(|(tc, args)| view.execute(&tc.name, args.clone(), &ctx)),
        )
        .await;

        if cancel.is_cancelled() {
            // Tool results of an aborted turn are discarded, along with the
            // assistant message that requested them.
            if let Ok(count) = state.sessions.message_count(session_key) {
                let _ = state.sessions.delete_message_at(session_key, count - 1);
            }
            let _ = tx
                .send(TurnEvent::Interrupted {
                    partial: completion.content,
                })
                .await;
            return;
        }

        for ((tc, args), outcome) in completion
            .tool_calls
            .iter()
            .zip(&parsed_args)
            .zip(outcomes)
        {
            let rendered = outcome.render();
            if let Err(e) = state
                .sessions
                .add_message(session_key, Message::tool_result(&tc.id, &rendered))
            {
                let _ = tx.send(TurnEvent::Error { message: e.to_string() }).await;
                return;
            }
            let _ = tx
                .send(TurnEvent::ToolCall {
                    name: tc.name.clone(),
                    arguments: args.clone(),
                    result: rendered.clone(),
                })
                .await;
            reports.push(ToolCallReport {
                name: tc.name.clone(),
                arguments: args.clone(),
                result: rendered,
            });
        }
    }

    // ── Iteration cap ────────────────────────────────────────────
    let _ = state
        .sessions
        .add_message(session_key, Message::assistant(MAX_ITERATIONS_REPLY));
    let _ = tx
        .send(TurnEvent::Response {
            content: MAX_ITERATIONS_REPLY.into(),
            tool_calls: reports,
            usage: saw_usage.then(|| total_usage.clone()),
        })
        .await;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming accumulation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Completion {
    content: String,
    tool_calls: Vec<ToolCall>,
    usage: Option<Usage>,
    cancelled: bool,
}

async fn stream_completion(
    pool: &Arc<relay_providers::ProviderPool>,
    messages: &[Message],
    tool_defs: &[ToolDef],
    cancel: &CancelToken,
    tx: &mpsc::Sender<TurnEvent>,
) -> Result<Completion, Error> {
    let mut stream = pool.chat_stream(messages, tool_defs, cancel).await?;

    let mut content = String::new();
    let mut assembler = ToolCallAssembler::new();
    let mut usage = None;

    while let Some(event) = stream.next().await {
        match event {
            Ok(StreamEvent::Token { text }) => {
                content.push_str(&text);
                let _ = tx.send(TurnEvent::Stream { content: text }).await;
            }
            Ok(StreamEvent::ToolCallDelta {
                index,
                id,
                name,
                arguments,
            }) => {
                assembler.apply(index, &id, &name, &arguments);
            }
            Ok(StreamEvent::Done { usage: u, .. }) => {
                if u.is_some() {
                    usage = u;
                }
            }
            Err(Error::Cancelled) => {
                return Ok(Completion {
                    content,
                    tool_calls: Vec::new(),
                    usage: None,
                    cancelled: true,
                });
            }
            Err(e) => return Err(e),
        }
    }

    Ok(Completion {
        content,
        tool_calls: assembler.finish(),
        usage,
        cancelled: false,
    })
}

/// Arguments arrive as raw JSON text; anything unparseable becomes `{}` and
/// the tool reports its own validation error.
fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(raw).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "tool call arguments are not valid JSON; using empty object");
        Value::Object(Default::default())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_arguments_become_empty_object() {
        assert_eq!(parse_arguments("{not json"), serde_json::json!({}));
        assert_eq!(parse_arguments(""), serde_json::json!({}));
        assert_eq!(
            parse_arguments(r#"{"cmd":"ls"}"#),
            serde_json::json!({"cmd": "ls"})
        );
    }
}
