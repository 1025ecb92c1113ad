//! Conversation messages in the chat-completions shape.
//!
//! Relay stores session logs in the same flat form the wire protocol uses:
//! a role, plain text content, the assistant's requested tool calls, and the
//! `tool_call_id` back-reference on tool results.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A function invocation requested by the model. `arguments` is the raw JSON
/// text exactly as streamed; it is parsed only at dispatch time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// One ordered log record. `tool_calls` is only populated on assistant
/// messages, `tool_call_id` only on tool messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

// ── Convenience constructors ───────────────────────────────────────

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: text.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Assistant message carrying tool calls. `content` may be empty when the
    /// model only emitted calls.
    pub fn assistant_with_tools(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Tool definition exposed to the LLM (the `function` object on the wire).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}

/// Indices of tool messages whose `tool_call_id` has no live parent.
///
/// A tool message is paired when the nearest preceding assistant message with
/// tool calls contains its id, with no user message in between. Everything
/// else is an orphan (the pairing invariant from the session model).
pub fn orphan_tool_indices(log: &[Message]) -> Vec<usize> {
    let mut orphans = Vec::new();
    let mut live_ids: Vec<String> = Vec::new();

    for (i, msg) in log.iter().enumerate() {
        match msg.role {
            Role::Assistant if msg.has_tool_calls() => {
                live_ids = msg.tool_calls.iter().map(|tc| tc.id.clone()).collect();
            }
            Role::Assistant | Role::User | Role::System => {
                live_ids.clear();
            }
            Role::Tool => {
                let paired = msg
                    .tool_call_id
                    .as_deref()
                    .is_some_and(|id| live_ids.iter().any(|live| live == id));
                if !paired {
                    orphans.push(i);
                }
            }
        }
    }

    orphans
}
