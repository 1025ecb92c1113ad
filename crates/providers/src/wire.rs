//! Request/response translation for the chat-completions contract.

use relay_domain::error::{Error, Result};
use relay_domain::message::{Message, Role, ToolCall, ToolDef};
use serde_json::{json, Value};

use crate::pool::{ChatResponse, ProviderEntry};
use crate::sse::parse_usage;

/// Build the POST body for `{api_base}/chat/completions`.
pub fn build_request_body(
    entry: &ProviderEntry,
    messages: &[Message],
    tools: &[ToolDef],
    tool_choice: Option<&Value>,
    stream: bool,
) -> Value {
    let mut body = json!({
        "model": entry.model,
        "messages": messages.iter().map(msg_to_wire).collect::<Vec<_>>(),
        "max_tokens": entry.max_tokens,
        "temperature": entry.temperature,
        "stream": stream,
    });

    if !tools.is_empty() {
        body["tools"] = Value::Array(tools.iter().map(tool_to_wire).collect());
    }
    if let Some(choice) = tool_choice {
        body["tool_choice"] = choice.clone();
    }
    if stream {
        body["stream_options"] = json!({ "include_usage": true });
    }
    body
}

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn msg_to_wire(msg: &Message) -> Value {
    match msg.role {
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id.as_deref().unwrap_or(""),
            "content": msg.content,
        }),
        Role::Assistant if msg.has_tool_calls() => {
            let calls: Vec<Value> = msg
                .tool_calls
                .iter()
                .map(|tc| {
                    json!({
                        "id": tc.id,
                        "type": "function",
                        "function": { "name": tc.name, "arguments": tc.arguments },
                    })
                })
                .collect();
            let mut obj = json!({ "role": "assistant", "tool_calls": calls });
            obj["content"] = if msg.content.is_empty() {
                Value::Null
            } else {
                Value::String(msg.content.clone())
            };
            obj
        }
        _ => json!({
            "role": role_to_str(msg.role),
            "content": msg.content,
        }),
    }
}

fn tool_to_wire(tool: &ToolDef) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

/// Parse a non-streaming completion response body.
pub fn parse_chat_response(body: &Value) -> Result<ChatResponse> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| Error::Http("no choices in response".into()))?;

    let message = choice
        .get("message")
        .ok_or_else(|| Error::Http("no message in choice".into()))?;

    let content = message
        .get("content")
        .and_then(|c| c.as_str())
        .unwrap_or("")
        .to_owned();

    let tool_calls = message
        .get("tool_calls")
        .and_then(|t| t.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|tc| {
                    let id = tc.get("id")?.as_str()?.to_owned();
                    let func = tc.get("function")?;
                    let name = func.get("name")?.as_str()?.to_owned();
                    let arguments = func
                        .get("arguments")
                        .and_then(|a| a.as_str())
                        .unwrap_or("{}")
                        .to_owned();
                    Some(ToolCall { id, name, arguments })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ChatResponse {
        content,
        tool_calls,
        usage: body.get("usage").and_then(parse_usage),
        model: body
            .get("model")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown")
            .to_owned(),
        finish_reason: choice
            .get("finish_reason")
            .and_then(|f| f.as_str())
            .map(String::from),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> ProviderEntry {
        ProviderEntry {
            name: "test".into(),
            api_base: "https://api.test/v1".into(),
            api_key: None,
            model: "m1".into(),
            max_tokens: 1024,
            temperature: 0.5,
            priority: 0,
        }
    }

    #[test]
    fn body_carries_model_and_stream_flag() {
        let body = build_request_body(&entry(), &[Message::user("hi")], &[], None, true);
        assert_eq!(body["model"], "m1");
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 1024);
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn assistant_tool_calls_serialize_to_function_shape() {
        let msg = Message::assistant_with_tools(
            "",
            vec![ToolCall {
                id: "t1".into(),
                name: "bash".into(),
                arguments: "{\"cmd\":\"ls\"}".into(),
            }],
        );
        let wire = msg_to_wire(&msg);
        assert_eq!(wire["role"], "assistant");
        assert!(wire["content"].is_null());
        assert_eq!(wire["tool_calls"][0]["function"]["name"], "bash");
        assert_eq!(wire["tool_calls"][0]["type"], "function");
    }

    #[test]
    fn tool_message_carries_call_id() {
        let wire = msg_to_wire(&Message::tool_result("t1", "42"));
        assert_eq!(wire["role"], "tool");
        assert_eq!(wire["tool_call_id"], "t1");
        assert_eq!(wire["content"], "42");
    }

    #[test]
    fn tools_rendered_when_present() {
        let tools = vec![ToolDef {
            name: "bash".into(),
            description: "run a command".into(),
            parameters: serde_json::json!({"type":"object"}),
        }];
        let body = build_request_body(&entry(), &[], &tools, None, false);
        assert_eq!(body["tools"][0]["function"]["name"], "bash");
        assert!(body.get("stream_options").is_none());
    }

    #[test]
    fn parse_plain_response() {
        let body = serde_json::json!({
            "model": "m1",
            "choices": [{"message": {"role": "assistant", "content": "hi"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 1, "completion_tokens": 2, "total_tokens": 3}
        });
        let resp = parse_chat_response(&body).unwrap();
        assert_eq!(resp.content, "hi");
        assert!(resp.tool_calls.is_empty());
        assert_eq!(resp.usage.unwrap().total_tokens, 3);
        assert_eq!(resp.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn parse_tool_call_response() {
        let body = serde_json::json!({
            "choices": [{"message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{"id": "t1", "type": "function",
                    "function": {"name": "bash", "arguments": "{\"cmd\":\"ls | wc -l\"}"}}]
            }}]
        });
        let resp = parse_chat_response(&body).unwrap();
        assert_eq!(resp.content, "");
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].name, "bash");
    }

    #[test]
    fn parse_missing_choices_is_error() {
        assert!(parse_chat_response(&serde_json::json!({})).is_err());
    }
}
