//! SSE plumbing for streaming chat completions.
//!
//! The response body arrives as arbitrary byte chunks; a carry buffer holds
//! any trailing partial line between reads. Complete lines starting with
//! `data:` are payloads; the literal `[DONE]` payload ends the stream
//! cleanly; anything that fails to parse as a delta chunk is skipped
//! silently.

use relay_domain::error::{Error, Result};
use relay_domain::stream::{BoxStream, StreamEvent, Usage};
use serde_json::Value;

use crate::cancel::CancelToken;

pub(crate) const DONE_SENTINEL: &str = "[DONE]";

/// Extract complete `data:` payloads from the carry buffer.
///
/// The buffer is drained in place: consumed lines are removed and any
/// trailing partial line remains for the next read.
pub(crate) fn drain_data_lines(buffer: &mut String) -> Vec<String> {
    let mut payloads = Vec::new();

    while let Some(pos) = buffer.find('\n') {
        let line: String = buffer.drain(..=pos).collect();
        let line = line.trim_end_matches(['\n', '\r']);
        if let Some(data) = line.strip_prefix("data:") {
            let data = data.trim();
            if !data.is_empty() {
                payloads.push(data.to_owned());
            }
        }
    }

    payloads
}

/// Parse one `data:` payload into stream events. Malformed payloads yield
/// nothing.
pub(crate) fn parse_delta_chunk(data: &str) -> Vec<StreamEvent> {
    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };

    let mut events = Vec::new();

    let choice = v
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first());

    let choice = match choice {
        Some(c) => c,
        None => {
            // Usage-only chunk (no choices).
            if let Some(usage) = v.get("usage").and_then(parse_usage) {
                events.push(StreamEvent::Done {
                    usage: Some(usage),
                    finish_reason: None,
                });
            }
            return events;
        }
    };

    let delta = choice.get("delta").unwrap_or(&Value::Null);

    if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
        if !text.is_empty() {
            events.push(StreamEvent::Token { text: text.to_owned() });
        }
    }

    if let Some(tool_calls) = delta.get("tool_calls").and_then(|t| t.as_array()) {
        for tc in tool_calls {
            let index = tc.get("index").and_then(|i| i.as_u64()).unwrap_or(0) as usize;
            let id = tc.get("id").and_then(|i| i.as_str()).unwrap_or("");
            let func = tc.get("function").unwrap_or(&Value::Null);
            let name = func.get("name").and_then(|n| n.as_str()).unwrap_or("");
            let arguments = func.get("arguments").and_then(|a| a.as_str()).unwrap_or("");
            events.push(StreamEvent::ToolCallDelta {
                index,
                id: id.to_owned(),
                name: name.to_owned(),
                arguments: arguments.to_owned(),
            });
        }
    }

    if let Some(reason) = choice.get("finish_reason").and_then(|f| f.as_str()) {
        events.push(StreamEvent::Done {
            usage: v.get("usage").and_then(parse_usage),
            finish_reason: Some(reason.to_owned()),
        });
    }

    events
}

pub(crate) fn parse_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        prompt_tokens: v.get("prompt_tokens")?.as_u64()? as u32,
        completion_tokens: v.get("completion_tokens")?.as_u64()? as u32,
        total_tokens: v.get("total_tokens")?.as_u64()? as u32,
    })
}

/// Turn an SSE response body into a stream of [`StreamEvent`]s.
///
/// Cancellation is raced against every read; on cancel the response is
/// dropped (closing the connection) and the stream ends with
/// [`Error::Cancelled`].
pub(crate) fn sse_response_stream(
    response: reqwest::Response,
    cancel: CancelToken,
) -> BoxStream<'static, Result<StreamEvent>> {
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();

        'read: loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => {
                    yield Err(Error::Cancelled);
                    break 'read;
                }
                chunk = response.chunk() => chunk,
            };

            match chunk {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    for data in drain_data_lines(&mut buffer) {
                        if data == DONE_SENTINEL {
                            break 'read;
                        }
                        for event in parse_delta_chunk(&data) {
                            yield Ok(event);
                        }
                    }
                }
                Ok(None) => {
                    // Body closed — flush a trailing line without newline.
                    if !buffer.is_empty() {
                        buffer.push('\n');
                        for data in drain_data_lines(&mut buffer) {
                            if data == DONE_SENTINEL {
                                break 'read;
                            }
                            for event in parse_delta_chunk(&data) {
                                yield Ok(event);
                            }
                        }
                    }
                    break 'read;
                }
                Err(e) => {
                    yield Err(Error::Http(e.to_string()));
                    break 'read;
                }
            }
        }
    };

    Box::pin(stream)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
