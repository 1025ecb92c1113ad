//! Session compaction: summarize the older part of the log and replace it
//! with a single system message, keeping the recent tail verbatim.

use relay_domain::error::Result;
use relay_domain::message::{Message, Role};
use relay_providers::{CancelToken, ProviderPool};

use crate::state::AppState;

/// Messages kept verbatim at the end of the log.
pub const KEEP_LAST: usize = 10;

/// Run the full flow: split, fire the before-compact hook, summarize via
/// the pool, rewrite the log, persist. Returns the summary, or empty when
/// there was nothing to compact.
pub async fn run_compaction(
    state: &AppState,
    session_key: &str,
    instructions: Option<&str>,
) -> Result<String> {
    let boundary = state.sessions.compaction_boundary(session_key, KEEP_LAST)?;
    if boundary == 0 {
        return Ok(String::new());
    }

    let log = state.sessions.get_messages(session_key)?;
    let prefix = &log[..boundary];

    if let Some(hook) = state.sessions.before_compact_hook() {
        hook(session_key, prefix);
    }

    let summary = generate_summary(&state.pool(), prefix, instructions).await?;
    state
        .sessions
        .replace_prefix_with_summary(session_key, &summary, KEEP_LAST)?;
    state.sessions.save_session(session_key)?;

    tracing::info!(
        session = %session_key,
        compacted = prefix.len(),
        summary_len = summary.len(),
        "session compacted"
    );
    Ok(summary)
}

/// Ask the pool for a summary of the given prefix (non-streaming, no tools).
async fn generate_summary(
    pool: &ProviderPool,
    prefix: &[Message],
    instructions: Option<&str>,
) -> Result<String> {
    let conversation = render_conversation(prefix);

    let mut prompt = String::from(
        "Summarize the following conversation history into a concise summary \
         that preserves:\n\
         1. The current goal or plan being worked on\n\
         2. Key decisions made\n\
         3. Open questions or threads\n\
         4. Important facts learned about the user or context\n\n\
         Be concise but keep all actionable context. Write in present tense. \
         Omit greetings and pleasantries.",
    );
    if let Some(extra) = instructions {
        prompt.push_str("\n\nAdditional instructions: ");
        prompt.push_str(extra);
    }
    prompt.push_str("\n\nCONVERSATION:\n");
    prompt.push_str(&conversation);

    let messages = vec![Message::user(prompt)];
    let response = pool.chat(&messages, &[], None, &CancelToken::new()).await?;
    Ok(response.content)
}

fn render_conversation(messages: &[Message]) -> String {
    let mut buf = String::new();
    for msg in messages {
        let label = match msg.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::Tool => "Tool",
            Role::System => "System",
        };
        buf.push_str(label);
        buf.push_str(": ");
        // Long tool output is clipped so the summary prompt stays small.
        if msg.content.len() > 2000 {
            buf.push_str(clip_prefix(&msg.content, 1000));
            buf.push_str(" [...] ");
            buf.push_str(clip_suffix(&msg.content, 500));
        } else {
            buf.push_str(&msg.content);
        }
        for tc in &msg.tool_calls {
            buf.push_str(&format!(" [called {}]", tc.name));
        }
        buf.push('\n');
    }
    buf
}

/// At most `max` leading bytes, backed up to a char boundary.
fn clip_prefix(s: &str, max: usize) -> &str {
    let mut end = max.min(s.len());
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// At most `max` trailing bytes, advanced to a char boundary.
fn clip_suffix(s: &str, max: usize) -> &str {
    let mut start = s.len().saturating_sub(max);
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}
