//! Ordered provider pool with failover and backoff.
//!
//! Entries are sorted by ascending priority at construction. Requests walk
//! the ring starting at the index of the last provider that succeeded;
//! providers still inside their backoff window are skipped. Failure state
//! is process-global and guarded by one short mutex.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use relay_domain::config::AgentConfig;
use relay_domain::error::{Error, Result};
use relay_domain::message::{Message, ToolCall, ToolDef};
use relay_domain::stream::{BoxStream, StreamEvent, Usage};

use crate::cancel::CancelToken;
use crate::sse::sse_response_stream;
use crate::wire::{build_request_body, parse_chat_response};

/// Backoff per failed provider: 30 s per consecutive failure, capped at 5 min.
const BACKOFF_STEP: Duration = Duration::from_secs(30);
const BACKOFF_CAP: Duration = Duration::from_secs(300);

/// Overall deadline for one provider HTTP call.
const REQUEST_DEADLINE: Duration = Duration::from_secs(120);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct ProviderEntry {
    pub name: String,
    pub api_base: String,
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub priority: u32,
}

/// A complete (non-streaming) chat response.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
    pub model: String,
    pub finish_reason: Option<String>,
}

/// Snapshot of one provider's health, for `/api/models`.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub name: String,
    pub model: String,
    pub priority: u32,
    pub fail_count: u32,
    pub in_backoff: bool,
    pub current: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct EntryState {
    fail_count: u32,
    last_fail: Option<Instant>,
}

impl EntryState {
    fn backoff_remaining(&self, now: Instant) -> Option<Duration> {
        let last = self.last_fail?;
        if self.fail_count == 0 {
            return None;
        }
        let window = (BACKOFF_STEP * self.fail_count).min(BACKOFF_CAP);
        let elapsed = now.saturating_duration_since(last);
        (elapsed < window).then(|| window - elapsed)
    }
}

struct PoolState {
    current: usize,
    entries: Vec<EntryState>,
}

pub struct ProviderPool {
    entries: Vec<ProviderEntry>,
    state: Mutex<PoolState>,
    client: reqwest::Client,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Construction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl ProviderPool {
    pub fn new(mut entries: Vec<ProviderEntry>) -> Result<Self> {
        if entries.is_empty() {
            return Err(Error::Config("provider pool needs at least one entry".into()));
        }
        entries.sort_by_key(|e| e.priority);

        let client = reqwest::Client::builder()
            .timeout(REQUEST_DEADLINE)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        let states = vec![EntryState::default(); entries.len()];
        Ok(Self {
            entries,
            state: Mutex::new(PoolState { current: 0, entries: states }),
            client,
        })
    }

    /// Seed the pool from config. Explicit `providers` entries win; with none
    /// configured, the top-level agent fields become a single entry.
    pub fn from_config(agent: &AgentConfig) -> Result<Self> {
        let entries: Vec<ProviderEntry> = if agent.providers.is_empty() {
            vec![ProviderEntry {
                name: "default".into(),
                api_base: agent.api_base.clone(),
                api_key: agent.api_key.clone(),
                model: agent.model.clone(),
                max_tokens: agent.max_tokens,
                temperature: agent.temperature,
                priority: 0,
            }]
        } else {
            agent
                .providers
                .iter()
                .map(|p| ProviderEntry {
                    name: p.name.clone(),
                    api_base: p.api_base.clone(),
                    api_key: p.api_key.clone(),
                    model: p.model.clone(),
                    max_tokens: p.max_tokens,
                    temperature: p.temperature,
                    priority: p.priority,
                })
                .collect()
        };
        Self::new(entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The model name of the provider currently first in rotation.
    pub fn current_model(&self) -> String {
        let current = self.state.lock().current;
        self.entries[current].model.clone()
    }

    // ── Selection & failure bookkeeping ────────────────────────────

    /// Candidate indices in rotation order, skipping entries in backoff.
    /// Skipped entries are noted in `attempts` so an exhausted pool can
    /// report why nothing was tried.
    fn attempt_order(&self, attempts: &mut Vec<String>) -> Vec<usize> {
        let state = self.state.lock();
        let now = Instant::now();
        let n = self.entries.len();
        let mut order = Vec::with_capacity(n);

        for k in 0..n {
            let i = (state.current + k) % n;
            match state.entries[i].backoff_remaining(now) {
                Some(remaining) => {
                    attempts.push(format!(
                        "{}: in backoff for {}s",
                        self.entries[i].name,
                        remaining.as_secs()
                    ));
                }
                None => order.push(i),
            }
        }
        order
    }

    fn record_success(&self, index: usize) {
        let mut state = self.state.lock();
        state.entries[index] = EntryState::default();
        state.current = index;
    }

    fn record_failure(&self, index: usize) {
        let mut state = self.state.lock();
        let entry = &mut state.entries[index];
        entry.fail_count += 1;
        entry.last_fail = Some(Instant::now());
    }

    // ── Public API ─────────────────────────────────────────────────

    /// One complete chat completion, failing over across providers.
    pub async fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolDef],
        tool_choice: Option<&Value>,
        cancel: &CancelToken,
    ) -> Result<ChatResponse> {
        let mut attempts = Vec::new();

        for i in self.attempt_order(&mut attempts) {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let entry = &self.entries[i];

            match self.send_request(entry, messages, tools, tool_choice, false, cancel).await {
                Ok(response) => match read_json_response(response).await {
                    Ok(body) => match parse_chat_response(&body) {
                        Ok(resp) => {
                            self.record_success(i);
                            return Ok(resp);
                        }
                        Err(e) => self.note_failure(i, e, &mut attempts),
                    },
                    Err(e) => self.note_failure(i, e, &mut attempts),
                },
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => self.note_failure(i, e, &mut attempts),
            }
        }

        Err(Error::AllProvidersFailed { attempts })
    }

    /// A streaming chat completion. Failover happens while connecting; once
    /// a provider returns 2xx the stream belongs to it.
    pub async fn chat_stream(
        &self,
        messages: &[Message],
        tools: &[ToolDef],
        cancel: &CancelToken,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let mut attempts = Vec::new();

        for i in self.attempt_order(&mut attempts) {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let entry = &self.entries[i];

            match self.send_request(entry, messages, tools, None, true, cancel).await {
                Ok(response) => {
                    self.record_success(i);
                    return Ok(sse_response_stream(response, cancel.clone()));
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => self.note_failure(i, e, &mut attempts),
            }
        }

        Err(Error::AllProvidersFailed { attempts })
    }

    fn note_failure(&self, index: usize, e: Error, attempts: &mut Vec<String>) {
        let name = &self.entries[index].name;
        if e.is_transient() {
            tracing::warn!(provider = %name, error = %e, "provider failed, trying next");
        } else {
            tracing::error!(provider = %name, error = %e, "provider failed, trying next");
        }
        self.record_failure(index);
        attempts.push(format!("{name}: {e}"));
    }

    /// Issue the POST and return the (2xx) response. Non-2xx bodies are
    /// echoed verbatim into the error.
    async fn send_request(
        &self,
        entry: &ProviderEntry,
        messages: &[Message],
        tools: &[ToolDef],
        tool_choice: Option<&Value>,
        stream: bool,
        cancel: &CancelToken,
    ) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", entry.api_base.trim_end_matches('/'));
        let body = build_request_body(entry, messages, tools, tool_choice, stream);

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &entry.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        tracing::debug!(provider = %entry.name, url = %url, stream, "chat request");

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = request.send() => result.map_err(classify_reqwest)?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api { status: status.as_u16(), body });
        }
        Ok(response)
    }

    /// Resolve `key` against (index, provider name, model name) in that
    /// order and rotate to the first hit. Returns the selected status.
    pub fn switch_model(&self, key: &str) -> Option<ProviderStatus> {
        let index = if let Ok(i) = key.parse::<usize>() {
            (i < self.entries.len()).then_some(i)
        } else {
            self.entries
                .iter()
                .position(|e| e.name.eq_ignore_ascii_case(key))
                .or_else(|| {
                    self.entries
                        .iter()
                        .position(|e| e.model.eq_ignore_ascii_case(key))
                })
        }?;

        self.state.lock().current = index;
        tracing::info!(provider = %self.entries[index].name, model = %self.entries[index].model, "switched model");
        Some(self.status_of(index))
    }

    /// Health snapshot of every entry, in priority order.
    pub fn list_models(&self) -> Vec<ProviderStatus> {
        (0..self.entries.len()).map(|i| self.status_of(i)).collect()
    }

    fn status_of(&self, index: usize) -> ProviderStatus {
        let state = self.state.lock();
        let entry_state = state.entries[index];
        ProviderStatus {
            name: self.entries[index].name.clone(),
            model: self.entries[index].model.clone(),
            priority: self.entries[index].priority,
            fail_count: entry_state.fail_count,
            in_backoff: entry_state.backoff_remaining(Instant::now()).is_some(),
            current: state.current == index,
        }
    }

    #[cfg(test)]
    fn set_fail_state(&self, index: usize, fail_count: u32, last_fail: Option<Instant>) {
        let mut state = self.state.lock();
        state.entries[index] = EntryState { fail_count, last_fail };
    }
}

async fn read_json_response(response: reqwest::Response) -> Result<Value> {
    let text = response.text().await.map_err(classify_reqwest)?;
    serde_json::from_str(&text).map_err(|e| Error::Http(format!("invalid response JSON: {e}")))
}

fn classify_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
