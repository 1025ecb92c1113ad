//! Heartbeat: a fixed-cadence agent invocation driven by `HEARTBEAT.md`.
//!
//! Protocol per beat: read `HEARTBEAT.md` through the memory capability.
//! Empty file means nothing to do (`ok-empty`). Otherwise run one elevated
//! turn against the main session; a reply of exactly `HEARTBEAT_OK` means
//! the agent had nothing to report (`ok-token`), anything else was `sent`.
//! Every outcome is broadcast as a `heartbeat_activity` event.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;

use crate::runtime::turn::{process_message, ToolAccess, TurnInput, TurnMode};
use crate::state::AppState;

/// Exact reply sentinel meaning "nothing to report".
pub const HEARTBEAT_OK: &str = "HEARTBEAT_OK";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum HeartbeatOutcome {
    OkEmpty,
    OkToken,
    Sent,
    Skipped,
    Failed,
}

impl HeartbeatOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OkEmpty => "ok-empty",
            Self::OkToken => "ok-token",
            Self::Sent => "sent",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatRecord {
    pub outcome: HeartbeatOutcome,
    pub detail: String,
    pub at: DateTime<Utc>,
}

/// Runtime heartbeat state: the `/heartbeat on|off` toggle and the last
/// outcome for `/heartbeat status`.
pub struct HeartbeatState {
    enabled: AtomicBool,
    last: Mutex<Option<HeartbeatRecord>>,
}

impl HeartbeatState {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            last: Mutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn last_record(&self) -> Option<HeartbeatRecord> {
        self.last.lock().clone()
    }

    fn record(&self, outcome: HeartbeatOutcome, detail: String) -> HeartbeatRecord {
        let record = HeartbeatRecord {
            outcome,
            detail,
            at: Utc::now(),
        };
        *self.last.lock() = Some(record.clone());
        record
    }
}

/// Run one beat now (also behind `/heartbeat force|now`). `forced` bypasses
/// the enabled toggle.
pub async fn run_once(state: &AppState, forced: bool) -> HeartbeatRecord {
    let outcome = beat(state, forced).await;
    let record = state.heartbeat.record(outcome.0, outcome.1);

    state.clients.broadcast_all(&json!({
        "type": "heartbeat_activity",
        "outcome": record.outcome.as_str(),
        "detail": record.detail,
    }));
    tracing::debug!(outcome = record.outcome.as_str(), "heartbeat");
    record
}

async fn beat(state: &AppState, forced: bool) -> (HeartbeatOutcome, String) {
    if !forced && !state.heartbeat.is_enabled() {
        return (HeartbeatOutcome::Skipped, "heartbeat disabled".into());
    }

    let Some(main) = state.sessions.main_session_id() else {
        return (HeartbeatOutcome::Skipped, "no main session".into());
    };
    if state.locks.is_processing(&main) {
        return (HeartbeatOutcome::Skipped, "main session busy".into());
    }

    let prompt = state.context.memory_file("HEARTBEAT.md");
    if prompt.is_empty() {
        return (HeartbeatOutcome::OkEmpty, "HEARTBEAT.md is empty".into());
    }

    let input = TurnInput {
        session_key: main,
        user_message: Some(prompt),
        mode: TurnMode::NonStreaming,
        access: ToolAccess::Full,
        elevated_override: Some(true),
    };
    let response = process_message(state, input).await;

    if let Some(error) = response.error {
        return (HeartbeatOutcome::Failed, error);
    }
    if response.content.trim() == HEARTBEAT_OK {
        return (HeartbeatOutcome::OkToken, "agent reported nothing new".into());
    }
    (HeartbeatOutcome::Sent, response.content)
}

/// Long-running beat loop. Spawned at startup when `heartbeat.enabled`.
pub async fn run_heartbeat_loop(state: AppState) {
    let interval_minutes = state.config.get().heartbeat.interval_minutes.max(1);
    let mut tick = tokio::time::interval(Duration::from_secs(interval_minutes * 60));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick fires immediately; skip it so the beat starts one
    // interval after boot.
    tick.tick().await;

    loop {
        tick.tick().await;
        run_once(&state, false).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_and_record() {
        let hb = HeartbeatState::new(false);
        assert!(!hb.is_enabled());
        hb.set_enabled(true);
        assert!(hb.is_enabled());

        assert!(hb.last_record().is_none());
        hb.record(HeartbeatOutcome::OkEmpty, "empty".into());
        let record = hb.last_record().unwrap();
        assert_eq!(record.outcome, HeartbeatOutcome::OkEmpty);
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(HeartbeatOutcome::OkToken.as_str(), "ok-token");
        assert_eq!(HeartbeatOutcome::Failed.as_str(), "failed");
    }
}
