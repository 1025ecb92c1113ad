use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Persistence root; one JSON document per session.
    #[serde(default = "d_directory")]
    pub directory: PathBuf,
    /// Token ceiling used for context-percentage reporting and compaction.
    #[serde(default = "d_context_limit")]
    pub context_limit: usize,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            directory: d_directory(),
            context_limit: d_context_limit(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_directory() -> PathBuf {
    PathBuf::from("./data/sessions")
}
fn d_context_limit() -> usize {
    128_000
}
