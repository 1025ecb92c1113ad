use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Agent settings. The top-level model/api fields seed a single implicit
/// provider when `providers` is empty; otherwise `providers` wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "d_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "d_model")]
    pub model: String,
    #[serde(default = "d_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "d_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "d_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: d_system_prompt(),
            model: d_model(),
            api_base: d_api_base(),
            api_key: None,
            max_tokens: d_max_tokens(),
            temperature: d_temperature(),
            providers: Vec::new(),
        }
    }
}

/// One entry in the provider pool. Lower `priority` is tried first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub api_base: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub model: String,
    #[serde(default = "d_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "d_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub priority: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            api_base: String::new(),
            api_key: None,
            model: String::new(),
            max_tokens: d_max_tokens(),
            temperature: d_temperature(),
            priority: 0,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_system_prompt() -> String {
    "You are a helpful assistant with access to tools.".into()
}
fn d_model() -> String {
    "gpt-4o".into()
}
fn d_api_base() -> String {
    "https://api.openai.com/v1".into()
}
fn d_max_tokens() -> u32 {
    4096
}
fn d_temperature() -> f32 {
    0.7
}
