mod agent;
mod gateway;
mod integrations;
mod memory;
mod merge;
mod sessions;
mod tools;

pub use agent::*;
pub use gateway::*;
pub use integrations::*;
pub use memory::*;
pub use merge::*;
pub use sessions::*;
pub use tools::*;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub skills: SkillsConfig,
    #[serde(default)]
    pub cron: CronConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub plugins: PluginsConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub canvas: CanvasConfig,
    #[serde(default)]
    pub tts: TtsConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub webhooks: WebhooksConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

fn error(field: impl Into<String>, message: impl Into<String>) -> ConfigError {
    ConfigError {
        severity: ConfigSeverity::Error,
        field: field.into(),
        message: message.into(),
    }
}

fn warning(field: impl Into<String>, message: impl Into<String>) -> ConfigError {
    ConfigError {
        severity: ConfigSeverity::Warning,
        field: field.into(),
        message: message.into(),
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut issues = Vec::new();

        if self.gateway.port == 0 {
            issues.push(error("gateway.port", "port must be greater than 0"));
        }
        if self.gateway.host.is_empty() {
            issues.push(error("gateway.host", "host must not be empty"));
        }
        if self.gateway.auth.mode == AuthMode::Token
            && self.gateway.auth.token.as_deref().unwrap_or("").is_empty()
        {
            issues.push(error(
                "gateway.auth.token",
                "auth mode \"token\" requires a non-empty token",
            ));
        }

        if self.sessions.context_limit == 0 {
            issues.push(error(
                "sessions.context_limit",
                "context_limit must be greater than 0",
            ));
        }

        // The pool needs at least one endpoint: either explicit provider
        // entries or the top-level agent.api_base fallback.
        if self.agent.providers.is_empty() && self.agent.api_base.is_empty() {
            issues.push(warning(
                "agent.providers",
                "no providers configured and agent.api_base is empty",
            ));
        }

        let mut seen_names: HashSet<&str> = HashSet::new();
        for (i, p) in self.agent.providers.iter().enumerate() {
            if p.name.is_empty() {
                issues.push(error(format!("agent.providers[{i}].name"), "name must not be empty"));
            }
            if !p.api_base.starts_with("http://") && !p.api_base.starts_with("https://") {
                issues.push(error(
                    format!("agent.providers[{i}].api_base"),
                    format!("api_base must start with http:// or https:// (got \"{}\")", p.api_base),
                ));
            }
            if p.model.is_empty() {
                issues.push(error(format!("agent.providers[{i}].model"), "model must not be empty"));
            }
            if p.max_tokens == 0 {
                issues.push(error(
                    format!("agent.providers[{i}].max_tokens"),
                    "max_tokens must be greater than 0",
                ));
            }
            if !p.name.is_empty() && !seen_names.insert(&p.name) {
                issues.push(warning(
                    format!("agent.providers[{i}].name"),
                    format!("duplicate provider name \"{}\"", p.name),
                ));
            }
        }

        // Tool policy: a name in both lists is legal (deny wins) but almost
        // always a mistake.
        for name in &self.tools.allow {
            if self.tools.deny.contains(name) {
                issues.push(warning(
                    "tools.allow",
                    format!("\"{name}\" is both allowed and denied — deny wins"),
                ));
            }
        }

        if self.webhooks.enabled && self.webhooks.token.as_deref().unwrap_or("").is_empty() {
            issues.push(error(
                "webhooks.token",
                "webhooks are enabled but no token is configured",
            ));
        }

        if self.channels.discord.enabled && self.channels.discord.token.as_deref().unwrap_or("").is_empty() {
            issues.push(error(
                "channels.discord.token",
                "discord channel is enabled but no token is configured",
            ));
        }

        if self.heartbeat.enabled && self.heartbeat.interval_minutes == 0 {
            issues.push(error(
                "heartbeat.interval_minutes",
                "interval_minutes must be greater than 0",
            ));
        }

        issues
    }

    pub fn has_errors(issues: &[ConfigError]) -> bool {
        issues.iter().any(|i| i.severity == ConfigSeverity::Error)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: build a minimal valid Config.
    fn valid_config() -> Config {
        Config {
            agent: AgentConfig {
                providers: vec![ProviderConfig {
                    name: "primary".into(),
                    api_base: "https://api.openai.com/v1".into(),
                    api_key: Some("sk-test".into()),
                    model: "gpt-4o".into(),
                    ..ProviderConfig::default()
                }],
                ..AgentConfig::default()
            },
            ..Config::default()
        }
    }

    fn find_issue<'a>(issues: &'a [ConfigError], field_prefix: &str) -> Option<&'a ConfigError> {
        issues.iter().find(|e| e.field.starts_with(field_prefix))
    }

    #[test]
    fn valid_config_passes() {
        let issues = valid_config().validate();
        let errors: Vec<_> = issues
            .iter()
            .filter(|e| e.severity == ConfigSeverity::Error)
            .collect();
        assert!(errors.is_empty(), "expected no errors, got: {errors:?}");
    }

    #[test]
    fn default_config_has_no_errors() {
        // Defaults must boot (the agent.api_base fallback carries the pool).
        let issues = Config::default().validate();
        assert!(!Config::has_errors(&issues));
    }

    #[test]
    fn gateway_port_zero_is_error() {
        let mut cfg = valid_config();
        cfg.gateway.port = 0;
        let issues = cfg.validate();
        assert_eq!(
            find_issue(&issues, "gateway.port").expect("port issue").severity,
            ConfigSeverity::Error
        );
    }

    #[test]
    fn token_auth_without_token_is_error() {
        let mut cfg = valid_config();
        cfg.gateway.auth.mode = AuthMode::Token;
        cfg.gateway.auth.token = None;
        let issues = cfg.validate();
        assert!(find_issue(&issues, "gateway.auth.token").is_some());
    }

    #[test]
    fn token_auth_with_token_passes() {
        let mut cfg = valid_config();
        cfg.gateway.auth.mode = AuthMode::Token;
        cfg.gateway.auth.token = Some("secret".into());
        let issues = cfg.validate();
        assert!(find_issue(&issues, "gateway.auth.token").is_none());
    }

    #[test]
    fn provider_bad_api_base_is_error() {
        let mut cfg = valid_config();
        cfg.agent.providers[0].api_base = "ftp://nope".into();
        let issues = cfg.validate();
        let issue = find_issue(&issues, "agent.providers[0].api_base").expect("api_base issue");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn duplicate_provider_names_is_warning() {
        let mut cfg = valid_config();
        let dup = cfg.agent.providers[0].clone();
        cfg.agent.providers.push(dup);
        let issues = cfg.validate();
        let issue = find_issue(&issues, "agent.providers[1].name").expect("dup issue");
        assert_eq!(issue.severity, ConfigSeverity::Warning);
    }

    #[test]
    fn allow_and_deny_overlap_is_warning() {
        let mut cfg = valid_config();
        cfg.tools.allow = vec!["bash".into()];
        cfg.tools.deny = vec!["bash".into()];
        let issues = cfg.validate();
        let issue = find_issue(&issues, "tools.allow").expect("overlap issue");
        assert_eq!(issue.severity, ConfigSeverity::Warning);
    }

    #[test]
    fn webhooks_enabled_without_token_is_error() {
        let mut cfg = valid_config();
        cfg.webhooks.enabled = true;
        cfg.webhooks.token = None;
        let issues = cfg.validate();
        assert!(find_issue(&issues, "webhooks.token").is_some());
    }

    #[test]
    fn config_error_display_format() {
        let err = ConfigError {
            severity: ConfigSeverity::Error,
            field: "gateway.port".into(),
            message: "port must be greater than 0".into(),
        };
        assert_eq!(format!("{err}"), "[ERROR] gateway.port: port must be greater than 0");
    }

    #[test]
    fn toml_round_trip_preserves_defaults() {
        let cfg = valid_config();
        let text = toml::to_string(&cfg).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.gateway.port, cfg.gateway.port);
        assert_eq!(back.agent.providers.len(), 1);
        assert_eq!(back.agent.providers[0].name, "primary");
    }
}
