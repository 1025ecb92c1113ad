use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use relay_domain::config::{Config, ConfigSeverity};
use relay_gateway::api;
use relay_gateway::bootstrap::build_state;
use relay_gateway::runtime::{heartbeat, scheduler};
use relay_gateway::state::AppState;

#[derive(Parser)]
#[command(name = "relayd", about = "Relay agent orchestration gateway", version)]
struct Cli {
    /// Path to the config document.
    #[arg(long, global = true, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the gateway (default).
    Serve,
    /// Config inspection.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Validate the config and exit non-zero on errors.
    Validate,
    /// Print the effective config with secrets masked.
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let config = load_config(&cli.config)?;
            run_server(config, cli.config).await
        }
        Some(Command::Config { command }) => {
            let config = load_config(&cli.config)?;
            match command {
                ConfigCommand::Validate => {
                    let issues = config.validate();
                    for issue in &issues {
                        eprintln!("{issue}");
                    }
                    if Config::has_errors(&issues) {
                        std::process::exit(1);
                    }
                    eprintln!("config ok");
                    Ok(())
                }
                ConfigCommand::Show => {
                    let mut doc = serde_json::to_value(&config)?;
                    relay_domain::config::mask_secrets(&mut doc);
                    println!("{}", serde_json::to_string_pretty(&doc)?);
                    Ok(())
                }
            }
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,relay_gateway=debug")),
        )
        .init();
}

/// Load the config document; a missing file falls back to defaults.
fn load_config(path: &PathBuf) -> anyhow::Result<Config> {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "config file missing, using defaults");
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

async fn run_server(config: Config, config_path: PathBuf) -> anyhow::Result<()> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "relayd starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if Config::has_errors(&issues) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    let cron_enabled = config.cron.enabled;
    let heartbeat_enabled = config.heartbeat.enabled;
    let bind = format!("{}:{}", config.gateway.host, config.gateway.port);

    let state = build_state(config, config_path)?;

    // ── Background loops ─────────────────────────────────────────────
    if cron_enabled {
        tokio::spawn(scheduler::run_scheduler_loop(state.clone()));
        tracing::info!("scheduler running");
    }
    if heartbeat_enabled {
        tokio::spawn(heartbeat::run_heartbeat_loop(state.clone()));
        tracing::info!("heartbeat running");
    }

    // ── HTTP server ──────────────────────────────────────────────────
    let app = api::router(state.clone()).with_state(state.clone());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    tracing::info!(addr = %bind, "gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving")?;

    shutdown(&state);
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

/// Exit path: persist every session, drain presence, flush the config once.
fn shutdown(state: &AppState) {
    if let Err(e) = state.sessions.save_all() {
        tracing::error!(error = %e, "failed to save sessions on shutdown");
    }
    state.clients.drain_presence();
    let config = state.config.get();
    if let Err(e) = relay_gateway::api::config::persist_config(state, &config) {
        tracing::warn!(error = %e, "failed to flush config on shutdown");
    }
    tracing::info!("shutdown complete");
}
