//! Staged construction of [`AppState`] from a validated config.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use parking_lot::RwLock;

use relay_domain::config::Config;
use relay_providers::ProviderPool;
use relay_sessions::SessionStore;
use relay_tools::ToolRegistry;

use crate::clients::ClientRegistry;
use crate::context::ContextFiles;
use crate::runtime::cancel_map::CancelMap;
use crate::runtime::heartbeat::HeartbeatState;
use crate::runtime::queue::SessionLockMap;
use crate::runtime::scheduler::ScheduleStore;
use crate::state::{AppState, ConfigHandle};

/// Build every service the gateway runs on. Stages log as they come up so a
/// failed boot points at the stage that broke.
pub fn build_state(config: Config, config_path: PathBuf) -> anyhow::Result<AppState> {
    let pool = ProviderPool::from_config(&config.agent).context("initializing provider pool")?;
    tracing::info!(providers = pool.len(), model = %pool.current_model(), "provider pool ready");

    let sessions = Arc::new(
        SessionStore::new(&config.sessions.directory).context("initializing session store")?,
    );

    let registry = ToolRegistry::new();
    registry.set_policy(config.tools.allow.clone(), config.tools.deny.clone());
    tracing::info!(
        allow = config.tools.allow.len(),
        deny = config.tools.deny.len(),
        "tool registry ready"
    );

    let scheduler = Arc::new(
        ScheduleStore::new(&config.cron.directory).context("initializing schedule store")?,
    );

    let heartbeat = Arc::new(HeartbeatState::new(config.heartbeat.enabled));
    let context = Arc::new(ContextFiles::from_config(&config));

    Ok(AppState {
        config: Arc::new(ConfigHandle::new(config_path, config)),
        pool_slot: Arc::new(RwLock::new(Arc::new(pool))),
        registry,
        sessions,
        locks: Arc::new(SessionLockMap::new()),
        cancel_map: Arc::new(CancelMap::new()),
        clients: Arc::new(ClientRegistry::new()),
        scheduler,
        heartbeat,
        context,
        middleware: None,
        started_at: Instant::now(),
    })
}
