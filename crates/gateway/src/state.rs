//! Shared application state passed to all handlers and runtime tasks.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

use relay_domain::config::Config;
use relay_providers::ProviderPool;
use relay_sessions::SessionStore;
use relay_tools::ToolRegistry;

use crate::clients::ClientRegistry;
use crate::context::{ContextFiles, TurnMiddleware};
use crate::runtime::cancel_map::CancelMap;
use crate::runtime::heartbeat::HeartbeatState;
use crate::runtime::queue::SessionLockMap;
use crate::runtime::scheduler::ScheduleStore;

/// The live config pointer plus where it came from. `PUT /api/config`
/// validates, persists, and swaps the pointer.
pub struct ConfigHandle {
    path: PathBuf,
    live: RwLock<Arc<Config>>,
}

impl ConfigHandle {
    pub fn new(path: PathBuf, config: Config) -> Self {
        Self {
            path,
            live: RwLock::new(Arc::new(config)),
        }
    }

    pub fn get(&self) -> Arc<Config> {
        self.live.read().clone()
    }

    pub fn swap(&self, config: Config) {
        *self.live.write() = Arc::new(config);
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

/// Shared application state.
///
/// Fields are grouped by concern:
/// - **Core services** — config, provider pool, tool registry
/// - **Session management** — store, per-session locks, cancellation
/// - **Live clients** — WebSocket registry and presence
/// - **Runtime** — scheduler, heartbeat, skills/memory context, middleware
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<ConfigHandle>,
    /// Swapped on config reload; read through [`AppState::pool`].
    pub pool_slot: Arc<RwLock<Arc<ProviderPool>>>,
    pub registry: Arc<ToolRegistry>,

    // ── Session management ────────────────────────────────────────────
    pub sessions: Arc<SessionStore>,
    pub locks: Arc<SessionLockMap>,
    pub cancel_map: Arc<CancelMap>,

    // ── Live clients ──────────────────────────────────────────────────
    pub clients: Arc<ClientRegistry>,

    // ── Runtime ───────────────────────────────────────────────────────
    pub scheduler: Arc<ScheduleStore>,
    pub heartbeat: Arc<HeartbeatState>,
    pub context: Arc<ContextFiles>,
    /// Plugin middleware hooks. `None` = no plugins loaded.
    pub middleware: Option<Arc<dyn TurnMiddleware>>,

    pub started_at: Instant,
}

impl AppState {
    pub fn pool(&self) -> Arc<ProviderPool> {
        self.pool_slot.read().clone()
    }

    pub fn swap_pool(&self, pool: ProviderPool) {
        *self.pool_slot.write() = Arc::new(pool);
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
