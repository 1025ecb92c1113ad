//! Tool trait and the global registry.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use relay_domain::message::ToolDef;

use crate::view::SessionView;

/// Names of the meta-tools: always active, never demotable, never subject
/// to policy.
pub const META_TOOLS: &[&str] = &["list_tools", "load_tool", "unload_tool"];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Result of one tool execution. `error` is populated for failures of any
/// kind; `output` may still carry partial output alongside it.
#[derive(Debug, Clone, Default)]
pub struct ToolOutcome {
    pub output: String,
    pub error: Option<String>,
}

impl ToolOutcome {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            error: None,
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            output: String::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// The log-record rendering: `Error: <e>\n<output>` on failure, the raw
    /// output otherwise.
    pub fn render(&self) -> String {
        match &self.error {
            Some(e) => format!("Error: {e}\n{}", self.output),
            None => self.output.clone(),
        }
    }
}

/// Execution context handed to every tool invocation.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub session_key: String,
    pub workdir: PathBuf,
    pub elevated: bool,
}

/// The Tool trait — implement this to add a capability.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name (e.g. "bash", "web_fetch").
    fn name(&self) -> &str;

    /// Human-readable description sent to the LLM.
    fn description(&self) -> &str;

    /// JSON Schema for the tool's parameters.
    fn parameters(&self) -> Value;

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolOutcome;

    fn to_def(&self) -> ToolDef {
        ToolDef {
            name: self.name().to_owned(),
            description: self.description().to_owned(),
            parameters: self.parameters(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A deferred or dynamic tool plus its catalog line.
pub(crate) struct CatalogTool {
    pub tool: Arc<dyn Tool>,
    pub summary: String,
    pub actions: Vec<String>,
}

/// One line of the deferred catalog shown to the model.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CatalogEntry {
    pub name: String,
    pub summary: String,
    pub actions: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Policy {
    pub allow: Vec<String>,
    pub deny: Vec<String>,
}

impl Policy {
    /// Deny wins; a non-empty allow list is a whitelist.
    pub fn permits(&self, name: &str) -> bool {
        if self.deny.iter().any(|d| d == name) {
            return false;
        }
        self.allow.is_empty() || self.allow.iter().any(|a| a == name)
    }
}

#[derive(Default)]
pub(crate) struct Overlay {
    pub promoted: HashSet<String>,
    pub demoted: HashSet<String>,
}

#[derive(Default)]
pub(crate) struct Catalogs {
    pub core: HashMap<String, Arc<dyn Tool>>,
    pub deferred: HashMap<String, CatalogTool>,
    pub dynamic: HashMap<String, CatalogTool>,
}

/// Counts for `/api/status`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RegistryStats {
    pub core: usize,
    pub deferred: usize,
    pub dynamic: usize,
    pub sessions_with_overlays: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ToolRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ToolRegistry {
    pub(crate) catalogs: RwLock<Catalogs>,
    pub(crate) policy: RwLock<Policy>,
    /// Per-session promote/demote overlays.
    pub(crate) overlays: Mutex<HashMap<String, Overlay>>,
}

impl ToolRegistry {
    /// An empty registry with the meta-tools pre-registered as core.
    pub fn new() -> Arc<Self> {
        let registry = Arc::new(Self {
            catalogs: RwLock::new(Catalogs::default()),
            policy: RwLock::new(Policy::default()),
            overlays: Mutex::new(HashMap::new()),
        });
        for tool in crate::meta::meta_tools() {
            registry.register(tool);
        }
        registry
    }

    /// Register a core tool. Replaces any existing core tool with the name.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_owned();
        self.catalogs.write().core.insert(name, tool);
    }

    /// Register a deferred tool: listed in the catalog, inactive until a
    /// session promotes it.
    pub fn register_deferred(
        &self,
        tool: Arc<dyn Tool>,
        summary: impl Into<String>,
        actions: Vec<String>,
    ) {
        let name = tool.name().to_owned();
        self.catalogs.write().deferred.insert(
            name,
            CatalogTool {
                tool,
                summary: summary.into(),
                actions,
            },
        );
    }

    /// Register a runtime (plugin-sourced) tool; per-session promotable like
    /// deferred tools.
    pub fn register_dynamic(&self, tool: Arc<dyn Tool>, summary: impl Into<String>) {
        let name = tool.name().to_owned();
        self.catalogs.write().dynamic.insert(
            name,
            CatalogTool {
                tool,
                summary: summary.into(),
                actions: Vec::new(),
            },
        );
    }

    pub fn remove_dynamic(&self, name: &str) -> bool {
        self.catalogs.write().dynamic.remove(name).is_some()
    }

    pub fn set_policy(&self, allow: Vec<String>, deny: Vec<String>) {
        *self.policy.write() = Policy { allow, deny };
    }

    pub fn policy(&self) -> Policy {
        self.policy.read().clone()
    }

    /// A cheap per-session handle over this registry.
    pub fn session_view(self: &Arc<Self>, session_key: impl Into<String>) -> SessionView {
        SessionView::new(self.clone(), session_key.into())
    }

    /// Drop a session's overlay (used when a session is deleted or reset).
    pub fn drop_overlay(&self, session_key: &str) {
        self.overlays.lock().remove(session_key);
    }

    pub fn stats(&self) -> RegistryStats {
        let catalogs = self.catalogs.read();
        RegistryStats {
            core: catalogs.core.len(),
            deferred: catalogs.deferred.len(),
            dynamic: catalogs.dynamic.len(),
            sessions_with_overlays: self.overlays.lock().len(),
        }
    }

    pub(crate) fn with_overlay<R>(
        &self,
        session_key: &str,
        f: impl FnOnce(&mut Overlay) -> R,
    ) -> R {
        let mut overlays = self.overlays.lock();
        f(overlays.entry(session_key.to_owned()).or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_deny_wins() {
        let policy = Policy {
            allow: vec!["bash".into()],
            deny: vec!["bash".into()],
        };
        assert!(!policy.permits("bash"));
    }

    #[test]
    fn policy_empty_allow_is_open() {
        let policy = Policy::default();
        assert!(policy.permits("anything"));
    }

    #[test]
    fn policy_allow_is_whitelist() {
        let policy = Policy {
            allow: vec!["bash".into()],
            deny: vec![],
        };
        assert!(policy.permits("bash"));
        assert!(!policy.permits("other"));
    }

    #[test]
    fn outcome_rendering() {
        assert_eq!(ToolOutcome::ok("42").render(), "42");
        assert_eq!(ToolOutcome::fail("boom").render(), "Error: boom\n");
        let partial = ToolOutcome {
            output: "some output".into(),
            error: Some("died".into()),
        };
        assert_eq!(partial.render(), "Error: died\nsome output");
    }

    #[test]
    fn new_registry_has_meta_tools_as_core() {
        let registry = ToolRegistry::new();
        let stats = registry.stats();
        assert_eq!(stats.core, META_TOOLS.len());
        assert_eq!(stats.deferred, 0);
        assert_eq!(stats.dynamic, 0);
    }
}
