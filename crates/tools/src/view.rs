//! Per-session view over the global registry.
//!
//! Active set = (core − demoted) ∪ promoted. Views are cheap handles; the
//! promote/demote overlay lives in the registry keyed by session so every
//! view of the same session sees the same state.

use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::Value;

use relay_domain::message::ToolDef;

use crate::registry::{CatalogEntry, Tool, ToolContext, ToolOutcome, ToolRegistry, META_TOOLS};

pub struct SessionView {
    registry: Arc<ToolRegistry>,
    session_key: String,
}

impl SessionView {
    pub(crate) fn new(registry: Arc<ToolRegistry>, session_key: String) -> Self {
        Self {
            registry,
            session_key,
        }
    }

    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    // ── Promotion / demotion ───────────────────────────────────────

    /// Activate a deferred or dynamic tool for this session. Returns the
    /// tool's description on success, error text otherwise.
    pub fn promote(&self, name: &str) -> Result<String, String> {
        let catalogs = self.registry.catalogs.read();

        if catalogs.core.contains_key(name) {
            return Err(format!("'{name}' is a core tool and already active"));
        }
        let entry = catalogs
            .deferred
            .get(name)
            .or_else(|| catalogs.dynamic.get(name))
            .ok_or_else(|| format!("no tool named '{name}' in the catalog"))?;
        let description = entry.tool.description().to_owned();
        drop(catalogs);

        self.registry.with_overlay(&self.session_key, |overlay| {
            if overlay.promoted.insert(name.to_owned()) {
                Ok(description)
            } else {
                Err(format!("'{name}' is already active in this session"))
            }
        })
    }

    /// Hide an active core tool for this session. Meta-tools never demote.
    pub fn demote(&self, name: &str) -> Result<(), String> {
        if META_TOOLS.contains(&name) {
            return Err(format!("'{name}' is a meta-tool and cannot be unloaded"));
        }

        // Promoted tools deactivate by un-promoting.
        let unpromoted = self.registry.with_overlay(&self.session_key, |overlay| {
            overlay.promoted.remove(name)
        });
        if unpromoted {
            return Ok(());
        }

        if !self.registry.catalogs.read().core.contains_key(name) {
            return Err(format!("'{name}' is not an active tool"));
        }

        self.registry.with_overlay(&self.session_key, |overlay| {
            if overlay.demoted.insert(name.to_owned()) {
                Ok(())
            } else {
                Err(format!("'{name}' is already unloaded in this session"))
            }
        })
    }

    // ── Enumeration ────────────────────────────────────────────────

    /// The active set, sorted by name: (core − demoted) ∪ promoted.
    pub fn active_tools(&self) -> Vec<Arc<dyn Tool>> {
        let catalogs = self.registry.catalogs.read();
        let (promoted, demoted) = self.registry.with_overlay(&self.session_key, |o| {
            (o.promoted.clone(), o.demoted.clone())
        });

        let mut tools: Vec<Arc<dyn Tool>> = catalogs
            .core
            .iter()
            .filter(|(name, _)| !demoted.contains(*name))
            .map(|(_, tool)| tool.clone())
            .collect();

        for name in &promoted {
            if let Some(entry) = catalogs
                .deferred
                .get(name)
                .or_else(|| catalogs.dynamic.get(name))
            {
                tools.push(entry.tool.clone());
            }
        }

        tools.sort_by(|a, b| a.name().cmp(b.name()));
        tools
    }

    /// Catalog entries not yet promoted for this session.
    pub fn deferred_catalog(&self) -> Vec<CatalogEntry> {
        let catalogs = self.registry.catalogs.read();
        let promoted = self
            .registry
            .with_overlay(&self.session_key, |o| o.promoted.clone());

        let mut entries: Vec<CatalogEntry> = catalogs
            .deferred
            .iter()
            .chain(catalogs.dynamic.iter())
            .filter(|(name, _)| !promoted.contains(*name))
            .map(|(name, entry)| CatalogEntry {
                name: name.clone(),
                summary: entry.summary.clone(),
                actions: entry.actions.clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    /// Active set as LLM tool definitions, policy-filtered. Meta-tools are
    /// always included.
    pub fn tool_defs(&self) -> Vec<ToolDef> {
        let policy = self.registry.policy();
        self.active_tools()
            .iter()
            .filter(|t| META_TOOLS.contains(&t.name()) || policy.permits(t.name()))
            .map(|t| t.to_def())
            .collect()
    }

    /// Intersect the defs with an explicit allow list (restricted mode).
    /// `"*"` means all-subject-to-deny.
    pub fn tool_defs_filtered(&self, allowed: &[String]) -> Vec<ToolDef> {
        let wildcard = allowed.iter().any(|a| a == "*");
        self.tool_defs()
            .into_iter()
            .filter(|def| {
                wildcard
                    || META_TOOLS.contains(&def.name.as_str())
                    || allowed.iter().any(|a| a == &def.name)
            })
            .collect()
    }

    // ── Execution ──────────────────────────────────────────────────

    /// Execute a tool by name. Policy denial, unknown tools, tool errors,
    /// and panics all come back as a failed [`ToolOutcome`]; this never
    /// propagates an error to the loop.
    pub async fn execute(&self, name: &str, args: Value, ctx: &ToolContext) -> ToolOutcome {
        // Meta-tools bypass policy and run against the view itself.
        match name {
            "list_tools" => return self.run_list_tools(),
            "load_tool" => {
                return match self.promote(&arg_name(&args)) {
                    Ok(description) => {
                        ToolOutcome::ok(format!("Loaded '{}': {description}", arg_name(&args)))
                    }
                    Err(e) => ToolOutcome::fail(e),
                };
            }
            "unload_tool" => {
                return match self.demote(&arg_name(&args)) {
                    Ok(()) => ToolOutcome::ok(format!("Unloaded '{}'", arg_name(&args))),
                    Err(e) => ToolOutcome::fail(e),
                };
            }
            _ => {}
        }

        if !self.registry.policy().permits(name) {
            return ToolOutcome::fail(format!("tool '{name}' is denied by policy"));
        }

        let tool = match self
            .active_tools()
            .into_iter()
            .find(|t| t.name() == name)
        {
            Some(t) => t,
            None => {
                return ToolOutcome::fail(format!(
                    "unknown tool '{name}' (not active in this session)"
                ));
            }
        };

        match std::panic::AssertUnwindSafe(tool.execute(args, ctx))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::error!(tool = name, session = %self.session_key, "tool panicked");
                ToolOutcome::fail(format!("Tool {name} failed: panicked during execution"))
            }
        }
    }

    fn run_list_tools(&self) -> ToolOutcome {
        let mut text = String::from("Active tools:\n");
        for tool in self.active_tools() {
            text.push_str(&format!("- {}: {}\n", tool.name(), tool.description()));
        }

        let catalog = self.deferred_catalog();
        if !catalog.is_empty() {
            text.push_str("\nAvailable via load_tool:\n");
            for entry in catalog {
                text.push_str(&format!("- {}: {}", entry.name, entry.summary));
                if !entry.actions.is_empty() {
                    text.push_str(&format!(" (actions: {})", entry.actions.join(", ")));
                }
                text.push('\n');
            }
        }
        ToolOutcome::ok(text)
    }
}

fn arg_name(args: &Value) -> String {
    args.get("name")
        .and_then(|n| n.as_str())
        .unwrap_or("")
        .to_owned()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
