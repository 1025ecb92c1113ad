//! System-prompt assembly.
//!
//! Rebuilt at the top of every loop iteration: the deferred catalog and the
//! clock both move while a turn runs. Block order is fixed; empty blocks
//! are omitted.

use relay_domain::config::Config;
use relay_tools::SessionView;

use crate::context::ContextFiles;

pub fn build_system_prompt(
    config: &Config,
    context: &ContextFiles,
    view: &SessionView,
    session_key: &str,
    elevated: bool,
) -> String {
    let mut blocks: Vec<String> = Vec::with_capacity(6);

    if !config.agent.system_prompt.is_empty() {
        blocks.push(config.agent.system_prompt.clone());
    }

    blocks.push(environment_block());
    blocks.push(format!(
        "Session: {session_key}\nElevated: {}",
        if elevated { "yes" } else { "no" }
    ));

    let catalog = view.deferred_catalog();
    if !catalog.is_empty() {
        let mut block = String::from(
            "Additional tools are available but not loaded. Call load_tool with a \
             tool's name to activate it for this session, and unload_tool to put \
             it away:\n",
        );
        for entry in catalog {
            block.push_str(&format!("- {}: {}", entry.name, entry.summary));
            if !entry.actions.is_empty() {
                block.push_str(&format!(" (actions: {})", entry.actions.join(", ")));
            }
            block.push('\n');
        }
        blocks.push(block.trim_end().to_owned());
    }

    let skills = context.skills_block();
    if !skills.is_empty() {
        blocks.push(skills);
    }

    let memory = context.memory_block();
    if !memory.is_empty() {
        blocks.push(memory);
    }

    blocks.join("\n\n")
}

fn environment_block() -> String {
    let now = chrono::Local::now();
    let workdir = std::env::current_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "?".into());
    format!(
        "Environment:\nDate: {}\nLocal time: {}\nPlatform: {}\nWorking directory: {}\nRuntime: relay {}",
        now.format("%A, %B %-d, %Y"),
        now.format("%H:%M"),
        std::env::consts::OS,
        workdir,
        env!("CARGO_PKG_VERSION"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_tools::ToolRegistry;

    fn context() -> ContextFiles {
        // Point at a directory that does not exist: empty blocks.
        let config = Config::default();
        ContextFiles::from_config(&config)
    }

    #[test]
    fn prompt_contains_fixed_blocks_in_order() {
        let mut config = Config::default();
        config.agent.system_prompt = "You are Relay.".into();
        let registry = ToolRegistry::new();
        let view = registry.session_view("ws:alice");

        let prompt = build_system_prompt(&config, &context(), &view, "ws:alice", false);

        let sys = prompt.find("You are Relay.").unwrap();
        let env = prompt.find("Environment:").unwrap();
        let session = prompt.find("Session: ws:alice").unwrap();
        assert!(sys < env && env < session);
        assert!(prompt.contains("Elevated: no"));
    }

    #[test]
    fn elevated_flag_renders() {
        let config = Config::default();
        let registry = ToolRegistry::new();
        let view = registry.session_view("s");
        let prompt = build_system_prompt(&config, &context(), &view, "s", true);
        assert!(prompt.contains("Elevated: yes"));
    }

    #[test]
    fn catalog_block_lists_deferred_tools() {
        struct Noop;
        #[async_trait::async_trait]
        impl relay_tools::Tool for Noop {
            fn name(&self) -> &str {
                "browser"
            }
            fn description(&self) -> &str {
                "full description"
            }
            fn parameters(&self) -> serde_json::Value {
                serde_json::json!({})
            }
            async fn execute(
                &self,
                _args: serde_json::Value,
                _ctx: &relay_tools::ToolContext,
            ) -> relay_tools::ToolOutcome {
                relay_tools::ToolOutcome::ok("")
            }
        }

        let config = Config::default();
        let registry = ToolRegistry::new();
        registry.register_deferred(
            std::sync::Arc::new(Noop),
            "Browse the web",
            vec!["open".into(), "click".into()],
        );
        let view = registry.session_view("s");

        let prompt = build_system_prompt(&config, &context(), &view, "s", false);
        assert!(prompt.contains("- browser: Browse the web (actions: open, click)"));
        assert!(prompt.contains("load_tool"));

        // Promoted tools leave the catalog block.
        view.promote("browser").unwrap();
        let prompt = build_system_prompt(&config, &context(), &view, "s", false);
        assert!(!prompt.contains("- browser: Browse the web"));
    }
}
