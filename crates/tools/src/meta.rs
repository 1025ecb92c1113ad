//! The three meta-tools.
//!
//! Their real behavior lives in [`SessionView::execute`](crate::SessionView),
//! which intercepts these names so it can touch the per-session overlay.
//! The trait impls here exist to surface name, description, and schema to
//! the model; their `execute` bodies only run if someone bypasses the view.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::registry::{Tool, ToolContext, ToolOutcome};

pub(crate) fn meta_tools() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(ListTools),
        Arc::new(LoadTool),
        Arc::new(UnloadTool),
    ]
}

fn name_only_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "name": { "type": "string", "description": "Tool name" }
        },
        "required": ["name"]
    })
}

struct ListTools;

#[async_trait::async_trait]
impl Tool for ListTools {
    fn name(&self) -> &str {
        "list_tools"
    }

    fn description(&self) -> &str {
        "List the tools active in this session and the deferred catalog available via load_tool."
    }

    fn parameters(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> ToolOutcome {
        ToolOutcome::fail("list_tools must run through a session view")
    }
}

struct LoadTool;

#[async_trait::async_trait]
impl Tool for LoadTool {
    fn name(&self) -> &str {
        "load_tool"
    }

    fn description(&self) -> &str {
        "Activate a tool from the deferred catalog for this session."
    }

    fn parameters(&self) -> Value {
        name_only_schema()
    }

    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> ToolOutcome {
        ToolOutcome::fail("load_tool must run through a session view")
    }
}

struct UnloadTool;

#[async_trait::async_trait]
impl Tool for UnloadTool {
    fn name(&self) -> &str {
        "unload_tool"
    }

    fn description(&self) -> &str {
        "Hide an active core tool for this session. Meta-tools cannot be unloaded."
    }

    fn parameters(&self) -> Value {
        name_only_schema()
    }

    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> ToolOutcome {
        ToolOutcome::fail("unload_tool must run through a session view")
    }
}
