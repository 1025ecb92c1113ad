//! Tool-call reassembly from streaming deltas.
//!
//! Chat-completions streams split tool calls across many chunks: the first
//! delta for an index usually carries the id and function name, later deltas
//! append argument-JSON fragments. The assembler keys on `tool_calls[].index`
//! and produces the complete ordered list once the stream ends.

use relay_domain::message::ToolCall;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    slots: BTreeMap<usize, ToolCall>,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one delta. Non-empty `id`/`name` overwrite the slot's values;
    /// `arguments` is appended as-is.
    pub fn apply(&mut self, index: usize, id: &str, name: &str, arguments: &str) {
        let slot = self.slots.entry(index).or_insert_with(|| ToolCall {
            id: String::new(),
            name: String::new(),
            arguments: String::new(),
        });
        if !id.is_empty() {
            slot.id = id.to_owned();
        }
        if !name.is_empty() {
            slot.name = name.to_owned();
        }
        slot.arguments.push_str(arguments);
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The assembled calls in index order.
    pub fn finish(self) -> Vec<ToolCall> {
        self.slots.into_values().collect()
    }
}
