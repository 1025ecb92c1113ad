//! The agent runtime: per-session queueing, the reason/act loop, prompt
//! assembly, compaction, and the scheduled invocation paths.

pub mod cancel_map;
pub mod compact;
pub mod cron;
pub mod heartbeat;
pub mod prompt;
pub mod queue;
pub mod scheduler;
pub mod turn;

pub use turn::{
    process_message, run_turn, AgentResponse, ToolAccess, ToolCallReport, TurnEvent, TurnInput,
    TurnMode,
};
