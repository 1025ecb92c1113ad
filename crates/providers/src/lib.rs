//! LLM provider pool for the OpenAI chat-completions wire protocol.
//!
//! The pool holds an ordered list of endpoints and fails over between them
//! with per-provider backoff. Both the blocking [`ProviderPool::chat`] and
//! the streaming [`ProviderPool::chat_stream`] speak the same wire contract;
//! streaming responses are parsed from SSE `data:` lines and tool-call
//! fragments are reassembled by chunk index.

mod assembler;
mod cancel;
mod pool;
mod sse;
mod wire;

pub use assembler::ToolCallAssembler;
pub use cancel::CancelToken;
pub use pool::{ChatResponse, ProviderEntry, ProviderPool, ProviderStatus};
pub use wire::build_request_body;
