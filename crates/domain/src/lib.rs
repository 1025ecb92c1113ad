//! Shared domain types for all Relay crates: messages, tool calls,
//! streaming events, the error taxonomy, and the configuration model.

pub mod config;
pub mod error;
pub mod message;
pub mod stream;
