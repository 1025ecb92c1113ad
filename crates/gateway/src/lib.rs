//! The Relay gateway: HTTP/WebSocket surface, agent loop runtime, slash
//! commands, scheduler, and heartbeat — wired together through [`state::AppState`].

pub mod api;
pub mod bootstrap;
pub mod clients;
pub mod commands;
pub mod context;
pub mod runtime;
pub mod state;
pub mod ws;
