//! Session management: ordered append-only message logs with JSON
//! persistence, pairing repair, token estimation, and the log surgery
//! compaction relies on.

pub mod log;
pub mod store;

pub use store::{Session, SessionExport, SessionPrefs, SessionStore, SessionSummary};
