//! Session store.
//!
//! The store exclusively owns every session and its message log. External
//! readers get snapshots; the per-session turn lock in the gateway makes the
//! agent loop the sole log writer during a turn. Each session persists as
//! one JSON document under the configured directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use relay_domain::error::{Error, Result};
use relay_domain::message::Message;

use crate::log as message_log;

/// Hook invoked with `(session_id, prefix_about_to_be_compacted)` before a
/// compaction rewrites the log.
pub type BeforeCompactHook = Arc<dyn Fn(&str, &[Message]) + Send + Sync>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-session runtime preferences, adjusted through slash commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionPrefs {
    #[serde(default)]
    pub elevated: bool,
    #[serde(default = "d_think")]
    pub think: String,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default = "d_usage_mode")]
    pub usage_mode: String,
}

impl Default for SessionPrefs {
    fn default() -> Self {
        Self {
            elevated: false,
            think: d_think(),
            verbose: false,
            usage_mode: d_usage_mode(),
        }
    }
}

fn d_think() -> String {
    "medium".into()
}
fn d_usage_mode() -> String {
    "off".into()
}

/// One session: identity, timestamps, the ordered message log, prefs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub channel: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub prefs: SessionPrefs,
}

/// Listing row for the HTTP surface.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub channel: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
    pub main: bool,
}

/// Export/import document. Import restores a log equal to the exported one
/// under role/content/tool_calls equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionExport {
    pub id: String,
    pub channel: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<Message>,
}

/// Meta document persisted next to the sessions (currently only the main
/// session designation).
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreMeta {
    main_session_id: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SessionStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SessionStore {
    directory: PathBuf,
    sessions: RwLock<HashMap<String, Session>>,
    main_session: RwLock<Option<String>>,
    before_compact: RwLock<Option<BeforeCompactHook>>,
}

impl SessionStore {
    /// Load every persisted session from `directory` (created if missing).
    pub fn new(directory: &Path) -> Result<Self> {
        std::fs::create_dir_all(directory)?;

        let mut sessions = HashMap::new();
        for dir_entry in std::fs::read_dir(directory)? {
            let path = dir_entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if path.file_name().and_then(|n| n.to_str()) == Some("_meta.json") {
                continue;
            }
            let raw = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<Session>(&raw) {
                Ok(session) => {
                    sessions.insert(session.id.clone(), session);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping malformed session file");
                }
            }
        }

        let meta: StoreMeta = std::fs::read_to_string(directory.join("_meta.json"))
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();

        tracing::info!(
            sessions = sessions.len(),
            path = %directory.display(),
            "session store loaded"
        );

        Ok(Self {
            directory: directory.to_path_buf(),
            sessions: RwLock::new(sessions),
            main_session: RwLock::new(meta.main_session_id),
            before_compact: RwLock::new(None),
        })
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Return the existing session for `channel:user_id` or create an empty
    /// one. The id is stable.
    pub fn get_or_create(&self, channel: &str, user_id: &str) -> String {
        let id = format!("{channel}:{user_id}");

        // Fast path: session already exists.
        if self.sessions.read().contains_key(&id) {
            return id;
        }

        let now = Utc::now();
        let session = Session {
            id: id.clone(),
            channel: channel.to_owned(),
            user_id: user_id.to_owned(),
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
            prefs: SessionPrefs::default(),
        };

        let mut sessions = self.sessions.write();
        sessions.entry(id.clone()).or_insert(session);
        id
    }

    pub fn exists(&self, id: &str) -> bool {
        self.sessions.read().contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        self.sessions.read().get(id).cloned()
    }

    pub fn list(&self) -> Vec<SessionSummary> {
        let main = self.main_session.read().clone();
        let mut rows: Vec<SessionSummary> = self
            .sessions
            .read()
            .values()
            .map(|s| SessionSummary {
                id: s.id.clone(),
                channel: s.channel.clone(),
                user_id: s.user_id.clone(),
                created_at: s.created_at,
                updated_at: s.updated_at,
                message_count: s.messages.len(),
                main: main.as_deref() == Some(s.id.as_str()),
            })
            .collect();
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        rows
    }

    pub fn delete_session(&self, id: &str) -> Result<()> {
        let removed = self.sessions.write().remove(id);
        if removed.is_none() {
            return Err(Error::SessionNotFound(id.to_owned()));
        }
        let _ = std::fs::remove_file(self.session_path(id));

        let mut main = self.main_session.write();
        if main.as_deref() == Some(id) {
            *main = None;
        }
        drop(main);
        self.save_meta();
        Ok(())
    }

    /// Clear the log but keep the session record (and its prefs).
    pub fn reset_session(&self, id: &str) -> Result<()> {
        self.with_session_mut(id, |s| s.messages.clear())
    }

    /// Copy a session's log under a fresh id. Returns the new id.
    pub fn duplicate_session(&self, id: &str) -> Result<String> {
        let source = self
            .get(id)
            .ok_or_else(|| Error::SessionNotFound(id.to_owned()))?;

        let uuid = uuid::Uuid::new_v4().simple().to_string();
        let new_id = format!("{id}:copy:{}", &uuid[..8]);
        let now = Utc::now();

        let copy = Session {
            id: new_id.clone(),
            channel: source.channel,
            user_id: source.user_id,
            created_at: now,
            updated_at: now,
            messages: source.messages,
            prefs: source.prefs,
        };
        self.sessions.write().insert(new_id.clone(), copy);
        Ok(new_id)
    }

    /// Delete every session and clear the main designation.
    pub fn factory_reset(&self) -> usize {
        let ids: Vec<String> = self.sessions.read().keys().cloned().collect();
        for id in &ids {
            let _ = self.delete_session(id);
        }
        *self.main_session.write() = None;
        self.save_meta();
        ids.len()
    }

    // ── Log operations ─────────────────────────────────────────────

    pub fn add_message(&self, id: &str, msg: Message) -> Result<()> {
        self.with_session_mut(id, |s| s.messages.push(msg))
    }

    /// Full ordered copy for prompt assembly.
    pub fn get_messages(&self, id: &str) -> Result<Vec<Message>> {
        self.sessions
            .read()
            .get(id)
            .map(|s| s.messages.clone())
            .ok_or_else(|| Error::SessionNotFound(id.to_owned()))
    }

    pub fn message_count(&self, id: &str) -> Result<usize> {
        self.sessions
            .read()
            .get(id)
            .map(|s| s.messages.len())
            .ok_or_else(|| Error::SessionNotFound(id.to_owned()))
    }

    pub fn estimate_tokens(&self, id: &str) -> Result<usize> {
        self.sessions
            .read()
            .get(id)
            .map(|s| message_log::estimate_tokens(&s.messages))
            .ok_or_else(|| Error::SessionNotFound(id.to_owned()))
    }

    /// Delete orphan tool messages; returns how many were removed.
    pub fn repair_tool_pairs(&self, id: &str) -> Result<usize> {
        let mut removed = 0;
        self.with_session_mut(id, |s| {
            removed = message_log::repair_tool_pairs(&mut s.messages);
        })?;
        Ok(removed)
    }

    pub fn delete_message_at(&self, id: &str, index: usize) -> Result<()> {
        self.with_session_checked(id, |s| {
            if index >= s.messages.len() {
                return Err(Error::Other(format!("message index {index} out of range")));
            }
            s.messages.remove(index);
            Ok(())
        })
    }

    /// Replace a message's text. Editing assistant content never touches its
    /// `tool_calls`.
    pub fn edit_message_at(&self, id: &str, index: usize, text: &str) -> Result<()> {
        self.with_session_checked(id, |s| {
            let msg = s
                .messages
                .get_mut(index)
                .ok_or_else(|| Error::Other(format!("message index {index} out of range")))?;
            msg.content = text.to_owned();
            Ok(())
        })
    }

    /// Remove and return every message from `index` onwards (used by retry).
    pub fn truncate_after(&self, id: &str, index: usize) -> Result<Vec<Message>> {
        let mut tail = Vec::new();
        self.with_session_mut(id, |s| {
            if index < s.messages.len() {
                tail = s.messages.split_off(index);
            }
        })?;
        Ok(tail)
    }

    pub fn extend_messages(&self, id: &str, messages: Vec<Message>) -> Result<()> {
        self.with_session_mut(id, |s| s.messages.extend(messages))
    }

    // ── Compaction surgery ─────────────────────────────────────────

    /// Where the kept tail would start for `keep_last`. Zero means there is
    /// nothing worth compacting.
    pub fn compaction_boundary(&self, id: &str, keep_last: usize) -> Result<usize> {
        self.sessions
            .read()
            .get(id)
            .map(|s| message_log::compaction_boundary(&s.messages, keep_last))
            .ok_or_else(|| Error::SessionNotFound(id.to_owned()))
    }

    /// Replace everything before the boundary with a single system summary
    /// message, preserving the tail verbatim.
    pub fn replace_prefix_with_summary(
        &self,
        id: &str,
        summary: &str,
        keep_last: usize,
    ) -> Result<()> {
        self.with_session_mut(id, |s| {
            let boundary = message_log::compaction_boundary(&s.messages, keep_last);
            if boundary == 0 {
                return;
            }
            let tail = s.messages.split_off(boundary);
            s.messages = Vec::with_capacity(tail.len() + 1);
            s.messages.push(Message::system(summary));
            s.messages.extend(tail);
        })
    }

    pub fn set_before_compact_hook(&self, hook: BeforeCompactHook) {
        *self.before_compact.write() = Some(hook);
    }

    pub fn before_compact_hook(&self) -> Option<BeforeCompactHook> {
        self.before_compact.read().clone()
    }

    // ── Prefs ──────────────────────────────────────────────────────

    pub fn prefs(&self, id: &str) -> Result<SessionPrefs> {
        self.sessions
            .read()
            .get(id)
            .map(|s| s.prefs.clone())
            .ok_or_else(|| Error::SessionNotFound(id.to_owned()))
    }

    pub fn update_prefs(&self, id: &str, update: impl FnOnce(&mut SessionPrefs)) -> Result<()> {
        self.with_session_mut(id, |s| update(&mut s.prefs))
    }

    // ── Main session ───────────────────────────────────────────────

    pub fn set_main_session(&self, id: Option<String>) -> Result<()> {
        if let Some(ref id) = id {
            if !self.exists(id) {
                return Err(Error::SessionNotFound(id.clone()));
            }
        }
        *self.main_session.write() = id;
        self.save_meta();
        Ok(())
    }

    pub fn main_session_id(&self) -> Option<String> {
        self.main_session.read().clone()
    }

    // ── Export / import ────────────────────────────────────────────

    pub fn export(&self, id: &str) -> Result<SessionExport> {
        let s = self
            .get(id)
            .ok_or_else(|| Error::SessionNotFound(id.to_owned()))?;
        Ok(SessionExport {
            id: s.id,
            channel: s.channel,
            user_id: s.user_id,
            created_at: s.created_at,
            updated_at: s.updated_at,
            messages: s.messages,
        })
    }

    /// Restore a session from an export document, replacing any session
    /// with the same id. Returns the session id.
    pub fn import(&self, export: SessionExport) -> Result<String> {
        let session = Session {
            id: export.id.clone(),
            channel: export.channel,
            user_id: export.user_id,
            created_at: export.created_at,
            updated_at: export.updated_at,
            messages: export.messages,
            prefs: SessionPrefs::default(),
        };
        self.sessions.write().insert(export.id.clone(), session);
        self.save_session(&export.id)?;
        Ok(export.id)
    }

    // ── Persistence ────────────────────────────────────────────────

    pub fn save_session(&self, id: &str) -> Result<()> {
        let snapshot = self
            .get(id)
            .ok_or_else(|| Error::SessionNotFound(id.to_owned()))?;
        let json = serde_json::to_string_pretty(&snapshot)?;
        std::fs::write(self.session_path(id), json)?;
        Ok(())
    }

    pub fn save_all(&self) -> Result<()> {
        let ids: Vec<String> = self.sessions.read().keys().cloned().collect();
        for id in ids {
            self.save_session(&id)?;
        }
        self.save_meta();
        Ok(())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    fn save_meta(&self) {
        let meta = StoreMeta {
            main_session_id: self.main_session.read().clone(),
        };
        if let Ok(json) = serde_json::to_string_pretty(&meta) {
            if let Err(e) = std::fs::write(self.directory.join("_meta.json"), json) {
                tracing::warn!(error = %e, "failed to persist session meta");
            }
        }
    }

    fn session_path(&self, id: &str) -> PathBuf {
        self.directory.join(format!("{}.json", sanitize_id(id)))
    }

    fn with_session_mut(&self, id: &str, update: impl FnOnce(&mut Session)) -> Result<()> {
        self.with_session_checked(id, |s| {
            update(s);
            Ok(())
        })
    }

    fn with_session_checked(
        &self,
        id: &str,
        update: impl FnOnce(&mut Session) -> Result<()>,
    ) -> Result<()> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| Error::SessionNotFound(id.to_owned()))?;
        update(session)?;
        session.updated_at = Utc::now();
        Ok(())
    }
}

/// Session ids contain `:`; map everything outside `[A-Za-z0-9._-]` to `_`
/// for the on-disk filename.
fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use relay_domain::message::ToolCall;

    fn store() -> (tempfile::TempDir, SessionStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();
        (dir, store)
    }

    fn tc(id: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: "t".into(),
            arguments: "{}".into(),
        }
    }

    #[test]
    fn get_or_create_is_stable() {
        let (_dir, store) = store();
        let a = store.get_or_create("ws", "alice");
        let b = store.get_or_create("ws", "alice");
        assert_eq!(a, "ws:alice");
        assert_eq!(a, b);
        assert_eq!(store.session_count(), 1);
    }

    #[test]
    fn snapshot_reads_are_identical_without_writes() {
        let (_dir, store) = store();
        let id = store.get_or_create("ws", "a");
        store.add_message(&id, Message::user("one")).unwrap();
        store.add_message(&id, Message::assistant("two")).unwrap();

        let first = store.get_messages(&id).unwrap();
        let second = store.get_messages(&id).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn missing_session_errors() {
        let (_dir, store) = store();
        assert!(matches!(
            store.get_messages("nope").unwrap_err(),
            Error::SessionNotFound(_)
        ));
        assert!(store.add_message("nope", Message::user("x")).is_err());
        assert!(store.delete_session("nope").is_err());
    }

    #[test]
    fn persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SessionStore::new(dir.path()).unwrap();
            let id = store.get_or_create("discord", "bob");
            store.add_message(&id, Message::user("hi")).unwrap();
            store
                .add_message(&id, Message::assistant_with_tools("", vec![tc("a")]))
                .unwrap();
            store.add_message(&id, Message::tool_result("a", "42")).unwrap();
            store.save_all().unwrap();
            store.set_main_session(Some(id)).unwrap();
        }

        let reloaded = SessionStore::new(dir.path()).unwrap();
        let id = "discord:bob";
        assert_eq!(reloaded.message_count(id).unwrap(), 3);
        assert_eq!(reloaded.main_session_id().as_deref(), Some(id));
        let messages = reloaded.get_messages(id).unwrap();
        assert_eq!(messages[1].tool_calls[0].id, "a");
        assert_eq!(messages[2].tool_call_id.as_deref(), Some("a"));
    }

    #[test]
    fn export_import_round_trip() {
        let (_dir, store) = store();
        let id = store.get_or_create("ws", "x");
        store.add_message(&id, Message::user("q")).unwrap();
        store
            .add_message(&id, Message::assistant_with_tools("r", vec![tc("t1")]))
            .unwrap();

        let export = store.export(&id).unwrap();
        let original = store.get_messages(&id).unwrap();

        store.delete_session(&id).unwrap();
        assert!(!store.exists(&id));

        let restored = store.import(export).unwrap();
        assert_eq!(restored, id);
        assert_eq!(store.get_messages(&id).unwrap(), original);
    }

    #[test]
    fn duplicate_copies_the_log_under_a_new_id() {
        let (_dir, store) = store();
        let id = store.get_or_create("ws", "x");
        store.add_message(&id, Message::user("q")).unwrap();

        let copy = store.duplicate_session(&id).unwrap();
        assert_ne!(copy, id);
        assert_eq!(store.get_messages(&copy).unwrap(), store.get_messages(&id).unwrap());
    }

    #[test]
    fn reset_clears_log_keeps_record() {
        let (_dir, store) = store();
        let id = store.get_or_create("ws", "x");
        store.update_prefs(&id, |p| p.elevated = true).unwrap();
        store.add_message(&id, Message::user("q")).unwrap();

        store.reset_session(&id).unwrap();
        assert!(store.exists(&id));
        assert_eq!(store.message_count(&id).unwrap(), 0);
        assert!(store.prefs(&id).unwrap().elevated);
    }

    #[test]
    fn edit_preserves_tool_calls() {
        let (_dir, store) = store();
        let id = store.get_or_create("ws", "x");
        store
            .add_message(&id, Message::assistant_with_tools("old", vec![tc("a")]))
            .unwrap();

        store.edit_message_at(&id, 0, "new").unwrap();
        let messages = store.get_messages(&id).unwrap();
        assert_eq!(messages[0].content, "new");
        assert_eq!(messages[0].tool_calls.len(), 1);
    }

    #[test]
    fn edit_out_of_range_errors() {
        let (_dir, store) = store();
        let id = store.get_or_create("ws", "x");
        assert!(store.edit_message_at(&id, 3, "x").is_err());
        assert!(store.delete_message_at(&id, 0).is_err());
    }

    #[test]
    fn truncate_after_returns_tail() {
        let (_dir, store) = store();
        let id = store.get_or_create("ws", "x");
        for text in ["a", "b", "c"] {
            store.add_message(&id, Message::user(text)).unwrap();
        }

        let tail = store.truncate_after(&id, 1).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(store.message_count(&id).unwrap(), 1);

        store.extend_messages(&id, tail).unwrap();
        assert_eq!(store.message_count(&id).unwrap(), 3);
    }

    #[test]
    fn compaction_replaces_prefix_and_keeps_tail() {
        let (_dir, store) = store();
        let id = store.get_or_create("ws", "x");
        for i in 0..12 {
            store.add_message(&id, Message::user(format!("u{i}"))).unwrap();
            store.add_message(&id, Message::assistant(format!("a{i}"))).unwrap();
        }

        store
            .replace_prefix_with_summary(&id, "what came before", 10)
            .unwrap();

        let messages = store.get_messages(&id).unwrap();
        assert_eq!(messages.len(), 11);
        assert_eq!(messages[0].role, relay_domain::message::Role::System);
        assert_eq!(messages[0].content, "what came before");
        assert_eq!(messages[1].content, "u7");
        assert_eq!(messages.last().unwrap().content, "a11");
    }

    #[test]
    fn compaction_noop_on_short_log() {
        let (_dir, store) = store();
        let id = store.get_or_create("ws", "x");
        store.add_message(&id, Message::user("only")).unwrap();

        store.replace_prefix_with_summary(&id, "s", 10).unwrap();
        let messages = store.get_messages(&id).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "only");
    }

    #[test]
    fn factory_reset_removes_everything() {
        let (_dir, store) = store();
        let a = store.get_or_create("ws", "a");
        store.get_or_create("ws", "b");
        store.set_main_session(Some(a)).unwrap();

        assert_eq!(store.factory_reset(), 2);
        assert_eq!(store.session_count(), 0);
        assert!(store.main_session_id().is_none());
    }

    #[test]
    fn set_main_session_requires_existing() {
        let (_dir, store) = store();
        assert!(store.set_main_session(Some("ghost:x".into())).is_err());
        let id = store.get_or_create("ws", "a");
        store.set_main_session(Some(id.clone())).unwrap();
        assert_eq!(store.main_session_id(), Some(id));
        store.set_main_session(None).unwrap();
        assert!(store.main_session_id().is_none());
    }

    #[test]
    fn sanitize_maps_separator_chars() {
        assert_eq!(sanitize_id("ws:alice"), "ws_alice");
        assert_eq!(sanitize_id("a/b\\c"), "a_b_c");
        assert_eq!(sanitize_id("ok-1.2_3"), "ok-1.2_3");
    }
}
