//! Connected WebSocket clients, session fanout, and presence.
//!
//! Every client owns an outbound mpsc channel drained by its writer task.
//! Sends are fire-and-forget with per-client error isolation: a slow or dead
//! client drops its own frames, never the agent loop.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;

/// One connected client: the session it is bound to and its outbound sink.
struct Client {
    session_key: String,
    tx: mpsc::Sender<String>,
}

#[derive(Default)]
pub struct ClientRegistry {
    clients: Mutex<HashMap<String, Client>>,
    /// Sessions with a turn currently running ("busy" presence).
    busy: Mutex<HashSet<String>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, client_id: &str, session_key: &str, tx: mpsc::Sender<String>) {
        self.clients.lock().insert(
            client_id.to_owned(),
            Client {
                session_key: session_key.to_owned(),
                tx,
            },
        );
    }

    pub fn remove(&self, client_id: &str) {
        self.clients.lock().remove(client_id);
    }

    /// Rebind a client to a different session (`load_session`).
    pub fn set_session(&self, client_id: &str, session_key: &str) {
        if let Some(client) = self.clients.lock().get_mut(client_id) {
            client.session_key = session_key.to_owned();
        }
    }

    pub fn session_of(&self, client_id: &str) -> Option<String> {
        self.clients
            .lock()
            .get(client_id)
            .map(|c| c.session_key.clone())
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    // ── Fanout ─────────────────────────────────────────────────────

    /// Send to every client bound to `session_key`, optionally excluding one
    /// (used for typing fanout).
    pub fn broadcast_to_session(&self, session_key: &str, frame: &Value, except: Option<&str>) {
        let text = frame.to_string();
        let clients = self.clients.lock();
        for (id, client) in clients.iter() {
            if client.session_key != session_key {
                continue;
            }
            if except == Some(id.as_str()) {
                continue;
            }
            // try_send: a client with a full queue loses frames, not the loop.
            let _ = client.tx.try_send(text.clone());
        }
    }

    pub fn send_to(&self, client_id: &str, frame: &Value) {
        if let Some(client) = self.clients.lock().get(client_id) {
            let _ = client.tx.try_send(frame.to_string());
        }
    }

    /// Send to every connected client (`data_update` and heartbeat events).
    pub fn broadcast_all(&self, frame: &Value) {
        let text = frame.to_string();
        for client in self.clients.lock().values() {
            let _ = client.tx.try_send(text.clone());
        }
    }

    /// Broadcast a resource mutation (cron/plugins/sessions/tools/skills/config).
    pub fn data_update(&self, resource: &str, data: Option<Value>) {
        let mut frame = json!({ "type": "data_update", "resource": resource });
        if let Some(data) = data {
            frame["data"] = data;
        }
        self.broadcast_all(&frame);
    }

    // ── Presence ───────────────────────────────────────────────────

    /// Flip a session's busy flag, broadcasting the presence change.
    pub fn set_busy(&self, session_key: &str, busy: bool) {
        let changed = {
            let mut set = self.busy.lock();
            if busy {
                set.insert(session_key.to_owned())
            } else {
                set.remove(session_key)
            }
        };
        if changed {
            self.broadcast_to_session(
                session_key,
                &json!({
                    "type": "presence",
                    "session_id": session_key,
                    "state": if busy { "busy" } else { "idle" },
                }),
                None,
            );
        }
    }

    pub fn is_busy(&self, session_key: &str) -> bool {
        self.busy.lock().contains(session_key)
    }

    pub fn busy_sessions(&self) -> Vec<String> {
        self.busy.lock().iter().cloned().collect()
    }

    /// Drain every busy flag (shutdown).
    pub fn drain_presence(&self) {
        self.busy.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (mpsc::Sender<String>, mpsc::Receiver<String>) {
        mpsc::channel(16)
    }

    #[test]
    fn broadcast_reaches_only_session_clients() {
        let registry = ClientRegistry::new();
        let (tx_a, mut rx_a) = channel();
        let (tx_b, mut rx_b) = channel();
        registry.register("a", "s1", tx_a);
        registry.register("b", "s2", tx_b);

        registry.broadcast_to_session("s1", &json!({"type": "stream"}), None);

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn except_skips_the_sender() {
        let registry = ClientRegistry::new();
        let (tx_a, mut rx_a) = channel();
        let (tx_b, mut rx_b) = channel();
        registry.register("a", "s1", tx_a);
        registry.register("b", "s1", tx_b);

        registry.broadcast_to_session("s1", &json!({"type": "typing"}), Some("a"));

        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn rebind_moves_fanout() {
        let registry = ClientRegistry::new();
        let (tx, mut rx) = channel();
        registry.register("a", "s1", tx);
        registry.set_session("a", "s2");

        registry.broadcast_to_session("s1", &json!({"x": 1}), None);
        assert!(rx.try_recv().is_err());

        registry.broadcast_to_session("s2", &json!({"x": 2}), None);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn busy_flag_roundtrip() {
        let registry = ClientRegistry::new();
        assert!(!registry.is_busy("s1"));
        registry.set_busy("s1", true);
        assert!(registry.is_busy("s1"));
        registry.set_busy("s1", false);
        assert!(!registry.is_busy("s1"));
    }

    #[test]
    fn dead_client_does_not_poison_broadcast() {
        let registry = ClientRegistry::new();
        let (tx, rx) = channel();
        drop(rx);
        registry.register("dead", "s1", tx);
        // Must not panic.
        registry.broadcast_to_session("s1", &json!({"x": 1}), None);
    }
}
