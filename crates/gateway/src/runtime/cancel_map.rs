//! Session-keyed cancellation registry.
//!
//! Each running turn registers its [`CancelToken`] here so
//! `interrupt_session` (WS `interrupt` frames, `/api` stop paths) can abort
//! the in-flight provider call.

use std::collections::HashMap;

use parking_lot::Mutex;
use relay_providers::CancelToken;

#[derive(Default)]
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a fresh token for a session's turn.
    pub fn register(&self, session_key: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens
            .lock()
            .insert(session_key.to_owned(), token.clone());
        token
    }

    /// Cancel the running turn, if any. Returns whether a token was found.
    pub fn cancel(&self, session_key: &str) -> bool {
        match self.tokens.lock().get(session_key) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove the token when a turn completes.
    pub fn remove(&self, session_key: &str) {
        self.tokens.lock().remove(session_key);
    }

    pub fn is_running(&self, session_key: &str) -> bool {
        self.tokens.lock().contains_key(session_key)
    }

    pub fn running_count(&self) -> usize {
        self.tokens.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_cancel_remove_lifecycle() {
        let map = CancelMap::new();
        let token = map.register("s1");
        assert!(map.is_running("s1"));
        assert!(!token.is_cancelled());

        assert!(map.cancel("s1"));
        assert!(token.is_cancelled());

        map.remove("s1");
        assert!(!map.is_running("s1"));
        assert!(!map.cancel("s1"));
    }

    #[test]
    fn register_replaces_previous_token() {
        let map = CancelMap::new();
        let old = map.register("s1");
        let new = map.register("s1");
        map.cancel("s1");
        assert!(new.is_cancelled());
        assert!(!old.is_cancelled());
    }
}
