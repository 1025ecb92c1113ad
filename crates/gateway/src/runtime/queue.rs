//! Per-session turn serialization.
//!
//! Each session key maps to a `Semaphore(1)`; a session processes at most
//! one turn at a time and later messages wait FIFO for the permit. An
//! interrupt bumps the session's epoch so queued turns admitted after the
//! interrupt can tell they were dropped.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Default)]
struct SessionSlot {
    semaphore: Option<Arc<Semaphore>>,
    epoch: u64,
}

#[derive(Default)]
pub struct SessionLockMap {
    slots: Mutex<HashMap<String, SessionSlot>>,
}

impl SessionLockMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the run permit for a session, waiting FIFO behind any
    /// in-flight turn. The permit auto-releases on drop.
    pub async fn acquire(&self, session_key: &str) -> OwnedSemaphorePermit {
        let semaphore = {
            let mut slots = self.slots.lock();
            let slot = slots.entry(session_key.to_owned()).or_default();
            slot.semaphore
                .get_or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };
        // The semaphore is never closed, so acquire cannot fail.
        semaphore
            .acquire_owned()
            .await
            .unwrap_or_else(|_| unreachable!("session semaphore closed"))
    }

    /// Whether a turn currently holds the session's permit.
    pub fn is_processing(&self, session_key: &str) -> bool {
        let slots = self.slots.lock();
        slots
            .get(session_key)
            .and_then(|s| s.semaphore.as_ref())
            .is_some_and(|sem| sem.available_permits() == 0)
    }

    /// Current interrupt epoch for a session.
    pub fn epoch(&self, session_key: &str) -> u64 {
        self.slots
            .lock()
            .get(session_key)
            .map(|s| s.epoch)
            .unwrap_or(0)
    }

    /// Bump the epoch: queued turns that captured the old epoch abandon
    /// themselves once admitted.
    pub fn bump_epoch(&self, session_key: &str) {
        let mut slots = self.slots.lock();
        slots.entry(session_key.to_owned()).or_default().epoch += 1;
    }

    pub fn session_count(&self) -> usize {
        self.slots.lock().len()
    }
}
