//! Per-job cancellation tokens.
//!
//! Each running task gets a `CancelToken`. Triggering it makes the
//! execution loop call the active provider's `abort`, drop any
//! pre-computed compression work, drain the journal, and emit a
//! `task.end` with a canceled reason.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// A cancellation token checked by the execution loop between events.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Active cancellation tokens, keyed by job id.
#[derive(Default)]
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a token for a job.
    pub fn register(&self, job_id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens.lock().insert(job_id.to_owned(), token.clone());
        token
    }

    /// Cancel a running job. Returns true if a token was found.
    pub fn cancel(&self, job_id: &str) -> bool {
        match self.tokens.lock().get(job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove the token when a job completes.
    pub fn remove(&self, job_id: &str) {
        self.tokens.lock().remove(job_id);
    }

    pub fn is_running(&self, job_id: &str) -> bool {
        self.tokens.lock().contains_key(job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_lifecycle() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        token.cancel(); // idempotent
        assert!(token.is_cancelled());
    }

    #[test]
    fn clones_share_state() {
        let token = CancelToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn map_register_cancel_remove() {
        let map = CancelMap::new();
        let token = map.register("j1");
        assert!(map.is_running("j1"));
        assert!(map.cancel("j1"));
        assert!(token.is_cancelled());

        map.remove("j1");
        assert!(!map.is_running("j1"));
        assert!(!map.cancel("j1"));
    }
}
