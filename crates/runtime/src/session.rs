//! Per-session concurrency control.
//!
//! One turn per session at a time: each session id maps to a
//! `Semaphore(1)` whose permit is held for the duration of the turn.
//! Different sessions run in parallel up to the global worker cap, which
//! the queue worker enforces separately.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use perch_domain::cancel::CancelToken;

pub struct SessionLockMap {
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl Default for SessionLockMap {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLockMap {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the run lock for a session, waiting behind any turn that is
    /// already in flight. The permit auto-releases on drop.
    pub async fn acquire(&self, session_id: &str) -> OwnedSemaphorePermit {
        let sem = {
            let mut locks = self.locks.lock();
            locks
                .entry(session_id.to_owned())
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };
        // The semaphore is never closed, so acquisition can only fail if
        // the map were dropped mid-await — impossible while &self lives.
        match sem.acquire_owned().await {
            Ok(permit) => permit,
            Err(_closed) => unreachable!("session semaphore is never closed"),
        }
    }

    /// Number of tracked sessions (for monitoring).
    pub fn session_count(&self) -> usize {
        self.locks.lock().len()
    }

    /// Drop entries for sessions with no held permit.
    pub fn prune_idle(&self) {
        self.locks.lock().retain(|_, sem| sem.available_permits() == 0);
    }
}

/// Tracks the active cancellation token per session.
#[derive(Default)]
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a new cancel token for a session.
    pub fn register(&self, session_id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens.lock().insert(session_id.to_owned(), token.clone());
        token
    }

    /// Cancel the running turn for a session. Returns true if one existed.
    pub fn cancel(&self, session_id: &str) -> bool {
        if let Some(token) = self.tokens.lock().get(session_id) {
            token.cancel();
            return true;
        }
        false
    }

    /// Remove the token when a turn completes.
    pub fn remove(&self, session_id: &str) {
        self.tokens.lock().remove(session_id);
    }

    pub fn is_running(&self, session_id: &str) -> bool {
        self.tokens.lock().contains_key(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sequential_access_same_session() {
        let map = SessionLockMap::new();
        let p1 = map.acquire("s1").await;
        drop(p1);
        let p2 = map.acquire("s1").await;
        drop(p2);
    }

    #[tokio::test]
    async fn different_sessions_run_concurrently() {
        let map = SessionLockMap::new();
        let _p1 = map.acquire("s1").await;
        let _p2 = map.acquire("s2").await;
        assert_eq!(map.session_count(), 2);
    }

    #[tokio::test]
    async fn same_session_waits_for_release() {
        let map = Arc::new(SessionLockMap::new());
        let p1 = map.acquire("s1").await;

        let map2 = map.clone();
        let waiter = tokio::spawn(async move {
            let _p2 = map2.acquire("s1").await;
            42
        });

        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert!(!waiter.is_finished(), "second turn must wait");

        drop(p1);
        assert_eq!(waiter.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn prune_removes_only_idle_entries() {
        let map = SessionLockMap::new();
        let _held = map.acquire("busy").await;
        drop(map.acquire("idle").await);

        map.prune_idle();
        assert_eq!(map.session_count(), 1);
    }

    #[test]
    fn cancel_map_lifecycle() {
        let map = CancelMap::new();
        let token = map.register("s1");
        assert!(map.is_running("s1"));
        assert!(map.cancel("s1"));
        assert!(token.is_cancelled());

        map.remove("s1");
        assert!(!map.is_running("s1"));
        assert!(!map.cancel("s1"));
    }
}
