//! Per-session exclusive leases

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Set of session ids currently held by a job
#[derive(Clone, Default)]
pub struct SessionLocks {
    held: Arc<Mutex<HashSet<String>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for `session_id`, or `None` if another job holds it
    pub fn try_lock(&self, session_id: &str) -> Option<SessionGuard> {
        if !self.held.lock().insert(session_id.to_string()) {
            return None;
        }
        Some(SessionGuard {
            held: self.held.clone(),
            session_id: session_id.to_string(),
        })
    }

    pub fn is_locked(&self, session_id: &str) -> bool {
        self.held.lock().contains(session_id)
    }
}

/// Releases its session when dropped
pub struct SessionGuard {
    held: Arc<Mutex<HashSet<String>>>,
    session_id: String,
}

impl SessionGuard {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.held.lock().remove(&self.session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_is_exclusive_until_dropped() {
        let locks = SessionLocks::new();
        let guard = locks.try_lock("a").unwrap();
        assert!(locks.try_lock("a").is_none());
        assert!(locks.try_lock("b").is_some());

        drop(guard);
        assert!(!locks.is_locked("a"));
        assert!(locks.try_lock("a").is_some());
    }
}
