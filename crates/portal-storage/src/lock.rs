//! Exclusivity guard for "one active run/job" invariants.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Key-scoped exclusive lock. The in-process implementation covers a single
/// instance; a multi-instance deployment plugs in a lease-backed implementation
/// (e.g. a row lock or advisory lock) behind the same trait.
pub trait RunLock: Send + Sync {
    fn try_acquire(&self, key: &str) -> bool;
    fn release(&self, key: &str);
    fn is_held(&self, key: &str) -> bool;
}

#[derive(Debug, Default)]
pub struct InProcessLock {
    held: Mutex<HashSet<String>>,
}

impl InProcessLock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunLock for InProcessLock {
    fn try_acquire(&self, key: &str) -> bool {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        held.insert(key.to_string())
    }

    fn release(&self, key: &str) {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        held.remove(key);
    }

    fn is_held(&self, key: &str) -> bool {
        let held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        held.contains(key)
    }
}

/// Releases the key on drop, including on early return and unwinding.
pub struct RunLockGuard {
    lock: Arc<dyn RunLock>,
    key: String,
}

impl RunLockGuard {
    pub fn acquire(lock: Arc<dyn RunLock>, key: impl Into<String>) -> Option<Self> {
        let key = key.into();
        if lock.try_acquire(&key) {
            Some(Self { lock, key })
        } else {
            None
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for RunLockGuard {
    fn drop(&mut self) {
        self.lock.release(&self.key);
    }
}

impl std::fmt::Debug for RunLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLockGuard").field("key", &self.key).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_is_exclusive_per_key_and_releases_on_drop() {
        let lock: Arc<dyn RunLock> = Arc::new(InProcessLock::new());
        let guard = RunLockGuard::acquire(lock.clone(), "sync:news").expect("first acquire");
        assert!(RunLockGuard::acquire(lock.clone(), "sync:news").is_none());
        assert!(RunLockGuard::acquire(lock.clone(), "sync:video").is_some());
        assert!(lock.is_held("sync:news"));

        drop(guard);
        assert!(!lock.is_held("sync:news"));
        assert!(RunLockGuard::acquire(lock, "sync:news").is_some());
    }
}
