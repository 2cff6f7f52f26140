//! Per-identity async locks.
//!
//! Locks are keyed by `domain/kind/key` and created on first use. An entry is
//! dropped from the map when its last guard is released and nobody else is
//! waiting for it.

use crate::identity::IdentityKind;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;

type LockMap = HashMap<String, Arc<tokio::sync::Mutex<()>>>;

/// Lock key of one identity.
pub fn identity_lock_key(domain: &str, kind: IdentityKind, key: &str) -> String {
    format!("{}/{}/{}", domain, kind.as_str(), key)
}

/// Set of named async locks, cheap to clone.
#[derive(Debug, Default, Clone)]
pub struct IdentityLocks {
    locks: Arc<Mutex<LockMap>>,
}

impl IdentityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the lock named `key`.
    pub async fn lock(&self, key: impl Into<String>) -> IdentityGuard {
        let key = key.into();
        let lock = self
            .map()
            .entry(key.clone())
            .or_default()
            .clone();
        let guard = lock.lock_owned().await;
        IdentityGuard {
            key,
            guard: Some(guard),
            locks: Arc::clone(&self.locks),
        }
    }

    /// Take several locks in key order, so two callers never deadlock on the
    /// same pair.
    pub async fn lock_all(&self, keys: BTreeSet<String>) -> Vec<IdentityGuard> {
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.lock(key).await);
        }
        guards
    }

    /// Number of locks currently held or waited on.
    pub fn tracked(&self) -> usize {
        self.map().len()
    }

    fn map(&self) -> std::sync::MutexGuard<'_, LockMap> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Held lock; released on drop.
pub struct IdentityGuard {
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<Mutex<LockMap>>,
}

impl IdentityGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Debug for IdentityGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityGuard").field("key", &self.key).finish()
    }
}

impl Drop for IdentityGuard {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        drop(self.guard.take());
        if locks
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.key);
        }
    }
}
