//! Backward-dependency sets.
//!
//! For every dependency key the backend tracks the set of item keys that
//! declared it. The set has its own lock, serializing membership changes for
//! one dependency key without contending with other dependency keys.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use tiercache_backend::{BackendError, BackendResult};

/// How long a lock acquisition may take before surfacing a timeout error.
pub(crate) const LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// The set of item keys that declared a given dependency key.
pub struct BackwardSet {
    items: Mutex<HashSet<String>>,
}

impl BackwardSet {
    /// Creates an empty, shareable set.
    #[must_use]
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            items: Mutex::new(HashSet::new()),
        })
    }

    /// Locks the set.
    ///
    /// # Errors
    ///
    /// Fails with a lock-timeout error when the lock cannot be acquired
    /// within [`LOCK_TIMEOUT`].
    pub(crate) fn guard(&self, dependency_key: &str) -> BackendResult<MutexGuard<'_, HashSet<String>>> {
        self.items
            .try_lock_for(LOCK_TIMEOUT)
            .ok_or_else(|| BackendError::lock_timeout(dependency_key))
    }

    /// Number of dependent items, for diagnostics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Returns `true` if no items currently declare this dependency.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

impl std::fmt::Debug for BackwardSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackwardSet")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_membership() {
        let set = BackwardSet::new();
        assert!(set.is_empty());

        set.guard("d").expect("lock").insert("a".to_string());
        set.guard("d").expect("lock").insert("b".to_string());
        assert_eq!(set.len(), 2);

        set.guard("d").expect("lock").remove("a");
        assert_eq!(set.len(), 1);
    }
}
