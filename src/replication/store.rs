//! Shared State Handle
//!
//! Wraps the node's single `StateStore` behind one lock so that local
//! mutations, replicated mutations and snapshot merges are serialized.

use crate::domain::entities::{Account, MergeOutcome, Mutation, Snapshot};
use crate::domain::ports::StateStore;
use parking_lot::Mutex;
use std::sync::Arc;

/// Cloneable handle to the node's state store.
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<Mutex<Box<dyn StateStore>>>,
}

impl StoreHandle {
    pub fn new<S: StateStore>(store: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(store))),
        }
    }

    /// Apply a mutation and return the resulting version.
    pub fn apply(&self, mutation: &Mutation) -> u64 {
        self.inner.lock().apply(mutation)
    }

    /// Apply a mutation and run `then` with the new version before the lock
    /// is released. Anything `then` enqueues is ordered exactly like the
    /// applies themselves.
    pub fn apply_with<R>(&self, mutation: &Mutation, then: impl FnOnce(u64) -> R) -> R {
        let mut store = self.inner.lock();
        let version = store.apply(mutation);
        then(version)
    }

    pub fn snapshot(&self) -> Snapshot {
        self.inner.lock().snapshot()
    }

    /// Take a snapshot and run `then` on it before the lock is released,
    /// so nothing applied afterwards can be ordered ahead of it.
    pub fn snapshot_with<R>(&self, then: impl FnOnce(Snapshot) -> R) -> R {
        let store = self.inner.lock();
        then(store.snapshot())
    }

    pub fn version(&self) -> u64 {
        self.inner.lock().version()
    }

    /// Replace the whole state.
    pub fn replace(&self, snapshot: Snapshot) {
        self.inner.lock().replace(snapshot)
    }

    /// Last-writer-wins merge under the lock. Returns the merged snapshot.
    pub fn merge(&self, incoming: Snapshot) -> (Snapshot, MergeOutcome) {
        let mut store = self.inner.lock();
        let (merged, outcome) = store.snapshot().merge(incoming);
        if outcome == MergeOutcome::AdoptedIncoming {
            store.replace(merged.clone());
        }
        (merged, outcome)
    }

    pub fn account(&self, username: &str) -> Option<Account> {
        self.inner.lock().account(username)
    }

    pub fn usernames(&self) -> Vec<String> {
        self.inner.lock().usernames()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::outbound::MemoryStateStore;
    use crate::domain::entities::StoreState;

    fn add_user(name: &str) -> Mutation {
        Mutation::AddUser {
            username: name.to_string(),
            password_hash: vec![1],
            salt: vec![2],
        }
    }

    #[test]
    fn test_apply_with_sees_new_version() {
        let store = StoreHandle::new(MemoryStateStore::new());
        let seen = store.apply_with(&add_user("alice"), |v| v);
        assert_eq!(seen, 1);
        assert_eq!(store.version(), 1);
    }

    #[test]
    fn test_merge_adopts_newer() {
        let store = StoreHandle::new(MemoryStateStore::new());
        store.apply(&add_user("alice"));

        let mut state = StoreState::default();
        state.accounts.insert(
            "bob".to_string(),
            crate::domain::entities::Account::new("bob", vec![], vec![]),
        );
        let (merged, outcome) = store.merge(Snapshot::new(9, state));

        assert_eq!(outcome, MergeOutcome::AdoptedIncoming);
        assert_eq!(merged.version, 9);
        assert_eq!(store.usernames(), vec!["bob".to_string()]);
    }

    #[test]
    fn test_merge_keeps_newer_local() {
        let store = StoreHandle::new(MemoryStateStore::new());
        store.apply(&add_user("alice"));
        store.apply(&add_user("carol"));

        let (merged, outcome) = store.merge(Snapshot::empty());
        assert_eq!(outcome, MergeOutcome::KeptLocal);
        assert_eq!(merged.version, 2);
        assert!(store.account("alice").is_some());
    }

    #[test]
    fn test_clones_share_state() {
        let store = StoreHandle::new(MemoryStateStore::new());
        let other = store.clone();
        store.apply(&add_user("dave"));
        assert_eq!(other.version(), 1);
    }
}
