//! In-Memory State Store
//!
//! Implements StateStore over a `StoreState` held in process memory.

use crate::domain::entities::{Account, Mutation, Snapshot, StoreState};
use crate::domain::ports::StateStore;

/// Plain in-memory store.
///
/// Not internally synchronized: the node owns it behind a single lock.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: StoreState,
    version: u64,
}

impl MemoryStateStore {
    /// Create an empty store at version 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the mutation changed state.
    fn apply_inner(&mut self, mutation: &Mutation) -> bool {
        let accounts = &mut self.state.accounts;
        match mutation {
            Mutation::AddUser {
                username,
                password_hash,
                salt,
            } => {
                if accounts.contains_key(username) {
                    return false;
                }
                accounts.insert(
                    username.clone(),
                    Account::new(username.clone(), password_hash.clone(), salt.clone()),
                );
                true
            }
            Mutation::DeleteUser { username } => accounts.remove(username).is_some(),
            Mutation::AddUnreadMessage { user, message } => match accounts.get_mut(user) {
                Some(account) => {
                    account.unread.push_back(message.clone());
                    true
                }
                None => false,
            },
            Mutation::AddReadMessage { user, message } => match accounts.get_mut(user) {
                Some(account) => {
                    account.read.push(message.clone());
                    true
                }
                None => false,
            },
            Mutation::RemoveUnreadMessage { user, message_id } => {
                let Some(account) = accounts.get_mut(user) else {
                    return false;
                };
                match account.unread.iter().position(|m| m.id == *message_id) {
                    Some(idx) => {
                        account.unread.remove(idx);
                        true
                    }
                    None => false,
                }
            }
            Mutation::RemoveReadMessage { user, message_id } => {
                let Some(account) = accounts.get_mut(user) else {
                    return false;
                };
                match account.read.iter().position(|m| m.id == *message_id) {
                    Some(idx) => {
                        account.read.remove(idx);
                        true
                    }
                    None => false,
                }
            }
        }
    }
}

impl StateStore for MemoryStateStore {
    fn apply(&mut self, mutation: &Mutation) -> u64 {
        if self.apply_inner(mutation) {
            self.version += 1;
        } else {
            tracing::debug!(
                "{} for '{}' was a no-op at version {}",
                mutation.kind_name(),
                mutation.user(),
                self.version
            );
        }
        self.version
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot::new(self.version, self.state.clone())
    }

    fn replace(&mut self, snapshot: Snapshot) {
        self.state = snapshot.state;
        self.version = snapshot.version;
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn account(&self, username: &str) -> Option<Account> {
        self.state.accounts.get(username).cloned()
    }

    fn usernames(&self) -> Vec<String> {
        self.state.accounts.keys().cloned().collect()
    }
}
