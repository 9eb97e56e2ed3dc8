//! State Store Port
//!
//! The account/message store the replication core reads from and mutates.
//! Password hashing and CRUD request handling live outside this interface.

use crate::domain::entities::{Account, Mutation, Snapshot};

/// Versioned account and message store.
///
/// Implementations are plain synchronous data structures; the node wraps the
/// store in a single lock, so no method may block on I/O.
pub trait StateStore: Send + 'static {
    /// Apply one mutation and return the resulting version.
    ///
    /// Mutations that do not change state (adding an existing user, removing
    /// an absent message) are no-ops and leave the version untouched.
    fn apply(&mut self, mutation: &Mutation) -> u64;

    /// Copy of the full current state with its version.
    fn snapshot(&self) -> Snapshot;

    /// Replace the whole state with `snapshot`.
    fn replace(&mut self, snapshot: Snapshot);

    /// Current version stamp.
    fn version(&self) -> u64;

    /// Look up a single account.
    fn account(&self, username: &str) -> Option<Account>;

    /// All usernames in sorted order.
    fn usernames(&self) -> Vec<String>;
}
