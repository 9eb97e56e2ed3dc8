//! Domain Entities - Core chat objects
//!
//! Accounts, messages, the versioned state snapshot and the mutation records
//! that are replayed on followers. None of these types know about the network.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// A chat message stored in a user's unread queue or read mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message identifier (the leader's version stamp at send time)
    pub id: u64,
    /// Username of the sender
    pub sender: String,
    /// Message body
    pub content: String,
}

impl ChatMessage {
    pub fn new(id: u64, sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id,
            sender: sender.into(),
            content: content.into(),
        }
    }
}

/// A registered account.
///
/// The password hash and salt are opaque bytes produced by the leader.
/// Followers store them verbatim: hashing is salted, so recomputing on a
/// follower would produce a different hash and break login after failover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub username: String,
    pub password_hash: Vec<u8>,
    pub salt: Vec<u8>,
    /// Messages not yet delivered, oldest first
    pub unread: VecDeque<ChatMessage>,
    /// Delivered messages in arrival order
    pub read: Vec<ChatMessage>,
}

impl Account {
    pub fn new(username: impl Into<String>, password_hash: Vec<u8>, salt: Vec<u8>) -> Self {
        Self {
            username: username.into(),
            password_hash,
            salt,
            unread: VecDeque::new(),
            read: Vec::new(),
        }
    }
}

/// Every account on a node, keyed by username.
///
/// A `BTreeMap` keeps serialization order stable so that equal states always
/// produce equal checksums.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreState {
    pub accounts: BTreeMap<String, Account>,
}

/// Which side won a snapshot merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Local snapshot was at least as recent; incoming discarded
    KeptLocal,
    /// Incoming snapshot was strictly newer and replaced local state
    AdoptedIncoming,
}

/// Full copy of a node's state plus its version stamp.
///
/// Two snapshots with the same version are treated as identical. A higher
/// version always wins a merge; snapshots are replaced wholesale, never patched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u64,
    pub state: StoreState,
    /// CRC32 of the serialized state
    pub checksum: u32,
}

impl Snapshot {
    /// Create a snapshot, computing its checksum.
    pub fn new(version: u64, state: StoreState) -> Self {
        let checksum = Self::compute_checksum(&state);
        Self {
            version,
            state,
            checksum,
        }
    }

    /// The empty state at version 0.
    pub fn empty() -> Self {
        Self::new(0, StoreState::default())
    }

    /// Verify the checksum.
    pub fn verify(&self) -> bool {
        self.checksum == Self::compute_checksum(&self.state)
    }

    /// Whether this snapshot strictly supersedes `other`.
    pub fn is_newer_than(&self, other: &Snapshot) -> bool {
        self.version > other.version
    }

    /// Last-writer-wins merge of an incoming snapshot into `self`.
    ///
    /// Strictly newer incoming state replaces the local one; ties keep local.
    pub fn merge(self, incoming: Snapshot) -> (Snapshot, MergeOutcome) {
        if incoming.is_newer_than(&self) {
            (incoming, MergeOutcome::AdoptedIncoming)
        } else {
            (self, MergeOutcome::KeptLocal)
        }
    }

    fn compute_checksum(state: &StoreState) -> u32 {
        let bytes = bincode::serialize(state).unwrap_or_default();
        crc32fast::hash(&bytes)
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::empty()
    }
}

/// A single replicated state change.
///
/// Created by the leader when it accepts a client request and replayed once
/// on each follower. Carries exactly the fields needed to replay it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutation {
    AddUser {
        username: String,
        password_hash: Vec<u8>,
        salt: Vec<u8>,
    },
    DeleteUser {
        username: String,
    },
    AddUnreadMessage {
        user: String,
        message: ChatMessage,
    },
    RemoveUnreadMessage {
        user: String,
        message_id: u64,
    },
    AddReadMessage {
        user: String,
        message: ChatMessage,
    },
    RemoveReadMessage {
        user: String,
        message_id: u64,
    },
}

impl Mutation {
    /// The account this mutation touches.
    pub fn user(&self) -> &str {
        match self {
            Mutation::AddUser { username, .. } | Mutation::DeleteUser { username } => username,
            Mutation::AddUnreadMessage { user, .. }
            | Mutation::RemoveUnreadMessage { user, .. }
            | Mutation::AddReadMessage { user, .. }
            | Mutation::RemoveReadMessage { user, .. } => user,
        }
    }

    /// Short name for logging.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Mutation::AddUser { .. } => "AddUser",
            Mutation::DeleteUser { .. } => "DeleteUser",
            Mutation::AddUnreadMessage { .. } => "AddUnreadMessage",
            Mutation::RemoveUnreadMessage { .. } => "RemoveUnreadMessage",
            Mutation::AddReadMessage { .. } => "AddReadMessage",
            Mutation::RemoveReadMessage { .. } => "RemoveReadMessage",
        }
    }
}
