//! Replication Types
//!
//! Peer identity, the static cluster topology, and the sync RPC messages
//! exchanged between nodes.

use crate::domain::entities::{ChatMessage, Mutation, Snapshot};
use serde::{Deserialize, Serialize};

/// Unique identifier for a node in the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Canonical id for the node at `rank`.
    pub fn for_rank(rank: usize) -> Self {
        Self(format!("node-{}", rank))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A node as described by the shared cluster list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerDescriptor {
    pub node_id: NodeId,
    pub client_address: String,
    pub sync_address: String,
    /// Position in the cluster list; lower is higher priority
    pub priority_rank: usize,
}

impl PeerDescriptor {
    pub fn new(rank: usize, client_address: String, sync_address: String) -> Self {
        Self {
            node_id: NodeId::for_rank(rank),
            client_address,
            sync_address,
            priority_rank: rank,
        }
    }
}

/// Read-only view of the cluster, computed once at startup.
///
/// Every node builds the same ordering from the same list, so all of them
/// agree on failover order without talking to each other.
#[derive(Debug, Clone)]
pub struct ClusterTopology {
    peers: Vec<PeerDescriptor>,
    local: usize,
}

impl ClusterTopology {
    pub fn new(peers: Vec<PeerDescriptor>, local: usize) -> Self {
        Self { peers, local }
    }

    pub fn local_rank(&self) -> usize {
        self.local
    }

    pub fn local(&self) -> &PeerDescriptor {
        &self.peers[self.local]
    }

    pub fn peer(&self, rank: usize) -> Option<&PeerDescriptor> {
        self.peers.get(rank)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Every peer except the local node, in rank order.
    pub fn others(&self) -> impl Iterator<Item = &PeerDescriptor> {
        let local = self.local;
        self.peers.iter().filter(move |p| p.priority_rank != local)
    }
}

/// Requests served by every node's sync service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SyncRequest {
    /// Liveness probe
    Health,
    /// Leadership announcement
    SetLeader { leader: usize, announced_by: usize },
    /// Whole-snapshot reconciliation
    MergeState { from: usize, snapshot: Snapshot },
    SyncAddUser {
        username: String,
        password_hash: Vec<u8>,
        salt: Vec<u8>,
    },
    SyncDeleteUser {
        username: String,
    },
    SyncAddUnreadMessage {
        user: String,
        message: ChatMessage,
    },
    SyncRemoveUnreadMessage {
        user: String,
        message_id: u64,
    },
    SyncAddReadMessage {
        user: String,
        message: ChatMessage,
    },
    SyncRemoveReadMessage {
        user: String,
        message_id: u64,
    },
}

impl SyncRequest {
    /// The mutation carried by a `Sync*` call, if this is one.
    pub fn into_mutation(self) -> Option<Mutation> {
        let mutation = match self {
            SyncRequest::SyncAddUser {
                username,
                password_hash,
                salt,
            } => Mutation::AddUser {
                username,
                password_hash,
                salt,
            },
            SyncRequest::SyncDeleteUser { username } => Mutation::DeleteUser { username },
            SyncRequest::SyncAddUnreadMessage { user, message } => {
                Mutation::AddUnreadMessage { user, message }
            }
            SyncRequest::SyncRemoveUnreadMessage { user, message_id } => {
                Mutation::RemoveUnreadMessage { user, message_id }
            }
            SyncRequest::SyncAddReadMessage { user, message } => {
                Mutation::AddReadMessage { user, message }
            }
            SyncRequest::SyncRemoveReadMessage { user, message_id } => {
                Mutation::RemoveReadMessage { user, message_id }
            }
            SyncRequest::Health | SyncRequest::SetLeader { .. } | SyncRequest::MergeState { .. } => {
                return None
            }
        };
        Some(mutation)
    }

    /// RPC name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            SyncRequest::Health => "Health",
            SyncRequest::SetLeader { .. } => "SetLeader",
            SyncRequest::MergeState { .. } => "MergeState",
            SyncRequest::SyncAddUser { .. } => "SyncAddUser",
            SyncRequest::SyncDeleteUser { .. } => "SyncDeleteUser",
            SyncRequest::SyncAddUnreadMessage { .. } => "SyncAddUnreadMessage",
            SyncRequest::SyncRemoveUnreadMessage { .. } => "SyncRemoveUnreadMessage",
            SyncRequest::SyncAddReadMessage { .. } => "SyncAddReadMessage",
            SyncRequest::SyncRemoveReadMessage { .. } => "SyncRemoveReadMessage",
        }
    }
}

/// Routes each mutation kind to its matching `Sync*` call.
impl From<Mutation> for SyncRequest {
    fn from(mutation: Mutation) -> Self {
        match mutation {
            Mutation::AddUser {
                username,
                password_hash,
                salt,
            } => SyncRequest::SyncAddUser {
                username,
                password_hash,
                salt,
            },
            Mutation::DeleteUser { username } => SyncRequest::SyncDeleteUser { username },
            Mutation::AddUnreadMessage { user, message } => {
                SyncRequest::SyncAddUnreadMessage { user, message }
            }
            Mutation::RemoveUnreadMessage { user, message_id } => {
                SyncRequest::SyncRemoveUnreadMessage { user, message_id }
            }
            Mutation::AddReadMessage { user, message } => {
                SyncRequest::SyncAddReadMessage { user, message }
            }
            Mutation::RemoveReadMessage { user, message_id } => {
                SyncRequest::SyncRemoveReadMessage { user, message_id }
            }
        }
    }
}

/// Responses from the sync service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SyncResponse {
    Empty,
    /// A `Sync*` mutation was applied; receiver's version afterwards
    Ack { version: u64 },
    /// Receiver's snapshot after a merge
    State(Snapshot),
    Error(String),
}

/// Errors raised by the replication layer.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ReplicationError {
    #[error("peer {peer} unreachable: {reason}")]
    PeerUnreachable { peer: String, reason: String },
    #[error("peer {peer} did not acknowledge within the RPC timeout")]
    PropagationTimeout { peer: String },
    #[error("codec error: {0}")]
    Codec(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("frame of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(usize),
    #[error("snapshot checksum verification failed")]
    CorruptSnapshot,
}

impl From<bincode::Error> for ReplicationError {
    fn from(e: bincode::Error) -> Self {
        ReplicationError::Codec(e.to_string())
    }
}
