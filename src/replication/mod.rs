//! Replication and Failover
//!
//! Keeps every replica's chat state identical and moves leadership between
//! statically configured nodes when the leader becomes unreachable.
//!
//! ## Architecture
//!
//! - **Detector**: periodic Health probes, one reachability flag per peer
//! - **Leadership**: lowest-ranked reachable node leads; no election round
//! - **Sync**: peer RPC handlers (Health, SetLeader, MergeState, Sync*)
//! - **Coordinator**: leader-side propagation of mutations to followers
//! - **Agent**: `ReplicaNode`, which wires the above and owns the lifecycle
//!
//! ## How It Works
//!
//! 1. Every node reads the same ordered server list; list position is rank
//! 2. The leader applies a client mutation, then sends the matching `Sync*`
//!    call to each reachable follower, once, with no retry
//! 3. A node that (re)joins sends its snapshot to the leader with `MergeState`;
//!    the higher version wins and the leader pushes the result to the others
//! 4. When the leader stops answering probes, the next rank takes over and
//!    announces itself with `SetLeader`
//!
//! Leadership assumes nodes fail by crashing. Under a network partition two
//! nodes can both lead, and the next merge discards one side's writes.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use chat_replica::adapters::outbound::MemoryStateStore;
//! use chat_replica::replication::{ReplicaNode, ReplicationConfig, ServerAddress};
//!
//! let config = ReplicationConfig::new(0, vec![
//!     ServerAddress::new("10.0.0.1:50051", "10.0.0.1:50052"),
//!     ServerAddress::new("10.0.0.2:50051", "10.0.0.2:50052"),
//! ]);
//!
//! let node = ReplicaNode::new(config, MemoryStateStore::new())?;
//! node.start().await?;
//! ```

pub mod agent;
pub mod config;
pub mod coordinator;
pub mod detector;
pub mod leadership;
pub mod store;
pub mod sync;
pub mod transport;
pub mod types;

pub use agent::ReplicaNode;
pub use config::{ConfigError, ReplicationConfig, ServerAddress};
pub use coordinator::{ReplicationCoordinator, ReplicationReport};
pub use detector::{FailureDetector, Reachability};
pub use leadership::{Leadership, Role, SetLeaderOutcome};
pub use store::StoreHandle;
pub use sync::SyncService;
pub use transport::{SyncClient, SyncConnection};
pub use types::{ClusterTopology, NodeId, PeerDescriptor, ReplicationError, SyncRequest, SyncResponse};
