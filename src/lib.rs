//! chat-replica Library
//!
//! Replicated chat state with leader failover. Exposes the node, client and
//! storage components for use in integration tests and as a library.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod adapters;
pub mod application;
pub mod client;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod replication;

// Re-export commonly used types
pub use application::{ChatService, ClientRequest, ClientResponse};
pub use client::{ClientError, ConnectionManager};
pub use config::load_config;
pub use domain::entities::{Account, ChatMessage, Mutation, Snapshot};
pub use domain::ports::{SnapshotRepository, StateStore};
pub use replication::{ReplicaNode, ReplicationConfig, ServerAddress};
