//! Replication Configuration
//!
//! The ordered server list shared by every node and client, plus the local
//! node's position in it and the detector/RPC timings.

use crate::replication::types::{ClusterTopology, PeerDescriptor};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// One entry of the cluster list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerAddress {
    /// Address clients connect to
    pub address: String,
    /// Address peers use for the sync service
    pub sync_address: String,
}

impl ServerAddress {
    pub fn new(address: impl Into<String>, sync_address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            sync_address: sync_address.into(),
        }
    }
}

/// Configuration for a replica node.
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Index of this node in `servers` (its priority rank)
    pub node_index: usize,

    /// Ordered cluster list; position is priority, lower is preferred
    pub servers: Vec<ServerAddress>,

    /// Failure detector probe interval (default: 1s)
    pub probe_interval: Duration,

    /// Bound on any single peer RPC, connect included (default: 1s)
    pub rpc_timeout: Duration,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            node_index: 0,
            servers: Vec::new(),
            probe_interval: Duration::from_secs(1),
            rpc_timeout: Duration::from_secs(1),
        }
    }
}

impl ReplicationConfig {
    /// Create a configuration for the node at `node_index`.
    pub fn new(node_index: usize, servers: Vec<ServerAddress>) -> Self {
        Self {
            node_index,
            servers,
            ..Default::default()
        }
    }

    /// Set the probe interval.
    pub fn probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    /// Set the per-RPC timeout.
    pub fn rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.servers.is_empty() {
            return Err(ConfigError::EmptyCluster);
        }
        if self.node_index >= self.servers.len() {
            return Err(ConfigError::NodeIndexOutOfRange {
                index: self.node_index,
                len: self.servers.len(),
            });
        }

        let mut seen = HashSet::new();
        for server in &self.servers {
            for addr in [&server.address, &server.sync_address] {
                if !seen.insert(addr.as_str()) {
                    return Err(ConfigError::DuplicateAddress(addr.clone()));
                }
            }
        }
        Ok(())
    }

    /// Build the read-only topology. Ranks come from list position.
    pub fn topology(&self) -> Result<ClusterTopology, ConfigError> {
        self.validate()?;
        let peers = self
            .servers
            .iter()
            .enumerate()
            .map(|(rank, s)| PeerDescriptor::new(rank, s.address.clone(), s.sync_address.clone()))
            .collect();
        Ok(ClusterTopology::new(peers, self.node_index))
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cluster server list is empty")]
    EmptyCluster,
    #[error("node index {index} out of range for {len} servers")]
    NodeIndexOutOfRange { index: usize, len: usize },
    #[error("address {0} appears more than once in the cluster list")]
    DuplicateAddress(String),
    #[error("failed to read cluster file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse cluster file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_servers() -> Vec<ServerAddress> {
        vec![
            ServerAddress::new("127.0.0.1:50051", "127.0.0.1:50052"),
            ServerAddress::new("127.0.0.1:50053", "127.0.0.1:50054"),
            ServerAddress::new("127.0.0.1:50055", "127.0.0.1:50056"),
        ]
    }

    #[test]
    fn test_default_config() {
        let config = ReplicationConfig::default();
        assert_eq!(config.node_index, 0);
        assert!(config.servers.is_empty());
        assert_eq!(config.probe_interval, Duration::from_secs(1));
        assert_eq!(config.rpc_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_builder_pattern() {
        let config = ReplicationConfig::new(2, three_servers())
            .probe_interval(Duration::from_millis(200))
            .rpc_timeout(Duration::from_millis(300));

        assert_eq!(config.node_index, 2);
        assert_eq!(config.probe_interval, Duration::from_millis(200));
        assert_eq!(config.rpc_timeout, Duration::from_millis(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_empty() {
        let config = ReplicationConfig::default();
        assert!(matches!(config.validate(), Err(ConfigError::EmptyCluster)));
    }

    #[test]
    fn test_validate_index_out_of_range() {
        let config = ReplicationConfig::new(3, three_servers());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NodeIndexOutOfRange { index: 3, len: 3 })
        ));
    }

    #[test]
    fn test_validate_duplicate_address() {
        let mut servers = three_servers();
        servers[2].sync_address = servers[0].address.clone();
        let config = ReplicationConfig::new(0, servers);
        assert!(matches!(config.validate(), Err(ConfigError::DuplicateAddress(_))));
    }

    #[test]
    fn test_topology_ranks_follow_list_order() {
        let topology = ReplicationConfig::new(1, three_servers()).topology().unwrap();
        assert_eq!(topology.local_rank(), 1);
        assert_eq!(topology.len(), 3);
        assert_eq!(topology.peer(2).unwrap().sync_address, "127.0.0.1:50056");
        assert_eq!(topology.peer(0).unwrap().priority_rank, 0);
    }

    #[test]
    fn test_server_address_json() {
        let json = r#"{"address": "localhost:1", "sync_address": "localhost:2"}"#;
        let addr: ServerAddress = serde_json::from_str(json).unwrap();
        assert_eq!(addr, ServerAddress::new("localhost:1", "localhost:2"));
    }
}
