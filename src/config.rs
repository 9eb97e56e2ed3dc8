use crate::replication::config::{ConfigError, ReplicationConfig, ServerAddress};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Process configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the JSON cluster file shared by every node and client
    pub cluster_config_path: String,
    /// This node's position in the cluster list
    pub node_index: usize,
    /// SQLite file for snapshot persistence
    pub data_path: String,
    pub probe_interval_ms: u64,
    pub rpc_timeout_ms: u64,
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cluster_config_path: "cluster.json".to_string(),
            node_index: 0,
            data_path: "chat_state.db".to_string(),
            probe_interval_ms: 1000,
            rpc_timeout_ms: 1000,
            debug: false,
        }
    }
}

impl Config {
    /// Build the replication config for this node from a cluster file.
    pub fn replication(&self, cluster: ClusterFile) -> Result<ReplicationConfig, ConfigError> {
        let config = ReplicationConfig::new(self.node_index, cluster.servers)
            .probe_interval(Duration::from_millis(self.probe_interval_ms))
            .rpc_timeout(Duration::from_millis(self.rpc_timeout_ms));
        config.validate()?;
        Ok(config)
    }
}

/// On-disk cluster file: `{"servers": [{"address": ..., "sync_address": ...}]}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterFile {
    pub servers: Vec<ServerAddress>,
}

/// Read and parse the cluster file.
pub fn load_cluster(path: impl AsRef<Path>) -> Result<ClusterFile, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

pub fn load_config() -> anyhow::Result<Config> {
    Ok(config_from(|key| std::env::var(key).ok()))
}

fn config_from(var: impl Fn(&str) -> Option<String>) -> Config {
    let cluster_config_path = var("CHAT_CLUSTER_CONFIG")
        .unwrap_or_else(|| "cluster.json".to_string());

    let node_index = var("CHAT_NODE_INDEX")
        .unwrap_or_else(|| "0".to_string())
        .parse()
        .unwrap_or(0);

    let data_path = var("CHAT_DATA_PATH")
        .unwrap_or_else(|| "chat_state.db".to_string());

    let probe_interval_ms = var("CHAT_PROBE_INTERVAL_MS")
        .unwrap_or_else(|| "1000".to_string())
        .parse()
        .unwrap_or(1000);

    let rpc_timeout_ms = var("CHAT_RPC_TIMEOUT_MS")
        .unwrap_or_else(|| "1000".to_string())
        .parse()
        .unwrap_or(1000);

    let debug = var("DEBUG").is_some();

    Config {
        cluster_config_path,
        node_index,
        data_path,
        probe_interval_ms,
        rpc_timeout_ms,
        debug,
    }
}
