//! Snapshot Repository Port
//!
//! Durable storage for a node's snapshot between restarts.

use crate::domain::entities::Snapshot;
use async_trait::async_trait;

/// Persists the local snapshot across process restarts.
#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    /// Load the last saved snapshot, if any.
    async fn load(&self) -> anyhow::Result<Option<Snapshot>>;

    /// Overwrite the saved snapshot.
    async fn save(&self, snapshot: &Snapshot) -> anyhow::Result<()>;
}
