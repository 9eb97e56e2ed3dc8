mod memory_state_store;
mod sqlite_snapshot_repo;

pub use memory_state_store::MemoryStateStore;
pub use sqlite_snapshot_repo::SqliteSnapshotRepository;
