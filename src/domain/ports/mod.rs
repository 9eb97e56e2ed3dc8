mod snapshot_repository;
mod state_store;

pub use snapshot_repository::SnapshotRepository;
pub use state_store::StateStore;
