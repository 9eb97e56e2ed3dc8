mod client_server;
mod sync_server;

pub use client_server::ClientServer;
pub use sync_server::SyncServer;
