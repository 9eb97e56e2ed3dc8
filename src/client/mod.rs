//! Client-side failover.

mod connection;

pub use connection::{ClientError, ConnectionManager};
