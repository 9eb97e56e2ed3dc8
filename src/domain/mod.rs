//! Domain Layer
//!
//! Chat state entities and the ports the replication core depends on.

pub mod entities;
pub mod ports;
