//! Infrastructure Layer
//!
//! Cross-cutting concerns and infrastructure components.

pub mod shutdown;

pub use shutdown::{shutdown_signal, SessionGuard, ShutdownController};
