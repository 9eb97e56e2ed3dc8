//! Graceful Shutdown Handler
//!
//! Coordinated shutdown for a replica node's servers and background loops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

/// Shutdown coordinator for graceful termination.
///
/// Signals shutdown to every server and loop, and tracks open sessions
/// (client and peer connections) so the node can wait for them to close.
#[derive(Clone)]
pub struct ShutdownController {
    /// Whether shutdown has been initiated
    shutdown_initiated: Arc<AtomicBool>,
    /// Broadcast channel for shutdown signal
    shutdown_tx: broadcast::Sender<()>,
    /// Number of open sessions
    sessions: Arc<watch::Sender<usize>>,
}

impl ShutdownController {
    /// Create a new shutdown controller.
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let (sessions, _) = watch::channel(0);
        Self {
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            sessions: Arc::new(sessions),
        }
    }

    /// Subscribe to shutdown notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Resolve once shutdown has been initiated, including before this call.
    pub async fn cancelled(&self) {
        let mut rx = self.subscribe();
        if self.is_shutdown() {
            return;
        }
        let _ = rx.recv().await;
    }

    /// Initiate graceful shutdown.
    pub fn shutdown(&self) {
        if !self.shutdown_initiated.swap(true, Ordering::SeqCst) {
            tracing::info!("initiating graceful shutdown");
            let _ = self.shutdown_tx.send(());
        }
    }

    /// Check if shutdown has been initiated.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown_initiated.load(Ordering::SeqCst)
    }

    /// Number of open sessions.
    pub fn active_sessions(&self) -> usize {
        *self.sessions.borrow()
    }

    /// Track a session until the returned guard is dropped.
    pub fn session_guard(&self) -> SessionGuard {
        self.sessions.send_modify(|n| *n += 1);
        SessionGuard {
            sessions: self.sessions.clone(),
        }
    }

    /// Wait for all sessions to close (with timeout).
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let mut rx = self.sessions.subscribe();
        let drained = tokio::time::timeout(timeout, rx.wait_for(|n| *n == 0))
            .await
            .is_ok();
        if !drained {
            tracing::warn!(
                "drain timeout: {} sessions still open",
                self.active_sessions()
            );
        }
        drained
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for an open session.
pub struct SessionGuard {
    sessions: Arc<watch::Sender<usize>>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.sessions.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Install signal handlers for graceful shutdown.
///
/// Returns once Ctrl+C or SIGTERM is received, after initiating shutdown.
#[cfg_attr(coverage_nightly, coverage(off))]
pub async fn shutdown_signal(controller: ShutdownController) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("received SIGTERM, initiating shutdown");
        }
    }

    controller.shutdown();
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_initiates_once() {
        let controller = ShutdownController::new();
        assert!(!controller.is_shutdown());

        controller.shutdown();
        assert!(controller.is_shutdown());

        controller.shutdown();
        assert!(controller.is_shutdown());
    }

    #[test]
    fn test_session_guards() {
        let controller = ShutdownController::new();
        let a = controller.session_guard();
        let b = controller.session_guard();
        assert_eq!(controller.active_sessions(), 2);

        drop(a);
        assert_eq!(controller.active_sessions(), 1);
        drop(b);
        assert_eq!(controller.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_after_shutdown_returns() {
        let controller = ShutdownController::new();
        controller.shutdown();

        let result = tokio::time::timeout(Duration::from_millis(100), controller.cancelled()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiter() {
        let controller = ShutdownController::new();
        let ctrl = controller.clone();
        let waiter = tokio::spawn(async move { ctrl.cancelled().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        controller.shutdown();

        let result = tokio::time::timeout(Duration::from_millis(200), waiter).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_wait_for_drain() {
        let controller = ShutdownController::new();
        let guard = controller.session_guard();
        controller.shutdown();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(guard);
        });

        assert!(controller.wait_for_drain(Duration::from_millis(500)).await);
    }

    #[tokio::test]
    async fn test_wait_for_drain_timeout() {
        let controller = ShutdownController::new();
        let _guard = controller.session_guard();

        assert!(!controller.wait_for_drain(Duration::from_millis(50)).await);
    }

    #[test]
    fn test_clone_shares_state() {
        let controller = ShutdownController::new();
        let cloned = controller.clone();

        let _guard = controller.session_guard();
        assert_eq!(cloned.active_sessions(), 1);

        cloned.shutdown();
        assert!(controller.is_shutdown());
    }
}
