//! Sync Server Adapter
//!
//! Accepts peer connections on the sync address and answers framed
//! `SyncRequest`s through the sync service.

use crate::infrastructure::ShutdownController;
use crate::replication::sync::SyncService;
use crate::replication::transport::{read_frame, write_frame};
use crate::replication::types::SyncRequest;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};

/// Sync Server - inbound adapter for peer RPCs.
pub struct SyncServer {
    service: SyncService,
    shutdown: ShutdownController,
}

impl SyncServer {
    pub fn new(service: SyncService, shutdown: ShutdownController) -> Self {
        Self { service, shutdown }
    }

    /// Run the accept loop until shutdown. The listener is dropped on return,
    /// so peers see this node as unreachable right away.
    #[cfg_attr(coverage_nightly, coverage(off))]
    pub async fn run(self, listener: TcpListener) -> anyhow::Result<()> {
        tracing::info!("sync service listening on {}", listener.local_addr()?);

        loop {
            let (stream, addr) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!("sync accept failed: {}", e);
                        continue;
                    }
                },
                _ = self.shutdown.cancelled() => break,
            };

            let service = self.service.clone();
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(service, stream, addr, shutdown).await {
                    tracing::debug!("sync connection error from {}: {:?}", addr, e);
                }
            });
        }

        tracing::info!("sync service stopped");
        Ok(())
    }

    /// Serve requests on one peer connection until it closes.
    async fn handle_connection(
        service: SyncService,
        mut stream: TcpStream,
        addr: SocketAddr,
        shutdown: ShutdownController,
    ) -> anyhow::Result<()> {
        let _session = shutdown.session_guard();
        stream.set_nodelay(true).ok();
        tracing::debug!("sync connection from {}", addr);

        loop {
            let request = tokio::select! {
                request = read_frame::<_, SyncRequest>(&mut stream) => request?,
                _ = shutdown.cancelled() => return Ok(()),
            };
            let Some(request) = request else {
                return Ok(());
            };

            let response = service.handle(request);
            write_frame(&mut stream, &response).await?;
        }
    }
}
