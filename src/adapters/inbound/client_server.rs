//! Client Server Adapter
//!
//! Accepts client connections on the client address and answers framed
//! `ClientRequest`s through the chat service. `Subscribe` turns the
//! connection into a redirect channel.

use crate::application::{ChatService, ClientRequest, ClientResponse};
use crate::infrastructure::ShutdownController;
use crate::replication::transport::{read_frame, write_frame};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

/// Client Server - inbound adapter for client requests.
pub struct ClientServer {
    service: Arc<ChatService>,
    shutdown: ShutdownController,
}

impl ClientServer {
    pub fn new(service: Arc<ChatService>, shutdown: ShutdownController) -> Self {
        Self { service, shutdown }
    }

    /// Run the accept loop until shutdown.
    #[cfg_attr(coverage_nightly, coverage(off))]
    pub async fn run(self, listener: TcpListener) -> anyhow::Result<()> {
        tracing::info!("client service listening on {}", listener.local_addr()?);

        loop {
            let (stream, addr) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!("client accept failed: {}", e);
                        continue;
                    }
                },
                _ = self.shutdown.cancelled() => break,
            };

            let service = self.service.clone();
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(service, stream, addr, shutdown).await {
                    tracing::debug!("client connection error from {}: {:?}", addr, e);
                }
            });
        }

        tracing::info!("client service stopped");
        Ok(())
    }

    async fn handle_connection(
        service: Arc<ChatService>,
        mut stream: TcpStream,
        addr: SocketAddr,
        shutdown: ShutdownController,
    ) -> anyhow::Result<()> {
        let _session = shutdown.session_guard();

        loop {
            let request = tokio::select! {
                request = read_frame::<_, ClientRequest>(&mut stream) => request?,
                _ = shutdown.cancelled() => return Ok(()),
            };
            let Some(request) = request else {
                return Ok(());
            };

            if matches!(request, ClientRequest::Subscribe) {
                // Watch from before the answer so a change in between is not missed
                let leader_rx = service.leadership().subscribe();
                let response = service.handle(request).await;
                let subscribed = matches!(response, ClientResponse::Subscribed);
                write_frame(&mut stream, &response).await?;
                if !subscribed {
                    return Ok(());
                }
                let local = service.leadership().local_rank();
                return Self::hold_subscription(local, leader_rx, stream, addr, shutdown).await;
            }

            let response = service.handle(request).await;
            write_frame(&mut stream, &response).await?;
        }
    }

    /// Hold an accepted subscription open and push a `Redirect` once this
    /// node stops leading. Ends on client disconnect or shutdown.
    async fn hold_subscription(
        local: usize,
        mut leader_rx: watch::Receiver<usize>,
        mut stream: TcpStream,
        addr: SocketAddr,
        shutdown: ShutdownController,
    ) -> anyhow::Result<()> {
        tracing::debug!("client {} subscribed to leadership changes", addr);

        let mut buf = [0u8; 64];
        loop {
            tokio::select! {
                changed = leader_rx.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                    let leader = *leader_rx.borrow_and_update();
                    if leader != local {
                        tracing::info!("redirecting subscribed client {} to leader={}", addr, leader);
                        write_frame(&mut stream, &ClientResponse::Redirect { leader }).await?;
                        return Ok(());
                    }
                }
                read = stream.read(&mut buf) => {
                    // Subscribers send nothing further; EOF means they left
                    if matches!(read, Ok(0) | Err(_)) {
                        return Ok(());
                    }
                }
                _ = shutdown.cancelled() => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::outbound::MemoryStateStore;
    use crate::replication::coordinator::ReplicationCoordinator;
    use crate::replication::detector::FailureDetector;
    use crate::replication::leadership::Leadership;
    use crate::replication::store::StoreHandle;
    use crate::replication::types::{ClusterTopology, PeerDescriptor};
    use std::time::Duration;

    /// Client server for rank 1 of a two-node cluster, with its leadership
    /// handle so tests can move the leader.
    async fn serve_rank_one() -> (String, Arc<Leadership>) {
        let peers = vec![
            PeerDescriptor::new(0, "127.0.0.1:9".into(), "127.0.0.1:9".into()),
            PeerDescriptor::new(1, "127.0.0.1:8".into(), "127.0.0.1:8".into()),
        ];
        let topology = Arc::new(ClusterTopology::new(peers, 1));
        let store = StoreHandle::new(MemoryStateStore::new());
        let timeout = Duration::from_millis(100);
        let detector = Arc::new(FailureDetector::new(topology.clone(), timeout));
        let coordinator = Arc::new(ReplicationCoordinator::new(topology, store.clone(), detector, timeout));
        let leadership = Arc::new(Leadership::new(1));
        let service = Arc::new(ChatService::new(store, leadership.clone(), coordinator));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(ClientServer::new(service, ShutdownController::new()).run(listener));
        (addr, leadership)
    }

    async fn subscribe(addr: &str) -> (TcpStream, ClientResponse) {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_frame(&mut stream, &ClientRequest::Subscribe).await.unwrap();
        let response = read_frame::<_, ClientResponse>(&mut stream).await.unwrap().unwrap();
        (stream, response)
    }

    #[tokio::test]
    async fn test_follower_redirects_subscriber() {
        let (addr, _leadership) = serve_rank_one().await;
        let (_, response) = subscribe(&addr).await;
        assert!(matches!(response, ClientResponse::Redirect { leader: 0 }));
    }

    #[tokio::test]
    async fn test_subscriber_redirected_when_leadership_lost() {
        let (addr, leadership) = serve_rank_one().await;
        leadership.recompute(|_| false);
        assert!(leadership.is_leader());

        let (mut stream, response) = subscribe(&addr).await;
        assert!(matches!(response, ClientResponse::Subscribed));

        leadership.recompute(|rank| rank == 0);
        let pushed = tokio::time::timeout(
            Duration::from_secs(1),
            read_frame::<_, ClientResponse>(&mut stream),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(matches!(pushed, Some(ClientResponse::Redirect { leader: 0 })));
    }
}

