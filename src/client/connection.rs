//! Client Connection Manager
//!
//! Tracks the ordered server list and the current target. A failed call,
//! or a `Redirect` from the target, advances to the next server in list
//! order, wrapping around.

use crate::application::{ClientRequest, ClientResponse};
use crate::replication::transport::{encode_frame, read_frame, write_frame};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

/// Pause before resubscribing after a redirect or a dropped subscription.
const RESUBSCRIBE_DELAY: Duration = Duration::from_millis(100);

/// Errors surfaced to the calling application.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("all {attempted} servers unreachable")]
    AllServersUnreachable { attempted: usize },
    /// The leader rejected the request
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("codec error: {0}")]
    Codec(String),
}

/// Client-side view of the cluster.
pub struct ConnectionManager {
    servers: Vec<String>,
    current: AtomicUsize,
    timeout: Duration,
}

impl ConnectionManager {
    /// Create a manager over the ordered client addresses. The first entry is
    /// the initial target.
    pub fn new(servers: Vec<String>, timeout: Duration) -> Self {
        Self {
            servers,
            current: AtomicUsize::new(0),
            timeout,
        }
    }

    pub fn servers(&self) -> &[String] {
        &self.servers
    }

    /// Index of the current target.
    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn current_address(&self) -> Option<&str> {
        self.servers.get(self.current()).map(String::as_str)
    }

    /// Move off `observed` to the next server, unless another caller already
    /// moved the target. Returns the target in effect afterwards.
    pub fn advance_from(&self, observed: usize) -> usize {
        if self.servers.is_empty() {
            return 0;
        }
        let next = (observed + 1) % self.servers.len();
        match self
            .current
            .compare_exchange(observed, next, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => {
                tracing::info!(
                    "failing over from {} to {}",
                    self.servers[observed],
                    self.servers[next]
                );
                next
            }
            Err(actual) => actual,
        }
    }

    /// Send a request, failing over through the server list.
    ///
    /// Each server gets at most one attempt per call. After every server has
    /// failed or redirected, the call returns `AllServersUnreachable`.
    pub async fn call(&self, request: ClientRequest) -> Result<ClientResponse, ClientError> {
        let frame = encode_frame(&request).map_err(|e| ClientError::Codec(e.to_string()))?;
        let attempts = self.servers.len();

        for _ in 0..attempts {
            let target = self.current();
            let addr = &self.servers[target];

            match self.request_once(addr, &frame).await {
                Ok(ClientResponse::Redirect { leader }) => {
                    tracing::debug!("{} redirected to leader={}", addr, leader);
                    self.advance_from(target);
                }
                Ok(ClientResponse::Error(msg)) => return Err(ClientError::Rejected(msg)),
                Ok(response) => return Ok(response),
                Err(e) => {
                    tracing::warn!("{} request to {} failed: {}", request.name(), addr, e);
                    self.advance_from(target);
                }
            }
        }

        Err(ClientError::AllServersUnreachable {
            attempted: attempts,
        })
    }

    /// One attempt against one server on a fresh connection.
    async fn request_once(&self, addr: &str, frame: &[u8]) -> anyhow::Result<ClientResponse> {
        let exchange = async {
            let mut stream = TcpStream::connect(addr).await?;
            stream.write_all(frame).await?;
            read_frame::<_, ClientResponse>(&mut stream)
                .await?
                .ok_or_else(|| anyhow::anyhow!("connection closed by {}", addr))
        };
        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| anyhow::anyhow!("request to {} timed out", addr))?
    }

    /// Watch the current target for a redirect signal.
    ///
    /// Subscribes to the current target; when it redirects, drops the
    /// subscription or cannot be reached, the target is advanced and the
    /// watch resubscribes. Abort the handle to stop watching.
    pub fn spawn_redirect_watch(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                let target = manager.current();
                let pause = match manager.watch_target(target).await {
                    Ok(Some(leader)) => {
                        tracing::info!("server {} redirected to leader={}", target, leader);
                        RESUBSCRIBE_DELAY
                    }
                    Ok(None) => {
                        tracing::info!("lost subscription to server {}", target);
                        RESUBSCRIBE_DELAY
                    }
                    Err(e) => {
                        tracing::debug!("subscribe to server {} failed: {}", target, e);
                        manager.timeout
                    }
                };
                manager.advance_from(target);
                tokio::time::sleep(pause).await;
            }
        })
    }

    /// Subscribe to `target` and wait for the subscription to end.
    /// Returns the redirected leader, or `None` if the stream ended.
    async fn watch_target(&self, target: usize) -> anyhow::Result<Option<usize>> {
        let addr = self
            .servers
            .get(target)
            .ok_or_else(|| anyhow::anyhow!("no server at index {}", target))?;

        let mut stream = tokio::time::timeout(self.timeout, TcpStream::connect(addr)).await??;
        write_frame(&mut stream, &ClientRequest::Subscribe).await?;

        let first =
            tokio::time::timeout(self.timeout, read_frame::<_, ClientResponse>(&mut stream)).await??;
        match first {
            Some(ClientResponse::Subscribed) => {}
            Some(ClientResponse::Redirect { leader }) => return Ok(Some(leader)),
            Some(other) => anyhow::bail!("unexpected subscribe response: {:?}", other),
            None => return Ok(None),
        }

        // Held open until the server redirects or goes away
        match read_frame::<_, ClientResponse>(&mut stream).await {
            Ok(Some(ClientResponse::Redirect { leader })) => Ok(Some(leader)),
            _ => Ok(None),
        }
    }
}
