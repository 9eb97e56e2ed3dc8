//! TCP Transport
//!
//! Length-prefixed bincode frames over TCP, used by both the sync service
//! between nodes and the client front end.
//!
//! Uses Sans-IO pattern: frame encoding/decoding is separated from I/O for testability.

use crate::domain::entities::Snapshot;
use crate::replication::types::{ReplicationError, SyncRequest, SyncResponse};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

/// Largest payload accepted in a single frame (16 MiB).
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

// ==================== Sans-IO Functions ====================

/// Encode a message for transport (Sans-IO pattern).
/// Returns length-prefixed binary data ready for sending.
pub fn encode_frame<T: Serialize>(msg: &T) -> Result<Vec<u8>, ReplicationError> {
    let data = bincode::serialize(msg)?;
    if data.len() > MAX_FRAME_LEN {
        return Err(ReplicationError::FrameTooLarge(data.len()));
    }
    let len = data.len() as u32;

    let mut result = Vec::with_capacity(4 + data.len());
    result.extend_from_slice(&len.to_be_bytes());
    result.extend_from_slice(&data);

    Ok(result)
}

/// Decode a length from the first 4 bytes.
pub fn decode_length(buf: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*buf)
}

/// Decode a message from a frame payload (Sans-IO pattern).
pub fn decode_frame<T: DeserializeOwned>(data: &[u8]) -> Result<T, ReplicationError> {
    Ok(bincode::deserialize(data)?)
}

// ==================== Async Framing ====================

/// Read one frame. Returns `None` when the peer closed the stream cleanly
/// before a new frame started.
pub async fn read_frame<R, T>(reader: &mut R) -> anyhow::Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = decode_length(&len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ReplicationError::FrameTooLarge(len).into());
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await?;
    Ok(Some(decode_frame(&data)?))
}

/// Write one frame and flush.
pub async fn write_frame<W, T>(writer: &mut W, msg: &T) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let frame = encode_frame(msg)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

// ==================== Sync Connections ====================

/// A persistent connection to one peer's sync service.
///
/// Calls are strictly request/response, so one connection carries one call at
/// a time. After any error the connection should be dropped and reopened.
pub struct SyncConnection {
    peer: String,
    stream: TcpStream,
    timeout: Duration,
}

impl SyncConnection {
    /// Connect to `addr`, bounded by `timeout`.
    pub async fn connect(addr: &str, timeout: Duration) -> Result<Self, ReplicationError> {
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(ReplicationError::PeerUnreachable {
                    peer: addr.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(ReplicationError::PeerUnreachable {
                    peer: addr.to_string(),
                    reason: "connect timed out".to_string(),
                })
            }
        };
        stream.set_nodelay(true).ok();

        Ok(Self {
            peer: addr.to_string(),
            stream,
            timeout,
        })
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Send a request and wait for its response, bounded by the RPC timeout.
    pub async fn call(&mut self, request: &SyncRequest) -> Result<SyncResponse, ReplicationError> {
        let stream = &mut self.stream;
        let exchange = async move {
            write_frame(stream, request).await?;
            read_frame::<_, SyncResponse>(stream).await
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(Ok(Some(response))) => Ok(response),
            Ok(Ok(None)) => Err(ReplicationError::PeerUnreachable {
                peer: self.peer.clone(),
                reason: "connection closed".to_string(),
            }),
            Ok(Err(e)) => Err(match e.downcast::<ReplicationError>() {
                Ok(e) => e,
                Err(e) => ReplicationError::PeerUnreachable {
                    peer: self.peer.clone(),
                    reason: e.to_string(),
                },
            }),
            Err(_) => Err(ReplicationError::PropagationTimeout {
                peer: self.peer.clone(),
            }),
        }
    }
}

/// One-shot client for a peer's sync service.
///
/// Every call opens a fresh connection, so a stale socket never makes a
/// recovered peer look dead.
#[derive(Debug, Clone)]
pub struct SyncClient {
    addr: String,
    timeout: Duration,
}

impl SyncClient {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Connect, send one request, and return the response.
    pub async fn call(&self, request: &SyncRequest) -> Result<SyncResponse, ReplicationError> {
        let mut conn = SyncConnection::connect(&self.addr, self.timeout).await?;
        conn.call(request).await
    }

    /// Liveness probe.
    pub async fn health(&self) -> Result<(), ReplicationError> {
        match self.call(&SyncRequest::Health).await? {
            SyncResponse::Empty => Ok(()),
            other => Err(unexpected("Health", other)),
        }
    }

    /// Announce `leader` on behalf of `announced_by`.
    pub async fn set_leader(&self, leader: usize, announced_by: usize) -> Result<(), ReplicationError> {
        let request = SyncRequest::SetLeader {
            leader,
            announced_by,
        };
        match self.call(&request).await? {
            SyncResponse::Empty => Ok(()),
            other => Err(unexpected("SetLeader", other)),
        }
    }

    /// Push a snapshot and receive the peer's merged snapshot.
    pub async fn merge_state(&self, from: usize, snapshot: Snapshot) -> Result<Snapshot, ReplicationError> {
        match self.call(&SyncRequest::MergeState { from, snapshot }).await? {
            SyncResponse::State(merged) => Ok(merged),
            other => Err(unexpected("MergeState", other)),
        }
    }
}

/// Map a response that does not fit the request into an error.
pub fn unexpected(rpc: &str, response: SyncResponse) -> ReplicationError {
    match response {
        SyncResponse::Error(msg) => ReplicationError::Protocol(msg),
        other => ReplicationError::Protocol(format!("unexpected {} response: {:?}", rpc, other)),
    }
}
