//! Client Protocol
//!
//! Messages exchanged between clients and a node's client address. Framed
//! the same way as the sync protocol.

use crate::domain::entities::{Account, Mutation};
use serde::{Deserialize, Serialize};

/// Requests a client can send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientRequest {
    /// Answered by any node
    Health,
    /// Apply a state change; leader only
    Apply(Mutation),
    GetAccount(String),
    ListUsers,
    /// Keep the connection open and receive a `Redirect` when this node
    /// stops leading
    Subscribe,
}

/// Responses sent to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientResponse {
    Healthy,
    Applied { version: u64 },
    Account(Option<Account>),
    Usernames(Vec<String>),
    Subscribed,
    /// This node does not lead; reconnect to the leader
    Redirect { leader: usize },
    Error(String),
}

impl ClientRequest {
    pub fn name(&self) -> &'static str {
        match self {
            ClientRequest::Health => "Health",
            ClientRequest::Apply(_) => "Apply",
            ClientRequest::GetAccount(_) => "GetAccount",
            ClientRequest::ListUsers => "ListUsers",
            ClientRequest::Subscribe => "Subscribe",
        }
    }
}
