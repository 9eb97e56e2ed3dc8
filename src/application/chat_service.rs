//! Chat Service - Client-facing use case
//!
//! Gates client requests on leadership and routes accepted mutations through
//! the replication coordinator. This is the primary interface for the
//! client inbound adapter.

use crate::application::protocol::{ClientRequest, ClientResponse};
use crate::replication::coordinator::ReplicationCoordinator;
use crate::replication::leadership::Leadership;
use crate::replication::store::StoreHandle;
use std::sync::Arc;

/// Chat service - client request handling.
///
/// Only the leader serves requests. Every other node answers with a
/// `Redirect` naming the leader it currently believes in.
pub struct ChatService {
    store: StoreHandle,
    leadership: Arc<Leadership>,
    coordinator: Arc<ReplicationCoordinator>,
}

impl ChatService {
    pub fn new(
        store: StoreHandle,
        leadership: Arc<Leadership>,
        coordinator: Arc<ReplicationCoordinator>,
    ) -> Self {
        Self {
            store,
            leadership,
            coordinator,
        }
    }

    pub fn leadership(&self) -> &Arc<Leadership> {
        &self.leadership
    }

    /// Handle one request.
    pub async fn handle(&self, request: ClientRequest) -> ClientResponse {
        if matches!(request, ClientRequest::Health) {
            return ClientResponse::Healthy;
        }
        if !self.leadership.is_leader() {
            tracing::debug!(
                "redirecting {} to leader={}",
                request.name(),
                self.leadership.leader()
            );
            return ClientResponse::Redirect {
                leader: self.leadership.leader(),
            };
        }

        match request {
            ClientRequest::Health => ClientResponse::Healthy,
            ClientRequest::Apply(mutation) => {
                let report = self.coordinator.replicate(mutation).await;
                ClientResponse::Applied {
                    version: report.version,
                }
            }
            ClientRequest::GetAccount(username) => ClientResponse::Account(self.store.account(&username)),
            ClientRequest::ListUsers => ClientResponse::Usernames(self.store.usernames()),
            ClientRequest::Subscribe => ClientResponse::Subscribed,
        }
    }
}
