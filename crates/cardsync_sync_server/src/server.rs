//! Main sync server.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::RequestHandler;
use crate::store::ServerStore;
use cardsync_core::EntityType;
use cardsync_sync_protocol::{
    decode, encode, ConflictResolutionRequest, Endpoint, FullSyncRequest, FullSyncResponse,
    PullRequest, PullResponse, PushRequest, PushResponse, ResolveConflictsResponse,
    ValidateRequest, ValidateResponse,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// The sync server.
///
/// Holds the authoritative copy of every document, chapter, card and
/// schedule, and answers the five sync endpoints. There is no listener
/// here: an HTTP front end hands each POST body to [`SyncServer::handle_post`].
///
/// # Example
///
/// ```
/// use cardsync_sync_server::{ServerConfig, SyncServer};
/// use cardsync_sync_protocol::PullRequest;
///
/// let server = SyncServer::new(ServerConfig::default());
/// let response = server
///     .handle_pull(&PullRequest {
///         last_sync_time: None,
///         client_id: "device".into(),
///         platform: "linux".into(),
///     })
///     .unwrap();
/// assert!(response.changes.is_empty());
/// ```
pub struct SyncServer {
    handler: RequestHandler,
    store: Arc<ServerStore>,
}

impl SyncServer {
    /// Creates a new sync server with an empty store.
    pub fn new(config: ServerConfig) -> Self {
        let store = Arc::new(ServerStore::new(config.max_stored_conflicts));
        Self::with_store(config, store)
    }

    /// Creates a sync server over an existing store.
    pub fn with_store(config: ServerConfig, store: Arc<ServerStore>) -> Self {
        let handler = RequestHandler::new(config, Arc::clone(&store));
        Self { handler, store }
    }

    /// Returns the backing store.
    pub fn store(&self) -> &Arc<ServerStore> {
        &self.store
    }

    /// Handles a push request.
    pub fn handle_push(&self, request: &PushRequest) -> ServerResult<PushResponse> {
        self.handler.handle_push(request)
    }

    /// Handles a pull request.
    pub fn handle_pull(&self, request: &PullRequest) -> ServerResult<PullResponse> {
        self.handler.handle_pull(request)
    }

    /// Handles a consistency validation request.
    pub fn handle_validate(&self, request: &ValidateRequest) -> ServerResult<ValidateResponse> {
        self.handler.handle_validate(request)
    }

    /// Handles a full sync request.
    pub fn handle_full_sync(&self, request: &FullSyncRequest) -> ServerResult<FullSyncResponse> {
        self.handler.handle_full_sync(request)
    }

    /// Handles a manual conflict resolution request.
    pub fn handle_resolve(
        &self,
        requests: &[ConflictResolutionRequest],
    ) -> ServerResult<ResolveConflictsResponse> {
        self.handler.handle_resolve(requests)
    }

    /// Handles one POST body for the endpoint at `path`.
    ///
    /// Returns the encoded response body.
    pub fn handle_post(&self, path: &str, body: &[u8]) -> ServerResult<Vec<u8>> {
        let endpoint =
            Endpoint::from_path(path).ok_or_else(|| ServerError::UnknownEndpoint(path.into()))?;
        let result = match endpoint {
            Endpoint::Push => encode(&self.handle_push(&decode(body)?)?),
            Endpoint::Pull => encode(&self.handle_pull(&decode(body)?)?),
            Endpoint::ValidateConsistency => encode(&self.handle_validate(&decode(body)?)?),
            Endpoint::FullSync => encode(&self.handle_full_sync(&decode(body)?)?),
            Endpoint::ResolveConflicts => {
                let requests: Vec<ConflictResolutionRequest> = decode(body)?;
                encode(&self.handle_resolve(&requests)?)
            }
        };
        result.map_err(|e| {
            warn!(path, error = %e, "failed to encode response");
            ServerError::Internal(e.to_string())
        })
    }

    /// Writes an entity as the server itself.
    pub fn upsert_entity(&self, entity_type: EntityType, data: Value) -> ServerResult<()> {
        self.store.upsert(entity_type, data)
    }

    /// Deletes an entity and its dependents.
    pub fn delete_entity(&self, entity_type: EntityType, id: &str) {
        self.store.delete(entity_type, id);
    }

    /// Returns the number of live entities.
    pub fn entity_count(&self) -> usize {
        self.store.entity_count()
    }

    /// Returns the number of logged changes.
    pub fn change_count(&self) -> usize {
        self.store.change_count()
    }
}
