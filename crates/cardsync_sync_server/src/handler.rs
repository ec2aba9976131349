//! Request handlers for sync endpoints.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::store::ServerStore;
use cardsync_sync_protocol::{
    ConflictResolutionRequest, FullSyncRequest, FullSyncResponse, FullSyncStats, PullRequest,
    PullResponse, PushRequest, PushResponse, PushStats, Recommendation, ResolveConflictsResponse,
    ValidateRequest, ValidateResponse,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Handler for sync requests.
pub struct RequestHandler {
    config: ServerConfig,
    store: Arc<ServerStore>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(config: ServerConfig, store: Arc<ServerStore>) -> Self {
        Self { config, store }
    }

    /// Handles a push request.
    pub fn handle_push(&self, request: &PushRequest) -> ServerResult<PushResponse> {
        if request.changes.len() > self.config.max_push_batch {
            return Err(ServerError::InvalidRequest(format!(
                "too many changes: {} > {}",
                request.changes.len(),
                self.config.max_push_batch
            )));
        }

        let outcome =
            self.store
                .apply_push(&request.client_id, request.last_sync_time, &request.changes)?;
        info!(
            client_id = %request.client_id,
            platform = %request.platform,
            submitted = request.changes.len(),
            accepted = outcome.accepted,
            conflicts = outcome.conflicts.len(),
            "push handled"
        );
        Ok(PushResponse {
            success: true,
            stats: PushStats {
                pushed_changes: outcome.accepted,
            },
            conflicts: outcome.conflicts,
        })
    }

    /// Handles a pull request.
    pub fn handle_pull(&self, request: &PullRequest) -> ServerResult<PullResponse> {
        let (changes, server_time) = self.store.changes_since(request.last_sync_time);
        debug!(
            client_id = %request.client_id,
            since = ?request.last_sync_time,
            changes = changes.len(),
            "pull handled"
        );
        Ok(PullResponse {
            success: true,
            changes,
            server_time: Some(server_time),
        })
    }

    /// Handles a consistency validation request.
    pub fn handle_validate(&self, request: &ValidateRequest) -> ServerResult<ValidateResponse> {
        let server = self.store.checksums();
        let mismatches = request.entity_checksums.mismatches(&server);
        if mismatches.is_empty() {
            return Ok(ValidateResponse {
                overall_consistent: true,
                recommendation: None,
            });
        }
        warn!(client_id = %request.client_id, ?mismatches, "client state diverged");
        Ok(ValidateResponse {
            overall_consistent: false,
            recommendation: Some(Recommendation::FullResync),
        })
    }

    /// Handles a full sync request.
    pub fn handle_full_sync(&self, request: &FullSyncRequest) -> ServerResult<FullSyncResponse> {
        let (changes, server_time) = self.store.snapshot();
        info!(
            client_id = %request.client_id,
            force = request.force,
            entities = changes.len(),
            "full sync handled"
        );
        Ok(FullSyncResponse {
            success: true,
            stats: FullSyncStats {
                total_changes: changes.len(),
            },
            changes,
            server_time: Some(server_time),
        })
    }

    /// Handles a manual conflict resolution request.
    pub fn handle_resolve(
        &self,
        requests: &[ConflictResolutionRequest],
    ) -> ServerResult<ResolveConflictsResponse> {
        let resolved = self.store.resolve(requests)?;
        Ok(ResolveConflictsResponse {
            success: true,
            resolved,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cardsync_core::{EntityType, Operation};
    use cardsync_sync_protocol::{ChangeRecord, EntityChecksums};
    use chrono::Utc;
    use serde_json::json;

    fn create_handler() -> RequestHandler {
        RequestHandler::new(
            ServerConfig::default().with_max_push_batch(2),
            Arc::new(ServerStore::new(100)),
        )
    }

    fn push(changes: Vec<ChangeRecord>) -> PushRequest {
        PushRequest {
            last_sync_time: None,
            client_id: "a".into(),
            platform: "test".into(),
            changes,
        }
    }

    fn change(id: &str) -> ChangeRecord {
        ChangeRecord {
            id: format!("change-{id}"),
            entity_type: EntityType::Card,
            operation: Operation::Create,
            data: json!({"id": id, "front": "q"}),
            timestamp: Utc::now(),
            client_id: "a".into(),
            version: 1,
        }
    }

    #[test]
    fn pull_empty() {
        let handler = create_handler();
        let response = handler
            .handle_pull(&PullRequest {
                last_sync_time: None,
                client_id: "a".into(),
                platform: "test".into(),
            })
            .unwrap();
        assert!(response.success);
        assert!(response.changes.is_empty());
        assert!(response.server_time.is_some());
    }

    #[test]
    fn push_and_pull() {
        let handler = create_handler();
        let response = handler.handle_push(&push(vec![change("c1"), change("c2")])).unwrap();
        assert!(response.success);
        assert_eq!(response.stats.pushed_changes, 2);

        let pull = handler
            .handle_pull(&PullRequest {
                last_sync_time: None,
                client_id: "b".into(),
                platform: "test".into(),
            })
            .unwrap();
        assert_eq!(pull.changes.len(), 2);
    }

    #[test]
    fn push_batch_limit() {
        let handler = create_handler();
        let result = handler.handle_push(&push(vec![change("c1"), change("c2"), change("c3")]));
        assert!(matches!(result, Err(ServerError::InvalidRequest(_))));
    }

    #[test]
    fn validate_recommends_full_resync() {
        let handler = create_handler();
        handler.handle_push(&push(vec![change("c1")])).unwrap();

        let empty = EntityChecksums::compute(&[], &[], &[]);
        let response = handler
            .handle_validate(&ValidateRequest {
                client_id: "a".into(),
                entity_checksums: empty,
            })
            .unwrap();
        assert!(response.needs_full_sync());

        let matching = EntityChecksums::compute(&[], &[json!({"id": "c1", "front": "q"})], &[]);
        let response = handler
            .handle_validate(&ValidateRequest {
                client_id: "a".into(),
                entity_checksums: matching,
            })
            .unwrap();
        assert!(response.overall_consistent);
    }

    #[test]
    fn full_sync_counts_entities() {
        let handler = create_handler();
        handler.handle_push(&push(vec![change("c1")])).unwrap();
        let response = handler
            .handle_full_sync(&FullSyncRequest {
                client_id: "b".into(),
                platform: "test".into(),
                force: true,
            })
            .unwrap();
        assert_eq!(response.stats.total_changes, 1);
        assert_eq!(response.changes.len(), 1);
    }
}
