//! Change records exchanged during push and pull.

use cardsync_core::{entity_id, EntityType, Operation, PendingChange};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A local change as sent to the server by push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Unique change id. The server uses it to recognize replays.
    pub id: String,
    /// Entity kind.
    pub entity_type: EntityType,
    /// Mutation kind.
    pub operation: Operation,
    /// Entity snapshot after the change, `{"id": ..}` for deletes.
    pub data: Value,
    /// Local time of the change.
    pub timestamp: DateTime<Utc>,
    /// Originating client.
    pub client_id: String,
    /// Position of the change in the originating client's log.
    pub version: u64,
}

impl ChangeRecord {
    /// Builds the wire record for a pending change.
    #[must_use]
    pub fn from_pending(change: &PendingChange, client_id: &str) -> Self {
        Self {
            id: change.id.clone(),
            entity_type: change.entity_type(),
            operation: change.operation(),
            data: change.payload.clone(),
            timestamp: change.timestamp,
            client_id: client_id.to_string(),
            version: change.sequence,
        }
    }

    /// Returns the id of the changed entity.
    #[must_use]
    pub fn entity_id(&self) -> Option<&str> {
        entity_id(&self.data)
    }
}

/// A server change as delivered by pull or full sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteChange {
    /// Entity kind.
    pub entity_type: EntityType,
    /// Mutation kind.
    pub operation: Operation,
    /// Entity snapshot, `{"id": ..}` for deletes.
    pub data: Value,
}

impl RemoteChange {
    /// Creates a remote change.
    #[must_use]
    pub fn new(entity_type: EntityType, operation: Operation, data: Value) -> Self {
        Self {
            entity_type,
            operation,
            data,
        }
    }

    /// Returns the id of the changed entity.
    #[must_use]
    pub fn entity_id(&self) -> Option<&str> {
        entity_id(&self.data)
    }
}
