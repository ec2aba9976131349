//! Protocol messages for sync.
//!
//! Every endpoint takes one JSON request body by POST and answers with one
//! JSON response body.

use crate::checksum::EntityChecksums;
use crate::conflict::{ConflictResolution, EntityConflict};
use crate::error::{ProtocolError, ProtocolResult};
use crate::operation::{ChangeRecord, RemoteChange};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A sync endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Upload pending changes.
    Push,
    /// Download changes since the last sync.
    Pull,
    /// Compare collection checksums.
    ValidateConsistency,
    /// Download the complete authoritative state.
    FullSync,
    /// Settle conflicts manually.
    ResolveConflicts,
}

impl Endpoint {
    /// Every endpoint.
    pub const ALL: [Endpoint; 5] = [
        Endpoint::Push,
        Endpoint::Pull,
        Endpoint::ValidateConsistency,
        Endpoint::FullSync,
        Endpoint::ResolveConflicts,
    ];

    /// Returns the URL path of the endpoint.
    #[must_use]
    pub const fn path(self) -> &'static str {
        match self {
            Endpoint::Push => "/sync/push",
            Endpoint::Pull => "/sync/pull",
            Endpoint::ValidateConsistency => "/sync/validate-consistency",
            Endpoint::FullSync => "/sync/full-sync",
            Endpoint::ResolveConflicts => "/sync/resolve-conflicts",
        }
    }

    /// Looks an endpoint up by URL path.
    #[must_use]
    pub fn from_path(path: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.path() == path)
    }
}

/// Push request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushRequest {
    /// Client's sync watermark, `None` before the first sync.
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Pushing client.
    pub client_id: String,
    /// Platform label of the client.
    pub platform: String,
    /// Changes in causal order.
    pub changes: Vec<ChangeRecord>,
}

/// Push statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PushStats {
    /// Changes the server accepted, including replays it had already applied.
    pub pushed_changes: usize,
}

/// Push response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushResponse {
    /// Whether the push was processed.
    pub success: bool,
    /// Statistics.
    #[serde(default)]
    pub stats: PushStats,
    /// Changes the server kept its own value for.
    #[serde(default)]
    pub conflicts: Vec<EntityConflict>,
}

impl PushResponse {
    /// Checks the response against the request it answers.
    ///
    /// # Errors
    ///
    /// Fails if the server reported failure or returned more conflicts than
    /// changes were submitted.
    pub fn validate(&self, submitted: usize) -> ProtocolResult<()> {
        if !self.success {
            return Err(ProtocolError::Rejected {
                endpoint: Endpoint::Push.path(),
            });
        }
        if self.conflicts.len() > submitted {
            return Err(ProtocolError::violation(format!(
                "{} conflicts for {submitted} submitted changes",
                self.conflicts.len()
            )));
        }
        Ok(())
    }
}

/// Pull request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Client's sync watermark, `None` to pull everything.
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Pulling client.
    pub client_id: String,
    /// Platform label of the client.
    pub platform: String,
}

/// Pull response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullResponse {
    /// Whether the pull was processed.
    pub success: bool,
    /// Changes newer than the request watermark, oldest first.
    #[serde(default)]
    pub changes: Vec<RemoteChange>,
    /// Server clock when the response was built.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_time: Option<DateTime<Utc>>,
}

impl PullResponse {
    /// Checks that the response can be applied.
    ///
    /// # Errors
    ///
    /// Fails if the server reported failure or a change has no string `id`.
    pub fn validate(&self) -> ProtocolResult<()> {
        if !self.success {
            return Err(ProtocolError::Rejected {
                endpoint: Endpoint::Pull.path(),
            });
        }
        validate_changes(&self.changes)
    }
}

/// Consistency validation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidateRequest {
    /// Validating client.
    pub client_id: String,
    /// Client checksums.
    pub entity_checksums: EntityChecksums,
}

/// Server advice after validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    /// Replace local state with a full sync.
    FullResync,
    /// Advice this client does not know.
    #[serde(other)]
    Unknown,
}

/// Consistency validation response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidateResponse {
    /// Whether every checksum matched.
    pub overall_consistent: bool,
    /// What the client should do about a mismatch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<Recommendation>,
}

impl ValidateResponse {
    /// Returns true if the client should run a full sync.
    #[must_use]
    pub fn needs_full_sync(&self) -> bool {
        !self.overall_consistent && self.recommendation == Some(Recommendation::FullResync)
    }
}

/// Full sync request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullSyncRequest {
    /// Requesting client.
    pub client_id: String,
    /// Platform label of the client.
    pub platform: String,
    /// Whether the client asked explicitly rather than after a mismatch.
    pub force: bool,
}

/// Full sync statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FullSyncStats {
    /// Number of entities returned.
    pub total_changes: usize,
}

/// Full sync response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullSyncResponse {
    /// Whether the full sync was processed.
    pub success: bool,
    /// Statistics.
    #[serde(default)]
    pub stats: FullSyncStats,
    /// Every live entity as a create.
    #[serde(default)]
    pub changes: Vec<RemoteChange>,
    /// Server clock when the snapshot was taken.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_time: Option<DateTime<Utc>>,
}

impl FullSyncResponse {
    /// Checks that the snapshot can be applied.
    ///
    /// # Errors
    ///
    /// Fails if the server reported failure or a change has no string `id`.
    pub fn validate(&self) -> ProtocolResult<()> {
        if !self.success {
            return Err(ProtocolError::Rejected {
                endpoint: Endpoint::FullSync.path(),
            });
        }
        validate_changes(&self.changes)
    }
}

/// One manual resolution. The request body is an array of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictResolutionRequest {
    /// Server conflict id.
    pub conflict_id: String,
    /// Chosen resolution.
    pub resolution: ConflictResolution,
    /// Replacement entity for [`ConflictResolution::Merge`].
    #[serde(default)]
    pub merged_data: Option<Value>,
}

/// Manual resolution response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveConflictsResponse {
    /// Whether the request was processed.
    pub success: bool,
    /// Conflict ids that were settled.
    #[serde(default)]
    pub resolved: Vec<String>,
}

/// Encodes a message body.
///
/// # Errors
///
/// Returns an error if the message cannot be encoded.
pub fn encode<T: Serialize>(message: &T) -> ProtocolResult<Vec<u8>> {
    Ok(serde_json::to_vec(message)?)
}

/// Decodes a message body.
///
/// # Errors
///
/// Returns [`ProtocolError::Malformed`] if the body is not a `T`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    Ok(serde_json::from_slice(bytes)?)
}

fn validate_changes(changes: &[RemoteChange]) -> ProtocolResult<()> {
    match changes.iter().position(|c| c.entity_id().is_none()) {
        Some(index) => Err(ProtocolError::violation(format!(
            "change {index} ({}) has no id",
            changes[index].entity_type
        ))),
        None => Ok(()),
    }
}
