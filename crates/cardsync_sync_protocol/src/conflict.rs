//! Conflict detection and resolution.
//!
//! The server reports a conflict when a pushed change diverges from a record
//! another client changed since the pusher last synced. Conflicts are
//! reported per entity and broken down per top-level field.

use cardsync_core::EntityType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use uuid::Uuid;

/// Fields that never take part in field-level comparison.
pub const AUDIT_FIELDS: [&str; 2] = ["updated_at", "updated_by"];

/// One diverging field of a conflicting entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConflict {
    /// Top-level field name.
    pub field: String,
    /// Value the client pushed, `null` if absent.
    pub client_value: Value,
    /// Value the server kept, `null` if absent.
    pub server_value: Value,
}

/// All diverging fields of one pushed change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityConflict {
    /// Server-assigned id, used for manual resolution.
    pub conflict_id: String,
    /// Entity kind.
    pub entity_type: EntityType,
    /// Id of the conflicting entity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    /// Per-field divergence.
    pub conflicts: Vec<FieldConflict>,
}

/// How a conflict is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// The client's value replaces the server's.
    ClientWins,
    /// The server's value stays.
    ServerWins,
    /// A caller-supplied merge replaces the server's value.
    Merge,
}

/// Policy applied to conflicts reported by push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Keep the server's value. The local copy converges on the next pull.
    #[default]
    ServerWins,
    /// Re-assert the client's value through manual resolution right away.
    ClientWins,
    /// Record the conflict and leave it for the application to resolve.
    Manual,
}

impl ConflictPolicy {
    /// Returns the resolution applied automatically, if any.
    #[must_use]
    pub const fn auto_resolution(self) -> Option<ConflictResolution> {
        match self {
            ConflictPolicy::ServerWins => Some(ConflictResolution::ServerWins),
            ConflictPolicy::ClientWins => Some(ConflictResolution::ClientWins),
            ConflictPolicy::Manual => None,
        }
    }
}

/// A field-level conflict as kept by the client for observability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Local id of this record.
    pub id: String,
    /// Server conflict id, shared by every field of the same entity.
    pub conflict_id: String,
    /// Entity kind.
    pub entity_type: EntityType,
    /// Id of the conflicting entity, when the server reported it.
    pub entity_id: Option<String>,
    /// Diverging field.
    pub field: String,
    /// Value the client pushed.
    pub client_value: Value,
    /// Value the server kept.
    pub server_value: Value,
    /// How the conflict was settled, `None` while unresolved.
    pub resolution: Option<ConflictResolution>,
}

impl SyncConflict {
    /// Expands an entity conflict into one record per field.
    #[must_use]
    pub fn from_entity_conflict(
        conflict: &EntityConflict,
        resolution: Option<ConflictResolution>,
    ) -> Vec<Self> {
        conflict
            .conflicts
            .iter()
            .map(|field| Self {
                id: Uuid::new_v4().to_string(),
                conflict_id: conflict.conflict_id.clone(),
                entity_type: conflict.entity_type,
                entity_id: conflict.entity_id.clone(),
                field: field.field.clone(),
                client_value: field.client_value.clone(),
                server_value: field.server_value.clone(),
                resolution,
            })
            .collect()
    }

    /// Returns true once a resolution has been recorded.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }
}

/// Compares two entity snapshots field by field.
///
/// Audit fields are ignored. A field present on one side only is reported
/// with `null` on the other. Non-object snapshots are compared whole under
/// the field name `""`.
#[must_use]
pub fn diff_fields(client: &Value, server: &Value) -> Vec<FieldConflict> {
    let (Value::Object(client_fields), Value::Object(server_fields)) = (client, server) else {
        if client == server {
            return Vec::new();
        }
        return vec![FieldConflict {
            field: String::new(),
            client_value: client.clone(),
            server_value: server.clone(),
        }];
    };

    let names: BTreeSet<&String> = client_fields.keys().chain(server_fields.keys()).collect();
    names
        .into_iter()
        .filter(|name| !AUDIT_FIELDS.contains(&name.as_str()))
        .filter_map(|name| {
            let client_value = client_fields.get(name).cloned().unwrap_or(Value::Null);
            let server_value = server_fields.get(name).cloned().unwrap_or(Value::Null);
            (client_value != server_value).then(|| FieldConflict {
                field: name.clone(),
                client_value,
                server_value,
            })
        })
        .collect()
}
