//! Pending change log.
//!
//! Every local mutation appends one [`PendingChange`]. Entries stay in
//! insertion order and leave the log only when the server has acknowledged
//! the push that carried them.

use crate::collection::Collection;
use crate::error::CoreResult;
use crate::model::{EntityType, Operation};
use crate::store::{LocalStore, StoreTxn};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Kind of local mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// First review of a card.
    SrsCreate,
    /// Later review of a card.
    SrsUpdate,
    /// Completed study session.
    SessionCreate,
    /// Edited card content.
    CardUpdate,
    /// Deleted card.
    CardDelete,
    /// Deleted document.
    DocumentDelete,
}

impl ChangeType {
    /// Returns the entity type the change applies to.
    #[must_use]
    pub const fn entity_type(self) -> EntityType {
        match self {
            ChangeType::SrsCreate | ChangeType::SrsUpdate => EntityType::SrsState,
            ChangeType::SessionCreate => EntityType::StudySession,
            ChangeType::CardUpdate | ChangeType::CardDelete => EntityType::Card,
            ChangeType::DocumentDelete => EntityType::Document,
        }
    }

    /// Returns the wire operation of the change.
    #[must_use]
    pub const fn operation(self) -> Operation {
        match self {
            ChangeType::SrsCreate | ChangeType::SessionCreate => Operation::Create,
            ChangeType::SrsUpdate | ChangeType::CardUpdate => Operation::Update,
            ChangeType::CardDelete | ChangeType::DocumentDelete => Operation::Delete,
        }
    }
}

/// A locally committed mutation not yet acknowledged by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingChange {
    /// Unique id, reused as the change record id on the wire.
    pub id: String,
    /// Kind of mutation.
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    /// Id of the mutated entity.
    pub entity_id: String,
    /// Full entity after the mutation, or `{"id": ..}` for deletes.
    pub payload: Value,
    /// Local time of the mutation.
    pub timestamp: DateTime<Utc>,
    /// Position in the log, increasing with every enqueue.
    pub sequence: u64,
}

impl PendingChange {
    /// Returns the entity type of the change.
    #[must_use]
    pub fn entity_type(&self) -> EntityType {
        self.change_type.entity_type()
    }

    /// Returns the wire operation of the change.
    #[must_use]
    pub fn operation(&self) -> Operation {
        self.change_type.operation()
    }

    fn targets(&self, entity_type: EntityType, entity_id: &str) -> bool {
        self.entity_type() == entity_type && self.entity_id == entity_id
    }
}

/// In-memory view of the pending change log.
///
/// Load it from a transaction, mutate it, and write it back in the same
/// transaction so the log and the entity it describes commit together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingChangeLog {
    entries: Vec<PendingChange>,
}

impl PendingChangeLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a log from existing entries, oldest first.
    #[must_use]
    pub fn from_entries(entries: Vec<PendingChange>) -> Self {
        Self { entries }
    }

    /// Reads the log as seen by a transaction.
    #[must_use]
    pub fn read(txn: &StoreTxn<'_>) -> Self {
        Self::from_entries(txn.get(Collection::PendingChanges))
    }

    /// Reads the committed log.
    #[must_use]
    pub fn load(store: &LocalStore) -> Self {
        Self::from_entries(store.get(Collection::PendingChanges))
    }

    /// Stages the log into a transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the entries cannot be encoded.
    pub fn write(&self, txn: &mut StoreTxn<'_>) -> CoreResult<()> {
        txn.put(Collection::PendingChanges, &self.entries)
    }

    /// Appends a change and returns it.
    pub fn enqueue(
        &mut self,
        change_type: ChangeType,
        entity_id: impl Into<String>,
        payload: Value,
        now: DateTime<Utc>,
    ) -> &PendingChange {
        let sequence = self.entries.last().map_or(1, |last| last.sequence + 1);
        self.entries.push(PendingChange {
            id: Uuid::new_v4().to_string(),
            change_type,
            entity_id: entity_id.into(),
            payload,
            timestamp: now,
            sequence,
        });
        &self.entries[self.entries.len() - 1]
    }

    /// Returns every entry, oldest first.
    #[must_use]
    pub fn all(&self) -> &[PendingChange] {
        &self.entries
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the ids of every entry.
    #[must_use]
    pub fn ids(&self) -> HashSet<String> {
        self.entries.iter().map(|e| e.id.clone()).collect()
    }

    /// Removes the entries with the given ids and returns how many were removed.
    ///
    /// Entries added after the ids were collected are kept.
    pub fn remove(&mut self, ids: &HashSet<String>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| !ids.contains(&e.id));
        before - self.entries.len()
    }

    /// Returns true if an entry outside `excluded` targets the entity.
    #[must_use]
    pub fn has_pending_outside(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        excluded: &HashSet<String>,
    ) -> bool {
        self.entries
            .iter()
            .any(|e| e.targets(entity_type, entity_id) && !excluded.contains(&e.id))
    }

    /// Returns the latest entry per entity, ordered by when that entry was made.
    ///
    /// Every payload is a full snapshot of the entity, so the latest entry
    /// carries all earlier ones.
    #[must_use]
    pub fn compacted(&self) -> Vec<PendingChange> {
        let mut latest: HashMap<(EntityType, &str), usize> = HashMap::new();
        for (index, entry) in self.entries.iter().enumerate() {
            latest.insert((entry.entity_type(), entry.entity_id.as_str()), index);
        }
        self.entries
            .iter()
            .enumerate()
            .filter(|(index, e)| latest.get(&(e.entity_type(), e.entity_id.as_str())) == Some(index))
            .map(|(_, e)| e.clone())
            .collect()
    }
}

impl LocalStore {
    /// Returns the committed pending changes, oldest first.
    #[must_use]
    pub fn pending_changes(&self) -> Vec<PendingChange> {
        self.get(Collection::PendingChanges)
    }

    /// Returns the number of committed pending changes.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        PendingChangeLog::load(self).len()
    }
}
