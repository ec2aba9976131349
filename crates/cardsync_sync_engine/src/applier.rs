//! Applying server state to the local store.

use crate::error::SyncResult;
use cardsync_core::{
    entity_id, refresh_schedule, ClientIdentity, Collection, CoreResult, EntityType, LocalStore,
    PendingChange, PendingChangeLog, SrsState, StoreTxn,
};
use cardsync_sync_protocol::{EntityChecksums, RemoteChange};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Counts of one pull application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ApplyOutcome {
    /// Changes that modified local state.
    pub applied: usize,
    /// Changes identical to local state.
    pub unchanged: usize,
    /// Changes skipped because the entity has unpushed local edits.
    pub deferred: usize,
}

/// Local side of a sync cycle.
///
/// The engine talks to local state only through this trait.
pub trait SyncApplier: Send + Sync {
    /// Returns this installation's client id.
    fn client_id(&self) -> &str;

    /// Returns the watermark of the last successful cycle.
    fn last_sync_time(&self) -> Option<DateTime<Utc>>;

    /// Returns a snapshot of the pending change log, oldest first.
    fn pending_changes(&self) -> Vec<PendingChange>;

    /// Returns the number of pending changes.
    fn pending_count(&self) -> usize;

    /// Applies pulled changes by replacing entities by id.
    ///
    /// Changes for entities with pending entries outside `pushed` are
    /// deferred. Applying the same changes twice leaves state unchanged.
    fn apply_remote_changes(
        &self,
        changes: &[RemoteChange],
        pushed: &HashSet<String>,
    ) -> SyncResult<ApplyOutcome>;

    /// Computes the checksums compared by consistency validation.
    fn entity_checksums(&self) -> EntityChecksums;

    /// Replaces synced collections with a full snapshot and sets the
    /// watermark, keeping entities with pending changes outside `pushed`.
    fn replace_all(
        &self,
        changes: &[RemoteChange],
        pushed: &HashSet<String>,
        sync_time: DateTime<Utc>,
    ) -> SyncResult<usize>;

    /// Removes pushed entries from the log and advances the watermark in
    /// one atomic step. Returns the number of entries removed.
    fn complete_cycle(&self, pushed: &HashSet<String>, sync_time: DateTime<Utc>) -> SyncResult<usize>;
}

/// [`SyncApplier`] over a [`LocalStore`].
pub struct StoreApplier {
    store: Arc<LocalStore>,
    identity: ClientIdentity,
}

impl StoreApplier {
    /// Creates an applier, generating the client id on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if a new client id cannot be persisted.
    pub fn new(store: Arc<LocalStore>) -> SyncResult<Self> {
        let identity = ClientIdentity::load_or_create(&store)?;
        Ok(Self { store, identity })
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }
}

impl SyncApplier for StoreApplier {
    fn client_id(&self) -> &str {
        self.identity.as_str()
    }

    fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        self.store.last_sync_time()
    }

    fn pending_changes(&self) -> Vec<PendingChange> {
        self.store.pending_changes()
    }

    fn pending_count(&self) -> usize {
        self.store.pending_count()
    }

    fn apply_remote_changes(
        &self,
        changes: &[RemoteChange],
        pushed: &HashSet<String>,
    ) -> SyncResult<ApplyOutcome> {
        let outcome = self.store.transaction(|txn| {
            let log = PendingChangeLog::read(txn);
            let mut staged = Staged::default();
            let mut outcome = ApplyOutcome::default();

            for change in changes {
                let Some(id) = change.entity_id() else {
                    continue;
                };
                if log.has_pending_outside(change.entity_type, id, pushed) {
                    debug!(entity_type = %change.entity_type, id, "deferring pulled change");
                    outcome.deferred += 1;
                } else if staged.apply(txn, change, id) {
                    outcome.applied += 1;
                } else {
                    outcome.unchanged += 1;
                }
            }

            staged.commit(txn)?;
            Ok(outcome)
        })?;

        debug!(
            applied = outcome.applied,
            unchanged = outcome.unchanged,
            deferred = outcome.deferred,
            "applied pulled changes"
        );
        Ok(outcome)
    }

    fn entity_checksums(&self) -> EntityChecksums {
        EntityChecksums::compute(
            &self.store.get_values(Collection::Documents),
            &self.store.get_values(Collection::Cards),
            &self.store.get_values(Collection::SrsStates),
        )
    }

    fn replace_all(
        &self,
        changes: &[RemoteChange],
        pushed: &HashSet<String>,
        sync_time: DateTime<Utc>,
    ) -> SyncResult<usize> {
        let replaced = self.store.transaction(|txn| {
            let log = PendingChangeLog::read(txn);
            let mut snapshot: BTreeMap<Collection, Vec<Value>> = EntityType::ALL
                .iter()
                .map(|et| (et.collection(), Vec::new()))
                .collect();
            for change in changes.iter().filter(|c| !c.operation.is_delete()) {
                snapshot
                    .entry(change.entity_type.collection())
                    .or_default()
                    .push(change.data.clone());
            }

            // Entities with unpushed changes keep their local state, including
            // local deletes the server has not seen yet.
            for entity_type in EntityType::ALL {
                let collection = entity_type.collection();
                let pending: HashSet<&str> = log
                    .all()
                    .iter()
                    .filter(|e| e.entity_type() == entity_type && !pushed.contains(&e.id))
                    .map(|e| e.entity_id.as_str())
                    .collect();
                if pending.is_empty() {
                    continue;
                }
                let items = snapshot.entry(collection).or_default();
                items.retain(|item| entity_id(item).map_or(true, |id| !pending.contains(id)));
                items.extend(
                    txn.get_values(collection)
                        .into_iter()
                        .filter(|item| entity_id(item).is_some_and(|id| pending.contains(id))),
                );
            }

            let states: Vec<SrsState> = snapshot
                .get(&Collection::SrsStates)
                .into_iter()
                .flatten()
                .filter_map(|v| serde_json::from_value(v.clone()).ok())
                .collect();
            if let Some(cards) = snapshot.get_mut(&Collection::Cards) {
                for card in cards.iter_mut() {
                    let id = entity_id(card).map(str::to_owned);
                    if let Some(state) = states.iter().find(|s| Some(&s.card_id) == id.as_ref()) {
                        refresh_schedule(card, state);
                    }
                }
            }

            for (collection, items) in &snapshot {
                txn.put(*collection, items)?;
            }
            txn.put_scalar(Collection::LastSyncTime, &sync_time)?;
            Ok(changes.len())
        })?;

        info!(entities = replaced, %sync_time, "replaced local state with full snapshot");
        Ok(replaced)
    }

    fn complete_cycle(&self, pushed: &HashSet<String>, sync_time: DateTime<Utc>) -> SyncResult<usize> {
        let removed = self.store.transaction(|txn| {
            let mut log = PendingChangeLog::read(txn);
            let removed = log.remove(pushed);
            log.write(txn)?;
            txn.put_scalar(Collection::LastSyncTime, &sync_time)?;
            Ok(removed)
        })?;
        Ok(removed)
    }
}

/// Collections loaded during one transaction, written back only if touched.
#[derive(Default)]
struct Staged {
    collections: BTreeMap<Collection, Vec<Value>>,
    dirty: BTreeSet<Collection>,
}

impl Staged {
    fn items(&mut self, txn: &StoreTxn<'_>, collection: Collection) -> &mut Vec<Value> {
        self.collections
            .entry(collection)
            .or_insert_with(|| txn.get_values(collection))
    }

    /// Applies one change and returns true if local state changed.
    fn apply(&mut self, txn: &StoreTxn<'_>, change: &RemoteChange, id: &str) -> bool {
        let collection = change.entity_type.collection();

        if change.operation.is_delete() {
            let items = self.items(txn, collection);
            let before = items.len();
            items.retain(|item| entity_id(item) != Some(id));
            let removed = items.len() != before;
            if removed {
                self.dirty.insert(collection);
            }
            return removed;
        }

        let mut data = change.data.clone();
        match change.entity_type {
            EntityType::Card => {
                if let Some(state) = self.srs_state_for(txn, id) {
                    refresh_schedule(&mut data, &state);
                }
            }
            EntityType::SrsState => {
                if let Ok(state) = serde_json::from_value::<SrsState>(data.clone()) {
                    self.refresh_card(txn, &state);
                }
            }
            _ => {}
        }
        self.upsert(txn, change.entity_type, id, data)
    }

    fn upsert(&mut self, txn: &StoreTxn<'_>, entity_type: EntityType, id: &str, data: Value) -> bool {
        let collection = entity_type.collection();
        let items = self.items(txn, collection);
        let changed = match items.iter().position(|item| entity_id(item) == Some(id)) {
            Some(index) if items[index] == data => false,
            Some(index) => {
                items[index] = data;
                true
            }
            None => {
                if entity_type == EntityType::SrsState {
                    // one state per card
                    let card_id = data.get("card_id").cloned();
                    items.retain(|item| card_id.is_none() || item.get("card_id") != card_id.as_ref());
                }
                items.push(data);
                true
            }
        };
        if changed {
            self.dirty.insert(collection);
        }
        changed
    }

    fn srs_state_for(&mut self, txn: &StoreTxn<'_>, card_id: &str) -> Option<SrsState> {
        self.items(txn, Collection::SrsStates)
            .iter()
            .find(|item| item.get("card_id").and_then(Value::as_str) == Some(card_id))
            .and_then(|item| serde_json::from_value(item.clone()).ok())
    }

    fn refresh_card(&mut self, txn: &StoreTxn<'_>, state: &SrsState) {
        let cards = self.items(txn, Collection::Cards);
        let Some(card) = cards
            .iter_mut()
            .find(|item| entity_id(item) == Some(state.card_id.as_str()))
        else {
            return;
        };
        let before = card.clone();
        refresh_schedule(card, state);
        if *card != before {
            self.dirty.insert(Collection::Cards);
        }
    }

    fn commit(self, txn: &mut StoreTxn<'_>) -> CoreResult<()> {
        for collection in &self.dirty {
            if let Some(items) = self.collections.get(collection) {
                txn.put(*collection, items)?;
            }
        }
        Ok(())
    }
}
