//! Authoritative server state.
//!
//! The store keeps the current version of every entity and a change log
//! stamped with strictly increasing timestamps. Pull answers from the log,
//! full sync from the current versions.

use crate::error::{ServerError, ServerResult};
use cardsync_core::{entity_id, EntityType, Operation};
use cardsync_sync_protocol::{
    diff_fields, ChangeRecord, ConflictResolution, ConflictResolutionRequest, EntityChecksums,
    EntityConflict, RemoteChange, CARD_SCHEDULE_FIELDS,
};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Writer recorded for entities created by the server itself.
pub const SERVER_WRITER: &str = "server";

type EntityKey = (EntityType, String);

#[derive(Debug, Clone)]
struct Record {
    data: Value,
    updated_at: DateTime<Utc>,
    updated_by: String,
}

#[derive(Debug, Clone)]
struct LogEntry {
    key: EntityKey,
    operation: Operation,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct StoredConflict {
    conflict_id: String,
    change: ChangeRecord,
}

#[derive(Default)]
struct Inner {
    records: HashMap<EntityKey, Record>,
    log: Vec<LogEntry>,
    applied: HashSet<String>,
    conflicts: VecDeque<StoredConflict>,
    clock: Option<DateTime<Utc>>,
}

impl Inner {
    /// Returns a timestamp strictly after every one handed out before.
    fn tick(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let next = match self.clock {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.clock = Some(next);
        next
    }

    fn put(&mut self, entity_type: EntityType, id: &str, data: &Value, writer: &str) {
        let timestamp = self.tick();
        let mut data = data.clone();
        if let Value::Object(fields) = &mut data {
            fields.insert("updated_at".into(), json!(timestamp));
            fields.insert("updated_by".into(), json!(writer));
        }
        let key = (entity_type, id.to_string());
        let operation = if self.records.contains_key(&key) {
            Operation::Update
        } else {
            Operation::Create
        };
        self.records.insert(
            key.clone(),
            Record {
                data,
                updated_at: timestamp,
                updated_by: writer.to_string(),
            },
        );
        self.log.push(LogEntry {
            key,
            operation,
            timestamp,
        });
    }

    /// Deletes an entity and everything that belongs to it.
    fn delete(&mut self, entity_type: EntityType, id: &str) {
        let mut doomed = vec![(entity_type, id.to_string())];
        match entity_type {
            EntityType::Document => {
                let children = self.find(&[EntityType::Chapter, EntityType::Card], "document_id", id);
                let cards: Vec<String> = children
                    .iter()
                    .filter(|(et, _)| *et == EntityType::Card)
                    .map(|(_, id)| id.clone())
                    .collect();
                doomed.extend(children);
                for card in &cards {
                    doomed.extend(self.find(&[EntityType::SrsState], "card_id", card));
                }
            }
            EntityType::Card => doomed.extend(self.find(&[EntityType::SrsState], "card_id", id)),
            _ => {}
        }

        for key in doomed {
            if self.records.remove(&key).is_none() {
                continue;
            }
            let timestamp = self.tick();
            self.log.push(LogEntry {
                key,
                operation: Operation::Delete,
                timestamp,
            });
        }
    }

    fn find(&self, types: &[EntityType], field: &str, value: &str) -> Vec<EntityKey> {
        let mut keys: Vec<EntityKey> = self
            .records
            .iter()
            .filter(|((et, _), record)| {
                types.contains(et) && record.data.get(field).and_then(Value::as_str) == Some(value)
            })
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    fn apply(&mut self, change: &ChangeRecord, id: &str, writer: &str) {
        if change.operation.is_delete() {
            self.delete(change.entity_type, id);
        } else {
            self.put(change.entity_type, id, &change.data, writer);
        }
    }

    fn values(&self, entity_type: EntityType) -> Vec<Value> {
        self.records
            .iter()
            .filter(|((et, _), _)| *et == entity_type)
            .map(|(_, record)| record.data.clone())
            .collect()
    }
}

/// Outcome of one push.
#[derive(Debug, Clone, Default)]
pub struct PushOutcome {
    /// Changes applied now or in an earlier push.
    pub accepted: usize,
    /// Changes rejected in favor of the server's version.
    pub conflicts: Vec<EntityConflict>,
}

/// Authoritative server state. Thread-safe.
pub struct ServerStore {
    inner: RwLock<Inner>,
    max_stored_conflicts: usize,
}

impl ServerStore {
    /// Creates an empty store.
    pub fn new(max_stored_conflicts: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            max_stored_conflicts,
        }
    }

    /// Creates or replaces an entity as server-side processing would.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` has no string `id`.
    pub fn upsert(&self, entity_type: EntityType, data: Value) -> ServerResult<()> {
        let id = entity_id(&data)
            .ok_or_else(|| ServerError::InvalidRequest(format!("{entity_type} without id")))?
            .to_string();
        self.inner.write().put(entity_type, &id, &data, SERVER_WRITER);
        Ok(())
    }

    /// Deletes an entity and its dependents as server-side processing would.
    pub fn delete(&self, entity_type: EntityType, id: &str) {
        self.inner.write().delete(entity_type, id);
    }

    /// Applies pushed changes.
    ///
    /// A change is a conflict when its entity was written by another client
    /// after `last_sync_time` and the values differ in some field. The server
    /// keeps its version and stores the client's for manual resolution.
    /// Changes whose id was already seen are acknowledged without effect.
    ///
    /// # Errors
    ///
    /// Returns an error, without applying anything, if a change has no id.
    pub fn apply_push(
        &self,
        client_id: &str,
        last_sync_time: Option<DateTime<Utc>>,
        changes: &[ChangeRecord],
    ) -> ServerResult<PushOutcome> {
        if let Some(change) = changes.iter().find(|c| c.entity_id().is_none()) {
            return Err(ServerError::InvalidRequest(format!(
                "change {} has no entity id",
                change.id
            )));
        }

        let mut inner = self.inner.write();
        let mut outcome = PushOutcome::default();
        for change in changes {
            let Some(id) = change.entity_id() else {
                continue;
            };
            if inner.applied.contains(&change.id) {
                debug!(change_id = %change.id, "replayed change acknowledged");
                outcome.accepted += 1;
                continue;
            }
            inner.applied.insert(change.id.clone());

            let key = (change.entity_type, id.to_string());
            let diverged = inner.records.get(&key).and_then(|record| {
                let concurrent = record.updated_by != client_id
                    && last_sync_time.map_or(true, |since| record.updated_at > since);
                if !concurrent {
                    return None;
                }
                let mut fields = diff_fields(&change.data, &record.data);
                if change.entity_type == EntityType::Card {
                    // schedule fields are per device
                    fields.retain(|f| !CARD_SCHEDULE_FIELDS.contains(&f.field.as_str()));
                }
                (!fields.is_empty()).then_some(fields)
            });

            match diverged {
                Some(fields) => {
                    let conflict_id = Uuid::new_v4().to_string();
                    warn!(%conflict_id, entity_type = %change.entity_type, id, client_id, "push conflict, server version kept");
                    inner.conflicts.push_back(StoredConflict {
                        conflict_id: conflict_id.clone(),
                        change: change.clone(),
                    });
                    while inner.conflicts.len() > self.max_stored_conflicts {
                        inner.conflicts.pop_front();
                    }
                    outcome.conflicts.push(EntityConflict {
                        conflict_id,
                        entity_type: change.entity_type,
                        entity_id: Some(id.to_string()),
                        conflicts: fields,
                    });
                }
                None => {
                    inner.apply(change, id, client_id);
                    outcome.accepted += 1;
                }
            }
        }
        Ok(outcome)
    }

    /// Returns the latest change per entity after `since`, oldest first,
    /// and the time the answer is valid for.
    pub fn changes_since(&self, since: Option<DateTime<Utc>>) -> (Vec<RemoteChange>, DateTime<Utc>) {
        let mut inner = self.inner.write();
        let server_time = inner.tick();

        let mut latest: HashMap<&EntityKey, usize> = HashMap::new();
        for (index, entry) in inner.log.iter().enumerate() {
            if since.map_or(true, |since| entry.timestamp > since) {
                latest.insert(&entry.key, index);
            }
        }
        let mut indices: Vec<usize> = latest.into_values().collect();
        indices.sort_unstable();

        let changes = indices
            .into_iter()
            .filter_map(|index| {
                let entry = &inner.log[index];
                let (entity_type, id) = &entry.key;
                match inner.records.get(&entry.key) {
                    Some(record) if !entry.operation.is_delete() => Some(RemoteChange::new(
                        *entity_type,
                        entry.operation,
                        record.data.clone(),
                    )),
                    None if entry.operation.is_delete() => Some(RemoteChange::new(
                        *entity_type,
                        Operation::Delete,
                        json!({ "id": id }),
                    )),
                    _ => None,
                }
            })
            .collect();
        (changes, server_time)
    }

    /// Returns every live entity as a create, parents first, and the
    /// snapshot time.
    pub fn snapshot(&self) -> (Vec<RemoteChange>, DateTime<Utc>) {
        let mut inner = self.inner.write();
        let server_time = inner.tick();
        let sorted: BTreeMap<&EntityKey, &Record> = inner.records.iter().collect();
        let changes = sorted
            .into_iter()
            .map(|((entity_type, _), record)| {
                RemoteChange::new(*entity_type, Operation::Create, record.data.clone())
            })
            .collect();
        (changes, server_time)
    }

    /// Computes the checksums of the server's collections.
    pub fn checksums(&self) -> EntityChecksums {
        let inner = self.inner.read();
        EntityChecksums::compute(
            &inner.values(EntityType::Document),
            &inner.values(EntityType::Card),
            &inner.values(EntityType::SrsState),
        )
    }

    /// Settles stored conflicts and returns the ids that were settled.
    ///
    /// Unknown conflict ids are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error, without settling anything, if a merge has no data.
    pub fn resolve(&self, requests: &[ConflictResolutionRequest]) -> ServerResult<Vec<String>> {
        if let Some(request) = requests
            .iter()
            .find(|r| r.resolution == ConflictResolution::Merge && r.merged_data.is_none())
        {
            return Err(ServerError::InvalidRequest(format!(
                "merge of {} requires merged_data",
                request.conflict_id
            )));
        }

        let mut inner = self.inner.write();
        let mut resolved = Vec::new();
        for request in requests {
            let Some(position) = inner
                .conflicts
                .iter()
                .position(|c| c.conflict_id == request.conflict_id)
            else {
                debug!(conflict_id = %request.conflict_id, "unknown conflict skipped");
                continue;
            };
            let Some(stored) = inner.conflicts.remove(position) else {
                continue;
            };
            let change = stored.change;
            let Some(id) = change.entity_id().map(str::to_owned) else {
                continue;
            };

            match request.resolution {
                ConflictResolution::ServerWins => {}
                ConflictResolution::ClientWins => inner.apply(&change, &id, &change.client_id),
                ConflictResolution::Merge => {
                    let mut merged = request.merged_data.clone().unwrap_or(Value::Null);
                    if let Value::Object(fields) = &mut merged {
                        fields.insert("id".into(), Value::String(id.clone()));
                    }
                    inner.put(change.entity_type, &id, &merged, &change.client_id);
                }
            }
            info!(conflict_id = %request.conflict_id, resolution = ?request.resolution, "conflict resolved");
            resolved.push(request.conflict_id.clone());
        }
        Ok(resolved)
    }

    /// Returns the current version of an entity.
    pub fn get(&self, entity_type: EntityType, id: &str) -> Option<Value> {
        self.inner
            .read()
            .records
            .get(&(entity_type, id.to_string()))
            .map(|r| r.data.clone())
    }

    /// Returns the number of live entities.
    pub fn entity_count(&self) -> usize {
        self.inner.read().records.len()
    }

    /// Returns the number of change log entries.
    pub fn change_count(&self) -> usize {
        self.inner.read().log.len()
    }

    /// Returns the number of conflicts awaiting manual resolution.
    pub fn pending_conflicts(&self) -> usize {
        self.inner.read().conflicts.len()
    }
}
