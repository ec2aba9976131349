//! Read and edit access to documents and cards.
//!
//! Collections have no secondary indices; queries load a collection and
//! filter it in memory.

use crate::collection::Collection;
use crate::error::{CoreError, CoreResult};
use crate::model::{entity_id, Card, Chapter, Document};
use crate::pending::{ChangeType, PendingChangeLog};
use crate::store::{LocalStore, StoreTxn};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

/// Document and card library of one device.
#[derive(Debug, Clone)]
pub struct Library {
    store: Arc<LocalStore>,
}

impl Library {
    /// Creates a library over a store.
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }

    /// Returns every document.
    #[must_use]
    pub fn documents(&self) -> Vec<Document> {
        self.store.get(Collection::Documents)
    }

    /// Returns the chapters of a document in reading order.
    #[must_use]
    pub fn chapters(&self, document_id: &str) -> Vec<Chapter> {
        let mut chapters: Vec<Chapter> = self
            .store
            .get::<Chapter>(Collection::Chapters)
            .into_iter()
            .filter(|c| c.document_id == document_id)
            .collect();
        chapters.sort_by_key(|c| c.position);
        chapters
    }

    /// Returns every card.
    #[must_use]
    pub fn cards(&self) -> Vec<Card> {
        self.store.get(Collection::Cards)
    }

    /// Returns up to `limit` cards due at `now`, most overdue first.
    ///
    /// Cards that were never graded come first.
    #[must_use]
    pub fn due_cards(&self, now: DateTime<Utc>, limit: usize) -> Vec<Card> {
        let mut due: Vec<Card> = self.cards().into_iter().filter(|c| c.is_due(now)).collect();
        due.sort_by_key(|c| c.due_date);
        due.truncate(limit);
        due
    }

    /// Edits the text of a card and queues the change.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CardNotFound`] if the card is not stored locally.
    pub fn update_card(
        &self,
        card_id: &str,
        front: &str,
        back: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<Card> {
        self.store.transaction(|txn| {
            let mut cards = txn.get_values(Collection::Cards);
            let card = cards
                .iter_mut()
                .find(|c| entity_id(c) == Some(card_id))
                .ok_or_else(|| CoreError::CardNotFound(card_id.to_string()))?;
            if let Value::Object(fields) = card {
                fields.insert("front".into(), Value::from(front));
                fields.insert("back".into(), Value::from(back));
            }
            let payload = card.clone();
            let updated: Card = serde_json::from_value(payload.clone())?;

            txn.put(Collection::Cards, &cards)?;
            enqueue(txn, ChangeType::CardUpdate, card_id, payload, now)?;
            Ok(updated)
        })
    }

    /// Deletes a card with its schedule and queues the change.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CardNotFound`] if the card is not stored locally.
    pub fn delete_card(&self, card_id: &str, now: DateTime<Utc>) -> CoreResult<()> {
        self.store.transaction(|txn| {
            let ids = HashSet::from([card_id.to_string()]);
            if remove_cards(txn, &ids)? == 0 {
                return Err(CoreError::CardNotFound(card_id.to_string()));
            }
            enqueue(txn, ChangeType::CardDelete, card_id, json!({ "id": card_id }), now)
        })
    }

    /// Deletes a document with its chapters, cards and schedules, and queues
    /// the change. Returns the number of cards removed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DocumentNotFound`] if the document is not stored
    /// locally.
    pub fn delete_document(&self, document_id: &str, now: DateTime<Utc>) -> CoreResult<usize> {
        let removed = self.store.transaction(|txn| {
            let mut documents = txn.get_values(Collection::Documents);
            let before = documents.len();
            documents.retain(|d| entity_id(d) != Some(document_id));
            if documents.len() == before {
                return Err(CoreError::DocumentNotFound(document_id.to_string()));
            }
            txn.put(Collection::Documents, &documents)?;

            let mut chapters = txn.get_values(Collection::Chapters);
            chapters.retain(|c| c.get("document_id").and_then(Value::as_str) != Some(document_id));
            txn.put(Collection::Chapters, &chapters)?;

            let card_ids: HashSet<String> = txn
                .get_values(Collection::Cards)
                .iter()
                .filter(|c| c.get("document_id").and_then(Value::as_str) == Some(document_id))
                .filter_map(|c| entity_id(c).map(str::to_string))
                .collect();
            let removed = remove_cards(txn, &card_ids)?;

            let payload = json!({ "id": document_id });
            enqueue(txn, ChangeType::DocumentDelete, document_id, payload, now)?;
            Ok(removed)
        })?;
        info!(document_id, cards = removed, "deleted document");
        Ok(removed)
    }
}

fn remove_cards(txn: &mut StoreTxn<'_>, card_ids: &HashSet<String>) -> CoreResult<usize> {
    let mut cards = txn.get_values(Collection::Cards);
    let before = cards.len();
    cards.retain(|c| !entity_id(c).is_some_and(|id| card_ids.contains(id)));
    let removed = before - cards.len();
    txn.put(Collection::Cards, &cards)?;

    let mut states = txn.get_values(Collection::SrsStates);
    states.retain(|s| {
        !s.get("card_id")
            .and_then(Value::as_str)
            .is_some_and(|id| card_ids.contains(id))
    });
    txn.put(Collection::SrsStates, &states)?;
    Ok(removed)
}

fn enqueue(
    txn: &mut StoreTxn<'_>,
    change_type: ChangeType,
    entity_id: &str,
    payload: Value,
    now: DateTime<Utc>,
) -> CoreResult<()> {
    let mut log = PendingChangeLog::read(txn);
    log.enqueue(change_type, entity_id, payload, now);
    log.write(txn)
}
