//! Grading cards.

use crate::collection::Collection;
use crate::error::{CoreError, CoreResult};
use crate::model::{entity_id, SrsState};
use crate::pending::{ChangeType, PendingChangeLog};
use crate::scheduler::{self, Grade};
use crate::store::LocalStore;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Applies grades to cards.
///
/// Each grade updates the card's [`SrsState`], refreshes the card's
/// denormalized schedule fields and appends a pending change, all in one
/// store transaction. A failed grade changes nothing.
#[derive(Debug, Clone)]
pub struct Reviewer {
    store: Arc<LocalStore>,
}

impl Reviewer {
    /// Creates a reviewer over a store.
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }

    /// Grades a card and returns its new schedule.
    ///
    /// The card's schedule is created on its first grade.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CardNotFound`] if the card is not stored locally,
    /// or a storage error if the commit fails.
    pub fn grade(&self, card_id: &str, grade: Grade, now: DateTime<Utc>) -> CoreResult<SrsState> {
        let (state, pending) = self.store.transaction(|txn| {
            let mut cards = txn.get_values(Collection::Cards);
            let card = cards
                .iter_mut()
                .find(|card| entity_id(card) == Some(card_id))
                .ok_or_else(|| CoreError::CardNotFound(card_id.to_string()))?;

            let mut states = txn.get_values(Collection::SrsStates);
            let (next, change_type) =
                match states.iter_mut().find(|s| state_card_id(s) == Some(card_id)) {
                    Some(existing) => {
                        let current = decode_state(existing, card_id, now);
                        let next = scheduler::review(&current, grade, now);
                        overlay(existing, serde_json::to_value(&next)?);
                        (next, ChangeType::SrsUpdate)
                    }
                    None => {
                        let created = scheduler::review(&SrsState::new(card_id, now), grade, now);
                        states.push(serde_json::to_value(&created)?);
                        (created, ChangeType::SrsCreate)
                    }
                };
            refresh_schedule(card, &next);

            let mut log = PendingChangeLog::read(txn);
            log.enqueue(change_type, next.id.clone(), serde_json::to_value(&next)?, now);

            txn.put(Collection::Cards, &cards)?;
            txn.put(Collection::SrsStates, &states)?;
            log.write(txn)?;
            Ok((next, log.len()))
        })?;

        self.store.warn_if_pending_backlog(pending);
        debug!(
            card_id,
            grade = grade.value(),
            interval = state.interval,
            ease_factor = state.ease_factor,
            "graded card"
        );
        Ok(state)
    }

    /// Returns the schedule of a card, if it was ever graded.
    #[must_use]
    pub fn schedule(&self, card_id: &str) -> Option<SrsState> {
        self.store
            .get::<SrsState>(Collection::SrsStates)
            .into_iter()
            .find(|s| s.card_id == card_id)
    }
}

fn state_card_id(state: &Value) -> Option<&str> {
    state.get("card_id").and_then(Value::as_str)
}

/// Reads a stored schedule. A record that no longer decodes restarts from a
/// fresh schedule under its stored id.
fn decode_state(stored: &Value, card_id: &str, now: DateTime<Utc>) -> SrsState {
    match serde_json::from_value(stored.clone()) {
        Ok(state) => state,
        Err(err) => {
            warn!(card_id, error = %err, "undecodable schedule, starting over");
            let mut fresh = SrsState::new(card_id, now);
            if let Some(id) = entity_id(stored) {
                fresh.id = id.to_string();
            }
            fresh
        }
    }
}

/// Writes the fields of `update` over `target`, keeping fields it lacks.
fn overlay(target: &mut Value, update: Value) {
    match (target, update) {
        (Value::Object(fields), Value::Object(updates)) => fields.extend(updates),
        (target, update) => *target = update,
    }
}

/// Copies the due date and ease factor of `state` into a stored card.
pub fn refresh_schedule(card: &mut Value, state: &SrsState) {
    if let Value::Object(fields) = card {
        let due = state.due_date.to_rfc3339_opts(SecondsFormat::AutoSi, true);
        fields.insert("due_date".into(), Value::String(due));
        fields.insert("difficulty".into(), Value::from(state.ease_factor));
    }
}
