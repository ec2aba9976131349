//! Data model for the local store.
//!
//! Every entity is identified by a string `id` and is stored as one element of
//! a JSON array under its collection key. Field names are snake_case on disk
//! and on the wire.

use crate::collection::Collection;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Processing state of an ingested document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Waiting for ingestion.
    Pending,
    /// Ingestion running.
    Processing,
    /// Cards have been generated.
    Completed,
    /// Ingestion failed.
    Failed,
}

/// A source document that cards are generated from.
///
/// Documents are created by the ingestion pipeline; this crate only receives
/// them through sync and deletes them on request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Unique id.
    pub id: String,
    /// Original file name.
    pub filename: String,
    /// Ingestion state.
    pub status: DocumentStatus,
    /// Number of chapters detected.
    #[serde(default)]
    pub chapter_count: u32,
    /// Number of figures detected.
    #[serde(default)]
    pub figure_count: u32,
    /// Number of knowledge points extracted.
    #[serde(default)]
    pub knowledge_count: u32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// A chapter of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    /// Unique id.
    pub id: String,
    /// Owning document.
    pub document_id: String,
    /// Chapter title.
    pub title: String,
    /// Position inside the document.
    #[serde(default)]
    pub position: u32,
}

/// Kind of flashcard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardType {
    /// Question and answer.
    Qa,
    /// Fill in the blank.
    Cloze,
    /// Click the right region of an image.
    ImageHotspot,
}

/// A flashcard.
///
/// `due_date` and `difficulty` mirror the card's [`SrsState`] and are
/// refreshed whenever the card is graded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    /// Unique id.
    pub id: String,
    /// Document the card was generated from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    /// Card kind.
    #[serde(rename = "type")]
    pub card_type: CardType,
    /// Prompt side.
    pub front: String,
    /// Answer side.
    pub back: String,
    /// Current ease factor of the card's schedule.
    #[serde(default)]
    pub difficulty: f64,
    /// Next review time, `None` until first graded.
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    /// Free-form data owned by the ingestion pipeline.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Card {
    /// Returns true if the card is due at `now`.
    ///
    /// Cards that were never graded are always due.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.due_date.map_or(true, |due| due <= now)
    }
}

/// Spaced-repetition schedule of one card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SrsState {
    /// Unique id, derived from `card_id`.
    pub id: String,
    /// Scheduled card. Unique across the collection.
    pub card_id: String,
    /// Ease factor, never below 1.3.
    pub ease_factor: f64,
    /// Days until the next review, at least 1.
    pub interval: u32,
    /// Consecutive successful recalls.
    pub repetitions: u32,
    /// Next review time.
    pub due_date: DateTime<Utc>,
    /// Time of the last review.
    pub last_reviewed: DateTime<Utc>,
}

/// A completed study session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudySession {
    /// Unique id.
    pub id: String,
    /// Session start.
    pub start_time: DateTime<Utc>,
    /// Session end.
    pub end_time: DateTime<Utc>,
    /// Number of grades recorded.
    pub cards_reviewed: u32,
    /// Mean grade, 0 when nothing was reviewed.
    pub average_grade: f64,
    /// Share of grades of 3 or more, between 0 and 1.
    pub accuracy: f64,
    /// Length of the session in seconds.
    pub duration: u64,
}

/// Entity kinds that travel over the sync protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// [`Document`]
    Document,
    /// [`Chapter`]
    Chapter,
    /// [`Card`]
    Card,
    /// [`SrsState`]
    SrsState,
    /// [`StudySession`]
    StudySession,
}

impl EntityType {
    /// Every entity type, in dependency order (parents first).
    pub const ALL: [EntityType; 5] = [
        EntityType::Document,
        EntityType::Chapter,
        EntityType::Card,
        EntityType::SrsState,
        EntityType::StudySession,
    ];

    /// Returns the collection holding entities of this type.
    #[must_use]
    pub const fn collection(self) -> Collection {
        match self {
            EntityType::Document => Collection::Documents,
            EntityType::Chapter => Collection::Chapters,
            EntityType::Card => Collection::Cards,
            EntityType::SrsState => Collection::SrsStates,
            EntityType::StudySession => Collection::StudySessions,
        }
    }

    /// Returns the wire name of this type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            EntityType::Document => "document",
            EntityType::Chapter => "chapter",
            EntityType::Card => "card",
            EntityType::SrsState => "srs_state",
            EntityType::StudySession => "study_session",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of mutation carried by a change record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Entity created.
    Create,
    /// Entity replaced.
    Update,
    /// Entity removed.
    Delete,
}

impl Operation {
    /// Returns true for deletes.
    #[must_use]
    pub const fn is_delete(self) -> bool {
        matches!(self, Operation::Delete)
    }
}

/// Reads the `id` field of a stored entity.
#[must_use]
pub fn entity_id(value: &serde_json::Value) -> Option<&str> {
    value.get("id").and_then(serde_json::Value::as_str)
}
