//! Collection keys of the local store.

use crate::model::EntityType;
use std::fmt;

/// A named collection in the local store.
///
/// Each collection is stored as one JSON value under a fixed storage key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Collection {
    /// Array of documents.
    Documents,
    /// Array of chapters.
    Chapters,
    /// Array of cards.
    Cards,
    /// Array of SRS states.
    SrsStates,
    /// Array of study sessions.
    StudySessions,
    /// Array of pending changes, oldest first.
    PendingChanges,
    /// Timestamp of the last successful sync.
    LastSyncTime,
    /// This installation's client id.
    ClientId,
}

impl Collection {
    /// Every collection.
    pub const ALL: [Collection; 8] = [
        Collection::Documents,
        Collection::Chapters,
        Collection::Cards,
        Collection::SrsStates,
        Collection::StudySessions,
        Collection::PendingChanges,
        Collection::LastSyncTime,
        Collection::ClientId,
    ];

    /// Returns the storage key.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Collection::Documents => "documents",
            Collection::Chapters => "chapters",
            Collection::Cards => "cards",
            Collection::SrsStates => "srs_states",
            Collection::StudySessions => "study_sessions",
            Collection::PendingChanges => "pending_changes",
            Collection::LastSyncTime => "last_sync_time",
            Collection::ClientId => "client_id",
        }
    }

    /// Looks a collection up by storage key.
    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.key() == key)
    }

    /// Returns true if the collection holds a single value rather than an array.
    #[must_use]
    pub const fn is_scalar(self) -> bool {
        matches!(self, Collection::LastSyncTime | Collection::ClientId)
    }

    /// Returns the entity type stored in this collection, if it is synced.
    #[must_use]
    pub const fn entity_type(self) -> Option<EntityType> {
        match self {
            Collection::Documents => Some(EntityType::Document),
            Collection::Chapters => Some(EntityType::Chapter),
            Collection::Cards => Some(EntityType::Card),
            Collection::SrsStates => Some(EntityType::SrsState),
            Collection::StudySessions => Some(EntityType::StudySession),
            _ => None,
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_valid_storage_keys() {
        for c in Collection::ALL {
            assert!(cardsync_storage::validate_key(c.key()).is_ok());
            assert_eq!(Collection::from_key(c.key()), Some(c));
        }
        assert_eq!(Collection::from_key("nope"), None);
    }

    #[test]
    fn entity_collections_round_trip() {
        for ty in EntityType::ALL {
            assert_eq!(ty.collection().entity_type(), Some(ty));
        }
        assert_eq!(Collection::PendingChanges.entity_type(), None);
        assert!(Collection::ClientId.is_scalar());
        assert!(!Collection::Cards.is_scalar());
    }
}
