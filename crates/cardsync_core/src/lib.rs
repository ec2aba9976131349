//! # cardsync core
//!
//! Device-local half of cardsync.
//!
//! This crate provides:
//! - The data model (documents, chapters, cards, SRS states, study sessions)
//! - [`LocalStore`], a transactional collection store over a
//!   [`cardsync_storage::StorageBackend`]
//! - The pending change log that feeds sync
//! - The SM-2 scheduler and [`Reviewer`], which grades cards
//! - Study session tracking, client identity, offline export and import
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use cardsync_core::{Collection, Grade, LocalStore, Reviewer};
//!
//! let store = Arc::new(LocalStore::open_in_memory());
//! store.save(
//!     Collection::Cards,
//!     &[serde_json::json!({"id": "c1", "type": "qa", "front": "2+2", "back": "4"})],
//! ).unwrap();
//!
//! let reviewer = Reviewer::new(Arc::clone(&store));
//! let state = reviewer.grade("c1", Grade::new(5).unwrap(), chrono::Utc::now()).unwrap();
//! assert_eq!(state.repetitions, 1);
//! assert_eq!(store.pending_count(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod collection;
mod config;
mod error;
mod export;
mod identity;
mod library;
mod model;
mod pending;
mod review;
pub mod scheduler;
mod session;
mod store;

pub use collection::Collection;
pub use config::StoreConfig;
pub use error::{CoreError, CoreResult};
pub use export::{OfflineExport, EXPORT_FORMAT_VERSION};
pub use identity::ClientIdentity;
pub use library::Library;
pub use model::{
    entity_id, Card, CardType, Chapter, Document, DocumentStatus, EntityType, Operation,
    SrsState, StudySession,
};
pub use pending::{ChangeType, PendingChange, PendingChangeLog};
pub use review::{refresh_schedule, Reviewer};
pub use scheduler::{srs_state_id, Grade};
pub use session::StudySessionTracker;
pub use store::{LocalStore, StoreTxn};
