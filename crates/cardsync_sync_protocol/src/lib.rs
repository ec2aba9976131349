//! # cardsync sync protocol
//!
//! Wire types for cardsync synchronization.
//!
//! This crate provides:
//! - [`ChangeRecord`] and [`RemoteChange`] for push and pull
//! - Request and response messages for the five sync endpoints
//! - Field-level conflicts and resolution policies
//! - Canonical collection checksums shared by client and server
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod checksum;
mod conflict;
mod error;
mod messages;
mod operation;

pub use checksum::{canonical_json, collection_checksum, EntityChecksums, CARD_SCHEDULE_FIELDS};
pub use conflict::{
    diff_fields, ConflictPolicy, ConflictResolution, EntityConflict, FieldConflict, SyncConflict,
    AUDIT_FIELDS,
};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    decode, encode, ConflictResolutionRequest, Endpoint, FullSyncRequest, FullSyncResponse,
    FullSyncStats, PullRequest, PullResponse, PushRequest, PushResponse, PushStats,
    Recommendation, ResolveConflictsResponse, ValidateRequest, ValidateResponse,
};
pub use operation::{ChangeRecord, RemoteChange};
