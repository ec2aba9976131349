//! # cardsync sync engine
//!
//! Offline-first synchronization of the local card store with a sync server.
//!
//! This crate provides:
//! - The sync state machine (idle, syncing, retrying, offline)
//! - A push, pull, validate cycle with atomic completion
//! - Conflict recording and resolution
//! - Fixed or exponential retry delays
//! - HTTP transport abstraction with a reqwest client
//! - A tokio driver for periodic, lifecycle and connectivity triggers
//!
//! ## Cycle
//!
//! 1. Push the pending log, compacted to the latest change per entity
//! 2. Record conflicts the server reports
//! 3. Pull changes since the watermark and apply them by id, deferring
//!    entities edited locally since the push snapshot
//! 4. Compare checksums and run a full sync if the server recommends it
//! 5. Remove the pushed entries and advance the watermark in one commit
//!
//! Any failure leaves the pending log and the watermark untouched.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod applier;
mod config;
mod driver;
mod engine;
mod error;
mod http;
mod listeners;
mod state;
mod transport;

pub use applier::{ApplyOutcome, StoreApplier, SyncApplier};
pub use config::{RetryConfig, SyncConfig};
pub use driver::{SyncDriver, SyncTrigger};
pub use engine::SyncEngine;
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, HttpFailure, HttpTransport, LoopbackClient, LoopbackServer, ReqwestClient};
pub use listeners::StatusSubscription;
pub use state::{SyncCycleResult, SyncState, SyncStats, SyncStatus};
pub use transport::{MockTransport, SyncTransport};
