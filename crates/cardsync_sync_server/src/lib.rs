//! # cardsync sync server
//!
//! Reference sync server for cardsync clients.
//!
//! This crate provides:
//! - Handlers for the push, pull, validate-consistency, full-sync and
//!   resolve-conflicts endpoints
//! - An in-memory authoritative store with a change log
//! - Conflict detection against other writers
//! - Cascading deletes from documents to chapters, cards and schedules
//!
//! # Protocol
//!
//! Each client cycle pushes first, then pulls:
//! 1. Client pushes its compacted pending changes
//! 2. Server applies them and reports fields another client changed
//!    since the pusher's last sync
//! 3. Client pulls every change since its watermark
//! 4. Client sends checksums and the server recommends a full resync on
//!    mismatch

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod handler;
mod server;
mod store;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::RequestHandler;
pub use server::SyncServer;
pub use store::{PushOutcome, ServerStore, SERVER_WRITER};
