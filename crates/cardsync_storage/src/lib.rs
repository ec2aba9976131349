//! # cardsync storage
//!
//! Storage backend trait and implementations for the cardsync local store.
//!
//! Backends are **opaque key/value byte stores**. They know nothing about
//! collections, JSON, or the sync protocol; the local store in
//! `cardsync_core` owns all interpretation of the bytes.
//!
//! ## Design Principles
//!
//! - A write is a batch of puts and deletes applied all-or-nothing
//! - Readers never observe half of a batch
//! - Must be `Send + Sync` so grading and sync can share one store
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For tests and ephemeral stores
//! - [`FileBackend`] - One file per key with crash-safe batch commits
//!
//! ## Example
//!
//! ```rust
//! use cardsync_storage::{BatchOp, InMemoryBackend, StorageBackend};
//!
//! let backend = InMemoryBackend::new();
//! backend
//!     .write_batch(&[BatchOp::put("cards", b"[]".to_vec())])
//!     .unwrap();
//! assert_eq!(backend.read("cards").unwrap(), Some(b"[]".to_vec()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::{validate_key, BatchOp, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
