//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The key cannot be used as a storage key.
    #[error("invalid storage key: {0:?}")]
    InvalidKey(String),

    /// On-disk state could not be interpreted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),
}
