//! Error types for cardsync core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in cardsync core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] cardsync_storage::StorageError),

    /// A value could not be encoded or decoded as JSON.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A review grade outside `0..=5`.
    #[error("invalid grade {0}: grades range from 0 to 5")]
    InvalidGrade(u8),

    /// The card being reviewed is not in the local store.
    #[error("card not found: {0}")]
    CardNotFound(String),

    /// The document being deleted is not in the local store.
    #[error("document not found: {0}")]
    DocumentNotFound(String),

    /// An offline export could not be imported.
    #[error("invalid export: {message}")]
    InvalidExport {
        /// Description of the problem.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid export error.
    pub fn invalid_export(message: impl Into<String>) -> Self {
        Self::InvalidExport {
            message: message.into(),
        }
    }

    /// Returns true if the error came from the storage layer.
    ///
    /// Storage errors leave the store unchanged and the operation can be
    /// retried; all other errors are deterministic.
    #[must_use]
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}
