//! Error types for the sync engine.

use cardsync_sync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
///
/// None of these escape [`crate::SyncEngine::trigger_sync`]; they end up as
/// the `error` of a failed [`crate::SyncCycleResult`].
#[derive(Error, Debug)]
pub enum SyncError {
    /// Local persistence failed.
    #[error("storage error: {0}")]
    Storage(#[from] cardsync_core::CoreError),

    /// The request did not reach the server or the server failed.
    #[error("network error: {message}")]
    Network {
        /// Error message.
        message: String,
        /// Whether the failure is transient.
        retryable: bool,
    },

    /// A request exceeded its timeout.
    #[error("request timed out")]
    Timeout,

    /// The server answered with something the protocol does not allow.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A conflict could not be settled.
    #[error("conflict error: {0}")]
    Conflict(String),

    /// Local and server state disagree and could not be reconciled.
    #[error("consistency error: {0}")]
    Consistency(String),

    /// The device is offline.
    #[error("device is offline")]
    Offline,

    /// Another cycle is running.
    #[error("sync already in progress")]
    AlreadySyncing,
}

impl SyncError {
    /// Creates a retryable network error.
    pub fn network_retryable(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable network error.
    pub fn network_fatal(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error is transient.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Network { retryable, .. } => *retryable,
            SyncError::Timeout | SyncError::Consistency(_) => true,
            _ => false,
        }
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}
