//! Protocol errors.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Malformed or unexpected protocol data.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The bytes are not a valid message of the expected type.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The message parsed but violates the protocol.
    #[error("protocol violation: {0}")]
    Violation(String),

    /// The peer reported failure.
    #[error("{endpoint} reported failure")]
    Rejected {
        /// Endpoint that failed.
        endpoint: &'static str,
    },
}

impl ProtocolError {
    /// Creates a protocol violation error.
    pub fn violation(message: impl Into<String>) -> Self {
        Self::Violation(message.into())
    }
}
