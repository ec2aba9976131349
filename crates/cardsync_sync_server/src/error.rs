//! Error types for the sync server.

use cardsync_sync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request content.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The request body is not valid for the endpoint.
    #[error("malformed request: {0}")]
    Malformed(#[from] ProtocolError),

    /// No endpoint at the path.
    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_)
                | ServerError::Malformed(_)
                | ServerError::UnknownEndpoint(_)
        )
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        matches!(self, ServerError::Internal(_))
    }

    /// Returns the HTTP status code for the error.
    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::UnknownEndpoint(_) => 404,
            ServerError::InvalidRequest(_) | ServerError::Malformed(_) => 400,
            ServerError::Internal(_) => 500,
        }
    }
}
