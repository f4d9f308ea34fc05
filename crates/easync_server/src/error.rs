//! Error types for the sync server.

use easync_engine::EngineError;
use easync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that end a request without a WBXML response.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The body is not a well-formed `Sync` request.
    #[error("malformed request: {0}")]
    Malformed(String),

    /// The body exceeds the configured limit.
    #[error("request body of {size} bytes exceeds limit of {limit}")]
    BodyTooLarge {
        /// Body size.
        size: usize,
        /// Configured limit.
        limit: usize,
    },

    /// The request is not WBXML.
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),

    /// The document is a command other than `Sync`.
    #[error("unsupported command: {0}")]
    UnsupportedCommand(String),

    /// A sync turn is already running for one of the collections.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The groupware backend failed.
    #[error("backend error: {0}")]
    Backend(String),

    /// The state store failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// HTTP status to answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::Malformed(_) | ServerError::UnsupportedContentType(_) => 400,
            ServerError::BodyTooLarge { .. } => 413,
            ServerError::UnsupportedCommand(_) => 501,
            ServerError::Conflict(_) | ServerError::Backend(_) => 503,
            ServerError::Storage(_) | ServerError::Internal(_) => 500,
        }
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }

    /// Returns true if the client should retry the same request.
    pub fn is_retryable(&self) -> bool {
        self.status_code() == 503
    }
}

impl From<ProtocolError> for ServerError {
    fn from(err: ProtocolError) -> Self {
        if err.is_client_error() {
            ServerError::Malformed(err.to_string())
        } else {
            ServerError::Internal(err.to_string())
        }
    }
}

impl From<EngineError> for ServerError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Protocol(e) => e.into(),
            EngineError::InvalidSyncKey { .. } => ServerError::Malformed(err.to_string()),
            EngineError::StateConflict(_) => ServerError::Conflict(err.to_string()),
            EngineError::ChangeLog(_) | EngineError::Import(_) => {
                ServerError::Backend(err.to_string())
            }
            EngineError::Storage(_) => ServerError::Storage(err.to_string()),
            EngineError::Wbxml(_) => ServerError::Internal(err.to_string()),
        }
    }
}
