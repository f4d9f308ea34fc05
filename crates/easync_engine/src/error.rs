//! Error types for the sync engine.

use easync_protocol::ProtocolError;
use easync_state::StoreError;
use easync_wbxml::WbxmlError;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that abort a sync turn.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The presented key is neither `"0"`, current nor previous.
    #[error("invalid sync key {key:?} for collection {collection_id}")]
    InvalidSyncKey {
        /// Collection the key was presented for.
        collection_id: String,
        /// Key as sent by the client.
        key: String,
    },

    /// Another turn holds the collection.
    #[error("state conflict: {0}")]
    StateConflict(String),

    /// The state store failed.
    #[error("state store error: {0}")]
    Storage(StoreError),

    /// The change log could not be read.
    #[error("change log error: {0}")]
    ChangeLog(String),

    /// The backend could not accept client changes.
    #[error("import error: {0}")]
    Import(String),

    /// The response could not be encoded.
    #[error("wbxml error: {0}")]
    Wbxml(#[from] WbxmlError),

    /// The request could not be parsed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        if err.is_conflict() {
            EngineError::StateConflict(err.to_string())
        } else {
            EngineError::Storage(err)
        }
    }
}

impl EngineError {
    /// Creates an invalid sync key error.
    pub fn invalid_key(collection_id: impl Into<String>, key: impl Into<String>) -> Self {
        Self::InvalidSyncKey {
            collection_id: collection_id.into(),
            key: key.into(),
        }
    }

    /// Returns true if the client may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::StateConflict(_) | EngineError::ChangeLog(_) | EngineError::Import(_)
        )
    }

    /// Returns true if the request itself was at fault.
    pub fn is_client_error(&self) -> bool {
        match self {
            EngineError::InvalidSyncKey { .. } => true,
            EngineError::Protocol(e) => e.is_client_error(),
            _ => false,
        }
    }
}
