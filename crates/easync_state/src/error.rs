//! Error types for sync state operations.

use std::io;
use thiserror::Error;

/// Result type for state store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while reading or mutating sync state.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another turn holds the collection, or the record changed underneath
    /// the caller.
    #[error("state conflict on {device_id}/{collection_id}: {reason}")]
    StateConflict {
        /// Device the record belongs to.
        device_id: String,
        /// Collection the record belongs to.
        collection_id: String,
        /// What did not match.
        reason: String,
    },

    /// The backend could not persist or load a record.
    #[error("storage error: {0}")]
    Storage(String),

    /// A persisted record could not be decoded.
    #[error("state record corrupted: {0}")]
    Corrupted(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StoreError {
    /// Create a state conflict error.
    pub fn conflict(device_id: &str, collection_id: &str, reason: impl Into<String>) -> Self {
        Self::StateConflict {
            device_id: device_id.to_string(),
            collection_id: collection_id.to_string(),
            reason: reason.into(),
        }
    }

    /// Returns true for `StateConflict`.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::StateConflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_display() {
        let err = StoreError::conflict("dev", "inbox", "turn in progress");
        assert!(err.is_conflict());
        assert_eq!(
            err.to_string(),
            "state conflict on dev/inbox: turn in progress"
        );
        assert!(!StoreError::Storage("disk full".into()).is_conflict());
    }
}
