//! Error types for the protocol crate.

use easync_wbxml::WbxmlError;
use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while reading or writing Sync documents.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The underlying WBXML stream failed.
    #[error("WBXML error: {0}")]
    Wbxml(#[from] WbxmlError),

    /// An element appeared where it is not allowed.
    #[error("unexpected element: {0}")]
    UnexpectedElement(String),

    /// A required element is absent.
    #[error("missing element: {0}")]
    MissingElement(&'static str),

    /// An element's value could not be interpreted.
    #[error("invalid value for {element}: {value:?}")]
    InvalidValue {
        /// Element name.
        element: &'static str,
        /// Offending text.
        value: String,
    },
}

impl ProtocolError {
    /// Create an invalid value error.
    pub fn invalid_value(element: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            element,
            value: value.into(),
        }
    }

    /// Returns true if the client sent something unusable, as opposed to the
    /// server failing to write a response.
    pub fn is_client_error(&self) -> bool {
        match self {
            ProtocolError::Wbxml(e) => e.is_malformed_input(),
            ProtocolError::UnexpectedElement(_)
            | ProtocolError::MissingElement(_)
            | ProtocolError::InvalidValue { .. } => true,
        }
    }
}
