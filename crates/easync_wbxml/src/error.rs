//! Error types for the WBXML crate.

use std::io;
use thiserror::Error;

/// Result type for WBXML operations.
pub type WbxmlResult<T> = Result<T, WbxmlError>;

/// Errors that can occur during encoding or decoding.
#[derive(Error, Debug)]
pub enum WbxmlError {
    /// The input violates the WBXML grammar.
    #[error("malformed WBXML stream at offset {offset}: {message}")]
    MalformedStream {
        /// Byte offset where the problem was detected.
        offset: u64,
        /// Description of the violation.
        message: String,
    },

    /// The input ended in the middle of a construct.
    #[error("truncated WBXML stream at offset {offset}: expected {expected}")]
    TruncatedStream {
        /// Byte offset where input ran out.
        offset: u64,
        /// What the decoder was reading.
        expected: &'static str,
    },

    /// A tag token is not defined in the active code page.
    #[error("unknown token 0x{token:02x} in code page {codepage}")]
    UnknownToken {
        /// Active code page.
        codepage: u8,
        /// Offending token.
        token: u8,
    },

    /// A tag name is not defined in the given code page.
    #[error("unknown tag {name:?} in code page {codepage}")]
    UnknownTag {
        /// Code page searched.
        codepage: u8,
        /// Offending tag name.
        name: String,
    },

    /// A code page id has no table.
    #[error("unknown code page {0}")]
    UnknownCodepage(u8),

    /// The encoder was handed an event it cannot serialize.
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// The underlying reader or writer failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl WbxmlError {
    /// Create a malformed stream error.
    pub fn malformed(offset: u64, message: impl Into<String>) -> Self {
        Self::MalformedStream {
            offset,
            message: message.into(),
        }
    }

    /// Create an invalid event error.
    pub fn invalid_event(message: impl Into<String>) -> Self {
        Self::InvalidEvent(message.into())
    }

    /// Returns true if this error was caused by bad client input
    /// (as opposed to a local I/O failure or a caller bug).
    pub fn is_malformed_input(&self) -> bool {
        matches!(
            self,
            WbxmlError::MalformedStream { .. }
                | WbxmlError::TruncatedStream { .. }
                | WbxmlError::UnknownToken { .. }
                | WbxmlError::UnknownTag { .. }
                | WbxmlError::UnknownCodepage(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(WbxmlError::malformed(3, "bad").is_malformed_input());
        assert!(WbxmlError::UnknownCodepage(99).is_malformed_input());
        assert!(!WbxmlError::invalid_event("nul in text").is_malformed_input());
    }

    #[test]
    fn display_mentions_token() {
        let err = WbxmlError::UnknownToken {
            codepage: 0,
            token: 0x3f,
        };
        assert!(err.to_string().contains("0x3f"));
    }
}
