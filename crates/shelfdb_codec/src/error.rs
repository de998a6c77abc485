//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur during encoding or decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Failed to encode a value to its string form.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// The input is not a well-formed encoded document.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },

    /// A node reference points outside the document.
    #[error("dangling reference to node {index}")]
    DanglingReference {
        /// The referenced node index.
        index: usize,
    },

    /// A node reference would make the value contain itself.
    #[error("cyclic reference to node {index}")]
    CyclicReference {
        /// The referenced node index.
        index: usize,
    },

    /// A number was written in an unrecognised textual form.
    #[error("invalid number representation: {text:?}")]
    InvalidNumber {
        /// The offending text.
        text: String,
    },
}

impl CodecError {
    /// Create an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Create a decoding failed error.
    pub fn decoding_failed(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }
}
