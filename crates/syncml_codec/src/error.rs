//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur during encoding or decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Failed to encode an element.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode input bytes.
    #[error("decoding failed at offset {offset}: {message}")]
    DecodingFailed {
        /// Byte offset where decoding stopped.
        offset: usize,
        /// Description of the decoding error.
        message: String,
    },

    /// Unexpected end of input.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// Invalid UTF-8 string.
    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    /// Element name not part of the SyncML or MetInf vocabulary.
    #[error("unknown element <{name}>")]
    UnknownTag {
        /// Name (XML) or page/token pair (WBXML) of the element.
        name: String,
    },

    /// WBXML construct this codec does not handle.
    #[error("unsupported WBXML construct: {what}")]
    Unsupported {
        /// Description of the construct.
        what: String,
    },

    /// Input is neither XML nor WBXML.
    #[error("unrecognized document encoding")]
    UnknownEncoding,
}

impl CodecError {
    /// Create an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Create a decoding failed error.
    pub fn decoding_failed(offset: usize, message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            offset,
            message: message.into(),
        }
    }

    /// Create an unknown tag error.
    pub fn unknown_tag(name: impl Into<String>) -> Self {
        Self::UnknownTag { name: name.into() }
    }

    /// Create an unsupported construct error.
    pub fn unsupported(what: impl Into<String>) -> Self {
        Self::Unsupported { what: what.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CodecError::decoding_failed(12, "bad token");
        assert_eq!(err.to_string(), "decoding failed at offset 12: bad token");

        let err = CodecError::unknown_tag("Frobnicate");
        assert!(err.to_string().contains("Frobnicate"));
    }
}
