//! Error types for the protocol crate.

use syncml_codec::{CodecError, Tag};
use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while mapping elements to protocol types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Wire codec error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A required element is missing.
    #[error("missing <{element}> in <{parent}>")]
    MissingElement {
        /// Missing element.
        element: Tag,
        /// Enclosing element.
        parent: Tag,
    },

    /// An element value could not be interpreted.
    #[error("invalid value {value:?} in <{element}>")]
    InvalidValue {
        /// Element carrying the value.
        element: Tag,
        /// Offending value.
        value: String,
    },

    /// An element appeared where a different one was expected.
    #[error("unexpected <{found}>, expected <{expected}>")]
    UnexpectedElement {
        /// Expected element.
        expected: Tag,
        /// Element found instead.
        found: Tag,
    },

    /// The document declares a SyncML version this crate does not speak.
    #[error("unsupported SyncML version {0:?}")]
    UnsupportedVersion(String),
}

impl ProtocolError {
    /// Create a missing element error.
    pub fn missing(element: Tag, parent: Tag) -> Self {
        Self::MissingElement { element, parent }
    }

    /// Create an invalid value error.
    pub fn invalid(element: Tag, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            element,
            value: value.into(),
        }
    }

    /// Returns true if the error describes a malformed or incomplete command.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            ProtocolError::MissingElement { .. }
                | ProtocolError::InvalidValue { .. }
                | ProtocolError::UnexpectedElement { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ProtocolError::missing(Tag::CmdId, Tag::Add);
        assert_eq!(err.to_string(), "missing <CmdID> in <Add>");
        assert!(err.is_structural());

        let err = ProtocolError::UnsupportedVersion("2.0".into());
        assert!(!err.is_structural());
    }
}
