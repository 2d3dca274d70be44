//! Error types for the session engine.

use syncml_codec::CodecError;
use syncml_protocol::{ProtocolError, StatusCode};
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while running a session.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A command or the whole session failed with a status to report.
    #[error("session error {status}: {message}")]
    Session {
        /// Status code reported to the remote.
        status: StatusCode,
        /// Whether the session must be aborted.
        fatal: bool,
        /// Error message.
        message: String,
    },

    /// Malformed protocol structure.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Wire encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The datastore backend failed.
    #[error("backend error: {0}")]
    Backend(String),

    /// The resume store failed.
    #[error("resume store error: {0}")]
    Resume(String),

    /// The remote rejected our credentials.
    #[error("authentication failed with status {0}")]
    AuthenticationFailed(StatusCode),

    /// An operation was called in the wrong session state.
    #[error("invalid session state: {0}")]
    InvalidState(String),
}

impl EngineError {
    /// Creates a non-fatal command error.
    pub fn command(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Session {
            status,
            fatal: false,
            message: message.into(),
        }
    }

    /// Creates an error that aborts the session.
    pub fn fatal(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Session {
            status,
            fatal: true,
            message: message.into(),
        }
    }

    /// Creates a backend error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    /// Creates a resume store error.
    pub fn resume(message: impl Into<String>) -> Self {
        Self::Resume(message.into())
    }

    /// Returns the status code to report for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            EngineError::Session { status, .. } => *status,
            EngineError::Protocol(e) if e.is_structural() => match e {
                ProtocolError::MissingElement { .. } => StatusCode::INCOMPLETE_COMMAND,
                _ => StatusCode::BAD_REQUEST,
            },
            EngineError::Protocol(ProtocolError::UnsupportedVersion(_)) => {
                StatusCode::DTD_VERSION_NOT_SUPPORTED
            }
            EngineError::AuthenticationFailed(status) => *status,
            _ => StatusCode::COMMAND_FAILED,
        }
    }

    /// Returns true if the session cannot continue after this error.
    pub fn is_fatal(&self) -> bool {
        match self {
            EngineError::Session { fatal, .. } => *fatal,
            EngineError::Protocol(e) => !e.is_structural(),
            _ => true,
        }
    }
}
