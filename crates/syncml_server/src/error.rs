//! Error types for the session host.

use syncml_engine::EngineError;
use syncml_protocol::ProtocolError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur while hosting sessions.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The request body is not a SyncML message.
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] ProtocolError),

    /// The session refused the message.
    #[error("session error: {0}")]
    Engine(#[from] EngineError),

    /// No room for another session.
    #[error("too many sessions: limit is {0}")]
    TooManySessions(usize),

    /// The session ended without an answer to send.
    #[error("session {0} has nothing to answer")]
    NoAnswer(String),
}

impl ServerError {
    /// Returns true if the device sent something it should not have (4xx).
    pub fn is_client_error(&self) -> bool {
        match self {
            ServerError::InvalidRequest(_) | ServerError::NoAnswer(_) => true,
            ServerError::Engine(e) => matches!(
                e,
                EngineError::Protocol(_) | EngineError::Codec(_) | EngineError::InvalidState(_)
            ),
            ServerError::TooManySessions(_) => false,
        }
    }

    /// Returns true if the failure is on our side (5xx).
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        let stale = ServerError::Engine(EngineError::InvalidState("session is over".into()));
        assert!(stale.is_client_error());
        assert!(ServerError::TooManySessions(4).is_server_error());
        assert!(ServerError::Engine(EngineError::backend("disk full")).is_server_error());
    }

    #[test]
    fn error_display() {
        let msg = ServerError::TooManySessions(64).to_string();
        assert!(msg.contains("64"));
    }
}
