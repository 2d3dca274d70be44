//! Session-wide counters and negotiated limits.

use crate::config::{SessionConfig, SessionRole};
use bytes::Bytes;
use syncml_protocol::{Encoding, StatusCode, SyncMlVersion};

/// Phase of a session.
///
/// Phases only move forward. Suspension is tracked separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SessionPhase {
    /// No header processed yet.
    Header,
    /// Alerts are exchanged.
    Alert,
    /// Alerts are done, no Sync has been sent or received.
    SyncStart,
    /// The client sends its changes.
    SyncOps,
    /// The server sends its changes.
    SyncEnd,
    /// The client sends its ID map.
    Map,
    /// The session is over.
    Done,
}

impl SessionPhase {
    /// Returns a short name for logging.
    pub fn as_str(self) -> &'static str {
        match self {
            SessionPhase::Header => "header",
            SessionPhase::Alert => "alert",
            SessionPhase::SyncStart => "sync-start",
            SessionPhase::SyncOps => "syncop-exchange",
            SessionPhase::SyncEnd => "sync-end",
            SessionPhase::Map => "map",
            SessionPhase::Done => "done",
        }
    }
}

/// Counters, identifiers and limits shared by all commands of a session.
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Client or server.
    pub role: SessionRole,
    /// Version used for outgoing messages.
    pub version: SyncMlVersion,
    /// Encoding used for outgoing messages.
    pub encoding: Encoding,
    /// Session identifier.
    pub session_id: String,
    /// Local URI placed in outgoing headers.
    pub local_uri: String,
    /// Remote URI placed in outgoing headers.
    pub remote_uri: String,
    /// Current phase.
    pub phase: SessionPhase,
    /// Identifier of the message being built (or last sent).
    pub outgoing_msg_id: u32,
    /// Identifier of the last incoming message.
    pub incoming_msg_id: u32,
    next_cmd_id: u32,
    /// Largest message the remote accepts.
    pub max_outgoing_msg_size: usize,
    /// Largest object the remote accepts.
    pub max_outgoing_obj_size: Option<usize>,
    /// The last incoming message ended a package.
    pub incoming_final: bool,
    /// We sent a final message and wait for the remote's package.
    pub awaiting_remote: bool,
    /// The remote accepted our credentials.
    pub authenticated: bool,
    /// A suspend was requested locally.
    pub suspend_requested: bool,
    /// The session is suspended.
    pub suspended: bool,
    /// The session was aborted with this status.
    pub aborted: Option<StatusCode>,
    /// Response URI announced by the remote.
    pub resp_uri: Option<String>,
    /// Device information received from the remote.
    pub remote_dev_inf: Option<Bytes>,
}

impl SessionContext {
    /// Creates the context for a new session.
    pub fn new(config: &SessionConfig, session_id: impl Into<String>) -> Self {
        Self {
            role: config.role,
            version: config.version,
            encoding: config.encoding,
            session_id: session_id.into(),
            local_uri: config.local_uri.clone(),
            remote_uri: config.remote_uri.clone(),
            phase: SessionPhase::Header,
            outgoing_msg_id: 0,
            incoming_msg_id: 0,
            next_cmd_id: 1,
            max_outgoing_msg_size: usize::try_from(config.max_msg_size).unwrap_or(usize::MAX),
            max_outgoing_obj_size: None,
            incoming_final: false,
            awaiting_remote: config.role == SessionRole::Server,
            authenticated: false,
            suspend_requested: false,
            suspended: false,
            aborted: None,
            resp_uri: None,
            remote_dev_inf: None,
        }
    }

    /// Returns true for client sessions.
    pub fn is_client(&self) -> bool {
        self.role == SessionRole::Client
    }

    /// Returns the command identifier the next issued command gets.
    pub fn peek_cmd_id(&self) -> u32 {
        self.next_cmd_id
    }

    /// Allocates a command identifier.
    pub fn alloc_cmd_id(&mut self) -> u32 {
        let id = self.next_cmd_id;
        self.next_cmd_id += 1;
        id
    }

    /// Starts a new outgoing message and returns its identifier.
    pub fn next_outgoing_msg(&mut self) -> u32 {
        self.outgoing_msg_id += 1;
        self.outgoing_msg_id
    }

    /// Advances the phase. Never moves backwards.
    pub fn advance(&mut self, phase: SessionPhase) {
        if phase > self.phase {
            tracing::debug!(from = self.phase.as_str(), to = phase.as_str(), "phase change");
            self.phase = phase;
        }
    }

    /// Returns true once the session will not process further messages.
    pub fn is_terminated(&self) -> bool {
        self.phase == SessionPhase::Done
    }

    /// Returns true if large objects may be sent to the remote.
    pub fn remote_supports_large_objects(&self) -> bool {
        self.version.supports_large_objects()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_ids_are_monotonic_across_messages() {
        let config = SessionConfig::client("dev", "srv");
        let mut ctx = SessionContext::new(&config, "1");
        assert_eq!(ctx.next_outgoing_msg(), 1);
        assert_eq!(ctx.alloc_cmd_id(), 1);
        assert_eq!(ctx.alloc_cmd_id(), 2);
        assert_eq!(ctx.next_outgoing_msg(), 2);
        assert_eq!(ctx.peek_cmd_id(), 3);
    }

    #[test]
    fn phase_never_moves_back() {
        let config = SessionConfig::server("srv");
        let mut ctx = SessionContext::new(&config, "1");
        assert!(ctx.awaiting_remote);
        ctx.advance(SessionPhase::SyncOps);
        ctx.advance(SessionPhase::Alert);
        assert_eq!(ctx.phase, SessionPhase::SyncOps);
        assert!(SessionPhase::Map > SessionPhase::SyncEnd);
    }
}
