//! Status codes and their interpretation.

use std::fmt;

/// A SyncML status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatusCode(pub u16);

impl StatusCode {
    /// In progress.
    pub const IN_PROGRESS: StatusCode = StatusCode(101);
    /// Success.
    pub const OK: StatusCode = StatusCode(200);
    /// Item added.
    pub const ITEM_ADDED: StatusCode = StatusCode(201);
    /// Accepted for processing.
    pub const ACCEPTED: StatusCode = StatusCode(202);
    /// Item not deleted (not found).
    pub const ITEM_NOT_DELETED: StatusCode = StatusCode(211);
    /// Authentication accepted.
    pub const AUTH_ACCEPTED: StatusCode = StatusCode(212);
    /// Chunked item accepted, more data expected.
    pub const CHUNK_ACCEPTED: StatusCode = StatusCode(213);
    /// Operation cancelled.
    pub const OPERATION_CANCELLED: StatusCode = StatusCode(214);
    /// Not executed.
    pub const NOT_EXECUTED: StatusCode = StatusCode(215);
    /// Multiple choices.
    pub const MULTIPLE_CHOICES: StatusCode = StatusCode(300);
    /// Bad request.
    pub const BAD_REQUEST: StatusCode = StatusCode(400);
    /// Invalid credentials.
    pub const INVALID_CREDENTIALS: StatusCode = StatusCode(401);
    /// Forbidden.
    pub const FORBIDDEN: StatusCode = StatusCode(403);
    /// Not found.
    pub const NOT_FOUND: StatusCode = StatusCode(404);
    /// Command not allowed.
    pub const NOT_ALLOWED: StatusCode = StatusCode(405);
    /// Optional feature not supported.
    pub const FEATURE_NOT_SUPPORTED: StatusCode = StatusCode(406);
    /// Missing credentials.
    pub const MISSING_CREDENTIALS: StatusCode = StatusCode(407);
    /// Incomplete command.
    pub const INCOMPLETE_COMMAND: StatusCode = StatusCode(412);
    /// Request entity too large.
    pub const TOO_LARGE: StatusCode = StatusCode(413);
    /// Unsupported media type or format.
    pub const UNSUPPORTED_MEDIA_TYPE: StatusCode = StatusCode(415);
    /// Already exists.
    pub const ALREADY_EXISTS: StatusCode = StatusCode(418);
    /// Conflict resolved with server data.
    pub const CONFLICT_SERVER_WINS: StatusCode = StatusCode(419);
    /// Size mismatch.
    pub const SIZE_MISMATCH: StatusCode = StatusCode(424);
    /// Command failed.
    pub const COMMAND_FAILED: StatusCode = StatusCode(500);
    /// Command not implemented.
    pub const NOT_IMPLEMENTED: StatusCode = StatusCode(501);
    /// DTD version not supported.
    pub const DTD_VERSION_NOT_SUPPORTED: StatusCode = StatusCode(505);
    /// Processing error.
    pub const PROCESSING_ERROR: StatusCode = StatusCode(506);
    /// Refresh required.
    pub const REFRESH_REQUIRED: StatusCode = StatusCode(508);
    /// Data store failure.
    pub const DATASTORE_FAILURE: StatusCode = StatusCode(510);
    /// Synchronization failed.
    pub const SYNC_FAILED: StatusCode = StatusCode(512);
    /// Protocol version not supported.
    pub const PROTOCOL_VERSION_NOT_SUPPORTED: StatusCode = StatusCode(513);

    /// Returns the numeric code.
    pub fn code(self) -> u16 {
        self.0
    }

    /// Returns the class this code belongs to.
    pub fn class(self) -> StatusClass {
        match self.0 {
            0..=199 => StatusClass::Informational,
            200..=299 => StatusClass::Success,
            300..=399 => StatusClass::Redirect,
            400..=499 => StatusClass::OriginatorError,
            _ => StatusClass::RecipientError,
        }
    }

    /// Returns true for codes the receiver treats as success.
    ///
    /// 418 "already exists" counts as success.
    pub fn is_success(self) -> bool {
        self.class() == StatusClass::Success || self == StatusCode::ALREADY_EXISTS
    }

    /// Classifies the code for a command that received it.
    pub fn disposition(self, allow_failure: bool) -> StatusDisposition {
        let code = self.0;
        if code < 200 || self == StatusCode::ACCEPTED {
            return StatusDisposition::Pending;
        }
        if self.is_success() {
            return StatusDisposition::Resolved;
        }
        match self.class() {
            StatusClass::Redirect => StatusDisposition::Abort(StatusCode::INCOMPLETE_COMMAND),
            _ if allow_failure => StatusDisposition::Failed,
            StatusClass::OriginatorError => StatusDisposition::Abort(StatusCode::COMMAND_FAILED),
            _ => StatusDisposition::Abort(self),
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for StatusCode {
    fn from(code: u16) -> Self {
        StatusCode(code)
    }
}

/// Numeric range of a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// 1xx.
    Informational,
    /// 2xx.
    Success,
    /// 3xx.
    Redirect,
    /// 4xx.
    OriginatorError,
    /// 5xx and above.
    RecipientError,
}

/// What to do with an outstanding command after it received a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusDisposition {
    /// Keep the command queued, more statuses are expected.
    Pending,
    /// The command is done.
    Resolved,
    /// The command failed but the session continues.
    Failed,
    /// Abort the session reporting the given code.
    Abort(StatusCode),
}
