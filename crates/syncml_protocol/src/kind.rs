//! Command kinds and alert codes.

use std::fmt;
use syncml_codec::Tag;

/// Kind of a SyncML command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Message header.
    SyncHdr,
    /// Sync bracket.
    Sync,
    /// Alert.
    Alert,
    /// Add.
    Add,
    /// Replace.
    Replace,
    /// Delete.
    Delete,
    /// Copy.
    Copy,
    /// Move.
    Move,
    /// Map.
    Map,
    /// Get.
    Get,
    /// Put.
    Put,
    /// Status.
    Status,
    /// Results.
    Results,
    /// Sequence.
    Sequence,
    /// Atomic.
    Atomic,
    /// Exec.
    Exec,
    /// Search.
    Search,
}

impl CommandKind {
    /// Returns the element tag of the command.
    pub fn tag(self) -> Tag {
        match self {
            CommandKind::SyncHdr => Tag::SyncHdr,
            CommandKind::Sync => Tag::Sync,
            CommandKind::Alert => Tag::Alert,
            CommandKind::Add => Tag::Add,
            CommandKind::Replace => Tag::Replace,
            CommandKind::Delete => Tag::Delete,
            CommandKind::Copy => Tag::Copy,
            CommandKind::Move => Tag::Move,
            CommandKind::Map => Tag::Map,
            CommandKind::Get => Tag::Get,
            CommandKind::Put => Tag::Put,
            CommandKind::Status => Tag::Status,
            CommandKind::Results => Tag::Results,
            CommandKind::Sequence => Tag::Sequence,
            CommandKind::Atomic => Tag::Atomic,
            CommandKind::Exec => Tag::Exec,
            CommandKind::Search => Tag::Search,
        }
    }

    /// Returns the command for an element tag.
    pub fn from_tag(tag: Tag) -> Option<Self> {
        Some(match tag {
            Tag::SyncHdr => CommandKind::SyncHdr,
            Tag::Sync => CommandKind::Sync,
            Tag::Alert => CommandKind::Alert,
            Tag::Add => CommandKind::Add,
            Tag::Replace => CommandKind::Replace,
            Tag::Delete => CommandKind::Delete,
            Tag::Copy => CommandKind::Copy,
            Tag::Move => CommandKind::Move,
            Tag::Map => CommandKind::Map,
            Tag::Get => CommandKind::Get,
            Tag::Put => CommandKind::Put,
            Tag::Status => CommandKind::Status,
            Tag::Results => CommandKind::Results,
            Tag::Sequence => CommandKind::Sequence,
            Tag::Atomic => CommandKind::Atomic,
            Tag::Exec => CommandKind::Exec,
            Tag::Search => CommandKind::Search,
            _ => return None,
        })
    }

    /// Returns the name used in `<Cmd>` of a status.
    pub fn name(self) -> &'static str {
        self.tag().name()
    }

    /// Looks up a command by its `<Cmd>` name.
    pub fn from_name(name: &str) -> Option<Self> {
        Tag::from_name(name).and_then(Self::from_tag)
    }

    /// Returns the sync operation kind, if this is one.
    pub fn sync_op(self) -> Option<SyncOpKind> {
        match self {
            CommandKind::Add => Some(SyncOpKind::Add),
            CommandKind::Replace => Some(SyncOpKind::Replace),
            CommandKind::Delete => Some(SyncOpKind::Delete),
            CommandKind::Copy => Some(SyncOpKind::Copy),
            CommandKind::Move => Some(SyncOpKind::Move),
            _ => None,
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kind of an operation inside a Sync bracket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncOpKind {
    /// Add a new item.
    Add,
    /// Replace an existing item.
    Replace,
    /// Delete an item.
    Delete,
    /// Copy an item.
    Copy,
    /// Move an item.
    Move,
}

impl SyncOpKind {
    /// Returns the command kind.
    pub fn command(self) -> CommandKind {
        match self {
            SyncOpKind::Add => CommandKind::Add,
            SyncOpKind::Replace => CommandKind::Replace,
            SyncOpKind::Delete => CommandKind::Delete,
            SyncOpKind::Copy => CommandKind::Copy,
            SyncOpKind::Move => CommandKind::Move,
        }
    }

    /// Returns true if the operation carries item data.
    pub fn carries_data(self) -> bool {
        !matches!(self, SyncOpKind::Delete)
    }
}

impl fmt::Display for SyncOpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.command(), f)
    }
}

/// SyncML alert codes.
pub struct AlertCode;

impl AlertCode {
    /// Display.
    pub const DISPLAY: u16 = 100;
    /// Two-way sync.
    pub const TWO_WAY: u16 = 200;
    /// Slow sync.
    pub const SLOW_SYNC: u16 = 201;
    /// One-way sync from client.
    pub const ONE_WAY_FROM_CLIENT: u16 = 202;
    /// Refresh from client.
    pub const REFRESH_FROM_CLIENT: u16 = 203;
    /// One-way sync from server.
    pub const ONE_WAY_FROM_SERVER: u16 = 204;
    /// Refresh from server.
    pub const REFRESH_FROM_SERVER: u16 = 205;
    /// Two-way sync alerted by the server.
    pub const TWO_WAY_BY_SERVER: u16 = 206;
    /// One-way from client alerted by the server.
    pub const ONE_WAY_FROM_CLIENT_BY_SERVER: u16 = 207;
    /// Refresh from client alerted by the server.
    pub const REFRESH_FROM_CLIENT_BY_SERVER: u16 = 208;
    /// One-way from server alerted by the server.
    pub const ONE_WAY_FROM_SERVER_BY_SERVER: u16 = 209;
    /// Refresh from server alerted by the server.
    pub const REFRESH_FROM_SERVER_BY_SERVER: u16 = 210;
    /// Result alert.
    pub const RESULT_ALERT: u16 = 221;
    /// Next message.
    pub const NEXT_MESSAGE: u16 = 222;
    /// End of data for chunked object not received.
    pub const NO_END_OF_DATA: u16 = 223;
    /// Suspend the session.
    pub const SUSPEND: u16 = 224;
    /// Resume a suspended session.
    pub const RESUME: u16 = 225;

    /// Returns true if the code starts synchronization of a datastore.
    pub fn is_sync_mode(code: u16) -> bool {
        (Self::TWO_WAY..=Self::REFRESH_FROM_SERVER_BY_SERVER).contains(&code)
            || code == Self::RESUME
    }

    /// Maps server-alerted codes to the corresponding client codes.
    pub fn normalize(code: u16) -> u16 {
        match code {
            Self::TWO_WAY_BY_SERVER => Self::TWO_WAY,
            Self::ONE_WAY_FROM_CLIENT_BY_SERVER => Self::ONE_WAY_FROM_CLIENT,
            Self::REFRESH_FROM_CLIENT_BY_SERVER => Self::REFRESH_FROM_CLIENT,
            Self::ONE_WAY_FROM_SERVER_BY_SERVER => Self::ONE_WAY_FROM_SERVER,
            Self::REFRESH_FROM_SERVER_BY_SERVER => Self::REFRESH_FROM_SERVER,
            other => other,
        }
    }

    /// Returns true if the client sends its changes in this mode.
    pub fn client_sends(code: u16) -> bool {
        !matches!(
            Self::normalize(code),
            Self::ONE_WAY_FROM_SERVER | Self::REFRESH_FROM_SERVER
        )
    }

    /// Returns true if the server sends its changes in this mode.
    pub fn server_sends(code: u16) -> bool {
        !matches!(
            Self::normalize(code),
            Self::ONE_WAY_FROM_CLIENT | Self::REFRESH_FROM_CLIENT
        )
    }

    /// Returns true if the mode transfers the complete data set.
    pub fn needs_all(code: u16) -> bool {
        matches!(
            Self::normalize(code),
            Self::SLOW_SYNC | Self::REFRESH_FROM_CLIENT | Self::REFRESH_FROM_SERVER
        )
    }
}
