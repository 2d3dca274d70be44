//! Typed SyncML commands.
//!
//! Each command type converts from and to its element form. Conversion from
//! elements validates structure only; semantic checks belong to the engine.

use crate::cred::Cred;
use crate::error::{ProtocolError, ProtocolResult};
use crate::fields::{
    expect_tag, flag, number_opt, optional_number, required_number, required_text, text_opt,
};
use crate::item::{Item, Location, MapItem};
use crate::kind::{CommandKind, SyncOpKind};
use crate::meta::Meta;
use crate::status::StatusCode;
use syncml_codec::{Element, Tag};

fn cmd_id_element(cmd_id: u32) -> Element {
    Element::text(Tag::CmdId, cmd_id.to_string())
}

fn cred_of(element: &Element) -> ProtocolResult<Option<Cred>> {
    element.child(Tag::Cred).map(Cred::from_element).transpose()
}

/// An `<Alert>` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertCmd {
    /// Command identifier.
    pub cmd_id: u32,
    /// No status requested.
    pub no_resp: bool,
    /// Credentials.
    pub cred: Option<Cred>,
    /// Alert code.
    pub code: u16,
    /// Items (datastore locations with anchors).
    pub items: Vec<Item>,
}

impl AlertCmd {
    /// Creates an alert.
    pub fn new(cmd_id: u32, code: u16, items: Vec<Item>) -> Self {
        Self {
            cmd_id,
            no_resp: false,
            cred: None,
            code,
            items,
        }
    }

    /// Parses an `<Alert>` element.
    pub fn from_element(element: &Element) -> ProtocolResult<Self> {
        expect_tag(element, Tag::Alert)?;
        Ok(Self {
            cmd_id: required_number(element, Tag::CmdId)?,
            no_resp: element.has_child(Tag::NoResp),
            cred: cred_of(element)?,
            code: required_number(element, Tag::Data)?,
            items: Item::all_in(element)?,
        })
    }

    /// Builds an `<Alert>` element.
    pub fn to_element(&self) -> Element {
        let mut e = Element::node(Tag::Alert, vec![cmd_id_element(self.cmd_id)]);
        e.push_opt(flag(Tag::NoResp, self.no_resp));
        e.push_opt(self.cred.as_ref().map(Cred::to_element));
        e.push(Element::text(Tag::Data, self.code.to_string()));
        for item in &self.items {
            e.push(item.to_element());
        }
        e
    }
}

/// A `<Sync>` bracket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCmd {
    /// Command identifier.
    pub cmd_id: u32,
    /// No status requested.
    pub no_resp: bool,
    /// Receiving datastore.
    pub target: Option<Location>,
    /// Sending datastore.
    pub source: Option<Location>,
    /// Meta information (MaxObjSize).
    pub meta: Option<Meta>,
    /// Number of changes the sender will send.
    pub number_of_changes: Option<u32>,
    /// Contained commands in element form.
    pub commands: Vec<Element>,
}

impl SyncCmd {
    /// Creates an empty sync bracket between two datastores.
    pub fn new(cmd_id: u32, target: Location, source: Location) -> Self {
        Self {
            cmd_id,
            no_resp: false,
            target: Some(target),
            source: Some(source),
            meta: None,
            number_of_changes: None,
            commands: Vec::new(),
        }
    }

    /// Parses a `<Sync>` element.
    pub fn from_element(element: &Element) -> ProtocolResult<Self> {
        expect_tag(element, Tag::Sync)?;
        Ok(Self {
            cmd_id: required_number(element, Tag::CmdId)?,
            no_resp: element.has_child(Tag::NoResp),
            target: Location::child_of(element, Tag::Target)?,
            source: Location::child_of(element, Tag::Source)?,
            meta: Meta::child_of(element)?,
            number_of_changes: optional_number(element, Tag::NumberOfChanges)?,
            commands: element
                .children()
                .iter()
                .filter(|c| CommandKind::from_tag(c.tag).is_some())
                .cloned()
                .collect(),
        })
    }

    /// Builds a `<Sync>` element including the contained commands.
    pub fn to_element(&self) -> Element {
        let mut e = Element::node(Tag::Sync, vec![cmd_id_element(self.cmd_id)]);
        e.push_opt(flag(Tag::NoResp, self.no_resp));
        e.push_opt(self.target.as_ref().map(|l| l.to_element(Tag::Target)));
        e.push_opt(self.source.as_ref().map(|l| l.to_element(Tag::Source)));
        e.push_opt(Meta::opt_element(&self.meta));
        e.push_opt(number_opt(Tag::NumberOfChanges, self.number_of_changes));
        for cmd in &self.commands {
            e.push(cmd.clone());
        }
        e
    }
}

/// An Add, Replace, Delete, Copy or Move command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOpCmd {
    /// Operation.
    pub kind: SyncOpKind,
    /// Command identifier.
    pub cmd_id: u32,
    /// No status requested.
    pub no_resp: bool,
    /// Command level meta information.
    pub meta: Option<Meta>,
    /// Items.
    pub items: Vec<Item>,
}

impl SyncOpCmd {
    /// Creates a sync operation.
    pub fn new(kind: SyncOpKind, cmd_id: u32, items: Vec<Item>) -> Self {
        Self {
            kind,
            cmd_id,
            no_resp: false,
            meta: None,
            items,
        }
    }

    /// Parses an operation element.
    pub fn from_element(element: &Element) -> ProtocolResult<Self> {
        let kind = CommandKind::from_tag(element.tag)
            .and_then(CommandKind::sync_op)
            .ok_or(ProtocolError::UnexpectedElement {
                expected: Tag::Add,
                found: element.tag,
            })?;
        let items = Item::all_in(element)?;
        if items.is_empty() {
            return Err(ProtocolError::missing(Tag::Item, element.tag));
        }
        Ok(Self {
            kind,
            cmd_id: required_number(element, Tag::CmdId)?,
            no_resp: element.has_child(Tag::NoResp),
            meta: Meta::child_of(element)?,
            items,
        })
    }

    /// Builds the operation element.
    pub fn to_element(&self) -> Element {
        let mut e = Element::node(self.kind.command().tag(), vec![cmd_id_element(self.cmd_id)]);
        e.push_opt(flag(Tag::NoResp, self.no_resp));
        e.push_opt(Meta::opt_element(&self.meta));
        for item in &self.items {
            e.push(item.to_element());
        }
        e
    }
}

/// A `<Map>` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapCmd {
    /// Command identifier.
    pub cmd_id: u32,
    /// Receiving datastore.
    pub target: Location,
    /// Sending datastore.
    pub source: Location,
    /// Meta information.
    pub meta: Option<Meta>,
    /// Identifier pairs.
    pub items: Vec<MapItem>,
}

impl MapCmd {
    /// Parses a `<Map>` element.
    pub fn from_element(element: &Element) -> ProtocolResult<Self> {
        expect_tag(element, Tag::Map)?;
        let items = element
            .children_with(Tag::MapItem)
            .map(MapItem::from_element)
            .collect::<ProtocolResult<Vec<_>>>()?;
        if items.is_empty() {
            return Err(ProtocolError::missing(Tag::MapItem, Tag::Map));
        }
        Ok(Self {
            cmd_id: required_number(element, Tag::CmdId)?,
            target: Location::required_child(element, Tag::Target)?,
            source: Location::required_child(element, Tag::Source)?,
            meta: Meta::child_of(element)?,
            items,
        })
    }

    /// Builds a `<Map>` element.
    pub fn to_element(&self) -> Element {
        let mut e = Element::node(
            Tag::Map,
            vec![
                cmd_id_element(self.cmd_id),
                self.target.to_element(Tag::Target),
                self.source.to_element(Tag::Source),
            ],
        );
        e.push_opt(Meta::opt_element(&self.meta));
        for item in &self.items {
            e.push(item.to_element());
        }
        e
    }
}

/// A `<Get>` or `<Put>` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetPutCmd {
    /// `Get` or `Put`.
    pub kind: CommandKind,
    /// Command identifier.
    pub cmd_id: u32,
    /// No status requested.
    pub no_resp: bool,
    /// Preferred language.
    pub lang: Option<String>,
    /// Meta information.
    pub meta: Option<Meta>,
    /// Items.
    pub items: Vec<Item>,
}

impl GetPutCmd {
    /// Parses a `<Get>` or `<Put>` element.
    pub fn from_element(element: &Element) -> ProtocolResult<Self> {
        let kind = match element.tag {
            Tag::Get => CommandKind::Get,
            Tag::Put => CommandKind::Put,
            found => {
                return Err(ProtocolError::UnexpectedElement {
                    expected: Tag::Get,
                    found,
                })
            }
        };
        let items = Item::all_in(element)?;
        if items.is_empty() {
            return Err(ProtocolError::missing(Tag::Item, element.tag));
        }
        Ok(Self {
            kind,
            cmd_id: required_number(element, Tag::CmdId)?,
            no_resp: element.has_child(Tag::NoResp),
            lang: element.child_text(Tag::Lang),
            meta: Meta::child_of(element)?,
            items,
        })
    }

    /// Builds the element.
    pub fn to_element(&self) -> Element {
        let mut e = Element::node(self.kind.tag(), vec![cmd_id_element(self.cmd_id)]);
        e.push_opt(flag(Tag::NoResp, self.no_resp));
        e.push_opt(text_opt(Tag::Lang, &self.lang));
        e.push_opt(Meta::opt_element(&self.meta));
        for item in &self.items {
            e.push(item.to_element());
        }
        e
    }
}

/// A `<Status>` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusCmd {
    /// Command identifier.
    pub cmd_id: u32,
    /// Message the referenced command was in.
    pub msg_ref: u32,
    /// Referenced command (0 for the header).
    pub cmd_ref: u32,
    /// Name of the referenced command.
    pub cmd: String,
    /// Referenced target URIs.
    pub target_refs: Vec<String>,
    /// Referenced source URIs.
    pub source_refs: Vec<String>,
    /// Authentication challenge.
    pub chal: Option<Meta>,
    /// Status code.
    pub code: StatusCode,
    /// Items (e.g. anchors echoed for an Alert).
    pub items: Vec<Item>,
}

impl StatusCmd {
    /// Creates a status for a command.
    pub fn new(msg_ref: u32, cmd_ref: u32, cmd: CommandKind, code: StatusCode) -> Self {
        Self {
            cmd_id: 0,
            msg_ref,
            cmd_ref,
            cmd: cmd.name().to_string(),
            target_refs: Vec::new(),
            source_refs: Vec::new(),
            chal: None,
            code,
            items: Vec::new(),
        }
    }

    /// Returns the referenced command kind.
    pub fn cmd_kind(&self) -> Option<CommandKind> {
        CommandKind::from_name(&self.cmd)
    }

    /// Parses a `<Status>` element.
    pub fn from_element(element: &Element) -> ProtocolResult<Self> {
        expect_tag(element, Tag::Status)?;
        let code: u16 = required_number(element, Tag::Data)?;
        Ok(Self {
            cmd_id: required_number(element, Tag::CmdId)?,
            msg_ref: required_number(element, Tag::MsgRef)?,
            cmd_ref: required_number(element, Tag::CmdRef)?,
            cmd: required_text(element, Tag::Cmd)?,
            target_refs: element
                .children_with(Tag::TargetRef)
                .filter_map(|e| e.text_value().map(|s| s.trim().to_string()))
                .collect(),
            source_refs: element
                .children_with(Tag::SourceRef)
                .filter_map(|e| e.text_value().map(|s| s.trim().to_string()))
                .collect(),
            chal: element
                .child(Tag::Chal)
                .map(|c| Meta::child_of(c).map(Option::unwrap_or_default))
                .transpose()?,
            code: StatusCode(code),
            items: Item::all_in(element)?,
        })
    }

    /// Builds a `<Status>` element.
    pub fn to_element(&self) -> Element {
        let mut e = Element::node(
            Tag::Status,
            vec![
                cmd_id_element(self.cmd_id),
                Element::text(Tag::MsgRef, self.msg_ref.to_string()),
                Element::text(Tag::CmdRef, self.cmd_ref.to_string()),
                Element::text(Tag::Cmd, self.cmd.clone()),
            ],
        );
        for r in &self.target_refs {
            e.push(Element::text(Tag::TargetRef, r.clone()));
        }
        for r in &self.source_refs {
            e.push(Element::text(Tag::SourceRef, r.clone()));
        }
        e.push_opt(
            self.chal
                .as_ref()
                .map(|m| Element::node(Tag::Chal, vec![m.to_element()])),
        );
        e.push(Element::text(Tag::Data, self.code.to_string()));
        for item in &self.items {
            e.push(item.to_element());
        }
        e
    }
}

/// A `<Results>` response to a Get.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultsCmd {
    /// Command identifier.
    pub cmd_id: u32,
    /// Message the Get was in.
    pub msg_ref: Option<u32>,
    /// The Get's command identifier.
    pub cmd_ref: u32,
    /// Meta information.
    pub meta: Option<Meta>,
    /// Referenced target.
    pub target_ref: Option<String>,
    /// Referenced source.
    pub source_ref: Option<String>,
    /// Result items.
    pub items: Vec<Item>,
}

impl ResultsCmd {
    /// Parses a `<Results>` element.
    pub fn from_element(element: &Element) -> ProtocolResult<Self> {
        expect_tag(element, Tag::Results)?;
        Ok(Self {
            cmd_id: required_number(element, Tag::CmdId)?,
            msg_ref: optional_number(element, Tag::MsgRef)?,
            cmd_ref: required_number(element, Tag::CmdRef)?,
            meta: Meta::child_of(element)?,
            target_ref: element.child_text(Tag::TargetRef),
            source_ref: element.child_text(Tag::SourceRef),
            items: Item::all_in(element)?,
        })
    }

    /// Builds a `<Results>` element.
    pub fn to_element(&self) -> Element {
        let mut e = Element::node(Tag::Results, vec![cmd_id_element(self.cmd_id)]);
        e.push_opt(number_opt(Tag::MsgRef, self.msg_ref));
        e.push(Element::text(Tag::CmdRef, self.cmd_ref.to_string()));
        e.push_opt(Meta::opt_element(&self.meta));
        e.push_opt(text_opt(Tag::TargetRef, &self.target_ref));
        e.push_opt(text_opt(Tag::SourceRef, &self.source_ref));
        for item in &self.items {
            e.push(item.to_element());
        }
        e
    }
}

/// A `<Sequence>` or `<Atomic>` container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceCmd {
    /// `Sequence` or `Atomic`.
    pub kind: CommandKind,
    /// Command identifier.
    pub cmd_id: u32,
    /// No status requested.
    pub no_resp: bool,
    /// Meta information.
    pub meta: Option<Meta>,
    /// Contained commands in element form.
    pub commands: Vec<Element>,
}

impl SequenceCmd {
    /// Parses a `<Sequence>` or `<Atomic>` element.
    pub fn from_element(element: &Element) -> ProtocolResult<Self> {
        let kind = match element.tag {
            Tag::Sequence => CommandKind::Sequence,
            Tag::Atomic => CommandKind::Atomic,
            found => {
                return Err(ProtocolError::UnexpectedElement {
                    expected: Tag::Sequence,
                    found,
                })
            }
        };
        Ok(Self {
            kind,
            cmd_id: required_number(element, Tag::CmdId)?,
            no_resp: element.has_child(Tag::NoResp),
            meta: Meta::child_of(element)?,
            commands: element
                .children()
                .iter()
                .filter(|c| CommandKind::from_tag(c.tag).is_some())
                .cloned()
                .collect(),
        })
    }
}

/// Identification common to every body command, readable even from
/// otherwise malformed elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandRef {
    /// Command kind, if the tag is a command.
    pub kind: Option<CommandKind>,
    /// Command identifier, if present and numeric.
    pub cmd_id: Option<u32>,
    /// No status requested.
    pub no_resp: bool,
}

impl CommandRef {
    /// Reads the identification of a command element.
    pub fn of(element: &Element) -> Self {
        Self {
            kind: CommandKind::from_tag(element.tag),
            cmd_id: element.child_text(Tag::CmdId).and_then(|t| t.parse().ok()),
            no_resp: element.has_child(Tag::NoResp),
        }
    }
}

/// Any body command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolCommand {
    /// Alert.
    Alert(AlertCmd),
    /// Sync bracket.
    Sync(SyncCmd),
    /// Sync operation.
    SyncOp(SyncOpCmd),
    /// Map.
    Map(MapCmd),
    /// Get or Put.
    GetPut(GetPutCmd),
    /// Status.
    Status(StatusCmd),
    /// Results.
    Results(ResultsCmd),
    /// Sequence or Atomic.
    Sequence(SequenceCmd),
    /// Recognized command without an implementation (Exec, Search).
    Unimplemented(CommandKind, u32),
}

impl ProtocolCommand {
    /// Parses a body command element.
    pub fn from_element(element: &Element) -> ProtocolResult<Self> {
        let kind = CommandKind::from_tag(element.tag).ok_or(ProtocolError::UnexpectedElement {
            expected: Tag::Status,
            found: element.tag,
        })?;
        Ok(match kind {
            CommandKind::Alert => Self::Alert(AlertCmd::from_element(element)?),
            CommandKind::Sync => Self::Sync(SyncCmd::from_element(element)?),
            CommandKind::Add
            | CommandKind::Replace
            | CommandKind::Delete
            | CommandKind::Copy
            | CommandKind::Move => Self::SyncOp(SyncOpCmd::from_element(element)?),
            CommandKind::Map => Self::Map(MapCmd::from_element(element)?),
            CommandKind::Get | CommandKind::Put => Self::GetPut(GetPutCmd::from_element(element)?),
            CommandKind::Status => Self::Status(StatusCmd::from_element(element)?),
            CommandKind::Results => Self::Results(ResultsCmd::from_element(element)?),
            CommandKind::Sequence | CommandKind::Atomic => {
                Self::Sequence(SequenceCmd::from_element(element)?)
            }
            CommandKind::Exec | CommandKind::Search => {
                Self::Unimplemented(kind, required_number(element, Tag::CmdId)?)
            }
            CommandKind::SyncHdr => {
                return Err(ProtocolError::UnexpectedElement {
                    expected: Tag::Status,
                    found: Tag::SyncHdr,
                })
            }
        })
    }

    /// Returns the command kind.
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Alert(_) => CommandKind::Alert,
            Self::Sync(_) => CommandKind::Sync,
            Self::SyncOp(op) => op.kind.command(),
            Self::Map(_) => CommandKind::Map,
            Self::GetPut(gp) => gp.kind,
            Self::Status(_) => CommandKind::Status,
            Self::Results(_) => CommandKind::Results,
            Self::Sequence(seq) => seq.kind,
            Self::Unimplemented(kind, _) => *kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_roundtrip() {
        let item = Item {
            target: Some(Location::new("./contacts")),
            source: Some(Location::new("./addressbook")),
            meta: Some(Meta {
                anchor: Some(crate::meta::Anchor::new(None, "1")),
                ..Meta::default()
            }),
            ..Item::default()
        };
        let alert = AlertCmd::new(3, 200, vec![item]);
        let parsed = AlertCmd::from_element(&alert.to_element()).unwrap();
        assert_eq!(parsed, alert);
    }

    #[test]
    fn status_fields_and_order() {
        let mut status = StatusCmd::new(1, 0, CommandKind::SyncHdr, StatusCode::AUTH_ACCEPTED);
        status.cmd_id = 1;
        status.target_refs.push("http://srv".into());
        status.source_refs.push("IMEI:1".into());
        let e = status.to_element();
        let tags: Vec<Tag> = e.children().iter().map(|c| c.tag).collect();
        assert_eq!(
            tags,
            vec![
                Tag::CmdId,
                Tag::MsgRef,
                Tag::CmdRef,
                Tag::Cmd,
                Tag::TargetRef,
                Tag::SourceRef,
                Tag::Data
            ]
        );
        let parsed = StatusCmd::from_element(&e).unwrap();
        assert_eq!(parsed.cmd_kind(), Some(CommandKind::SyncHdr));
        assert_eq!(parsed, status);
    }

    #[test]
    fn sync_keeps_nested_commands() {
        let add = SyncOpCmd::new(SyncOpKind::Add, 5, vec![Item::with_source("1").data(&b"x"[..])]);
        let mut sync = SyncCmd::new(4, Location::new("./db"), Location::new("./local"));
        sync.number_of_changes = Some(1);
        sync.commands.push(add.to_element());
        let parsed = SyncCmd::from_element(&sync.to_element()).unwrap();
        assert_eq!(parsed.commands.len(), 1);
        assert_eq!(SyncOpCmd::from_element(&parsed.commands[0]).unwrap(), add);
    }

    #[test]
    fn sync_op_without_items_is_incomplete() {
        let e = Element::node(Tag::Replace, vec![Element::text(Tag::CmdId, "2")]);
        assert!(matches!(
            SyncOpCmd::from_element(&e),
            Err(ProtocolError::MissingElement { element: Tag::Item, .. })
        ));
    }

    #[test]
    fn dispatch() {
        let map = MapCmd {
            cmd_id: 9,
            target: Location::new("./db"),
            source: Location::new("./local"),
            meta: None,
            items: vec![MapItem::new("g1", "l1")],
        };
        let cmd = ProtocolCommand::from_element(&map.to_element()).unwrap();
        assert_eq!(cmd.kind(), CommandKind::Map);

        let exec = Element::node(Tag::Exec, vec![Element::text(Tag::CmdId, "3")]);
        assert_eq!(
            ProtocolCommand::from_element(&exec).unwrap(),
            ProtocolCommand::Unimplemented(CommandKind::Exec, 3)
        );

        let r = CommandRef::of(&Element::node(
            Tag::Add,
            vec![Element::text(Tag::CmdId, "7"), Element::empty(Tag::NoResp)],
        ));
        assert_eq!(r.kind, Some(CommandKind::Add));
        assert_eq!(r.cmd_id, Some(7));
        assert!(r.no_resp);
    }
}
