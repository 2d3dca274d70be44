//! Protocol commands as seen by the session.
//!
//! Every command is a [`Command`]: the attributes all commands share
//! ([`CommandCommon`]) plus a [`CommandBody`] variant with the kind-specific
//! fields. Behaviour is dispatched through [`CommandBehavior`].

mod alert;
mod getput;
mod header;
mod map;
mod status;
mod sync;
mod syncop;
mod unimplemented;

pub(crate) use alert::AlertCommand;
pub(crate) use getput::{GetCommand, PutCommand, ResultsCommand};
pub(crate) use header::HeaderCommand;
pub(crate) use map::MapCommand;
pub(crate) use status::StatusCommand;
pub(crate) use sync::{SyncCommand, SyncEndCommand};
pub(crate) use syncop::{IncomingSyncOp, SyncOpCommand};
pub(crate) use unimplemented::{SequenceCommand, UnimplementedCommand};

use crate::context::SessionPhase;
use crate::error::{EngineError, EngineResult};
use crate::session::Session;
use syncml_protocol::{
    AlertCmd, AlertCode, CommandKind, CommandRef, Element, GetPutCmd, MapCmd, ResultsCmd,
    SequenceCmd, StatusCmd, StatusCode, StatusDisposition, SyncCmd, SyncOpCmd,
};
use tracing::{debug, warn};

/// Attributes shared by all commands.
#[derive(Debug, Clone)]
pub(crate) struct CommandCommon {
    pub kind: CommandKind,
    /// Command ID of the latest issuance (or as received).
    pub cmd_id: u32,
    /// Message ID of the latest issuance (or as received).
    pub msg_id: u32,
    /// Every `(msg_id, cmd_id)` issuance still waiting for a status.
    pub issued: Vec<(u32, u32)>,
    pub no_resp: bool,
    pub allow_failure: bool,
    pub waiting_for_status: u32,
    /// A missing status for this command makes the session unsuccessful.
    pub essential: bool,
    pub datastore: Option<usize>,
    /// `TargetRef` and `SourceRef` echoed in the status.
    pub target_ref: Option<String>,
    pub source_ref: Option<String>,
    pub status_sent: bool,
}

impl CommandCommon {
    pub fn incoming(kind: CommandKind, cmd_id: u32, msg_id: u32, no_resp: bool) -> Self {
        Self {
            kind,
            cmd_id,
            msg_id,
            issued: Vec::new(),
            no_resp,
            allow_failure: false,
            waiting_for_status: 0,
            essential: false,
            datastore: None,
            target_ref: None,
            source_ref: None,
            status_sent: false,
        }
    }

    pub fn outgoing(kind: CommandKind) -> Self {
        Self {
            essential: true,
            ..Self::incoming(kind, 0, 0, false)
        }
    }
}

/// Kind-specific part of a command.
#[derive(Debug)]
pub(crate) enum CommandBody {
    Header(HeaderCommand),
    Alert(AlertCommand),
    Sync(SyncCommand),
    SyncEnd(SyncEndCommand),
    SyncOp(SyncOpCommand),
    IncomingSyncOp(IncomingSyncOp),
    Map(MapCommand),
    Get(GetCommand),
    Put(PutCommand),
    Results(ResultsCommand),
    Status(StatusCommand),
    Sequence(SequenceCommand),
    Unimplemented(UnimplementedCommand),
}

impl CommandBody {
    fn behavior(&self) -> &dyn CommandBehavior {
        match self {
            CommandBody::Header(c) => c,
            CommandBody::Alert(c) => c,
            CommandBody::Sync(c) => c,
            CommandBody::SyncEnd(c) => c,
            CommandBody::SyncOp(c) => c,
            CommandBody::IncomingSyncOp(c) => c,
            CommandBody::Map(c) => c,
            CommandBody::Get(c) => c,
            CommandBody::Put(c) => c,
            CommandBody::Results(c) => c,
            CommandBody::Status(c) => c,
            CommandBody::Sequence(c) => c,
            CommandBody::Unimplemented(c) => c,
        }
    }

    fn behavior_mut(&mut self) -> &mut dyn CommandBehavior {
        match self {
            CommandBody::Header(c) => c,
            CommandBody::Alert(c) => c,
            CommandBody::Sync(c) => c,
            CommandBody::SyncEnd(c) => c,
            CommandBody::SyncOp(c) => c,
            CommandBody::IncomingSyncOp(c) => c,
            CommandBody::Map(c) => c,
            CommandBody::Get(c) => c,
            CommandBody::Put(c) => c,
            CommandBody::Results(c) => c,
            CommandBody::Status(c) => c,
            CommandBody::Sequence(c) => c,
            CommandBody::Unimplemented(c) => c,
        }
    }
}

/// Per-kind behaviour of a command.
pub(crate) trait CommandBehavior: std::fmt::Debug {
    /// Validates a parsed command. False answers it with 400.
    fn analyze(&mut self, _common: &CommandCommon) -> bool {
        true
    }

    /// Executes an incoming command.
    ///
    /// Returns false if the command must run again with the next message.
    fn execute(&mut self, common: &mut CommandCommon, session: &mut Session) -> EngineResult<bool> {
        session.send_status(common, StatusCode::FEATURE_NOT_SUPPORTED)?;
        Ok(true)
    }

    /// Builds the wire element of an outgoing command.
    fn element(&self, common: &CommandCommon, cmd_id: u32) -> Element {
        let _ = cmd_id;
        Element::empty(common.kind.tag())
    }

    /// Handles a status for one issuance. Returns true if that issuance is
    /// resolved.
    fn handle_status(
        &mut self,
        common: &mut CommandCommon,
        status: &StatusCmd,
        _session: &mut Session,
    ) -> EngineResult<bool> {
        default_status(common, status.code)
    }

    /// Returns false while more of the command remains to be issued.
    fn finished(&self) -> bool {
        true
    }

    /// Bytes the reply needs beyond one plain status.
    fn reply_reserve(&self, _session: &Session) -> usize {
        0
    }

    /// Number of statuses the reply contains.
    fn reply_count(&self) -> usize {
        1
    }

    /// Records what must be repeated after a resume.
    fn mark_pending_for_resume(&self, _common: &CommandCommon, _session: &mut Session, _unsent: bool) {}
}

/// Applies the common status table to a status.
pub(crate) fn default_status(common: &CommandCommon, code: StatusCode) -> EngineResult<bool> {
    match code.disposition(common.allow_failure) {
        StatusDisposition::Pending => Ok(false),
        StatusDisposition::Resolved => Ok(true),
        StatusDisposition::Failed => {
            warn!(
                cmd = %common.kind,
                cmd_id = common.cmd_id,
                status = code.code(),
                "command failed at remote"
            );
            Ok(true)
        }
        StatusDisposition::Abort(reported) => Err(EngineError::fatal(
            reported,
            format!(
                "{} {} rejected by remote with {}",
                common.kind, common.cmd_id, code
            ),
        )),
    }
}

/// A protocol command owned by the session.
#[derive(Debug)]
pub(crate) struct Command {
    pub common: CommandCommon,
    pub body: CommandBody,
}

impl Command {
    pub fn new(common: CommandCommon, body: CommandBody) -> Self {
        Self { common, body }
    }

    /// Creates an outgoing command.
    pub fn outgoing(kind: CommandKind, body: CommandBody) -> Self {
        Self::new(CommandCommon::outgoing(kind), body)
    }

    /// Returns true if the command expects a status from the remote.
    pub fn needs_status(&self) -> bool {
        !self.common.no_resp && self.common.kind != CommandKind::Status
    }

    /// Returns true if executing the command produces a reply.
    pub fn needs_reply(&self) -> bool {
        !self.common.no_resp
            && !matches!(
                self.body,
                CommandBody::Status(_) | CommandBody::SyncEnd(_)
            )
    }

    /// Checks legality in the current phase and the command's structure.
    pub fn analyze(&mut self, phase: SessionPhase, is_client: bool) -> bool {
        let Command { common, body } = self;
        is_legal(body, phase, is_client) && body.behavior_mut().analyze(common)
    }

    pub fn execute(&mut self, session: &mut Session) -> EngineResult<bool> {
        let Command { common, body } = self;
        body.behavior_mut().execute(common, session)
    }

    pub fn element(&self, cmd_id: u32) -> Element {
        self.body.behavior().element(&self.common, cmd_id)
    }

    /// Records an issuance under the given IDs.
    pub fn record_issue(&mut self, msg_id: u32, cmd_id: u32) {
        self.common.msg_id = msg_id;
        self.common.cmd_id = cmd_id;
        if self.needs_status() {
            self.common.issued.push((msg_id, cmd_id));
            self.common.waiting_for_status += 1;
        }
    }

    /// Returns true if a status with these references belongs to this command.
    pub fn matches(&self, msg_ref: u32, cmd_ref: u32) -> bool {
        self.common.issued.contains(&(msg_ref, cmd_ref))
    }

    /// Handles a matching status. Returns true once the command is done.
    pub fn handle_status(&mut self, status: &StatusCmd, session: &mut Session) -> EngineResult<bool> {
        let Command { common, body } = self;
        let resolved = body.behavior_mut().handle_status(common, status, session)?;
        if resolved {
            let key = (status.msg_ref, status.cmd_ref);
            common.issued.retain(|issued| *issued != key);
            common.waiting_for_status = common.waiting_for_status.saturating_sub(1);
        }
        Ok(resolved && common.waiting_for_status == 0 && body.behavior().finished())
    }

    pub fn finished(&self) -> bool {
        self.body.behavior().finished()
    }

    pub fn reply_reserve(&self, session: &Session) -> usize {
        self.body.behavior().reply_reserve(session)
    }

    pub fn reply_count(&self) -> usize {
        self.body.behavior().reply_count()
    }

    pub fn mark_pending_for_resume(&self, session: &mut Session, unsent: bool) {
        self.body
            .behavior()
            .mark_pending_for_resume(&self.common, session, unsent);
    }

    /// Replaces the body of an incoming command with a status-only answer.
    pub fn reject(&mut self, status: StatusCode) {
        self.body = CommandBody::Unimplemented(UnimplementedCommand::new(status));
    }
}

fn is_legal(body: &CommandBody, phase: SessionPhase, is_client: bool) -> bool {
    if phase == SessionPhase::Done {
        return matches!(body, CommandBody::Status(_) | CommandBody::Results(_));
    }
    match body {
        CommandBody::Alert(alert) if AlertCode::is_sync_mode(alert.code) => {
            phase <= SessionPhase::Alert
        }
        CommandBody::Sync(_) | CommandBody::SyncEnd(_) | CommandBody::IncomingSyncOp(_) => {
            if is_client {
                phase == SessionPhase::SyncEnd
            } else {
                matches!(phase, SessionPhase::SyncStart | SessionPhase::SyncOps)
            }
        }
        CommandBody::Map(_) => !is_client && phase == SessionPhase::Map,
        _ => true,
    }
}

/// Parses the body of an incoming message into commands.
///
/// Sync brackets expand into the Sync itself, its operations and an
/// end marker. Sequences are flattened. Commands that fail to parse become
/// status-only answers; elements without a command ID are dropped.
pub(crate) fn parse_incoming(body: &[Element], msg_id: u32) -> Vec<Command> {
    let mut commands = Vec::new();
    for element in body {
        parse_element(element, msg_id, false, &mut commands);
    }
    commands
}

fn parse_element(element: &Element, msg_id: u32, in_sync: bool, out: &mut Vec<Command>) {
    let reference = CommandRef::of(element);
    let Some(kind) = reference.kind else {
        warn!(element = element.tag.name(), "ignoring unknown body element");
        return;
    };
    let Some(cmd_id) = reference.cmd_id else {
        warn!(cmd = %kind, "ignoring command without CmdID");
        return;
    };
    let common = CommandCommon::incoming(kind, cmd_id, msg_id, reference.no_resp);
    let rejected = |status: StatusCode| {
        Command::new(
            common.clone(),
            CommandBody::Unimplemented(UnimplementedCommand::new(status)),
        )
    };
    let parsed: Result<Vec<Command>, EngineError> = match kind {
        CommandKind::Sync => SyncCmd::from_element(element)
            .map_err(EngineError::from)
            .map(|sync| {
                let mut cmds = vec![Command::new(
                    common.clone(),
                    CommandBody::Sync(SyncCommand::incoming(&sync)),
                )];
                for child in &sync.commands {
                    parse_element(child, msg_id, true, &mut cmds);
                }
                let end = CommandCommon::incoming(kind, cmd_id, msg_id, true);
                cmds.push(Command::new(end, CommandBody::SyncEnd(SyncEndCommand)));
                cmds
            }),
        CommandKind::Add
        | CommandKind::Replace
        | CommandKind::Delete
        | CommandKind::Copy
        | CommandKind::Move => SyncOpCmd::from_element(element)
            .map_err(EngineError::from)
            .map(|op| {
                vec![Command::new(
                    common.clone(),
                    CommandBody::IncomingSyncOp(IncomingSyncOp::new(op, in_sync)),
                )]
            }),
        CommandKind::Alert => AlertCmd::from_element(element)
            .map_err(EngineError::from)
            .map(|alert| {
                vec![Command::new(
                    common.clone(),
                    CommandBody::Alert(AlertCommand::incoming(alert)),
                )]
            }),
        CommandKind::Map => MapCmd::from_element(element)
            .map_err(EngineError::from)
            .map(|map| {
                vec![Command::new(
                    common.clone(),
                    CommandBody::Map(MapCommand::incoming(map)),
                )]
            }),
        CommandKind::Get | CommandKind::Put => GetPutCmd::from_element(element)
            .map_err(EngineError::from)
            .map(|cmd| {
                let body = if kind == CommandKind::Get {
                    CommandBody::Get(GetCommand::incoming(cmd))
                } else {
                    CommandBody::Put(PutCommand::incoming(cmd))
                };
                vec![Command::new(common.clone(), body)]
            }),
        CommandKind::Results => ResultsCmd::from_element(element)
            .map_err(EngineError::from)
            .map(|results| {
                vec![Command::new(
                    common.clone(),
                    CommandBody::Results(ResultsCommand::incoming(results)),
                )]
            }),
        CommandKind::Status => StatusCmd::from_element(element)
            .map_err(EngineError::from)
            .map(|status| {
                let mut common = common.clone();
                common.no_resp = true;
                vec![Command::new(
                    common,
                    CommandBody::Status(StatusCommand::new(status)),
                )]
            }),
        CommandKind::Sequence => SequenceCmd::from_element(element)
            .map_err(EngineError::from)
            .map(|sequence| {
                let mut cmds = vec![Command::new(
                    common.clone(),
                    CommandBody::Sequence(SequenceCommand),
                )];
                for child in &sequence.commands {
                    parse_element(child, msg_id, in_sync, &mut cmds);
                }
                cmds
            }),
        CommandKind::Atomic | CommandKind::Exec | CommandKind::Search => {
            debug!(cmd = %kind, cmd_id, "command not supported");
            Ok(vec![rejected(StatusCode::FEATURE_NOT_SUPPORTED)])
        }
        CommandKind::SyncHdr => Ok(vec![rejected(StatusCode::BAD_REQUEST)]),
    };
    match parsed {
        Ok(cmds) => out.extend(cmds),
        Err(e) => {
            warn!(cmd = %kind, cmd_id, error = %e, "malformed command");
            if kind == CommandKind::Status {
                return;
            }
            out.push(rejected(e.status()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncml_protocol::{Item, Location, Tag};

    fn add(cmd_id: u32) -> Element {
        SyncOpCmd::new(
            syncml_protocol::SyncOpKind::Add,
            cmd_id,
            vec![Item::with_source("c1").data("x")],
        )
        .to_element()
    }

    #[test]
    fn sync_expands_into_bracket() {
        let mut sync = SyncCmd::new(3, Location::new("./contacts"), Location::new("card"));
        sync.commands = vec![add(4), add(5)];
        let cmds = parse_incoming(&[sync.to_element()], 2);
        assert_eq!(cmds.len(), 4);
        assert!(matches!(cmds[0].body, CommandBody::Sync(_)));
        assert!(matches!(cmds[1].body, CommandBody::IncomingSyncOp(_)));
        assert!(matches!(cmds[3].body, CommandBody::SyncEnd(_)));
        assert_eq!(cmds[2].common.cmd_id, 5);
        assert!(!cmds[3].needs_reply());
    }

    #[test]
    fn unsupported_and_malformed_commands_get_status() {
        let atomic = Element::node(Tag::Atomic, vec![Element::text(Tag::CmdId, "7")]);
        let broken = Element::node(Tag::Alert, vec![Element::text(Tag::CmdId, "8")]);
        let no_id = Element::node(Tag::Alert, vec![Element::text(Tag::Data, "200")]);
        let cmds = parse_incoming(&[atomic, broken, no_id], 1);
        assert_eq!(cmds.len(), 2);
        match &cmds[0].body {
            CommandBody::Unimplemented(u) => assert_eq!(u.status, StatusCode::FEATURE_NOT_SUPPORTED),
            other => panic!("unexpected {other:?}"),
        }
        match &cmds[1].body {
            CommandBody::Unimplemented(u) => assert_eq!(u.status, StatusCode::INCOMPLETE_COMMAND),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn phase_legality() {
        let mut sync = SyncCmd::new(3, Location::new("./contacts"), Location::new("card"));
        sync.commands = vec![add(4)];
        let mut cmds = parse_incoming(&[sync.to_element()], 2);
        assert!(!cmds[0].analyze(SessionPhase::Alert, false));
        assert!(cmds[0].analyze(SessionPhase::SyncStart, false));
        assert!(!cmds[0].analyze(SessionPhase::SyncOps, true));
        assert!(cmds[0].analyze(SessionPhase::SyncEnd, true));

        let alert = AlertCmd::new(1, 200, vec![Item::with_target("./contacts")]).to_element();
        let mut cmds = parse_incoming(&[alert], 1);
        assert!(cmds[0].analyze(SessionPhase::Alert, false));
        assert!(!cmds[0].analyze(SessionPhase::SyncEnd, false));

        let next = AlertCmd::new(1, AlertCode::NEXT_MESSAGE, vec![]).to_element();
        let mut cmds = parse_incoming(&[next], 1);
        assert!(cmds[0].analyze(SessionPhase::SyncEnd, true));
    }

    #[test]
    fn status_classification() {
        let mut common = CommandCommon::outgoing(CommandKind::Add);
        for code in [100u16, 101, 202] {
            assert!(!default_status(&common, StatusCode(code)).unwrap(), "{code}");
        }
        for code in [200u16, 418] {
            assert!(default_status(&common, StatusCode(code)).unwrap(), "{code}");
        }
        let err = default_status(&common, StatusCode(300)).unwrap_err();
        assert_eq!(err.status(), StatusCode::INCOMPLETE_COMMAND);
        for code in [404u16, 412, 419] {
            let err = default_status(&common, StatusCode(code)).unwrap_err();
            assert_eq!(err.status(), StatusCode::COMMAND_FAILED);
            assert!(err.is_fatal());
        }
        for code in [500u16, 512] {
            let err = default_status(&common, StatusCode(code)).unwrap_err();
            assert_eq!(err.status(), StatusCode(code));
        }
        common.allow_failure = true;
        for code in [404u16, 412, 419, 500, 512] {
            assert!(default_status(&common, StatusCode(code)).unwrap(), "{code}");
        }
        assert!(default_status(&common, StatusCode(300)).is_err());
    }
}
