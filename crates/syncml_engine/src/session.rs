//! The session driver.
//!
//! A [`Session`] turns each incoming message into exactly one outgoing
//! message (or none once a client session is over). Commands flow through
//! three queues:
//!
//! - incoming commands waiting to be executed, possibly across messages
//! - outgoing commands that did not fit the current message
//! - issued commands waiting for their status
//!
//! Package boundaries drive the phase: when a `Final` arrives or is sent
//! the phase moves forward according to the role.

use crate::assembler::MessageAssembler;
use crate::auth::{AuthOutcome, Authenticator};
use crate::backend::BackendFactory;
use crate::command::{
    parse_incoming, AlertCommand, Command, CommandBehavior, CommandBody, CommandCommon,
    GetCommand, HeaderCommand, MapCommand, PutCommand, StatusCommand, SyncCommand,
    SyncOpCommand,
};
use crate::config::SessionConfig;
use crate::context::{SessionContext, SessionPhase};
use crate::datastore::{DatastoreSession, DatastoreStats};
use crate::error::{EngineError, EngineResult};
use crate::resume::ResumeStore;
use crate::tracker::StatusTracker;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::Arc;
use syncml_protocol::{
    AlertCode, CommandKind, Cred, Element, Item, Location, Meta, StatusCmd, StatusCode, SyncHdr,
    SyncMlVersion, WireMessage,
};
use tracing::{debug, error, info, warn};

/// The answer to one incoming message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Encoded message to send, if any.
    pub message: Option<Vec<u8>>,
    /// The message ends our package.
    pub is_final: bool,
    /// The session is over.
    pub done: bool,
}

/// Outcome of a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    /// All essential commands were confirmed and nothing failed.
    pub successful: bool,
    /// The session was suspended.
    pub suspended: bool,
    /// The session was aborted with this status.
    pub aborted: Option<StatusCode>,
    /// Essential commands without a status.
    pub missing_statuses: usize,
    /// Statistics per local datastore URI.
    pub datastores: Vec<(String, DatastoreStats)>,
}

/// One SyncML session, client or server.
pub struct Session {
    config: SessionConfig,
    factory: Arc<dyn BackendFactory>,
    resume_store: Arc<dyn ResumeStore>,
    authenticator: Option<Arc<dyn Authenticator>>,
    pub(crate) ctx: SessionContext,
    pub(crate) datastores: Vec<DatastoreSession>,
    /// Datastore of the incoming Sync bracket being executed.
    pub(crate) current_sync: Option<usize>,
    assembler: MessageAssembler,
    incoming: VecDeque<Command>,
    outgoing: VecDeque<Command>,
    tracker: StatusTracker,
    last_answer: Option<Reply>,
    /// A final message arrived while commands were still deferred; holds
    /// whether we were awaiting it.
    final_pending: Option<bool>,
    dev_inf_requested: bool,
    ended: bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("ctx", &self.ctx)
            .field("datastores", &self.datastores)
            .field("incoming", &self.incoming.len())
            .field("outgoing", &self.outgoing.len())
            .field("tracked", &self.tracker.len())
            .finish_non_exhaustive()
    }
}

fn strip_relative(uri: &str) -> &str {
    uri.trim_start_matches("./")
}

impl Session {
    /// Creates a session.
    pub fn new(
        config: SessionConfig,
        session_id: impl Into<String>,
        factory: Arc<dyn BackendFactory>,
        resume_store: Arc<dyn ResumeStore>,
    ) -> Self {
        let ctx = SessionContext::new(&config, session_id);
        let assembler = MessageAssembler::new(ctx.encoding, ctx.version.namespace());
        Self {
            config,
            factory,
            resume_store,
            authenticator: None,
            ctx,
            datastores: Vec::new(),
            current_sync: None,
            assembler,
            incoming: VecDeque::new(),
            outgoing: VecDeque::new(),
            tracker: StatusTracker::new(),
            last_answer: None,
            final_pending: None,
            dev_inf_requested: false,
            ended: false,
        }
    }

    /// Requires devices to authenticate (servers only).
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Returns the session identifier.
    pub fn session_id(&self) -> &str {
        &self.ctx.session_id
    }

    /// Returns the current phase.
    pub fn phase(&self) -> SessionPhase {
        self.ctx.phase
    }

    /// Returns true once the session is over.
    pub fn is_done(&self) -> bool {
        self.ctx.is_terminated()
    }

    /// Returns the URI the remote asked us to send the next message to.
    pub fn resp_uri(&self) -> Option<&str> {
        self.ctx.resp_uri.as_deref()
    }

    /// Returns the device information the remote sent.
    pub fn remote_dev_inf(&self) -> Option<&Bytes> {
        self.ctx.remote_dev_inf.as_ref()
    }

    /// Returns the datastores taking part in the session.
    pub fn datastores(&self) -> &[DatastoreSession] {
        &self.datastores
    }

    /// Returns the last answer, kept for replay when the remote retries.
    pub fn last_answer(&self) -> Option<&Reply> {
        self.last_answer.as_ref()
    }

    /// Asks for a suspend. The Alert goes out with the next message.
    pub fn suspend(&mut self) {
        info!(session = %self.ctx.session_id, "suspend requested");
        self.ctx.suspend_requested = true;
    }

    /// Summarizes the session.
    pub fn summary(&self) -> SessionSummary {
        let missing_statuses = self.tracker.missing_essential();
        SessionSummary {
            successful: self.ctx.aborted.is_none()
                && !self.ctx.suspended
                && missing_statuses == 0
                && self.datastores.iter().all(|ds| !ds.failed),
            suspended: self.ctx.suspended,
            aborted: self.ctx.aborted,
            missing_statuses,
            datastores: self
                .datastores
                .iter()
                .map(|ds| (ds.local_uri().to_string(), ds.stats().clone()))
                .collect(),
        }
    }

    pub(crate) fn resume_store(&self) -> Arc<dyn ResumeStore> {
        Arc::clone(&self.resume_store)
    }

    /// Builds the first message of a client session.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` for servers or when the session already
    /// started, and backend or resume store errors while opening datastores.
    pub fn start(&mut self) -> EngineResult<Vec<u8>> {
        if !self.ctx.is_client() || self.ctx.outgoing_msg_id > 0 {
            return Err(EngineError::InvalidState(
                "only a new client session can start".into(),
            ));
        }
        for ds_config in self.config.datastores.clone() {
            let Some(backend) = self.factory.open(&ds_config)? else {
                warn!(datastore = %ds_config.local_uri, "no backend for datastore");
                continue;
            };
            let remote = ds_config.remote_uri.clone();
            let ds = DatastoreSession::open(
                ds_config,
                backend,
                true,
                &self.ctx.remote_uri,
                &remote,
                self.resume_store.as_ref(),
            )?;
            self.datastores.push(ds);
        }
        info!(
            session = %self.ctx.session_id,
            server = %self.ctx.remote_uri,
            datastores = self.datastores.len(),
            "starting sync session"
        );
        self.ctx.advance(SessionPhase::Alert);
        self.begin_message();
        for idx in 0..self.datastores.len() {
            let code = self.datastores[idx].client_alert_code();
            self.issue_sync_alert(idx, code)?;
        }
        if let Some(dev_inf) = self.config.dev_inf.clone() {
            self.issue(PutCommand::dev_inf(self.ctx.version, self.ctx.encoding, dev_inf))?;
        }
        let reply = self.complete_message()?;
        reply
            .message
            .ok_or_else(|| EngineError::InvalidState("no first message built".into()))
    }

    /// Processes one incoming message and builds the answer.
    ///
    /// # Errors
    ///
    /// Returns decoding errors for unreadable messages and `InvalidState`
    /// for messages out of sequence or after the session ended. Protocol
    /// failures inside a readable message are answered with statuses and
    /// abort the session instead.
    pub fn process_message(&mut self, bytes: &[u8]) -> EngineResult<Reply> {
        let (message, encoding) = WireMessage::decode(bytes)?;
        let header = &message.header;

        if self.ctx.incoming_msg_id != 0
            && header.msg_id == self.ctx.incoming_msg_id
            && header.session_id == self.ctx.session_id
        {
            return match &self.last_answer {
                Some(answer) => {
                    info!(msg_id = header.msg_id, "replaying answer to resent message");
                    Ok(answer.clone())
                }
                None => Err(EngineError::InvalidState(format!(
                    "message {} resent but no answer is buffered",
                    header.msg_id
                ))),
            };
        }
        if !self.ctx.is_client()
            && self.ctx.incoming_msg_id != 0
            && (header.msg_id < self.ctx.incoming_msg_id
                || header.session_id != self.ctx.session_id)
        {
            info!(
                session = %header.session_id,
                msg_id = header.msg_id,
                "client restarted the session"
            );
            self.restart(header.session_id.clone());
        } else if self.ctx.is_terminated() {
            return Err(EngineError::InvalidState("session is over".into()));
        } else if header.msg_id <= self.ctx.incoming_msg_id {
            return Err(EngineError::InvalidState(format!(
                "message {} out of sequence after {}",
                header.msg_id, self.ctx.incoming_msg_id
            )));
        }

        if !self.ctx.is_client() {
            self.ctx.encoding = encoding;
            if let Ok(version) = header.version() {
                self.ctx.version = version;
            }
            self.ctx.session_id = header.session_id.clone();
            self.ctx.remote_uri = header.source.uri.clone();
            self.ctx.local_uri = header.target.uri.clone();
        }
        self.ctx.incoming_msg_id = header.msg_id;
        self.ctx.incoming_final = message.is_final;
        if message.is_final {
            self.final_pending = Some(self.ctx.awaiting_remote);
            self.ctx.awaiting_remote = false;
        }
        debug!(
            msg_id = header.msg_id,
            is_final = message.is_final,
            commands = message.body.len(),
            phase = self.ctx.phase.as_str(),
            "processing message"
        );

        self.begin_message();
        let mut header_cmd = Command::new(
            CommandCommon::incoming(CommandKind::SyncHdr, 0, header.msg_id, header.no_resp),
            CommandBody::Header(HeaderCommand::incoming(header.clone())),
        );
        if let Err(e) = header_cmd.execute(self) {
            self.command_failed(&mut header_cmd, e)?;
        }
        self.flush_outgoing()?;

        if self.ctx.aborted.is_none() {
            let is_client = self.ctx.is_client();
            for mut cmd in parse_incoming(&message.body, message.header.msg_id) {
                if !cmd.analyze(self.ctx.phase, is_client) {
                    debug!(cmd = %cmd.common.kind, cmd_id = cmd.common.cmd_id, "command rejected");
                    cmd.reject(StatusCode::BAD_REQUEST);
                }
                self.incoming.push_back(cmd);
            }
        }
        self.run_incoming()?;

        if self.incoming.is_empty() {
            if let Some(was_awaiting) = self.final_pending.take() {
                self.after_incoming(was_awaiting)?;
            }
        }
        self.generate()?;
        self.complete_message()
    }

    fn restart(&mut self, session_id: String) {
        let authenticator = self.authenticator.take();
        *self = Session::new(
            self.config.clone(),
            session_id,
            Arc::clone(&self.factory),
            Arc::clone(&self.resume_store),
        );
        self.authenticator = authenticator;
    }

    fn begin_message(&mut self) {
        let msg_id = self.ctx.next_outgoing_msg();
        let mut header = SyncHdr::new(
            self.ctx.version,
            self.ctx.session_id.clone(),
            msg_id,
            Location::new(self.ctx.remote_uri.clone()),
            Location::new(self.ctx.local_uri.clone()),
        );
        if self.ctx.is_client() && !self.ctx.authenticated {
            if let Some((user, password)) = &self.config.credentials {
                header.cred = Some(Cred::basic(user, password));
            }
        }
        header.meta = Some(Meta {
            max_msg_size: Some(self.config.max_msg_size),
            max_obj_size: self
                .config
                .max_obj_size
                .filter(|_| self.ctx.version.supports_large_objects()),
            ..Meta::default()
        });
        if !self.ctx.is_client() {
            header.resp_uri = self.config.resp_uri.clone();
        }
        self.assembler
            .set_encoding(self.ctx.encoding, self.ctx.version.namespace());
        self.assembler
            .start(header.to_element(), self.ctx.max_outgoing_msg_size);

        let mut tracked = Command::outgoing(
            CommandKind::SyncHdr,
            CommandBody::Header(HeaderCommand::outgoing()),
        );
        tracked.common.essential = false;
        tracked.record_issue(msg_id, 0);
        self.tracker.push(tracked);
    }

    // ---- issuing ----

    /// Issues an outgoing command, queueing it if it does not fit.
    pub(crate) fn issue(&mut self, cmd: Command) -> EngineResult<()> {
        if !self.outgoing.is_empty() || !self.assembler.is_open() {
            self.outgoing.push_back(cmd);
            return Ok(());
        }
        if let Some(cmd) = self.issue_now(cmd)? {
            self.outgoing.push_back(cmd);
        }
        Ok(())
    }

    /// Adds a command to the message. Returns it back if it does not fit.
    fn issue_now(&mut self, mut cmd: Command) -> EngineResult<Option<Command>> {
        let element = cmd.element(self.ctx.peek_cmd_id());
        if !self.assembler.fits(&element) {
            if self.assembler.command_count() == 0 {
                return Err(EngineError::fatal(
                    StatusCode::COMMAND_FAILED,
                    format!("{} does not fit an empty message", cmd.common.kind),
                ));
            }
            return Ok(Some(cmd));
        }
        let cmd_id = self.ctx.alloc_cmd_id();
        self.assembler.add(element);
        cmd.record_issue(self.ctx.outgoing_msg_id, cmd_id);
        if cmd.needs_status() {
            self.tracker.push(cmd);
        }
        Ok(None)
    }

    fn flush_outgoing(&mut self) -> EngineResult<()> {
        while let Some(cmd) = self.outgoing.pop_front() {
            if let Some(cmd) = self.issue_now(cmd)? {
                self.outgoing.push_front(cmd);
                break;
            }
        }
        Ok(())
    }

    /// Builds the status for an incoming command.
    pub(crate) fn status_for(&self, common: &CommandCommon, code: StatusCode) -> StatusCmd {
        let mut status = StatusCmd::new(common.msg_id, common.cmd_id, common.kind, code);
        status.target_refs = common.target_ref.iter().cloned().collect();
        status.source_refs = common.source_ref.iter().cloned().collect();
        status
    }

    /// Answers an incoming command with a status.
    pub(crate) fn send_status(
        &mut self,
        common: &mut CommandCommon,
        code: StatusCode,
    ) -> EngineResult<()> {
        let status = self.status_for(common, code);
        self.send_status_cmd(common, status)
    }

    /// Sends a prepared status for an incoming command.
    pub(crate) fn send_status_cmd(
        &mut self,
        common: &mut CommandCommon,
        status: StatusCmd,
    ) -> EngineResult<()> {
        common.status_sent = true;
        if common.no_resp {
            return Ok(());
        }
        self.issue(Command::outgoing(
            CommandKind::Status,
            CommandBody::Status(StatusCommand::new(status)),
        ))
    }

    /// Issues a control alert whose loss does not matter.
    pub(crate) fn issue_alert(&mut self, code: u16, items: Vec<Item>) -> EngineResult<()> {
        let mut cmd = Command::outgoing(
            CommandKind::Alert,
            CommandBody::Alert(AlertCommand::outgoing(code, items)),
        );
        cmd.common.essential = false;
        cmd.common.allow_failure = true;
        self.issue(cmd)
    }

    /// Issues the sync mode alert of a datastore.
    pub(crate) fn issue_sync_alert(&mut self, idx: usize, code: u16) -> EngineResult<()> {
        let max_obj_size = self
            .config
            .max_obj_size
            .filter(|_| self.ctx.remote_supports_large_objects());
        let item = self.datastores[idx].alert_item(max_obj_size);
        let mut cmd = Command::outgoing(
            CommandKind::Alert,
            CommandBody::Alert(AlertCommand::outgoing(code, vec![item])),
        );
        cmd.common.datastore = Some(idx);
        cmd.common.allow_failure = true;
        self.issue(cmd)
    }

    // ---- lookups used by commands ----

    pub(crate) fn find_datastore(&self, uri: &str) -> Option<usize> {
        let uri = strip_relative(uri);
        self.datastores
            .iter()
            .position(|ds| strip_relative(ds.local_uri()) == uri)
    }

    /// Opens a datastore a client alerted, or returns the open one.
    pub(crate) fn open_datastore(
        &mut self,
        local_uri: &str,
        remote_db: &str,
    ) -> EngineResult<Option<usize>> {
        if let Some(idx) = self.find_datastore(local_uri) {
            return Ok(Some(idx));
        }
        let Some(config) = self.factory.datastore_config(local_uri) else {
            return Ok(None);
        };
        let Some(backend) = self.factory.open(&config)? else {
            return Ok(None);
        };
        let ds = DatastoreSession::open(
            config,
            backend,
            self.ctx.is_client(),
            &self.ctx.remote_uri,
            remote_db,
            self.resume_store.as_ref(),
        )?;
        self.datastores.push(ds);
        Ok(Some(self.datastores.len() - 1))
    }

    /// Finds the datastore an alert item refers to.
    pub(crate) fn datastore_for_item(&self, item: &Item) -> Option<usize> {
        item.target_uri()
            .and_then(|uri| self.find_datastore(uri))
            .or_else(|| {
                let source = item.source_uri()?;
                self.datastores.iter().position(|ds| ds.remote_uri == source)
            })
    }

    pub(crate) fn authenticate(&self, header: &SyncHdr) -> AuthOutcome {
        if self.ctx.is_client() {
            return AuthOutcome::NotRequired;
        }
        match &self.authenticator {
            None => AuthOutcome::NotRequired,
            Some(_) if self.ctx.authenticated && header.cred.is_none() => AuthOutcome::Accepted,
            Some(auth) => auth.authenticate(&header.source.uri, header.cred.as_ref()),
        }
    }

    // ---- incoming ----

    /// Routes a status to the command it refers to.
    pub(crate) fn dispatch_status(&mut self, status: &StatusCmd) -> EngineResult<()> {
        let Some(index) = self.tracker.position(status.msg_ref, status.cmd_ref) else {
            debug!(
                msg_ref = status.msg_ref,
                cmd_ref = status.cmd_ref,
                code = status.code.code(),
                "status for unknown command ignored"
            );
            return Ok(());
        };
        let mut cmd = self.tracker.take(index);
        match cmd.handle_status(status, self) {
            Ok(true) => Ok(()),
            Ok(false) => {
                self.tracker.restore(index, cmd);
                Ok(())
            }
            Err(e) => {
                self.tracker.restore(index, cmd);
                Err(e)
            }
        }
    }

    fn status_size(&self, cmd: &Command) -> usize {
        let mut status = self.status_for(&cmd.common, StatusCode::OK);
        status.cmd_id = self.ctx.peek_cmd_id();
        self.assembler.size_of(&status.to_element())
    }

    fn run_incoming(&mut self) -> EngineResult<()> {
        while let Some(mut cmd) = self.incoming.pop_front() {
            if self.ctx.aborted.is_some() {
                self.incoming.clear();
                break;
            }
            if cmd.needs_reply() && self.assembler.command_count() > 0 {
                let reserve = self.status_size(&cmd) * cmd.reply_count() + cmd.reply_reserve(self);
                if !self.outgoing.is_empty() || self.assembler.remaining() < reserve as isize {
                    debug!(
                        cmd = %cmd.common.kind,
                        cmd_id = cmd.common.cmd_id,
                        "message full, command deferred"
                    );
                    self.incoming.push_front(cmd);
                    break;
                }
            }
            match cmd.execute(self) {
                Ok(true) => {}
                Ok(false) => {
                    self.incoming.push_front(cmd);
                    break;
                }
                Err(e) => self.command_failed(&mut cmd, e)?,
            }
        }
        Ok(())
    }

    fn command_failed(&mut self, cmd: &mut Command, e: EngineError) -> EngineResult<()> {
        let status = e.status();
        if !e.is_fatal() {
            warn!(cmd = %cmd.common.kind, cmd_id = cmd.common.cmd_id, error = %e, "command failed");
            if !cmd.common.status_sent && cmd.needs_reply() {
                self.send_status(&mut cmd.common, status)?;
            }
            return Ok(());
        }
        error!(cmd = %cmd.common.kind, cmd_id = cmd.common.cmd_id, error = %e, "session aborted");
        if !cmd.common.status_sent && cmd.needs_reply() {
            if let Err(send_error) = self.send_status(&mut cmd.common, status) {
                warn!(error = %send_error, "could not report the failure");
            }
        }
        self.abort(status);
        Ok(())
    }

    fn abort(&mut self, status: StatusCode) {
        self.ctx.aborted = Some(status);
        self.incoming.clear();
        self.outgoing
            .retain(|cmd| matches!(cmd.body, CommandBody::Status(_)));
    }

    /// Suspends the session, remembering what must be repeated.
    pub(crate) fn do_suspend(&mut self) {
        if self.ctx.suspended {
            return;
        }
        self.ctx.suspended = true;
        let tracked = self.tracker.drain();
        for cmd in &tracked {
            if cmd.common.waiting_for_status > 0 {
                cmd.mark_pending_for_resume(self, false);
            }
        }
        for cmd in tracked {
            self.tracker.push(cmd);
        }
        let queued: Vec<_> = self.outgoing.drain(..).collect();
        for cmd in queued {
            if matches!(cmd.body, CommandBody::Status(_)) {
                self.outgoing.push_back(cmd);
            } else {
                cmd.mark_pending_for_resume(self, true);
            }
        }
        for ds in &mut self.datastores {
            ds.mark_unsent_for_resume();
        }
        info!(session = %self.ctx.session_id, "session suspended");
    }

    fn abandon_partials(&mut self) -> EngineResult<()> {
        let store = self.resume_store();
        for ds in &mut self.datastores {
            if ds.abandon_incoming(store.as_ref())? {
                warn!(datastore = %ds.local_uri(), "incomplete chunked item dropped");
            }
        }
        Ok(())
    }

    fn after_incoming(&mut self, was_awaiting: bool) -> EngineResult<()> {
        let phase = self.ctx.phase;
        if self.ctx.is_client() {
            if (self.ctx.suspended || self.ctx.aborted.is_some()) && was_awaiting {
                self.ctx.advance(SessionPhase::Done);
                return Ok(());
            }
            match phase {
                SessionPhase::Alert => self.ctx.advance(SessionPhase::SyncStart),
                SessionPhase::SyncEnd => {
                    self.abandon_partials()?;
                    self.ctx.advance(SessionPhase::Map);
                }
                SessionPhase::Map if was_awaiting => self.ctx.advance(SessionPhase::Done),
                _ => {}
            }
        } else if matches!(phase, SessionPhase::SyncStart | SessionPhase::SyncOps) {
            self.abandon_partials()?;
            self.ctx.advance(SessionPhase::SyncEnd);
        }
        Ok(())
    }

    // ---- outgoing ----

    fn generate(&mut self) -> EngineResult<()> {
        if self.ctx.aborted.is_some() || !self.incoming.is_empty() || self.ctx.is_terminated() {
            return Ok(());
        }
        if self.ctx.suspend_requested && !self.ctx.suspended {
            self.do_suspend();
            return self.issue_alert(AlertCode::SUSPEND, Vec::new());
        }
        if self.ctx.suspended || self.ctx.awaiting_remote {
            return Ok(());
        }
        match (self.ctx.is_client(), self.ctx.phase) {
            (true, SessionPhase::SyncStart | SessionPhase::SyncOps) => self.generate_syncs(),
            (true, SessionPhase::Map) => self.generate_maps(),
            (false, SessionPhase::Alert) => {
                if !self.dev_inf_requested
                    && self.config.dev_inf.is_some()
                    && self.ctx.remote_dev_inf.is_none()
                {
                    self.dev_inf_requested = true;
                    self.issue(GetCommand::dev_inf(self.ctx.version, self.ctx.encoding))?;
                }
                Ok(())
            }
            (false, SessionPhase::SyncEnd) => self.generate_syncs(),
            _ => Ok(()),
        }
    }

    fn generate_syncs(&mut self) -> EngineResult<()> {
        for idx in 0..self.datastores.len() {
            let ds = &self.datastores[idx];
            if !ds.is_active() || ds.local_sync_done {
                continue;
            }
            if !self.generate_sync(idx)? {
                break;
            }
        }
        Ok(())
    }

    /// Issues the Sync bracket of a datastore with as many operations as
    /// fit. Returns true once all operations went out.
    fn generate_sync(&mut self, idx: usize) -> EngineResult<bool> {
        if !self.outgoing.is_empty() {
            return Ok(false);
        }
        let previous = self.tracker.take_where(|c| {
            c.common.datastore == Some(idx)
                && matches!(c.body, CommandBody::Sync(_))
                && !c.finished()
        });
        let mut sync = match previous {
            Some(cmd) => cmd,
            None => {
                let number_of_changes = if self.datastores[idx].sends_changes() {
                    u32::try_from(self.datastores[idx].changes_left()?).unwrap_or(u32::MAX)
                } else {
                    0
                };
                let ds = &self.datastores[idx];
                let max_obj_size = self
                    .config
                    .max_obj_size
                    .filter(|_| self.ctx.remote_supports_large_objects());
                let body = SyncCommand::outgoing(
                    Location::new(ds.remote_uri.clone()),
                    Location::new(ds.local_uri()),
                    Some(number_of_changes).filter(|_| self.ctx.version != SyncMlVersion::V1_0),
                    max_obj_size,
                );
                let mut cmd = Command::outgoing(CommandKind::Sync, CommandBody::Sync(body));
                cmd.common.datastore = Some(idx);
                cmd
            }
        };

        let bracket = sync.element(self.ctx.peek_cmd_id());
        if !self.assembler.fits(&bracket) {
            if sync.common.msg_id != 0 {
                self.tracker.push(sync);
            }
            return Ok(false);
        }
        let bracket_size = self.assembler.size_of(&bracket);
        let cmd_id = self.ctx.alloc_cmd_id();
        self.assembler.open_sync(bracket);
        sync.record_issue(self.ctx.outgoing_msg_id, cmd_id);
        if self.ctx.is_client() {
            self.ctx.advance(SessionPhase::SyncOps);
        }
        self.datastores[idx].sync_issued = true;

        let all_sent = if self.datastores[idx].sends_changes() {
            self.place_sync_ops(idx, bracket_size)?
        } else {
            true
        };
        self.assembler.close_sync();
        if all_sent {
            if let CommandBody::Sync(body) = &mut sync.body {
                body.finished = true;
            }
            self.datastores[idx].local_sync_done = true;
            debug!(datastore = %self.datastores[idx].local_uri(), "all changes sent");
        }
        self.tracker.push(sync);
        Ok(all_sent)
    }

    /// Fills the open Sync bracket. Returns false if operations remain.
    fn place_sync_ops(&mut self, idx: usize, bracket_size: usize) -> EngineResult<bool> {
        let min_split = self.config.min_split_size;
        let encoding = self.assembler.encoding();
        let large_objects = self.ctx.remote_supports_large_objects();
        let capacity = self
            .ctx
            .max_outgoing_msg_size
            .saturating_sub(self.assembler.base_size() + bracket_size);

        while let Some(mut op) = self.datastores[idx].next_op()? {
            if large_objects {
                if let Some(max) = self.ctx.max_outgoing_obj_size {
                    if op.chunk_len() > max {
                        // The remote's ceiling wins over our minimum chunk size.
                        let floor = min_split.min(max);
                        if let Some(rest) = op.split(op.chunk_len() - max, floor, encoding) {
                            self.datastores[idx].push_front(rest);
                        }
                    }
                }
            }

            let cmd_id = self.ctx.peek_cmd_id();
            let mut element = op.to_element(cmd_id, false);
            let left = self.assembler.eval(&element);
            if left < 0 {
                let fitted = if large_objects {
                    self.fit_chunk(&op, cmd_id, left.unsigned_abs(), min_split)
                } else {
                    None
                };
                match fitted {
                    Some((chunk, rest, chunk_element)) => {
                        self.datastores[idx].push_front(rest);
                        op = chunk;
                        element = chunk_element;
                    }
                    None => {
                        let smallest = if large_objects {
                            let mut probe = op.clone();
                            let reduce = probe.chunk_len().saturating_sub(min_split);
                            let _ = probe.split(reduce, min_split, encoding);
                            self.assembler.size_of(&probe.to_element(cmd_id, false))
                        } else {
                            self.assembler.size_of(&element)
                        };
                        if smallest > capacity {
                            warn!(
                                datastore = %self.datastores[idx].local_uri(),
                                item = %op.local_id,
                                size = op.full_data().len(),
                                "item can never fit a message, skipped"
                            );
                            self.datastores[idx].stats.outgoing_failed += 1;
                            continue;
                        }
                        self.datastores[idx].push_front(op);
                        return Ok(false);
                    }
                }
            }

            let cmd_id = self.ctx.alloc_cmd_id();
            self.assembler.add_to_sync(element)?;
            self.datastores[idx].record_chunk_sent(&op);
            let mut cmd = Command::outgoing(op.kind.command(), CommandBody::SyncOp(op));
            cmd.common.datastore = Some(idx);
            cmd.common.allow_failure = true;
            cmd.record_issue(self.ctx.outgoing_msg_id, cmd_id);
            self.tracker.push(cmd);
        }
        Ok(true)
    }

    /// Splits an operation so its first chunk fits the message.
    ///
    /// Chunk meta grows when an item becomes chunked, so the split is
    /// retried with the remaining overshoot a few times.
    fn fit_chunk(
        &self,
        op: &SyncOpCommand,
        cmd_id: u32,
        overshoot: usize,
        min_split: usize,
    ) -> Option<(SyncOpCommand, SyncOpCommand, Element)> {
        let encoding = self.assembler.encoding();
        let mut reduce = overshoot;
        for _ in 0..4 {
            let mut chunk = op.clone();
            let rest = chunk.split(reduce, min_split, encoding)?;
            let element = chunk.to_element(cmd_id, false);
            let left = self.assembler.eval(&element);
            if left >= 0 {
                return Some((chunk, rest, element));
            }
            reduce += left.unsigned_abs();
        }
        None
    }

    fn generate_maps(&mut self) -> EngineResult<()> {
        if !self.outgoing.is_empty() {
            return Ok(());
        }
        for idx in 0..self.datastores.len() {
            if self.datastores[idx].map_done {
                continue;
            }
            if !self.datastores[idx].is_active() {
                self.datastores[idx].map_done = true;
                continue;
            }
            let previous = self.tracker.take_where(|c| {
                c.common.datastore == Some(idx)
                    && matches!(c.body, CommandBody::Map(_))
                    && !c.finished()
            });
            let mut map = match previous {
                Some(cmd) => cmd,
                None => {
                    let items = self.datastores[idx].take_map_items();
                    if items.is_empty() {
                        self.datastores[idx].map_done = true;
                        continue;
                    }
                    let ds = &self.datastores[idx];
                    let body = MapCommand::outgoing(
                        Location::new(ds.remote_uri.clone()),
                        Location::new(ds.local_uri()),
                        items,
                    );
                    let mut cmd = Command::outgoing(CommandKind::Map, CommandBody::Map(body));
                    cmd.common.datastore = Some(idx);
                    cmd
                }
            };

            let cmd_id = self.ctx.peek_cmd_id();
            if self.fit_map_batch(&mut map, cmd_id) == 0 {
                self.tracker.push(map);
                break;
            }
            let cmd_id = self.ctx.alloc_cmd_id();
            let msg_id = self.ctx.outgoing_msg_id;
            self.assembler.add(map.element(cmd_id));
            map.record_issue(msg_id, cmd_id);
            if let CommandBody::Map(body) = &mut map.body {
                body.commit_batch(msg_id, cmd_id);
            }
            let finished = map.finished();
            self.tracker.push(map);
            if !finished {
                break;
            }
            self.datastores[idx].map_done = true;
        }
        Ok(())
    }

    /// Finds the largest batch of pending map items that fits.
    fn fit_map_batch(&self, map: &mut Command, cmd_id: u32) -> usize {
        let Command { common, body } = map;
        let CommandBody::Map(body) = body else {
            return 0;
        };
        let (mut low, mut high) = (0, body.pending_len());
        while low < high {
            let mid = (low + high + 1) / 2;
            body.set_batch(mid);
            let element = CommandBehavior::element(&*body, common, cmd_id);
            if self.assembler.fits(&element) {
                low = mid;
            } else {
                high = mid - 1;
            }
        }
        body.set_batch(low);
        low
    }

    fn package_complete(&self) -> bool {
        if !self.outgoing.is_empty() || !self.incoming.is_empty() {
            return false;
        }
        let active = || self.datastores.iter().filter(|ds| ds.is_active());
        match (self.ctx.is_client(), self.ctx.phase) {
            (true, SessionPhase::SyncStart | SessionPhase::SyncOps)
            | (false, SessionPhase::SyncEnd) => active().all(|ds| ds.local_sync_done),
            (true, SessionPhase::Map) => self.datastores.iter().all(|ds| ds.map_done),
            _ => true,
        }
    }

    fn complete_message(&mut self) -> EngineResult<Reply> {
        if self.ctx.is_client() && self.ctx.is_terminated() {
            self.assembler.abandon();
            self.end_session()?;
            let reply = Reply {
                message: None,
                is_final: false,
                done: true,
            };
            self.last_answer = Some(reply.clone());
            return Ok(reply);
        }

        let terminating = self.ctx.aborted.is_some() || self.ctx.suspended;
        let is_final = if terminating {
            self.outgoing.is_empty() && self.incoming.is_empty()
        } else {
            !self.ctx.awaiting_remote && self.package_complete()
        };
        if self.ctx.is_client() && !is_final && self.ctx.awaiting_remote && self.outgoing.is_empty()
        {
            let mut next = Command::outgoing(
                CommandKind::Alert,
                CommandBody::Alert(AlertCommand::outgoing(AlertCode::NEXT_MESSAGE, Vec::new())),
            );
            next.common.essential = false;
            next.common.allow_failure = true;
            if self.issue_now(next)?.is_some() {
                debug!("no room for next-message alert");
            }
        }

        let bytes = self.assembler.finish(is_final)?;
        debug!(
            msg_id = self.ctx.outgoing_msg_id,
            size = bytes.len(),
            is_final,
            "message built"
        );
        if is_final {
            self.ctx.awaiting_remote = true;
            self.after_final_sent()?;
        }
        let reply = Reply {
            message: Some(bytes),
            is_final,
            done: self.ctx.is_terminated(),
        };
        if self.config.allow_retries {
            self.last_answer = Some(reply.clone());
        }
        Ok(reply)
    }

    fn after_final_sent(&mut self) -> EngineResult<()> {
        let server = !self.ctx.is_client();
        if self.ctx.aborted.is_some() || (server && self.ctx.suspended) {
            self.ctx.advance(SessionPhase::Done);
            return self.end_session();
        }
        match (server, self.ctx.phase) {
            (false, SessionPhase::SyncStart | SessionPhase::SyncOps) => {
                self.ctx.advance(SessionPhase::SyncEnd);
            }
            (true, SessionPhase::Alert) => self.ctx.advance(SessionPhase::SyncStart),
            (true, SessionPhase::SyncEnd) => self.ctx.advance(SessionPhase::Map),
            (true, SessionPhase::Map) => {
                self.ctx.advance(SessionPhase::Done);
                self.end_session()?;
            }
            _ => {}
        }
        Ok(())
    }

    fn end_session(&mut self) -> EngineResult<()> {
        if self.ended {
            return Ok(());
        }
        self.ended = true;
        let missing = self.tracker.missing_essential();
        let suspended = self.ctx.suspended;
        let successful = self.ctx.aborted.is_none() && !suspended && missing == 0;
        if missing > 0 {
            warn!(missing, "session ended with unconfirmed commands");
        }
        let store = self.resume_store();
        for ds in &mut self.datastores {
            if ds.alert_code.is_some() {
                ds.finish(store.as_ref(), successful, suspended)?;
            }
        }
        info!(
            session = %self.ctx.session_id,
            successful,
            suspended,
            aborted = self.ctx.aborted.map(|s| s.code()),
            "session ended"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatastoreConfig;
    use crate::memory::{MemoryBackend, MemoryBackendFactory};
    use crate::resume::MemoryResumeStore;

    fn client() -> Session {
        let factory = MemoryBackendFactory::new()
            .with_datastore(DatastoreConfig::new("./contacts", "card"), MemoryBackend::new());
        let config = SessionConfig::client("IMEI:1", "http://sync.example.com")
            .with_datastore(DatastoreConfig::new("./contacts", "card"));
        Session::new(
            config,
            "1",
            Arc::new(factory),
            Arc::new(MemoryResumeStore::new()),
        )
    }

    #[test]
    fn client_opens_with_alert() {
        let mut session = client();
        let bytes = session.start().unwrap();
        let (message, _) = WireMessage::decode(&bytes).unwrap();
        assert!(message.is_final);
        assert_eq!(message.header.msg_id, 1);
        let alert = syncml_protocol::AlertCmd::from_element(&message.body[0]).unwrap();
        assert_eq!(alert.code, AlertCode::SLOW_SYNC);
        assert_eq!(alert.items[0].target_uri(), Some("card"));
        assert_eq!(session.phase(), SessionPhase::Alert);
        assert!(session.start().is_err());
    }

    #[test]
    fn servers_cannot_start() {
        let mut session = Session::new(
            SessionConfig::server("http://sync.example.com"),
            "1",
            Arc::new(MemoryBackendFactory::new()),
            Arc::new(MemoryResumeStore::new()),
        );
        assert!(matches!(session.start(), Err(EngineError::InvalidState(_))));
    }

    #[test]
    fn datastore_lookup_ignores_relative_prefix() {
        let mut session = client();
        session.start().unwrap();
        assert_eq!(session.find_datastore("contacts"), Some(0));
        assert_eq!(session.find_datastore("./contacts"), Some(0));
        assert_eq!(session.find_datastore("./calendar"), None);
        let item = Item::with_source("card");
        assert_eq!(session.datastore_for_item(&item), Some(0));
    }
}
