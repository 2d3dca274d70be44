//! The Sync bracket and its end marker.

use super::{default_status, CommandBehavior, CommandCommon};
use crate::context::SessionPhase;
use crate::error::EngineResult;
use crate::session::Session;
use syncml_protocol::{Element, Location, Meta, StatusCmd, StatusCode, SyncCmd};
use tracing::{debug, warn};

/// A Sync bracket.
///
/// Outgoing brackets stay outstanding until all operations of the
/// datastore were issued, possibly across several messages.
#[derive(Debug, Clone)]
pub(crate) struct SyncCommand {
    pub target: Option<Location>,
    pub source: Option<Location>,
    pub meta: Option<Meta>,
    pub number_of_changes: Option<u32>,
    pub finished: bool,
}

impl SyncCommand {
    pub fn incoming(sync: &SyncCmd) -> Self {
        Self {
            target: sync.target.clone(),
            source: sync.source.clone(),
            meta: sync.meta.clone(),
            number_of_changes: sync.number_of_changes,
            finished: true,
        }
    }

    pub fn outgoing(
        target: Location,
        source: Location,
        number_of_changes: Option<u32>,
        max_obj_size: Option<u64>,
    ) -> Self {
        Self {
            target: Some(target),
            source: Some(source),
            meta: max_obj_size.map(|max| Meta {
                max_obj_size: Some(max),
                ..Meta::default()
            }),
            number_of_changes,
            finished: false,
        }
    }
}

impl CommandBehavior for SyncCommand {
    fn execute(&mut self, common: &mut CommandCommon, session: &mut Session) -> EngineResult<bool> {
        let target = self.target.as_ref().map(|l| l.uri.as_str()).unwrap_or_default();
        common.target_ref = self.target.as_ref().map(|l| l.uri.clone());
        common.source_ref = self.source.as_ref().map(|l| l.uri.clone());

        let found = session
            .find_datastore(target)
            .filter(|idx| session.datastores[*idx].is_active());
        let Some(idx) = found else {
            warn!(datastore = target, "sync for datastore that was not alerted");
            session.current_sync = None;
            session.send_status(common, StatusCode::NOT_FOUND)?;
            return Ok(true);
        };
        if let Some(max) = self.meta.as_ref().and_then(|m| m.max_obj_size) {
            session.ctx.max_outgoing_obj_size = usize::try_from(max).ok();
        }
        session.datastores[idx].begin_incoming_sync()?;
        session.current_sync = Some(idx);
        if !session.ctx.is_client() {
            session.ctx.advance(SessionPhase::SyncOps);
        }
        debug!(
            datastore = target,
            changes = self.number_of_changes,
            "incoming sync"
        );
        session.send_status(common, StatusCode::OK)?;
        Ok(true)
    }

    fn element(&self, common: &CommandCommon, cmd_id: u32) -> Element {
        let mut sync = SyncCmd::new(
            cmd_id,
            self.target.clone().unwrap_or_default(),
            self.source.clone().unwrap_or_default(),
        );
        sync.no_resp = common.no_resp;
        // Repeated brackets only continue the first one.
        if common.msg_id == 0 {
            sync.meta = self.meta.clone();
            sync.number_of_changes = self.number_of_changes;
        }
        sync.to_element()
    }

    fn handle_status(
        &mut self,
        common: &mut CommandCommon,
        status: &StatusCmd,
        session: &mut Session,
    ) -> EngineResult<bool> {
        let resolved = default_status(common, status.code)?;
        if resolved && !status.code.is_success() {
            if let Some(idx) = common.datastore {
                session.datastores[idx].failed = true;
            }
        }
        Ok(resolved)
    }

    fn finished(&self) -> bool {
        self.finished
    }
}

/// Marks the end of an incoming Sync bracket.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SyncEndCommand;

impl CommandBehavior for SyncEndCommand {
    fn execute(&mut self, _common: &mut CommandCommon, session: &mut Session) -> EngineResult<bool> {
        session.current_sync = None;
        Ok(true)
    }
}
