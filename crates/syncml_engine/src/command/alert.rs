//! Alert commands: sync mode negotiation and session control.

use super::{default_status, CommandBehavior, CommandCommon};
use crate::context::SessionPhase;
use crate::error::EngineResult;
use crate::session::Session;
use syncml_protocol::{AlertCmd, AlertCode, Element, Item, StatusCmd, StatusCode};
use tracing::{debug, info, warn};

/// An Alert, received or sent.
#[derive(Debug, Clone)]
pub(crate) struct AlertCommand {
    pub code: u16,
    pub items: Vec<Item>,
}

impl AlertCommand {
    pub fn incoming(alert: AlertCmd) -> Self {
        Self {
            code: alert.code,
            items: alert.items,
        }
    }

    pub fn outgoing(code: u16, items: Vec<Item>) -> Self {
        Self { code, items }
    }

    fn execute_sync_alert(
        &self,
        common: &mut CommandCommon,
        session: &mut Session,
    ) -> EngineResult<bool> {
        let item = &self.items[0];
        let local_uri = item.target_uri().unwrap_or_default();
        let remote_db = item.source_uri().unwrap_or_default();
        common.target_ref = Some(local_uri.to_string());
        common.source_ref = Some(remote_db.to_string());
        let meta = item.meta.as_ref();
        let anchor = meta.and_then(|m| m.anchor.as_ref());
        if let Some(max) = meta.and_then(|m| m.max_obj_size) {
            session.ctx.max_outgoing_obj_size = usize::try_from(max).ok();
        }

        if session.ctx.is_client() {
            let Some(idx) = session.find_datastore(local_uri) else {
                warn!(datastore = local_uri, "server alerted unknown datastore");
                session.send_status(common, StatusCode::NOT_FOUND)?;
                return Ok(true);
            };
            session.datastores[idx].accept_server_alert(self.code, anchor);
            debug!(datastore = local_uri, mode = self.code, "sync mode set by server");
            session.send_status(common, StatusCode::OK)?;
            return Ok(true);
        }

        let Some(idx) = session.open_datastore(local_uri, remote_db)? else {
            warn!(datastore = local_uri, "client alerted unknown datastore");
            session.send_status(common, StatusCode::NOT_FOUND)?;
            return Ok(true);
        };
        let (status, reply) = session.datastores[idx].negotiate(self.code, anchor);
        info!(
            datastore = local_uri,
            requested = self.code,
            mode = reply,
            status = status.code(),
            "sync alert negotiated"
        );
        session.send_status(common, status)?;
        session.issue_sync_alert(idx, reply)?;
        session.ctx.advance(SessionPhase::Alert);
        Ok(true)
    }
}

impl CommandBehavior for AlertCommand {
    fn analyze(&mut self, _common: &CommandCommon) -> bool {
        !AlertCode::is_sync_mode(self.code)
            || self.items.first().is_some_and(|i| i.target_uri().is_some())
    }

    fn execute(&mut self, common: &mut CommandCommon, session: &mut Session) -> EngineResult<bool> {
        match self.code {
            code if AlertCode::is_sync_mode(code) => self.execute_sync_alert(common, session),
            AlertCode::NEXT_MESSAGE | AlertCode::DISPLAY | AlertCode::RESULT_ALERT => {
                session.send_status(common, StatusCode::OK)?;
                Ok(true)
            }
            AlertCode::NO_END_OF_DATA => {
                session.send_status(common, StatusCode::OK)?;
                match self.items.first().and_then(|i| session.datastore_for_item(i)) {
                    Some(idx) => session.datastores[idx].restart_outgoing_item(),
                    None => warn!("no-end-of-data alert for unknown datastore"),
                }
                Ok(true)
            }
            AlertCode::SUSPEND => {
                session.send_status(common, StatusCode::OK)?;
                info!("remote suspended the session");
                session.do_suspend();
                Ok(true)
            }
            code => {
                debug!(code, "unsupported alert");
                session.send_status(common, StatusCode::FEATURE_NOT_SUPPORTED)?;
                Ok(true)
            }
        }
    }

    fn element(&self, common: &CommandCommon, cmd_id: u32) -> Element {
        let mut alert = AlertCmd::new(cmd_id, self.code, self.items.clone());
        alert.no_resp = common.no_resp;
        alert.to_element()
    }

    fn handle_status(
        &mut self,
        common: &mut CommandCommon,
        status: &StatusCmd,
        session: &mut Session,
    ) -> EngineResult<bool> {
        let Some(idx) = common.datastore.filter(|_| AlertCode::is_sync_mode(self.code)) else {
            return default_status(common, status.code);
        };
        if status.code == StatusCode::REFRESH_REQUIRED {
            info!(datastore = idx, "remote requires slow sync");
            session.datastores[idx].require_slow_sync();
            return Ok(true);
        }
        let resolved = default_status(common, status.code)?;
        if resolved && !status.code.is_success() {
            session.datastores[idx].failed = true;
        }
        Ok(resolved)
    }
}
