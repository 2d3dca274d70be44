//! Device information exchange through Put, Get and Results.

use super::{default_status, Command, CommandBehavior, CommandBody, CommandCommon};
use crate::error::EngineResult;
use crate::session::Session;
use bytes::Bytes;
use syncml_protocol::{
    CommandKind, Element, Encoding, GetPutCmd, Item, Meta, ResultsCmd, StatusCmd, StatusCode,
    SyncMlVersion,
};
use tracing::{debug, info};

fn is_dev_inf_uri(uri: Option<&str>) -> bool {
    uri.is_some_and(|u| u.starts_with("./devinf1"))
}

/// Content type of device information in the given encoding.
pub(crate) fn dev_inf_type(encoding: Encoding) -> &'static str {
    match encoding {
        Encoding::Xml => "application/vnd.syncml-devinf+xml",
        Encoding::Wbxml => "application/vnd.syncml-devinf+wbxml",
    }
}

fn store_dev_inf(session: &mut Session, items: &[Item]) -> bool {
    let found = items
        .iter()
        .find(|i| is_dev_inf_uri(i.source_uri()))
        .and_then(|i| i.data.clone());
    match found {
        Some(data) => {
            info!(size = data.len(), "received remote device information");
            session.ctx.remote_dev_inf = Some(data);
            true
        }
        None => false,
    }
}

/// A Put, usually carrying device information.
#[derive(Debug, Clone)]
pub(crate) struct PutCommand {
    cmd: GetPutCmd,
}

impl PutCommand {
    pub fn incoming(cmd: GetPutCmd) -> Self {
        Self { cmd }
    }

    /// Puts our device information.
    pub fn dev_inf(version: SyncMlVersion, encoding: Encoding, data: Bytes) -> Command {
        let item = Item::with_source(version.devinf_uri()).data(data);
        let cmd = GetPutCmd {
            kind: CommandKind::Put,
            cmd_id: 0,
            no_resp: false,
            lang: None,
            meta: Some(Meta::with_type(dev_inf_type(encoding))),
            items: vec![item],
        };
        optional(CommandKind::Put, CommandBody::Put(Self { cmd }))
    }
}

impl CommandBehavior for PutCommand {
    fn execute(&mut self, common: &mut CommandCommon, session: &mut Session) -> EngineResult<bool> {
        let code = if store_dev_inf(session, &self.cmd.items) {
            StatusCode::OK
        } else {
            debug!("put of unknown object");
            StatusCode::NOT_FOUND
        };
        session.send_status(common, code)?;
        Ok(true)
    }

    fn element(&self, common: &CommandCommon, cmd_id: u32) -> Element {
        let mut cmd = self.cmd.clone();
        cmd.cmd_id = cmd_id;
        cmd.no_resp = common.no_resp;
        cmd.to_element()
    }
}

/// A Get, usually for device information.
#[derive(Debug, Clone)]
pub(crate) struct GetCommand {
    cmd: GetPutCmd,
}

impl GetCommand {
    pub fn incoming(cmd: GetPutCmd) -> Self {
        Self { cmd }
    }

    /// Asks for the remote's device information.
    pub fn dev_inf(version: SyncMlVersion, encoding: Encoding) -> Command {
        let cmd = GetPutCmd {
            kind: CommandKind::Get,
            cmd_id: 0,
            no_resp: false,
            lang: None,
            meta: Some(Meta::with_type(dev_inf_type(encoding))),
            items: vec![Item::with_target(version.devinf_uri())],
        };
        optional(CommandKind::Get, CommandBody::Get(Self { cmd }))
    }

    fn wants_dev_inf(&self) -> bool {
        self.cmd.items.iter().any(|i| is_dev_inf_uri(i.target_uri()))
    }
}

impl CommandBehavior for GetCommand {
    fn execute(&mut self, common: &mut CommandCommon, session: &mut Session) -> EngineResult<bool> {
        let dev_inf = session.config().dev_inf.clone();
        let Some(data) = dev_inf.filter(|_| self.wants_dev_inf()) else {
            debug!("get of unknown object");
            session.send_status(common, StatusCode::NOT_FOUND)?;
            return Ok(true);
        };
        session.send_status(common, StatusCode::OK)?;
        let version = session.ctx.version;
        let results = ResultsCmd {
            cmd_id: 0,
            msg_ref: Some(common.msg_id),
            cmd_ref: common.cmd_id,
            meta: Some(Meta::with_type(dev_inf_type(session.ctx.encoding))),
            target_ref: None,
            source_ref: Some(version.devinf_uri().to_string()),
            items: vec![Item::with_source(version.devinf_uri()).data(data)],
        };
        session.issue(optional(
            CommandKind::Results,
            CommandBody::Results(ResultsCommand { results }),
        ))?;
        Ok(true)
    }

    fn element(&self, common: &CommandCommon, cmd_id: u32) -> Element {
        let mut cmd = self.cmd.clone();
        cmd.cmd_id = cmd_id;
        cmd.no_resp = common.no_resp;
        cmd.to_element()
    }

    fn handle_status(
        &mut self,
        common: &mut CommandCommon,
        status: &StatusCmd,
        session: &mut Session,
    ) -> EngineResult<bool> {
        if !status.code.is_success() && session.config().lenient_get {
            debug!(status = status.code.code(), "remote refused device information");
            return Ok(true);
        }
        default_status(common, status.code)
    }

    fn reply_reserve(&self, session: &Session) -> usize {
        if self.wants_dev_inf() {
            session.config().dev_inf.as_ref().map_or(0, Bytes::len) + 200
        } else {
            0
        }
    }
}

/// Results of a Get.
#[derive(Debug, Clone)]
pub(crate) struct ResultsCommand {
    results: ResultsCmd,
}

impl ResultsCommand {
    pub fn incoming(results: ResultsCmd) -> Self {
        Self { results }
    }
}

impl CommandBehavior for ResultsCommand {
    fn execute(&mut self, common: &mut CommandCommon, session: &mut Session) -> EngineResult<bool> {
        if !store_dev_inf(session, &self.results.items) {
            debug!(cmd_ref = self.results.cmd_ref, "results without device information");
        }
        session.send_status(common, StatusCode::OK)?;
        Ok(true)
    }

    fn element(&self, _common: &CommandCommon, cmd_id: u32) -> Element {
        let mut results = self.results.clone();
        results.cmd_id = cmd_id;
        results.to_element()
    }
}

/// Device information is optional: its loss never fails the session.
fn optional(kind: CommandKind, body: CommandBody) -> Command {
    let mut cmd = Command::outgoing(kind, body);
    cmd.common.essential = false;
    cmd.common.allow_failure = true;
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_inf_commands() {
        let put = PutCommand::dev_inf(SyncMlVersion::V1_2, Encoding::Xml, Bytes::from_static(b"<DevInf/>"));
        assert!(!put.common.essential);
        let element = put.element(5);
        let parsed = GetPutCmd::from_element(&element).unwrap();
        assert_eq!(parsed.cmd_id, 5);
        assert_eq!(parsed.items[0].source_uri(), Some("./devinf12"));
        assert_eq!(
            parsed.meta.unwrap().content_type.as_deref(),
            Some("application/vnd.syncml-devinf+xml")
        );

        let get = GetCommand::dev_inf(SyncMlVersion::V1_1, Encoding::Wbxml);
        let parsed = GetPutCmd::from_element(&get.element(6)).unwrap();
        assert_eq!(parsed.kind, CommandKind::Get);
        assert_eq!(parsed.items[0].target_uri(), Some("./devinf11"));
    }

    #[test]
    fn dev_inf_uri_matches_all_versions() {
        assert!(is_dev_inf_uri(Some("./devinf10")));
        assert!(is_dev_inf_uri(Some("./devinf12")));
        assert!(!is_dev_inf_uri(Some("./contacts")));
        assert!(!is_dev_inf_uri(None));
    }
}
