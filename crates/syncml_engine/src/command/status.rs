//! Status commands, both received and sent.

use super::{CommandBehavior, CommandCommon};
use crate::error::EngineResult;
use crate::session::Session;
use syncml_protocol::{Element, StatusCmd};

/// A status. Incoming ones resolve our outstanding commands, outgoing ones
/// answer the remote's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StatusCommand {
    pub status: StatusCmd,
}

impl StatusCommand {
    pub fn new(status: StatusCmd) -> Self {
        Self { status }
    }
}

impl CommandBehavior for StatusCommand {
    fn execute(&mut self, _common: &mut CommandCommon, session: &mut Session) -> EngineResult<bool> {
        session.dispatch_status(&self.status)?;
        Ok(true)
    }

    fn element(&self, _common: &CommandCommon, cmd_id: u32) -> Element {
        let mut status = self.status.clone();
        status.cmd_id = cmd_id;
        status.to_element()
    }
}
