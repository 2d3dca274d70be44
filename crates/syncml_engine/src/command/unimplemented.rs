//! Commands answered without further processing.

use super::{CommandBehavior, CommandCommon};
use crate::error::EngineResult;
use crate::session::Session;
use syncml_protocol::StatusCode;

/// A command answered with a fixed status (unsupported, malformed or
/// illegal in the current phase).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct UnimplementedCommand {
    pub status: StatusCode,
}

impl UnimplementedCommand {
    pub fn new(status: StatusCode) -> Self {
        Self { status }
    }
}

impl CommandBehavior for UnimplementedCommand {
    fn execute(&mut self, common: &mut CommandCommon, session: &mut Session) -> EngineResult<bool> {
        session.send_status(common, self.status)?;
        Ok(true)
    }
}

/// A Sequence container. Its commands follow it in the incoming queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SequenceCommand;

impl CommandBehavior for SequenceCommand {
    fn execute(&mut self, common: &mut CommandCommon, session: &mut Session) -> EngineResult<bool> {
        session.send_status(common, StatusCode::OK)?;
        Ok(true)
    }
}
