//! The SyncHdr as a command: answered with a status like any other.

use super::{default_status, CommandBehavior, CommandCommon};
use crate::auth::AuthOutcome;
use crate::error::{EngineError, EngineResult};
use crate::session::Session;
use syncml_protocol::{Meta, StatusCmd, StatusCode, SyncHdr, AUTH_BASIC};
use tracing::{info, warn};

/// A received header, or the placeholder tracking the status of ours.
#[derive(Debug, Clone)]
pub(crate) struct HeaderCommand {
    header: Option<SyncHdr>,
}

impl HeaderCommand {
    pub fn incoming(header: SyncHdr) -> Self {
        Self {
            header: Some(header),
        }
    }

    pub fn outgoing() -> Self {
        Self { header: None }
    }
}

fn challenge() -> Meta {
    Meta {
        content_type: Some(AUTH_BASIC.to_string()),
        format: Some("b64".to_string()),
        ..Meta::default()
    }
}

impl CommandBehavior for HeaderCommand {
    fn execute(&mut self, common: &mut CommandCommon, session: &mut Session) -> EngineResult<bool> {
        let Some(header) = &self.header else {
            return Ok(true);
        };
        common.target_ref = Some(header.target.uri.clone());
        common.source_ref = Some(header.source.uri.clone());

        let version = header.version().map_err(|_| {
            EngineError::fatal(
                StatusCode::DTD_VERSION_NOT_SUPPORTED,
                format!("unsupported VerDTD {}", header.ver_dtd),
            )
        })?;
        if !header.ver_proto.is_empty() && header.ver_proto != version.ver_proto() {
            return Err(EngineError::fatal(
                StatusCode::PROTOCOL_VERSION_NOT_SUPPORTED,
                format!("unsupported VerProto {}", header.ver_proto),
            ));
        }

        let ctx = &mut session.ctx;
        if let Some(meta) = &header.meta {
            if let Some(max) = meta.max_msg_size {
                ctx.max_outgoing_msg_size = usize::try_from(max).unwrap_or(usize::MAX);
            }
            if let Some(max) = meta.max_obj_size {
                ctx.max_outgoing_obj_size = usize::try_from(max).ok();
            }
        }
        if let Some(uri) = &header.resp_uri {
            ctx.resp_uri = Some(uri.clone());
        }

        let code = match session.authenticate(header) {
            AuthOutcome::Accepted if session.ctx.authenticated => StatusCode::OK,
            AuthOutcome::Accepted => {
                session.ctx.authenticated = true;
                info!(device = %header.source.uri, "device authenticated");
                StatusCode::AUTH_ACCEPTED
            }
            AuthOutcome::NotRequired => StatusCode::OK,
            outcome => {
                let code = if outcome == AuthOutcome::Missing {
                    StatusCode::MISSING_CREDENTIALS
                } else {
                    StatusCode::INVALID_CREDENTIALS
                };
                warn!(device = %header.source.uri, status = code.code(), "authentication failed");
                let mut status = session.status_for(common, code);
                status.chal = Some(challenge());
                session.send_status_cmd(common, status)?;
                return Err(EngineError::fatal(code, "authentication failed"));
            }
        };
        session.send_status(common, code)?;
        Ok(true)
    }

    fn handle_status(
        &mut self,
        common: &mut CommandCommon,
        status: &StatusCmd,
        session: &mut Session,
    ) -> EngineResult<bool> {
        match status.code {
            StatusCode::AUTH_ACCEPTED => {
                session.ctx.authenticated = true;
                Ok(true)
            }
            StatusCode::INVALID_CREDENTIALS | StatusCode::MISSING_CREDENTIALS => {
                Err(EngineError::AuthenticationFailed(status.code))
            }
            code => default_status(common, code),
        }
    }
}
