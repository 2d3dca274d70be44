//! Add, Replace and Delete operations inside a Sync bracket.

use super::{default_status, CommandBehavior, CommandCommon};
use crate::chunking::split_point;
use crate::datastore::ItemLimits;
use crate::error::EngineResult;
use crate::session::Session;
use bytes::Bytes;
use syncml_protocol::{
    AlertCode, Element, Encoding, Item, Location, Meta, StatusCmd, StatusCode, SyncOpCmd,
    SyncOpKind,
};
use tracing::{debug, trace};

/// One of our operations, possibly a chunk of a large item.
///
/// The full payload is kept so the chunk boundaries can move while the
/// message is assembled. `offset..end` is the part this command carries.
#[derive(Debug, Clone)]
pub(crate) struct SyncOpCommand {
    pub kind: SyncOpKind,
    pub local_id: String,
    pub remote_id: Option<String>,
    content_type: String,
    full: Bytes,
    offset: usize,
    end: usize,
}

impl SyncOpCommand {
    pub fn outgoing(
        kind: SyncOpKind,
        local_id: &str,
        remote_id: Option<String>,
        data: Bytes,
        content_type: &str,
    ) -> Self {
        let end = data.len();
        Self {
            kind,
            local_id: local_id.to_string(),
            remote_id,
            content_type: content_type.to_string(),
            full: data,
            offset: 0,
            end,
        }
    }

    /// Bytes of payload this chunk carries.
    pub fn chunk_len(&self) -> usize {
        self.end - self.offset
    }

    pub fn is_chunked(&self) -> bool {
        self.offset > 0 || self.end < self.full.len()
    }

    /// Returns true if more chunks follow this one.
    pub fn has_more(&self) -> bool {
        self.end < self.full.len()
    }

    pub fn full_data(&self) -> &Bytes {
        &self.full
    }

    pub fn end_offset(&self) -> u64 {
        self.end as u64
    }

    /// Drops the part of the payload the remote already confirmed.
    pub fn skip_confirmed(&mut self, confirmed: usize) {
        self.offset = confirmed.min(self.full.len());
        self.end = self.full.len();
    }

    /// Shortens this chunk by about `reduce_by` bytes.
    ///
    /// Returns the continuation carrying the rest, or `None` when the
    /// operation cannot be split: deletes, payloads at or below
    /// `min_split`, or a remaining chunk that would drop below it.
    pub fn split(&mut self, reduce_by: usize, min_split: usize, encoding: Encoding) -> Option<Self> {
        if !self.kind.carries_data() || self.full.len() <= min_split {
            return None;
        }
        let keep = self.chunk_len().checked_sub(reduce_by)?;
        if keep < min_split {
            return None;
        }
        let cut = split_point(&self.full[self.offset..self.end], keep, encoding);
        if cut == 0 || cut >= self.chunk_len() {
            return None;
        }
        let mut rest = self.clone();
        rest.offset = self.offset + cut;
        self.end = rest.offset;
        trace!(item = %self.local_id, at = self.end, "item split");
        Some(rest)
    }

    fn item(&self) -> Item {
        let mut item = Item::with_source(self.local_id.clone());
        item.target = self.remote_id.clone().map(Location::new);
        if self.kind.carries_data() {
            let mut meta = Meta::with_type(self.content_type.clone());
            if self.is_chunked() {
                if self.offset == 0 {
                    meta.size = Some(self.full.len() as u64);
                }
                meta.set_data_pos(Some(self.offset as u64));
            }
            item.meta = Some(meta);
            item.data = Some(self.full.slice(self.offset..self.end));
            item.more_data = self.has_more();
        }
        item
    }

    pub fn to_element(&self, cmd_id: u32, no_resp: bool) -> Element {
        let mut op = SyncOpCmd::new(self.kind, cmd_id, vec![self.item()]);
        op.no_resp = no_resp;
        op.to_element()
    }
}

impl CommandBehavior for SyncOpCommand {
    fn element(&self, common: &CommandCommon, cmd_id: u32) -> Element {
        self.to_element(cmd_id, common.no_resp)
    }

    fn handle_status(
        &mut self,
        common: &mut CommandCommon,
        status: &StatusCmd,
        session: &mut Session,
    ) -> EngineResult<bool> {
        if let Some(idx) = common.datastore {
            session.datastores[idx].handle_sync_op_status(self, status.code);
        }
        default_status(common, status.code)
    }

    fn mark_pending_for_resume(&self, common: &CommandCommon, session: &mut Session, unsent: bool) {
        if let Some(idx) = common.datastore {
            session.datastores[idx].mark_item_for_resume(
                self.kind.into(),
                &self.local_id,
                self.remote_id.clone(),
                unsent,
            );
        }
    }
}

/// An operation received from the remote.
#[derive(Debug, Clone)]
pub(crate) struct IncomingSyncOp {
    pub kind: SyncOpKind,
    pub meta: Option<Meta>,
    pub items: Vec<Item>,
    in_sync: bool,
}

impl IncomingSyncOp {
    pub fn new(op: SyncOpCmd, in_sync: bool) -> Self {
        Self {
            kind: op.kind,
            meta: op.meta,
            items: op.items,
            in_sync,
        }
    }
}

impl CommandBehavior for IncomingSyncOp {
    fn analyze(&mut self, _common: &CommandCommon) -> bool {
        self.in_sync && !self.items.is_empty()
    }

    fn execute(&mut self, common: &mut CommandCommon, session: &mut Session) -> EngineResult<bool> {
        let Some(idx) = session.current_sync else {
            debug!(cmd = %common.kind, "operation outside a known Sync");
            session.send_status(common, StatusCode::NOT_FOUND)?;
            return Ok(true);
        };
        let store = session.resume_store();
        let limits = ItemLimits::from_config(session.config());
        for item in &self.items {
            let outcome = match session.datastores[idx].process_item(
                self.kind,
                item,
                self.meta.as_ref(),
                limits,
                store.as_ref(),
            ) {
                Ok(outcome) => outcome,
                Err(e) => {
                    session.send_status(common, e.status())?;
                    return Err(e);
                }
            };
            if outcome.no_end_of_data {
                let mut alert_item = Item::with_target(session.datastores[idx].remote_uri.clone());
                alert_item.source = Some(Location::new(session.datastores[idx].local_uri()));
                session.issue_alert(AlertCode::NO_END_OF_DATA, vec![alert_item])?;
            }
            let mut status = session.status_for(common, outcome.status);
            status.source_refs = item.source_uri().map(str::to_string).into_iter().collect();
            status.target_refs = item.target_uri().map(str::to_string).into_iter().collect();
            session.send_status_cmd(common, status)?;
        }
        Ok(true)
    }

    fn reply_count(&self) -> usize {
        self.items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(len: usize) -> SyncOpCommand {
        SyncOpCommand::outgoing(
            SyncOpKind::Add,
            "l1",
            Some("r1".into()),
            Bytes::from(vec![b'a'; len]),
            "text/plain",
        )
    }

    #[test]
    fn unsplit_item_has_no_chunk_meta() {
        let op = op(10);
        let item = op.item();
        assert!(!item.more_data);
        assert_eq!(item.target_uri(), Some("r1"));
        let meta = item.meta.unwrap();
        assert_eq!(meta.size, None);
        assert_eq!(meta.data_pos(), None);
    }

    #[test]
    fn split_keeps_offsets() {
        let mut first = op(1000);
        let mut rest = first.split(400, 200, Encoding::Xml).unwrap();
        assert_eq!(first.chunk_len(), 600);
        assert_eq!(rest.chunk_len(), 400);

        let item = first.item();
        assert!(item.more_data);
        assert_eq!(item.meta.as_ref().unwrap().size, Some(1000));
        assert_eq!(item.meta.as_ref().unwrap().data_pos(), Some(0));

        let item = rest.item();
        assert!(!item.more_data);
        assert_eq!(item.meta.as_ref().unwrap().size, None);
        assert_eq!(item.meta.as_ref().unwrap().data_pos(), Some(600));

        assert!(rest.split(300, 200, Encoding::Xml).is_none());
        assert_eq!(first.end_offset(), 600);
        assert_eq!(rest.end_offset(), 1000);
    }

    #[test]
    fn small_items_and_deletes_never_split() {
        assert!(op(150).split(10, 200, Encoding::Wbxml).is_none());
        let mut delete =
            SyncOpCommand::outgoing(SyncOpKind::Delete, "l1", None, Bytes::new(), "text/plain");
        assert!(delete.split(1, 0, Encoding::Wbxml).is_none());
        assert!(delete.item().data.is_none());
    }

    #[test]
    fn resumed_item_starts_at_confirmed_offset() {
        let mut op = op(500);
        op.skip_confirmed(300);
        assert!(op.is_chunked());
        assert!(!op.has_more());
        assert_eq!(op.item().meta.unwrap().data_pos(), Some(300));
        assert_eq!(op.end_offset(), 500);
    }
}
