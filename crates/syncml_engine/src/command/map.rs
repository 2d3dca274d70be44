//! The Map command: client item IDs for the server's additions.

use super::{default_status, CommandBehavior, CommandCommon};
use crate::error::EngineResult;
use crate::session::Session;
use syncml_protocol::{Element, Location, MapCmd, MapItem, StatusCmd, StatusCode};
use tracing::{debug, warn};

/// A Map, received by a server or sent by a client.
///
/// Outgoing maps are issued in batches that fit the message; every batch
/// is confirmed separately.
#[derive(Debug, Clone)]
pub(crate) struct MapCommand {
    target: Location,
    source: Location,
    pending: Vec<MapItem>,
    batch_len: usize,
    issued: Vec<((u32, u32), Vec<MapItem>)>,
}

impl MapCommand {
    pub fn incoming(map: MapCmd) -> Self {
        Self {
            target: map.target,
            source: map.source,
            pending: map.items,
            batch_len: 0,
            issued: Vec::new(),
        }
    }

    pub fn outgoing(target: Location, source: Location, items: Vec<MapItem>) -> Self {
        let batch_len = items.len();
        Self {
            target,
            source,
            pending: items,
            batch_len,
            issued: Vec::new(),
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Sets how many pending items the next element carries.
    pub fn set_batch(&mut self, len: usize) {
        self.batch_len = len.min(self.pending.len());
    }

    /// Moves the current batch to the issued list.
    pub fn commit_batch(&mut self, msg_id: u32, cmd_id: u32) {
        let batch: Vec<_> = self.pending.drain(..self.batch_len).collect();
        self.issued.push(((msg_id, cmd_id), batch));
        self.batch_len = self.pending.len();
    }
}

impl CommandBehavior for MapCommand {
    fn execute(&mut self, common: &mut CommandCommon, session: &mut Session) -> EngineResult<bool> {
        common.target_ref = Some(self.target.uri.clone());
        common.source_ref = Some(self.source.uri.clone());
        let found = session
            .find_datastore(&self.target.uri)
            .filter(|idx| session.datastores[*idx].is_active());
        let Some(idx) = found else {
            warn!(datastore = %self.target.uri, "map for unknown datastore");
            session.send_status(common, StatusCode::NOT_FOUND)?;
            return Ok(true);
        };
        session.datastores[idx].apply_map(&self.pending);
        debug!(datastore = %self.target.uri, items = self.pending.len(), "map applied");
        session.send_status(common, StatusCode::OK)?;
        Ok(true)
    }

    fn element(&self, _common: &CommandCommon, cmd_id: u32) -> Element {
        MapCmd {
            cmd_id,
            target: self.target.clone(),
            source: self.source.clone(),
            meta: None,
            items: self.pending[..self.batch_len].to_vec(),
        }
        .to_element()
    }

    fn handle_status(
        &mut self,
        common: &mut CommandCommon,
        status: &StatusCmd,
        session: &mut Session,
    ) -> EngineResult<bool> {
        let key = (status.msg_ref, status.cmd_ref);
        let resolved = default_status(common, status.code)?;
        if !resolved {
            return Ok(false);
        }
        if let Some(pos) = self.issued.iter().position(|(k, _)| *k == key) {
            let (_, batch) = self.issued.remove(pos);
            if let Some(idx) = common.datastore {
                if status.code.is_success() {
                    session.datastores[idx].mark_map_confirmed(&batch);
                } else {
                    session.datastores[idx].failed = true;
                }
            }
        }
        Ok(true)
    }

    fn finished(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batches_are_issued_in_order() {
        let items = (0..5).map(|i| MapItem::new(format!("s{i}"), format!("c{i}"))).collect();
        let mut map = MapCommand::outgoing(Location::new("./contacts"), Location::new("card"), items);
        let common = CommandCommon::outgoing(syncml_protocol::CommandKind::Map);

        map.set_batch(2);
        let first = MapCmd::from_element(&map.element(&common, 4)).unwrap();
        assert_eq!(first.items.len(), 2);
        map.commit_batch(2, 4);
        assert!(!map.finished());
        assert_eq!(map.pending_len(), 3);

        let rest = MapCmd::from_element(&map.element(&common, 9)).unwrap();
        assert_eq!(rest.items[0], MapItem::new("s2", "c2"));
        map.commit_batch(3, 9);
        assert!(map.finished());
        assert_eq!(map.issued.len(), 2);
    }
}
