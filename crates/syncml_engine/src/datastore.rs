//! Per-datastore session state.
//!
//! A [`DatastoreSession`] is the engine side of one synchronized datastore:
//! negotiated mode and anchors, the changes still to send, ID mapping,
//! chunk reassembly and everything that must survive a suspend.

use crate::backend::{AdminRecord, ChangeRecord, SyncBackend, SyncItem};
use crate::chunking::{data_pos, item_size, starts_transfer, ChunkOutcome, Reassembly};
use crate::command::SyncOpCommand;
use crate::config::{DatastoreConfig, SessionConfig};
use crate::error::EngineResult;
use crate::resume::{
    OutgoingPartial, PendingItem, ResumeKey, ResumeOp, ResumeState, ResumeStore,
};
use bytes::Bytes;
use std::collections::{HashSet, VecDeque};
use syncml_protocol::{AlertCode, Anchor, Item, Location, MapItem, Meta, StatusCode, SyncOpKind};
use tracing::{debug, info, warn};

/// Counters of one datastore session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatastoreStats {
    /// Items added locally on behalf of the remote.
    pub added: u32,
    /// Items updated locally.
    pub updated: u32,
    /// Items deleted locally.
    pub deleted: u32,
    /// Incoming operations that failed.
    pub incoming_failed: u32,
    /// Outgoing operations the remote confirmed.
    pub sent: u32,
    /// Outgoing operations the remote rejected.
    pub outgoing_failed: u32,
}

/// Status and side effects of one incoming item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ItemOutcome {
    pub status: StatusCode,
    pub no_end_of_data: bool,
}

/// Size limits for incoming items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ItemLimits {
    /// Largest item or single chunk.
    pub max_obj_size: Option<u64>,
    /// Largest announced total of a chunked item.
    pub max_item_size: Option<u64>,
}

impl ItemLimits {
    pub(crate) fn from_config(config: &SessionConfig) -> Self {
        Self {
            max_obj_size: config.max_obj_size,
            max_item_size: config.max_item_size,
        }
    }
}

/// Engine state of one datastore.
pub struct DatastoreSession {
    pub(crate) config: DatastoreConfig,
    backend: Box<dyn SyncBackend>,
    is_client: bool,
    pub(crate) remote_uri: String,
    pub(crate) key: ResumeKey,
    pub(crate) admin: AdminRecord,
    pub(crate) next_anchor: String,
    pub(crate) remote_next_anchor: Option<String>,
    pub(crate) alert_code: Option<u16>,
    pub(crate) resuming: bool,
    pub(crate) resume_state: Option<ResumeState>,
    pub(crate) sync_issued: bool,
    pub(crate) local_sync_done: bool,
    pub(crate) map_started: bool,
    pub(crate) map_done: bool,
    pending: VecDeque<ChangeRecord>,
    sync_set_loaded: bool,
    continuations: VecDeque<SyncOpCommand>,
    received_ids: HashSet<String>,
    pub(crate) pending_maps: Vec<MapItem>,
    incoming: Option<Reassembly>,
    resumed_partial_id: Option<String>,
    outgoing_partial: Option<OutgoingPartial>,
    marked: Vec<PendingItem>,
    pub(crate) failed: bool,
    pub(crate) stats: DatastoreStats,
}

impl std::fmt::Debug for DatastoreSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatastoreSession")
            .field("local_uri", &self.config.local_uri)
            .field("remote_uri", &self.remote_uri)
            .field("alert_code", &self.alert_code)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl DatastoreSession {
    /// Opens a datastore for a session with `device_id`.
    pub(crate) fn open(
        config: DatastoreConfig,
        mut backend: Box<dyn SyncBackend>,
        is_client: bool,
        device_id: &str,
        remote_uri: &str,
        store: &dyn ResumeStore,
    ) -> EngineResult<Self> {
        let admin = backend.load_admin_data(device_id, &config.local_uri, remote_uri)?;
        let next_anchor = backend.current_anchor()?;
        let key = ResumeKey::new(device_id, config.local_uri.clone(), remote_uri);
        let resume_state = store.load_state(&key)?;
        debug!(
            datastore = %config.local_uri,
            remote = remote_uri,
            resumable = resume_state.is_some(),
            "datastore opened"
        );
        Ok(Self {
            config,
            backend,
            is_client,
            remote_uri: remote_uri.to_string(),
            key,
            admin,
            next_anchor,
            remote_next_anchor: None,
            alert_code: None,
            resuming: false,
            resume_state,
            sync_issued: false,
            local_sync_done: false,
            map_started: false,
            map_done: false,
            pending: VecDeque::new(),
            sync_set_loaded: false,
            continuations: VecDeque::new(),
            received_ids: HashSet::new(),
            pending_maps: Vec::new(),
            incoming: None,
            resumed_partial_id: None,
            outgoing_partial: None,
            marked: Vec::new(),
            failed: false,
            stats: DatastoreStats::default(),
        })
    }

    /// Returns the local datastore URI.
    pub fn local_uri(&self) -> &str {
        &self.config.local_uri
    }

    /// Returns the statistics.
    pub fn stats(&self) -> &DatastoreStats {
        &self.stats
    }

    /// Returns the negotiated sync mode.
    pub fn alert_code(&self) -> Option<u16> {
        self.alert_code
    }

    /// Returns true if the datastore takes part in the sync.
    pub(crate) fn is_active(&self) -> bool {
        self.alert_code.is_some() && !self.failed
    }

    /// Returns true if we send our changes in the negotiated mode.
    pub(crate) fn sends_changes(&self) -> bool {
        self.alert_code.is_some_and(|code| {
            if self.is_client {
                AlertCode::client_sends(code)
            } else {
                AlertCode::server_sends(code)
            }
        })
    }

    /// Returns the alert code a client opens the session with.
    pub(crate) fn client_alert_code(&self) -> u16 {
        if self.resume_state.is_some() {
            return AlertCode::RESUME;
        }
        let mode = AlertCode::normalize(self.config.sync_mode);
        if self.admin.is_first_sync() && !AlertCode::needs_all(mode) {
            AlertCode::SLOW_SYNC
        } else {
            mode
        }
    }

    /// Returns the item of an Alert for this datastore.
    pub(crate) fn alert_item(&self, max_obj_size: Option<u64>) -> Item {
        let mut item = Item::with_target(self.remote_uri.clone());
        item.source = Some(Location::new(self.config.local_uri.clone()));
        item.meta = Some(Meta {
            anchor: Some(Anchor::new(
                self.admin.last_local_anchor.clone(),
                self.next_anchor.clone(),
            )),
            max_obj_size,
            ..Meta::default()
        });
        item
    }

    /// Negotiates the mode of a client alert on the server.
    ///
    /// Returns the status for the alert and the code of the reply alert.
    pub(crate) fn negotiate(&mut self, code: u16, anchor: Option<&Anchor>) -> (StatusCode, u16) {
        self.remote_next_anchor = anchor.map(|a| a.next.clone());
        if code == AlertCode::RESUME {
            if let Some(state) = self.resume_state.clone() {
                self.accept_resume(state);
                info!(datastore = %self.config.local_uri, "resuming suspended session");
                return (StatusCode::OK, AlertCode::RESUME);
            }
        }
        let requested = if code == AlertCode::RESUME {
            AlertCode::TWO_WAY
        } else {
            AlertCode::normalize(code)
        };
        self.resume_state = None;
        let anchors_match = self.admin.last_remote_anchor.is_some()
            && anchor.and_then(|a| a.last.as_ref()) == self.admin.last_remote_anchor.as_ref();
        if !AlertCode::needs_all(requested) && !anchors_match {
            warn!(datastore = %self.config.local_uri, "anchor mismatch, slow sync required");
            self.alert_code = Some(AlertCode::SLOW_SYNC);
            return (StatusCode::REFRESH_REQUIRED, AlertCode::SLOW_SYNC);
        }
        self.alert_code = Some(requested);
        (StatusCode::OK, requested)
    }

    /// Applies the mode a server alerted to a client datastore.
    pub(crate) fn accept_server_alert(&mut self, code: u16, anchor: Option<&Anchor>) {
        self.remote_next_anchor = anchor.map(|a| a.next.clone());
        if code == AlertCode::RESUME {
            if let Some(state) = self.resume_state.clone() {
                self.accept_resume(state);
                return;
            }
            warn!(datastore = %self.config.local_uri, "resume alerted without state");
            self.alert_code = Some(AlertCode::SLOW_SYNC);
            return;
        }
        self.resume_state = None;
        self.alert_code = Some(AlertCode::normalize(code));
    }

    fn accept_resume(&mut self, state: ResumeState) {
        self.resuming = true;
        self.alert_code = Some(state.alert_code);
        self.pending_maps = state
            .pending_maps
            .iter()
            .map(|(remote, local)| MapItem::new(remote.clone(), local.clone()))
            .collect();
        self.resumed_partial_id = state.partial_item_id.clone();
        self.outgoing_partial = state.outgoing_partial.clone();
    }

    /// Falls back to slow sync after the remote required a refresh.
    pub(crate) fn require_slow_sync(&mut self) {
        self.alert_code = Some(AlertCode::SLOW_SYNC);
    }

    /// Loads the changes to send, once per session.
    fn load_sync_set(&mut self) -> EngineResult<()> {
        if self.sync_set_loaded {
            return Ok(());
        }
        self.sync_set_loaded = true;
        let Some(code) = self.alert_code else {
            return Ok(());
        };
        if !self.sends_changes() {
            return Ok(());
        }
        if self.resuming {
            let state = self.resume_state.clone().unwrap_or_default();
            if let Some(partial) = &self.outgoing_partial {
                let mut op = SyncOpCommand::outgoing(
                    partial.op.into(),
                    &partial.local_id,
                    partial.remote_id.clone(),
                    Bytes::from(partial.data.clone()),
                    &self.config.content_type,
                );
                let offset = usize::try_from(partial.confirmed).unwrap_or(usize::MAX);
                op.skip_confirmed(offset);
                self.continuations.push_back(op);
            }
            let partial_id = self.outgoing_partial.as_ref().map(|p| p.local_id.clone());
            for item in state.pending_items {
                if Some(&item.local_id) != partial_id.as_ref() {
                    self.pending
                        .push_back(ChangeRecord::new(item.op.into(), item.local_id));
                }
            }
        } else {
            let need_all = AlertCode::needs_all(code);
            self.pending.extend(self.backend.read_sync_set(need_all)?);
        }
        debug!(
            datastore = %self.config.local_uri,
            changes = self.pending.len() + self.continuations.len(),
            "sync set loaded"
        );
        Ok(())
    }

    /// Prepares for receiving the remote's changes.
    ///
    /// Refresh modes wipe the receiving side first.
    pub(crate) fn begin_incoming_sync(&mut self) -> EngineResult<()> {
        let Some(code) = self.alert_code.map(AlertCode::normalize) else {
            return Ok(());
        };
        let wipe = if self.is_client {
            code == AlertCode::REFRESH_FROM_SERVER
        } else {
            code == AlertCode::REFRESH_FROM_CLIENT
        };
        if wipe && !self.resuming && !self.sync_set_loaded {
            self.sync_set_loaded = true;
            for change in self.backend.read_sync_set(true)? {
                self.backend.delete_item(&change.local_id)?;
            }
            self.admin.map.clear();
            info!(datastore = %self.config.local_uri, "datastore cleared for refresh");
        }
        Ok(())
    }

    /// Returns the number of changes left to send.
    pub(crate) fn changes_left(&mut self) -> EngineResult<usize> {
        self.load_sync_set()?;
        Ok(self.pending.len() + self.continuations.len())
    }

    /// Returns the next operation to send.
    ///
    /// Chunk continuations come first so chunks of one item are never
    /// interleaved with other items.
    pub(crate) fn next_op(&mut self) -> EngineResult<Option<SyncOpCommand>> {
        self.load_sync_set()?;
        if let Some(op) = self.continuations.pop_front() {
            return Ok(Some(op));
        }
        while let Some(change) = self.pending.pop_front() {
            if self.received_ids.contains(&change.local_id) {
                continue;
            }
            let remote = if self.is_client {
                None
            } else {
                self.admin.remote_for(&change.local_id).map(str::to_string)
            };
            let kind = match change.kind {
                SyncOpKind::Delete if !self.is_client && remote.is_none() => continue,
                SyncOpKind::Replace if !self.is_client && remote.is_none() => SyncOpKind::Add,
                kind => kind,
            };
            let data = if kind.carries_data() {
                match self.backend.fetch_item(&change.local_id)? {
                    Some(item) => item.data,
                    None => continue,
                }
            } else {
                Bytes::new()
            };
            return Ok(Some(SyncOpCommand::outgoing(
                kind,
                &change.local_id,
                remote,
                data,
                &self.config.content_type,
            )));
        }
        Ok(None)
    }

    /// Queues an operation to be sent before anything else.
    pub(crate) fn push_front(&mut self, op: SyncOpCommand) {
        self.continuations.push_front(op);
    }

    /// Records the progress of an outgoing chunked item.
    pub(crate) fn record_chunk_sent(&mut self, op: &SyncOpCommand) {
        if !op.is_chunked() {
            return;
        }
        match &mut self.outgoing_partial {
            Some(partial) if partial.local_id == op.local_id => {}
            _ => {
                self.outgoing_partial = Some(OutgoingPartial {
                    op: op.kind.into(),
                    local_id: op.local_id.clone(),
                    remote_id: op.remote_id.clone(),
                    data: op.full_data().to_vec(),
                    confirmed: 0,
                });
            }
        }
    }

    /// Handles the status of one of our operations.
    pub(crate) fn handle_sync_op_status(&mut self, op: &SyncOpCommand, status: StatusCode) {
        let for_partial = self
            .outgoing_partial
            .as_ref()
            .is_some_and(|p| p.local_id == op.local_id);
        if status == StatusCode::CHUNK_ACCEPTED {
            if let Some(partial) = self.outgoing_partial.as_mut().filter(|_| for_partial) {
                partial.confirmed = op.end_offset();
            }
            return;
        }
        if for_partial {
            self.outgoing_partial = None;
        }
        self.marked.retain(|m| m.local_id != op.local_id);
        if status.is_success() {
            self.stats.sent += 1;
        } else {
            warn!(
                datastore = %self.config.local_uri,
                item = %op.local_id,
                status = status.code(),
                "remote rejected item"
            );
            self.stats.outgoing_failed += 1;
            self.continuations.retain(|c| c.local_id != op.local_id);
        }
    }

    /// Restarts our current chunked item after the remote lost its end.
    pub(crate) fn restart_outgoing_item(&mut self) {
        let Some(partial) = self.outgoing_partial.take() else {
            return;
        };
        warn!(datastore = %self.config.local_uri, item = %partial.local_id, "resending chunked item");
        self.continuations.retain(|c| c.local_id != partial.local_id);
        self.pending
            .push_front(ChangeRecord::new(partial.op.into(), partial.local_id));
    }

    /// Remembers an item to resend after resuming.
    pub(crate) fn mark_item_for_resume(
        &mut self,
        op: ResumeOp,
        local_id: &str,
        remote_id: Option<String>,
        unsent: bool,
    ) {
        if self.marked.iter().any(|m| m.local_id == local_id) {
            return;
        }
        self.marked.push(PendingItem {
            op,
            local_id: local_id.to_string(),
            remote_id,
            unsent,
        });
    }

    /// Marks everything not yet handed out for resume.
    pub(crate) fn mark_unsent_for_resume(&mut self) {
        let continuations: Vec<_> = self.continuations.drain(..).collect();
        for op in continuations {
            self.mark_item_for_resume(op.kind.into(), &op.local_id, op.remote_id.clone(), true);
        }
        if self.sends_changes() && !self.sync_set_loaded {
            if let Err(e) = self.load_sync_set() {
                warn!(error = %e, "could not read changes to mark for resume");
            }
        }
        let pending: Vec<_> = self.pending.drain(..).collect();
        for change in pending {
            let remote = self.admin.remote_for(&change.local_id).map(str::to_string);
            self.mark_item_for_resume(change.kind.into(), &change.local_id, remote, true);
        }
    }

    /// Returns the map items not yet sent.
    pub(crate) fn take_map_items(&mut self) -> Vec<MapItem> {
        self.map_started = true;
        self.pending_maps.clone()
    }

    /// Forgets map items the remote confirmed.
    pub(crate) fn mark_map_confirmed(&mut self, items: &[MapItem]) {
        self.pending_maps.retain(|m| !items.contains(m));
    }

    /// Stores map items received from a client.
    pub(crate) fn apply_map(&mut self, items: &[MapItem]) {
        for item in items {
            self.admin.map.insert(item.target.clone(), item.source.clone());
        }
    }

    fn item_id(item: &Item) -> Option<String> {
        item.source_uri().or(item.target_uri()).map(str::to_string)
    }

    /// Processes one incoming item of a sync operation.
    pub(crate) fn process_item(
        &mut self,
        kind: SyncOpKind,
        item: &Item,
        cmd_meta: Option<&Meta>,
        limits: ItemLimits,
        store: &dyn ResumeStore,
    ) -> EngineResult<ItemOutcome> {
        let mut no_end_of_data = false;
        let restarting = starts_transfer(item, cmd_meta);

        let chunk_too_large = limits
            .max_obj_size
            .is_some_and(|max| item.data_len() as u64 > max);
        let total_too_large = restarting
            && limits
                .max_item_size
                .zip(item_size(item, cmd_meta))
                .is_some_and(|(max, size)| size > max);
        if chunk_too_large || total_too_large {
            self.discard_incoming(store)?;
            self.stats.incoming_failed += 1;
            return Ok(ItemOutcome {
                status: StatusCode::TOO_LARGE,
                no_end_of_data,
            });
        }

        if let Some(current) = &self.incoming {
            if !current.matches(kind, item) || restarting {
                if !current.matches(kind, item) {
                    warn!(
                        datastore = %self.config.local_uri,
                        "chunk sequence broken, discarding partial item"
                    );
                    no_end_of_data = true;
                }
                self.discard_incoming(store)?;
            }
        }

        if self.incoming.is_none() && !restarting {
            if let Some(partial) = self.take_resumed_partial(item, store)? {
                let reassembly = Reassembly::resume(partial);
                if reassembly.matches(kind, item) {
                    self.incoming = Some(reassembly);
                }
            }
        }

        let mut outcome = if let Some(reassembly) = self.incoming.as_mut() {
            Some(reassembly.add_chunk(item, cmd_meta))
        } else if item.more_data {
            match Reassembly::begin(kind, item, cmd_meta) {
                Ok(mut reassembly) => {
                    let outcome = reassembly.add_chunk(item, cmd_meta);
                    self.incoming = Some(reassembly);
                    Some(outcome)
                }
                Err(status) => Some(ChunkOutcome::Failed(status)),
            }
        } else {
            None
        };

        let status = match outcome.take() {
            Some(ChunkOutcome::Incomplete) => {
                debug!(datastore = %self.config.local_uri, "chunk accepted");
                StatusCode::CHUNK_ACCEPTED
            }
            Some(ChunkOutcome::Failed(status)) => {
                self.discard_incoming(store)?;
                self.stats.incoming_failed += 1;
                status
            }
            Some(ChunkOutcome::Complete(data)) => {
                let reassembly = self.incoming.take();
                if let Some(id) = reassembly.as_ref().and_then(|r| r.partial.item_id()) {
                    store.clear_partial(&self.key, id)?;
                }
                let content_type = reassembly.and_then(|r| r.partial.content_type);
                self.apply(kind, item, Some(Bytes::from(data)), content_type)?
            }
            None if data_pos(item, cmd_meta).is_some_and(|pos| pos > 0) => {
                warn!(
                    datastore = %self.config.local_uri,
                    "continuation chunk without a transfer in progress"
                );
                self.stats.incoming_failed += 1;
                StatusCode::INCOMPLETE_COMMAND
            }
            None => {
                let size = item_size(item, cmd_meta);
                let len = item.data_len() as u64;
                if size.is_some_and(|s| s != len) {
                    self.stats.incoming_failed += 1;
                    StatusCode::SIZE_MISMATCH
                } else {
                    let content_type = item
                        .meta
                        .as_ref()
                        .or(cmd_meta)
                        .and_then(|m| m.content_type.clone());
                    self.apply(kind, item, item.data.clone(), content_type)?
                }
            }
        };
        Ok(ItemOutcome {
            status,
            no_end_of_data,
        })
    }

    fn take_resumed_partial(
        &mut self,
        item: &Item,
        store: &dyn ResumeStore,
    ) -> EngineResult<Option<crate::resume::PartialItem>> {
        let Some(id) = Self::item_id(item) else {
            return Ok(None);
        };
        if self.resumed_partial_id.as_deref() != Some(id.as_str()) {
            return Ok(None);
        }
        self.resumed_partial_id = None;
        let partial = store.load_partial(&self.key, &id)?;
        if partial.is_some() {
            info!(datastore = %self.config.local_uri, item = %id, "continuing partial item");
        }
        Ok(partial)
    }

    fn discard_incoming(&mut self, store: &dyn ResumeStore) -> EngineResult<()> {
        if let Some(reassembly) = self.incoming.take() {
            if let Some(id) = reassembly.partial.item_id() {
                store.clear_partial(&self.key, id)?;
            }
        }
        Ok(())
    }

    /// Drops an unfinished incoming item at the end of the remote's package.
    ///
    /// Returns true if an item was dropped.
    pub(crate) fn abandon_incoming(&mut self, store: &dyn ResumeStore) -> EngineResult<bool> {
        let had = self.incoming.is_some();
        self.discard_incoming(store)?;
        Ok(had)
    }

    fn resolve_local(&self, item: &Item) -> Option<String> {
        if self.is_client {
            item.target_uri().map(str::to_string)
        } else {
            item.source_uri()
                .and_then(|remote| self.admin.local_for(remote))
                .map(str::to_string)
        }
    }

    fn register_remote(&mut self, local_id: &str, item: &Item) {
        let Some(remote) = item.source_uri() else {
            return;
        };
        if self.is_client {
            self.pending_maps
                .push(MapItem::new(remote.to_string(), local_id.to_string()));
        } else {
            self.admin
                .map
                .insert(local_id.to_string(), remote.to_string());
        }
    }

    fn add(
        &mut self,
        item: &Item,
        data: Bytes,
        content_type: Option<String>,
    ) -> EngineResult<StatusCode> {
        let new_item = SyncItem {
            local_id: String::new(),
            content_type,
            data,
        };
        let local_id = self.backend.add_item(&new_item)?;
        self.register_remote(&local_id, item);
        self.received_ids.insert(local_id);
        self.stats.added += 1;
        Ok(StatusCode::ITEM_ADDED)
    }

    fn apply(
        &mut self,
        kind: SyncOpKind,
        item: &Item,
        data: Option<Bytes>,
        content_type: Option<String>,
    ) -> EngineResult<StatusCode> {
        match kind {
            SyncOpKind::Add | SyncOpKind::Copy => match data {
                Some(data) => self.add(item, data, content_type),
                None => Ok(StatusCode::INCOMPLETE_COMMAND),
            },
            SyncOpKind::Replace | SyncOpKind::Move => {
                let Some(data) = data else {
                    return Ok(StatusCode::INCOMPLETE_COMMAND);
                };
                if let Some(local_id) = self.resolve_local(item) {
                    let updated = SyncItem {
                        local_id: local_id.clone(),
                        content_type: content_type.clone(),
                        data: data.clone(),
                    };
                    if self.backend.update_item(&updated)? {
                        self.received_ids.insert(local_id);
                        self.stats.updated += 1;
                        return Ok(StatusCode::OK);
                    }
                }
                self.add(item, data, content_type)
            }
            SyncOpKind::Delete => {
                let Some(local_id) = self.resolve_local(item) else {
                    return Ok(StatusCode::ITEM_NOT_DELETED);
                };
                self.received_ids.insert(local_id.clone());
                if self.backend.delete_item(&local_id)? {
                    self.admin.map.remove(&local_id);
                    self.stats.deleted += 1;
                    Ok(StatusCode::OK)
                } else {
                    Ok(StatusCode::ITEM_NOT_DELETED)
                }
            }
        }
    }

    /// Persists or clears state at the end of the session.
    pub(crate) fn finish(
        &mut self,
        store: &dyn ResumeStore,
        successful: bool,
        suspended: bool,
    ) -> EngineResult<()> {
        if suspended {
            let mut partial_item_id = None;
            if let Some(reassembly) = &self.incoming {
                if let Some(id) = reassembly.partial.item_id() {
                    store.save_partial(&self.key, id, &reassembly.partial)?;
                    partial_item_id = Some(id.to_string());
                }
            }
            let state = ResumeState {
                alert_code: self
                    .alert_code
                    .filter(|c| *c != AlertCode::RESUME)
                    .unwrap_or(AlertCode::TWO_WAY),
                pending_maps: self
                    .pending_maps
                    .iter()
                    .map(|m| (m.target.clone(), m.source.clone()))
                    .collect(),
                pending_items: self.marked.clone(),
                partial_item_id,
                outgoing_partial: self.outgoing_partial.clone(),
            };
            store.save_state(&self.key, &state)?;
            info!(
                datastore = %self.config.local_uri,
                pending = state.pending_items.len(),
                maps = state.pending_maps.len(),
                "resume state saved"
            );
            return self.backend.save_admin_data(&self.admin, false, false);
        }
        if successful && !self.failed {
            self.admin.last_local_anchor = Some(self.next_anchor.clone());
            self.admin.last_remote_anchor = self.remote_next_anchor.clone();
            store.clear_state(&self.key)?;
            self.backend.save_admin_data(&self.admin, true, true)
        } else {
            self.backend.save_admin_data(&self.admin, true, false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use crate::resume::MemoryResumeStore;

    fn open(backend: &MemoryBackend, is_client: bool, store: &MemoryResumeStore) -> DatastoreSession {
        DatastoreSession::open(
            DatastoreConfig::new("./contacts", "card"),
            Box::new(backend.clone()),
            is_client,
            "IMEI:1",
            "card",
            store,
        )
        .unwrap()
    }

    fn add_item(source: &str, data: &str) -> Item {
        Item::with_source(source).data(data.to_string())
    }

    fn limits(max_obj_size: Option<u64>, max_item_size: Option<u64>) -> ItemLimits {
        ItemLimits {
            max_obj_size,
            max_item_size,
        }
    }

    fn chunk(source: &str, len: usize, pos: u64, size: Option<u64>, more: bool) -> Item {
        let mut meta = Meta::default();
        meta.size = size;
        meta.set_data_pos(Some(pos));
        Item {
            more_data: more,
            ..Item::with_source(source).meta(meta).data(vec![b'x'; len])
        }
    }

    #[test]
    fn first_sync_is_slow() {
        let store = MemoryResumeStore::new();
        let backend = MemoryBackend::new();
        let ds = open(&backend, true, &store);
        assert_eq!(ds.client_alert_code(), AlertCode::SLOW_SYNC);

        backend.set_admin(AdminRecord {
            last_local_anchor: Some("3".into()),
            ..AdminRecord::default()
        });
        let ds = open(&backend, true, &store);
        assert_eq!(ds.client_alert_code(), AlertCode::TWO_WAY);
        let item = ds.alert_item(None);
        assert_eq!(item.target_uri(), Some("card"));
        let anchor = item.meta.unwrap().anchor.unwrap();
        assert_eq!(anchor.last.as_deref(), Some("3"));
    }

    #[test]
    fn server_requires_matching_anchor() {
        let store = MemoryResumeStore::new();
        let backend = MemoryBackend::new();
        backend.set_admin(AdminRecord {
            last_remote_anchor: Some("7".into()),
            ..AdminRecord::default()
        });
        let mut ds = open(&backend, false, &store);
        let good = Anchor::new(Some("7".into()), "8");
        assert_eq!(ds.negotiate(200, Some(&good)), (StatusCode::OK, 200));

        let bad = Anchor::new(Some("6".into()), "8");
        assert_eq!(
            ds.negotiate(200, Some(&bad)),
            (StatusCode::REFRESH_REQUIRED, AlertCode::SLOW_SYNC)
        );
        assert_eq!(ds.negotiate(201, Some(&bad)), (StatusCode::OK, 201));
    }

    #[test]
    fn server_maps_client_items() {
        let store = MemoryResumeStore::new();
        let backend = MemoryBackend::new();
        let mut ds = open(&backend, false, &store);
        ds.alert_code = Some(AlertCode::TWO_WAY);

        let out = ds
            .process_item(SyncOpKind::Add, &add_item("c1", "v1"), None, ItemLimits::default(), &store)
            .unwrap();
        assert_eq!(out.status, StatusCode::ITEM_ADDED);
        let local = ds.admin.local_for("c1").unwrap().to_string();
        assert_eq!(backend.item(&local).as_deref(), Some(&b"v1"[..]));

        let out = ds
            .process_item(SyncOpKind::Replace, &add_item("c1", "v2"), None, ItemLimits::default(), &store)
            .unwrap();
        assert_eq!(out.status, StatusCode::OK);
        assert_eq!(backend.item(&local).as_deref(), Some(&b"v2"[..]));

        let out = ds
            .process_item(SyncOpKind::Replace, &add_item("c9", "new"), None, ItemLimits::default(), &store)
            .unwrap();
        assert_eq!(out.status, StatusCode::ITEM_ADDED);

        let out = ds
            .process_item(SyncOpKind::Delete, &Item::with_source("c1"), None, ItemLimits::default(), &store)
            .unwrap();
        assert_eq!(out.status, StatusCode::OK);
        assert!(ds.admin.local_for("c1").is_none());

        let out = ds
            .process_item(SyncOpKind::Delete, &Item::with_source("zz"), None, ItemLimits::default(), &store)
            .unwrap();
        assert_eq!(out.status, StatusCode::ITEM_NOT_DELETED);
        assert_eq!(ds.stats.added, 2);
        assert_eq!(ds.stats.deleted, 1);
    }

    #[test]
    fn client_collects_map_items() {
        let store = MemoryResumeStore::new();
        let backend = MemoryBackend::new();
        let mut ds = open(&backend, true, &store);
        ds.alert_code = Some(AlertCode::TWO_WAY);
        ds.process_item(SyncOpKind::Add, &add_item("g1", "a"), None, ItemLimits::default(), &store)
            .unwrap();
        assert_eq!(ds.pending_maps.len(), 1);
        assert_eq!(ds.pending_maps[0].target, "g1");
        let maps = ds.take_map_items();
        ds.mark_map_confirmed(&maps);
        assert!(ds.pending_maps.is_empty());
    }

    #[test]
    fn size_mismatch_and_too_large() {
        let store = MemoryResumeStore::new();
        let backend = MemoryBackend::new();
        let mut ds = open(&backend, true, &store);
        let mut item = add_item("g1", "abc");
        item.meta = Some(Meta {
            size: Some(4),
            ..Meta::default()
        });
        let out = ds
            .process_item(SyncOpKind::Add, &item, None, ItemLimits::default(), &store)
            .unwrap();
        assert_eq!(out.status, StatusCode::SIZE_MISMATCH);

        let out = ds
            .process_item(SyncOpKind::Add, &add_item("g2", "abcdef"), None, limits(Some(3), None), &store)
            .unwrap();
        assert_eq!(out.status, StatusCode::TOO_LARGE);
        assert!(backend.items().is_empty());
    }

    #[test]
    fn announced_size_over_item_limit_is_refused() {
        let store = MemoryResumeStore::new();
        let backend = MemoryBackend::new();
        let mut ds = open(&backend, true, &store);
        let first = chunk("g1", 300, 0, Some(1000), true);

        let out = ds
            .process_item(SyncOpKind::Add, &first, None, limits(Some(400), Some(800)), &store)
            .unwrap();
        assert_eq!(out.status, StatusCode::TOO_LARGE);
        assert!(ds.incoming.is_none());
        assert_eq!(ds.stats.incoming_failed, 1);

        let out = ds
            .process_item(SyncOpKind::Add, &first, None, limits(Some(400), Some(1000)), &store)
            .unwrap();
        assert_eq!(out.status, StatusCode::CHUNK_ACCEPTED);
        assert!(backend.items().is_empty());
    }

    #[test]
    fn continuation_without_transfer_is_incomplete() {
        let store = MemoryResumeStore::new();
        let backend = MemoryBackend::new();
        let mut ds = open(&backend, true, &store);
        ds.alert_code = Some(AlertCode::TWO_WAY);

        let tail = chunk("g1", 200, 300, None, false);
        let out = ds
            .process_item(SyncOpKind::Add, &tail, None, ItemLimits::default(), &store)
            .unwrap();
        assert_eq!(out.status, StatusCode::INCOMPLETE_COMMAND);
        assert!(backend.items().is_empty());
        assert!(ds.pending_maps.is_empty());
        assert_eq!(ds.stats.incoming_failed, 1);
    }

    #[test]
    fn broken_chunk_sequence_alerts() {
        let store = MemoryResumeStore::new();
        let backend = MemoryBackend::new();
        let mut ds = open(&backend, true, &store);
        let mut meta = Meta::default();
        meta.size = Some(600);
        meta.set_data_pos(Some(0));
        let first = Item {
            more_data: true,
            ..Item::with_source("g1").meta(meta).data(vec![1u8; 300])
        };
        let out = ds
            .process_item(SyncOpKind::Add, &first, None, ItemLimits::default(), &store)
            .unwrap();
        assert_eq!(out.status, StatusCode::CHUNK_ACCEPTED);

        let out = ds
            .process_item(SyncOpKind::Add, &add_item("g2", "x"), None, ItemLimits::default(), &store)
            .unwrap();
        assert!(out.no_end_of_data);
        assert_eq!(out.status, StatusCode::ITEM_ADDED);
        assert_eq!(backend.items().len(), 1);
    }

    #[test]
    fn server_sends_unmapped_replace_as_add() {
        let store = MemoryResumeStore::new();
        let backend = MemoryBackend::new();
        backend.insert_local("s1", "one");
        backend.insert_local("s2", "two");
        let mut admin = AdminRecord::default();
        admin.map.insert("s2".into(), "c2".into());
        backend.set_admin(admin);
        let mut ds = open(&backend, false, &store);
        ds.alert_code = Some(AlertCode::SLOW_SYNC);

        let first = ds.next_op().unwrap().unwrap();
        assert_eq!(first.kind, SyncOpKind::Add);
        assert_eq!(first.remote_id, None);
        let second = ds.next_op().unwrap().unwrap();
        assert_eq!(second.kind, SyncOpKind::Replace);
        assert_eq!(second.remote_id.as_deref(), Some("c2"));
        assert!(ds.next_op().unwrap().is_none());
    }

    #[test]
    fn suspend_saves_marked_items_and_maps() {
        let store = MemoryResumeStore::new();
        let backend = MemoryBackend::new();
        backend.insert_local("l1", "one");
        backend.insert_local("l2", "two");
        let mut ds = open(&backend, true, &store);
        ds.alert_code = Some(AlertCode::TWO_WAY);
        ds.pending_maps.push(MapItem::new("g1", "l9"));

        let sent = ds.next_op().unwrap().unwrap();
        ds.mark_item_for_resume(sent.kind.into(), &sent.local_id, None, false);
        ds.mark_unsent_for_resume();
        ds.finish(&store, false, true).unwrap();

        let state = store.load_state(&ds.key).unwrap().unwrap();
        assert_eq!(state.alert_code, AlertCode::TWO_WAY);
        assert_eq!(state.pending_maps, vec![("g1".to_string(), "l9".to_string())]);
        assert_eq!(state.pending_items.len(), 2);
        assert!(!state.pending_items[0].unsent);
        assert!(state.pending_items[1].unsent);
        assert_eq!(backend.saves(), vec![(false, false)]);

        let mut resumed = open(&backend, true, &store);
        assert_eq!(resumed.client_alert_code(), AlertCode::RESUME);
        resumed.accept_server_alert(AlertCode::RESUME, None);
        assert!(resumed.resuming);
        assert_eq!(resumed.pending_maps.len(), 1);
        assert_eq!(resumed.changes_left().unwrap(), 2);
    }

    #[test]
    fn successful_finish_commits_anchors() {
        let store = MemoryResumeStore::new();
        let backend = MemoryBackend::new();
        let mut ds = open(&backend, true, &store);
        ds.remote_next_anchor = Some("r5".into());
        ds.finish(&store, true, false).unwrap();
        let admin = backend.admin();
        assert_eq!(admin.last_local_anchor.as_deref(), Some(ds.next_anchor.as_str()));
        assert_eq!(admin.last_remote_anchor.as_deref(), Some("r5"));
    }
}
