//! In-memory backend for testing.

use crate::backend::{AdminRecord, BackendFactory, ChangeRecord, SyncBackend, SyncItem};
use crate::config::DatastoreConfig;
use crate::error::EngineResult;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use syncml_protocol::SyncOpKind;

#[derive(Debug, Default)]
struct MemoryState {
    items: BTreeMap<String, Bytes>,
    changes: BTreeMap<String, SyncOpKind>,
    admin: AdminRecord,
    anchor: u64,
    next_id: u64,
    saves: Vec<(bool, bool)>,
}

/// In-memory datastore.
///
/// Clones share the same state so tests can inspect a backend after handing
/// it to a session.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an item as a local change.
    pub fn insert_local(&self, local_id: impl Into<String>, data: impl Into<Bytes>) {
        let local_id = local_id.into();
        let mut state = self.state.write();
        state.items.insert(local_id.clone(), data.into());
        state.changes.entry(local_id).or_insert(SyncOpKind::Add);
    }

    /// Changes an item as a local change.
    pub fn update_local(&self, local_id: &str, data: impl Into<Bytes>) {
        let mut state = self.state.write();
        state.items.insert(local_id.to_string(), data.into());
        state
            .changes
            .entry(local_id.to_string())
            .or_insert(SyncOpKind::Replace);
    }

    /// Deletes an item as a local change.
    pub fn delete_local(&self, local_id: &str) {
        let mut state = self.state.write();
        state.items.remove(local_id);
        match state.changes.get(local_id) {
            Some(SyncOpKind::Add) => {
                state.changes.remove(local_id);
            }
            _ => {
                state.changes.insert(local_id.to_string(), SyncOpKind::Delete);
            }
        }
    }

    /// Replaces the administration data.
    pub fn set_admin(&self, admin: AdminRecord) {
        self.state.write().admin = admin;
    }

    /// Returns the administration data.
    pub fn admin(&self) -> AdminRecord {
        self.state.read().admin.clone()
    }

    /// Returns an item.
    pub fn item(&self, local_id: &str) -> Option<Bytes> {
        self.state.read().items.get(local_id).cloned()
    }

    /// Returns all items.
    pub fn items(&self) -> BTreeMap<String, Bytes> {
        self.state.read().items.clone()
    }

    /// Returns the number of unsent local changes.
    pub fn pending_changes(&self) -> usize {
        self.state.read().changes.len()
    }

    /// Returns every `(session_finished, successful)` pair passed to
    /// `save_admin_data`.
    pub fn saves(&self) -> Vec<(bool, bool)> {
        self.state.read().saves.clone()
    }
}

impl SyncBackend for MemoryBackend {
    fn load_admin_data(
        &mut self,
        _device_id: &str,
        _database_id: &str,
        _remote_db_id: &str,
    ) -> EngineResult<AdminRecord> {
        Ok(self.state.read().admin.clone())
    }

    fn save_admin_data(
        &mut self,
        admin: &AdminRecord,
        session_finished: bool,
        successful: bool,
    ) -> EngineResult<()> {
        let mut state = self.state.write();
        state.saves.push((session_finished, successful));
        state.admin.map = admin.map.clone();
        if successful {
            state.admin.last_local_anchor = admin.last_local_anchor.clone();
            state.admin.last_remote_anchor = admin.last_remote_anchor.clone();
            state.changes.clear();
        }
        Ok(())
    }

    fn current_anchor(&mut self) -> EngineResult<String> {
        let mut state = self.state.write();
        state.anchor += 1;
        Ok(state.anchor.to_string())
    }

    fn read_sync_set(&mut self, need_all: bool) -> EngineResult<Vec<ChangeRecord>> {
        let state = self.state.read();
        if need_all {
            return Ok(state
                .items
                .keys()
                .map(|id| ChangeRecord::new(SyncOpKind::Replace, id.clone()))
                .collect());
        }
        Ok(state
            .changes
            .iter()
            .map(|(id, kind)| ChangeRecord::new(*kind, id.clone()))
            .collect())
    }

    fn fetch_item(&mut self, local_id: &str) -> EngineResult<Option<SyncItem>> {
        Ok(self
            .state
            .read()
            .items
            .get(local_id)
            .map(|data| SyncItem::new(local_id, data.clone())))
    }

    fn add_item(&mut self, item: &SyncItem) -> EngineResult<String> {
        let mut state = self.state.write();
        let local_id = loop {
            state.next_id += 1;
            let candidate = format!("m{}", state.next_id);
            if !state.items.contains_key(&candidate) {
                break candidate;
            }
        };
        state.items.insert(local_id.clone(), item.data.clone());
        Ok(local_id)
    }

    fn update_item(&mut self, item: &SyncItem) -> EngineResult<bool> {
        let mut state = self.state.write();
        match state.items.get_mut(&item.local_id) {
            Some(data) => {
                *data = item.data.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete_item(&mut self, local_id: &str) -> EngineResult<bool> {
        let mut state = self.state.write();
        Ok(state.items.remove(local_id).is_some())
    }
}

/// Serves [`MemoryBackend`]s by local datastore URI.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackendFactory {
    datastores: HashMap<String, (DatastoreConfig, MemoryBackend)>,
}

impl MemoryBackendFactory {
    /// Creates a factory without datastores.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a datastore.
    pub fn with_datastore(mut self, config: DatastoreConfig, backend: MemoryBackend) -> Self {
        self.datastores
            .insert(config.local_uri.clone(), (config, backend));
        self
    }

    /// Returns the backend of a datastore.
    pub fn backend(&self, local_uri: &str) -> Option<MemoryBackend> {
        self.datastores.get(local_uri).map(|(_, b)| b.clone())
    }
}

impl BackendFactory for MemoryBackendFactory {
    fn open(&self, datastore: &DatastoreConfig) -> EngineResult<Option<Box<dyn SyncBackend>>> {
        Ok(self
            .datastores
            .get(&datastore.local_uri)
            .map(|(_, backend)| Box::new(backend.clone()) as Box<dyn SyncBackend>))
    }

    fn datastore_config(&self, local_uri: &str) -> Option<DatastoreConfig> {
        let wanted = local_uri.trim_start_matches("./");
        self.datastores
            .values()
            .find(|(c, _)| c.local_uri.trim_start_matches("./") == wanted)
            .map(|(c, _)| c.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_changes_are_tracked() {
        let backend = MemoryBackend::new();
        backend.insert_local("a", "1");
        backend.insert_local("b", "2");
        backend.update_local("a", "3");
        backend.delete_local("b");

        let mut handle = backend.clone();
        let set = handle.read_sync_set(false).unwrap();
        assert_eq!(set, vec![ChangeRecord::new(SyncOpKind::Add, "a")]);
        assert_eq!(handle.read_sync_set(true).unwrap().len(), 1);
    }

    #[test]
    fn remote_writes_are_not_changes() {
        let mut backend = MemoryBackend::new();
        let id = backend.add_item(&SyncItem::new("", "x")).unwrap();
        assert_eq!(backend.item(&id).as_deref(), Some(&b"x"[..]));
        assert!(backend.update_item(&SyncItem::new(id.clone(), "y")).unwrap());
        assert!(!backend.update_item(&SyncItem::new("nope", "y")).unwrap());
        assert_eq!(backend.pending_changes(), 0);
        assert!(backend.delete_item(&id).unwrap());
        assert!(!backend.delete_item(&id).unwrap());
    }

    #[test]
    fn successful_save_commits_anchors() {
        let mut backend = MemoryBackend::new();
        backend.insert_local("a", "1");
        let admin = AdminRecord {
            last_local_anchor: Some("5".into()),
            ..AdminRecord::default()
        };
        backend.save_admin_data(&admin, false, false).unwrap();
        assert_eq!(backend.admin().last_local_anchor, None);
        assert_eq!(backend.pending_changes(), 1);

        backend.save_admin_data(&admin, true, true).unwrap();
        assert_eq!(backend.admin().last_local_anchor.as_deref(), Some("5"));
        assert_eq!(backend.pending_changes(), 0);
        assert_eq!(backend.saves(), vec![(false, false), (true, true)]);
    }

    #[test]
    fn factory_opens_shared_handles() {
        let backend = MemoryBackend::new();
        let factory = MemoryBackendFactory::new()
            .with_datastore(DatastoreConfig::new("./contacts", ""), backend.clone());
        let config = factory.datastore_config("./contacts").unwrap();
        let mut opened = factory.open(&config).unwrap().unwrap();
        opened.add_item(&SyncItem::new("", "v")).unwrap();
        assert_eq!(backend.items().len(), 1);
        assert!(factory.datastore_config("./notes").is_none());
        assert!(factory.datastore_config("contacts").is_some());
    }
}
