//! Datastore backend abstraction.
//!
//! The engine never stores items itself. Everything it reads or writes goes
//! through a [`SyncBackend`] opened per datastore by a [`BackendFactory`].

use crate::config::DatastoreConfig;
use crate::error::EngineResult;
use bytes::Bytes;
use std::collections::BTreeMap;
use syncml_protocol::SyncOpKind;

/// Persistent per-datastore administration data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdminRecord {
    /// Our anchor of the last successful session.
    pub last_local_anchor: Option<String>,
    /// The remote's anchor of the last successful session.
    pub last_remote_anchor: Option<String>,
    /// Local ID to remote ID map (kept by servers).
    pub map: BTreeMap<String, String>,
}

impl AdminRecord {
    /// Returns true if the datastore never completed a session.
    pub fn is_first_sync(&self) -> bool {
        self.last_local_anchor.is_none()
    }

    /// Looks up the local ID mapped to a remote ID.
    pub fn local_for(&self, remote_id: &str) -> Option<&str> {
        self.map
            .iter()
            .find(|(_, r)| r.as_str() == remote_id)
            .map(|(l, _)| l.as_str())
    }

    /// Looks up the remote ID of a local item.
    pub fn remote_for(&self, local_id: &str) -> Option<&str> {
        self.map.get(local_id).map(String::as_str)
    }
}

/// A stored item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncItem {
    /// Local identifier.
    pub local_id: String,
    /// Content type.
    pub content_type: Option<String>,
    /// Payload.
    pub data: Bytes,
}

impl SyncItem {
    /// Creates an item.
    pub fn new(local_id: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            local_id: local_id.into(),
            content_type: None,
            data: data.into(),
        }
    }
}

/// A local change to send to the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    /// Operation.
    pub kind: SyncOpKind,
    /// Local identifier of the changed item.
    pub local_id: String,
}

impl ChangeRecord {
    /// Creates a change record.
    pub fn new(kind: SyncOpKind, local_id: impl Into<String>) -> Self {
        Self {
            kind,
            local_id: local_id.into(),
        }
    }
}

/// Storage of one datastore.
pub trait SyncBackend: Send {
    /// Loads the administration data for a device/datastore pair.
    fn load_admin_data(
        &mut self,
        device_id: &str,
        database_id: &str,
        remote_db_id: &str,
    ) -> EngineResult<AdminRecord>;

    /// Saves administration data at the end of a session.
    ///
    /// `successful` sessions commit their anchors and forget sent changes.
    fn save_admin_data(
        &mut self,
        admin: &AdminRecord,
        session_finished: bool,
        successful: bool,
    ) -> EngineResult<()>;

    /// Returns the anchor identifying the current state.
    fn current_anchor(&mut self) -> EngineResult<String>;

    /// Returns the local changes to send. `need_all` returns every item.
    fn read_sync_set(&mut self, need_all: bool) -> EngineResult<Vec<ChangeRecord>>;

    /// Reads an item.
    fn fetch_item(&mut self, local_id: &str) -> EngineResult<Option<SyncItem>>;

    /// Adds an item and returns its new local ID.
    fn add_item(&mut self, item: &SyncItem) -> EngineResult<String>;

    /// Replaces an item. Returns false if it does not exist.
    fn update_item(&mut self, item: &SyncItem) -> EngineResult<bool>;

    /// Deletes an item. Returns false if it does not exist.
    fn delete_item(&mut self, local_id: &str) -> EngineResult<bool>;
}

/// Opens backends for datastores.
pub trait BackendFactory: Send + Sync {
    /// Opens the backend for a local datastore URI.
    ///
    /// Returns `None` when no such datastore exists.
    fn open(&self, datastore: &DatastoreConfig) -> EngineResult<Option<Box<dyn SyncBackend>>>;

    /// Returns the configuration for a local datastore URI, if known.
    fn datastore_config(&self, local_uri: &str) -> Option<DatastoreConfig>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_lookup_both_ways() {
        let mut admin = AdminRecord::default();
        assert!(admin.is_first_sync());
        admin.map.insert("l1".into(), "r1".into());
        admin.map.insert("l2".into(), "r2".into());
        assert_eq!(admin.local_for("r2"), Some("l2"));
        assert_eq!(admin.remote_for("l1"), Some("r1"));
        assert_eq!(admin.local_for("l1"), None);
    }
}
