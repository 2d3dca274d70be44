//! Persistence of suspended session state.
//!
//! A suspended session leaves behind one [`ResumeState`] per datastore and,
//! for an item whose chunks were only partially received, one
//! [`PartialItem`]. Both are keyed by the device/datastore triple so a later
//! session between the same parties can pick them up.

use crate::error::{EngineError, EngineResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use syncml_protocol::SyncOpKind;

/// Identifies the resume state of one datastore pairing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResumeKey {
    /// Remote device (client device ID or server URI).
    pub device_id: String,
    /// Local datastore URI.
    pub local_db: String,
    /// Remote datastore URI.
    pub remote_db: String,
}

impl ResumeKey {
    /// Creates a key.
    pub fn new(
        device_id: impl Into<String>,
        local_db: impl Into<String>,
        remote_db: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            local_db: local_db.into(),
            remote_db: remote_db.into(),
        }
    }

    fn file_stem(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [&self.device_id, &self.local_db, &self.remote_db] {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

/// Operation of an item that must be resent after resuming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResumeOp {
    /// Add.
    Add,
    /// Replace.
    Replace,
    /// Delete.
    Delete,
}

impl From<SyncOpKind> for ResumeOp {
    fn from(kind: SyncOpKind) -> Self {
        match kind {
            SyncOpKind::Delete => ResumeOp::Delete,
            SyncOpKind::Replace | SyncOpKind::Move => ResumeOp::Replace,
            SyncOpKind::Add | SyncOpKind::Copy => ResumeOp::Add,
        }
    }
}

impl From<ResumeOp> for SyncOpKind {
    fn from(op: ResumeOp) -> Self {
        match op {
            ResumeOp::Add => SyncOpKind::Add,
            ResumeOp::Replace => SyncOpKind::Replace,
            ResumeOp::Delete => SyncOpKind::Delete,
        }
    }
}

/// An item that was not confirmed when the session was suspended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingItem {
    /// Operation to repeat.
    pub op: ResumeOp,
    /// Local identifier.
    pub local_id: String,
    /// Remote identifier, if known.
    pub remote_id: Option<String>,
    /// The item was never sent.
    pub unsent: bool,
}

/// An outgoing chunked item that was interrupted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingPartial {
    /// Operation.
    pub op: ResumeOp,
    /// Local identifier.
    pub local_id: String,
    /// Remote identifier, if known.
    pub remote_id: Option<String>,
    /// Complete payload.
    pub data: Vec<u8>,
    /// Bytes the remote confirmed with 213.
    pub confirmed: u64,
}

/// Per-datastore state saved at suspend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeState {
    /// Sync mode of the suspended session.
    pub alert_code: u16,
    /// Map entries not yet confirmed, as `(remote, local)` pairs.
    pub pending_maps: Vec<(String, String)>,
    /// Items to resend.
    pub pending_items: Vec<PendingItem>,
    /// ID of an item with a stored incoming partial.
    pub partial_item_id: Option<String>,
    /// Interrupted outgoing chunked item.
    pub outgoing_partial: Option<OutgoingPartial>,
}

/// An incoming chunked item received only in part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialItem {
    /// Operation.
    pub op: ResumeOp,
    /// Source URI of the item.
    pub source_uri: Option<String>,
    /// Target URI of the item.
    pub target_uri: Option<String>,
    /// Content type.
    pub content_type: Option<String>,
    /// Announced total size.
    pub total_size: u64,
    /// Bytes received so far.
    pub data: Vec<u8>,
    /// Length of the last chunk, whose 213 may not have reached the sender.
    pub unconfirmed: u64,
}

impl PartialItem {
    /// Returns the identifier used to look up this partial.
    pub fn item_id(&self) -> Option<&str> {
        self.source_uri.as_deref().or(self.target_uri.as_deref())
    }
}

/// Storage for resume state.
pub trait ResumeStore: Send + Sync {
    /// Loads the state of a datastore pairing.
    fn load_state(&self, key: &ResumeKey) -> EngineResult<Option<ResumeState>>;

    /// Saves the state of a datastore pairing.
    fn save_state(&self, key: &ResumeKey, state: &ResumeState) -> EngineResult<()>;

    /// Removes the state of a datastore pairing and its partial items.
    fn clear_state(&self, key: &ResumeKey) -> EngineResult<()>;

    /// Loads a partial item.
    fn load_partial(&self, key: &ResumeKey, item_id: &str) -> EngineResult<Option<PartialItem>>;

    /// Saves a partial item.
    fn save_partial(&self, key: &ResumeKey, item_id: &str, item: &PartialItem) -> EngineResult<()>;

    /// Removes a partial item.
    fn clear_partial(&self, key: &ResumeKey, item_id: &str) -> EngineResult<()>;
}

/// Resume store held in memory.
#[derive(Debug, Default)]
pub struct MemoryResumeStore {
    states: RwLock<HashMap<ResumeKey, ResumeState>>,
    partials: RwLock<HashMap<(ResumeKey, String), PartialItem>>,
}

impl MemoryResumeStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored states.
    pub fn len(&self) -> usize {
        self.states.read().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.states.read().is_empty() && self.partials.read().is_empty()
    }
}

impl ResumeStore for MemoryResumeStore {
    fn load_state(&self, key: &ResumeKey) -> EngineResult<Option<ResumeState>> {
        Ok(self.states.read().get(key).cloned())
    }

    fn save_state(&self, key: &ResumeKey, state: &ResumeState) -> EngineResult<()> {
        self.states.write().insert(key.clone(), state.clone());
        Ok(())
    }

    fn clear_state(&self, key: &ResumeKey) -> EngineResult<()> {
        self.states.write().remove(key);
        self.partials.write().retain(|(k, _), _| k != key);
        Ok(())
    }

    fn load_partial(&self, key: &ResumeKey, item_id: &str) -> EngineResult<Option<PartialItem>> {
        Ok(self
            .partials
            .read()
            .get(&(key.clone(), item_id.to_string()))
            .cloned())
    }

    fn save_partial(&self, key: &ResumeKey, item_id: &str, item: &PartialItem) -> EngineResult<()> {
        self.partials
            .write()
            .insert((key.clone(), item_id.to_string()), item.clone());
        Ok(())
    }

    fn clear_partial(&self, key: &ResumeKey, item_id: &str) -> EngineResult<()> {
        self.partials
            .write()
            .remove(&(key.clone(), item_id.to_string()));
        Ok(())
    }
}

/// Resume store writing one CBOR file per key into a directory.
#[derive(Debug)]
pub struct FileResumeStore {
    dir: PathBuf,
}

impl FileResumeStore {
    /// Opens a store in `dir`, creating the directory if needed.
    pub fn open(dir: impl AsRef<Path>) -> EngineResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| io_error(&dir, e))?;
        Ok(Self { dir })
    }

    fn state_path(&self, key: &ResumeKey) -> PathBuf {
        self.dir.join(format!("{}.state", key.file_stem()))
    }

    fn partial_path(&self, key: &ResumeKey, item_id: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(item_id.as_bytes());
        let item: String = hasher.finalize()[..8]
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();
        self.dir.join(format!("{}-{item}.partial", key.file_stem()))
    }

    fn read<T: for<'de> Deserialize<'de>>(path: &Path) -> EngineResult<Option<T>> {
        let file = match fs::File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(path, e)),
        };
        ciborium::from_reader(io::BufReader::new(file))
            .map(Some)
            .map_err(|e| EngineError::resume(format!("{}: {e}", path.display())))
    }

    fn write<T: Serialize>(path: &Path, value: &T) -> EngineResult<()> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| EngineError::resume(format!("{}: {e}", path.display())))?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &buf).map_err(|e| io_error(&tmp, e))?;
        fs::rename(&tmp, path).map_err(|e| io_error(path, e))
    }

    fn remove(path: &Path) -> EngineResult<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(path, e)),
        }
    }
}

fn io_error(path: &Path, e: io::Error) -> EngineError {
    EngineError::resume(format!("{}: {e}", path.display()))
}

impl ResumeStore for FileResumeStore {
    fn load_state(&self, key: &ResumeKey) -> EngineResult<Option<ResumeState>> {
        Self::read(&self.state_path(key))
    }

    fn save_state(&self, key: &ResumeKey, state: &ResumeState) -> EngineResult<()> {
        Self::write(&self.state_path(key), state)
    }

    fn clear_state(&self, key: &ResumeKey) -> EngineResult<()> {
        Self::remove(&self.state_path(key))?;
        let prefix = format!("{}-", key.file_stem());
        let entries = fs::read_dir(&self.dir).map_err(|e| io_error(&self.dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| io_error(&self.dir, e))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(&prefix) && name.ends_with(".partial") {
                Self::remove(&entry.path())?;
            }
        }
        Ok(())
    }

    fn load_partial(&self, key: &ResumeKey, item_id: &str) -> EngineResult<Option<PartialItem>> {
        Self::read(&self.partial_path(key, item_id))
    }

    fn save_partial(&self, key: &ResumeKey, item_id: &str, item: &PartialItem) -> EngineResult<()> {
        Self::write(&self.partial_path(key, item_id), item)
    }

    fn clear_partial(&self, key: &ResumeKey, item_id: &str) -> EngineResult<()> {
        Self::remove(&self.partial_path(key, item_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn key() -> ResumeKey {
        ResumeKey::new("IMEI:1", "./contacts", "card")
    }

    fn state() -> ResumeState {
        ResumeState {
            alert_code: 200,
            pending_maps: vec![("g1".into(), "l1".into())],
            pending_items: vec![PendingItem {
                op: ResumeOp::Replace,
                local_id: "l2".into(),
                remote_id: Some("g2".into()),
                unsent: false,
            }],
            partial_item_id: Some("g3".into()),
            outgoing_partial: None,
        }
    }

    fn partial() -> PartialItem {
        PartialItem {
            op: ResumeOp::Add,
            source_uri: Some("g3".into()),
            target_uri: None,
            content_type: Some("text/plain".into()),
            total_size: 500,
            data: vec![7; 300],
            unconfirmed: 300,
        }
    }

    fn exercise(store: &dyn ResumeStore) {
        assert_eq!(store.load_state(&key()).unwrap(), None);
        store.save_state(&key(), &state()).unwrap();
        store.save_partial(&key(), "g3", &partial()).unwrap();
        assert_eq!(store.load_state(&key()).unwrap(), Some(state()));
        assert_eq!(store.load_partial(&key(), "g3").unwrap(), Some(partial()));
        assert_eq!(store.load_partial(&key(), "g4").unwrap(), None);

        let other = ResumeKey::new("IMEI:2", "./contacts", "card");
        assert_eq!(store.load_state(&other).unwrap(), None);

        store.clear_state(&key()).unwrap();
        assert_eq!(store.load_state(&key()).unwrap(), None);
        assert_eq!(store.load_partial(&key(), "g3").unwrap(), None);
        store.clear_partial(&key(), "g3").unwrap();
    }

    #[test]
    fn memory_store() {
        let store = MemoryResumeStore::new();
        exercise(&store);
        assert!(store.is_empty());
    }

    #[test]
    fn file_store() {
        let dir = tempdir().unwrap();
        let store = FileResumeStore::open(dir.path().join("resume")).unwrap();
        exercise(&store);
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempdir().unwrap();
        FileResumeStore::open(dir.path())
            .unwrap()
            .save_state(&key(), &state())
            .unwrap();
        let reopened = FileResumeStore::open(dir.path()).unwrap();
        assert_eq!(reopened.load_state(&key()).unwrap(), Some(state()));
    }

    #[test]
    fn op_conversion() {
        assert_eq!(ResumeOp::from(SyncOpKind::Copy), ResumeOp::Add);
        assert_eq!(SyncOpKind::from(ResumeOp::Delete), SyncOpKind::Delete);
        assert_eq!(partial().item_id(), Some("g3"));
    }
}
