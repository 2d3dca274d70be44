//! Session fixtures and the loopback driver.

use std::sync::Arc;
use syncml_engine::{
    Authenticator, DatastoreConfig, EngineError, EngineResult, FileResumeStore, MemoryBackend,
    MemoryBackendFactory, MemoryResumeStore, Session, SessionConfig,
};
use tempfile::TempDir;

/// URI the test server answers on.
pub const SERVER_URI: &str = "http://sync.example.com/sync";

/// Device identifier of the test client.
pub const DEVICE_ID: &str = "IMEI:493005100592800";

/// Local URI of the client's contact datastore.
pub const CLIENT_DB: &str = "./contacts";

/// Local URI of the server's contact datastore.
pub const SERVER_DB: &str = "card";

/// Rounds after which the loopback gives up.
pub const MAX_ROUNDS: usize = 200;

/// A client and a server sharing nothing but the wire.
///
/// Backends and resume stores outlive sessions: [`SyncPair::reconnect`]
/// starts a new pair of sessions over the same data, as a device does
/// when it syncs again later.
pub struct SyncPair {
    /// Client session.
    pub client: Session,
    /// Server session.
    pub server: Session,
    /// Client contact store.
    pub client_backend: MemoryBackend,
    /// Server contact store.
    pub server_backend: MemoryBackend,
    /// Client resume state.
    pub client_resume: Arc<MemoryResumeStore>,
    /// Server resume state.
    pub server_resume: Arc<MemoryResumeStore>,
    client_config: SessionConfig,
    server_config: SessionConfig,
    authenticator: Option<Arc<dyn Authenticator>>,
    sessions: u32,
}

impl SyncPair {
    /// Creates a pair with default configurations.
    pub fn new() -> Self {
        Self::with_configs(client_config(), server_config())
    }

    /// Creates a pair with custom configurations.
    ///
    /// The client configuration should contain [`CLIENT_DB`] targeting
    /// [`SERVER_DB`]; [`client_config`] does.
    pub fn with_configs(client_config: SessionConfig, server_config: SessionConfig) -> Self {
        let client_backend = MemoryBackend::new();
        let server_backend = MemoryBackend::new();
        let client_resume = Arc::new(MemoryResumeStore::new());
        let server_resume = Arc::new(MemoryResumeStore::new());
        let client = client_session(&client_config, &client_backend, &client_resume, "1");
        let server = server_session(&server_config, &server_backend, &server_resume, None);
        Self {
            client,
            server,
            client_backend,
            server_backend,
            client_resume,
            server_resume,
            client_config,
            server_config,
            authenticator: None,
            sessions: 1,
        }
    }

    /// Makes the server require authentication, also after reconnecting.
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.server = self.server.with_authenticator(Arc::clone(&authenticator));
        self.authenticator = Some(authenticator);
        self
    }

    /// Replaces both sessions by fresh ones over the same stores.
    pub fn reconnect(&mut self) {
        self.sessions += 1;
        let id = self.sessions.to_string();
        self.client = client_session(
            &self.client_config,
            &self.client_backend,
            &self.client_resume,
            &id,
        );
        self.server = server_session(
            &self.server_config,
            &self.server_backend,
            &self.server_resume,
            self.authenticator.clone(),
        );
    }

    /// Runs the session to its end.
    pub fn run(&mut self) -> EngineResult<Transcript> {
        self.run_with(|_, _, _| {})
    }

    /// Runs the session, calling `hook` before the client reads each
    /// server message. The first argument counts server messages from 1.
    pub fn run_with(
        &mut self,
        mut hook: impl FnMut(usize, &mut Session, &mut Session),
    ) -> EngineResult<Transcript> {
        let mut transcript = Transcript::default();
        let mut outbound = self.client.start()?;
        for round in 1..=MAX_ROUNDS {
            transcript.to_server.push(outbound.clone());
            let answer = self.server.process_message(&outbound)?;
            let Some(inbound) = answer.message else {
                return Ok(transcript);
            };
            transcript.to_client.push(inbound.clone());
            hook(round, &mut self.client, &mut self.server);
            let reply = self.client.process_message(&inbound)?;
            let Some(next) = reply.message else {
                return Ok(transcript);
            };
            if reply.done {
                transcript.to_server.push(next.clone());
                if !self.server.is_done() {
                    self.server.process_message(&next)?;
                }
                return Ok(transcript);
            }
            outbound = next;
        }
        Err(EngineError::InvalidState(format!(
            "session did not end within {MAX_ROUNDS} rounds"
        )))
    }
}

impl Default for SyncPair {
    fn default() -> Self {
        Self::new()
    }
}

/// Messages exchanged by a [`SyncPair`] run, in order per direction.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    /// Messages the client sent.
    pub to_server: Vec<Vec<u8>>,
    /// Messages the server sent.
    pub to_client: Vec<Vec<u8>>,
}

impl Transcript {
    /// Returns the number of round trips.
    pub fn rounds(&self) -> usize {
        self.to_client.len()
    }

    /// Iterates over every message in both directions.
    pub fn all(&self) -> impl Iterator<Item = &Vec<u8>> {
        self.to_server.iter().chain(self.to_client.iter())
    }
}

/// Default client configuration with one contact datastore.
pub fn client_config() -> SessionConfig {
    SessionConfig::client(DEVICE_ID, SERVER_URI)
        .with_datastore(DatastoreConfig::new(CLIENT_DB, SERVER_DB).with_content_type("text/x-vcard"))
}

/// Default server configuration.
pub fn server_config() -> SessionConfig {
    SessionConfig::server(SERVER_URI)
}

fn client_session(
    config: &SessionConfig,
    backend: &MemoryBackend,
    resume: &Arc<MemoryResumeStore>,
    session_id: &str,
) -> Session {
    let factory = config
        .datastores
        .iter()
        .fold(MemoryBackendFactory::new(), |factory, ds| {
            factory.with_datastore(ds.clone(), backend.clone())
        });
    Session::new(config.clone(), session_id, Arc::new(factory), resume.clone())
}

fn server_session(
    config: &SessionConfig,
    backend: &MemoryBackend,
    resume: &Arc<MemoryResumeStore>,
    authenticator: Option<Arc<dyn Authenticator>>,
) -> Session {
    let factory = MemoryBackendFactory::new().with_datastore(
        DatastoreConfig::new(SERVER_DB, "").with_content_type("text/x-vcard"),
        backend.clone(),
    );
    let session = Session::new(config.clone(), "", Arc::new(factory), resume.clone());
    match authenticator {
        Some(authenticator) => session.with_authenticator(authenticator),
        None => session,
    }
}

/// A vCard with a name and padding up to roughly `size` octets.
pub fn vcard(name: &str, size: usize) -> String {
    let mut card = format!("BEGIN:VCARD\r\nVERSION:2.1\r\nN:{name}\r\n");
    if size > card.len() + 20 {
        let pad = size - card.len() - 20;
        card.push_str("NOTE:");
        card.extend(std::iter::repeat('x').take(pad));
        card.push_str("\r\n");
    }
    card.push_str("END:VCARD\r\n");
    card
}

/// A file resume store in a temporary directory.
pub struct TempResumeStore {
    /// The store.
    pub store: Arc<FileResumeStore>,
    _dir: TempDir,
}

impl TempResumeStore {
    /// Creates a store in a new temporary directory.
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let store = FileResumeStore::open(dir.path()).expect("Failed to open resume store");
        Self {
            store: Arc::new(store),
            _dir: dir,
        }
    }
}

impl Default for TempResumeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncml_engine::ResumeStore;

    #[test]
    fn vcard_has_requested_size() {
        let card = vcard("Doe;John", 500);
        assert!(card.starts_with("BEGIN:VCARD"));
        assert!(card.ends_with("END:VCARD\r\n"));
        assert!(card.len() >= 480 && card.len() <= 520);
        assert!(vcard("A", 0).len() < 60);
    }

    #[test]
    fn temp_resume_store_starts_empty() {
        let store = TempResumeStore::new();
        let key = syncml_engine::ResumeKey::new(DEVICE_ID, CLIENT_DB, SERVER_DB);
        assert!(store.store.load_state(&key).unwrap().is_none());
    }

    #[test]
    fn empty_stores_sync() {
        let mut pair = SyncPair::new();
        let transcript = pair.run().unwrap();
        assert!(transcript.rounds() >= 2);
        assert!(pair.client.is_done());
        assert!(pair.server.is_done());
    }
}
