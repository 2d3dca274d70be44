//! Request dispatch to hosted sessions.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::registry::SessionRegistry;
use std::sync::Arc;
use syncml_engine::{Authenticator, BackendFactory, MemoryResumeStore, ResumeStore, Session};
use syncml_protocol::{Encoding, WireMessage};
use tracing::{debug, info, warn};

/// The answer to one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Encoded SyncML message.
    pub body: Vec<u8>,
    /// Encoding of the body, same as the request's.
    pub encoding: Encoding,
    /// The session ended with this answer.
    pub session_done: bool,
}

impl Response {
    /// Returns the MIME type of the body.
    pub fn content_type(&self) -> &'static str {
        self.encoding.mime_type()
    }
}

/// Hosts server sessions for any number of devices.
///
/// Transport is left to the caller: hand each request body to
/// [`SyncServer::handle_request`] and send back the response body.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use syncml_engine::{DatastoreConfig, MemoryBackend, MemoryBackendFactory};
/// use syncml_server::{ServerConfig, SyncServer};
///
/// let factory = MemoryBackendFactory::new()
///     .with_datastore(DatastoreConfig::new("card", ""), MemoryBackend::new());
/// let server = SyncServer::new(ServerConfig::default(), Arc::new(factory));
/// assert_eq!(server.active_sessions(), 0);
/// ```
pub struct SyncServer {
    config: ServerConfig,
    factory: Arc<dyn BackendFactory>,
    resume_store: Arc<dyn ResumeStore>,
    authenticator: Option<Arc<dyn Authenticator>>,
    registry: SessionRegistry,
}

impl SyncServer {
    /// Creates a server keeping resume state in memory.
    pub fn new(config: ServerConfig, factory: Arc<dyn BackendFactory>) -> Self {
        let registry = SessionRegistry::new(config.max_sessions, config.idle_timeout);
        Self {
            config,
            factory,
            resume_store: Arc::new(MemoryResumeStore::new()),
            authenticator: None,
            registry,
        }
    }

    /// Uses a different resume store.
    pub fn with_resume_store(mut self, store: Arc<dyn ResumeStore>) -> Self {
        self.resume_store = store;
        self
    }

    /// Requires devices to authenticate.
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Handles one request body.
    ///
    /// Messages are routed by device and session ID. A resent message gets
    /// the answer buffered for it. Sessions are forgotten once they end.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for bodies that are not SyncML,
    /// `TooManySessions` when the session limit is reached, and engine
    /// errors for messages the session refuses.
    pub fn handle_request(&self, body: &[u8]) -> ServerResult<Response> {
        let (message, encoding) = WireMessage::decode(body)?;
        let header = &message.header;
        let key = format!("{}/{}", header.source.uri, header.session_id);
        debug!(session = %key, msg_id = header.msg_id, size = body.len(), "request received");

        let slot = self
            .registry
            .get_or_create(&key, || self.new_session(&header.session_id))?;
        let reply = {
            let mut session = slot.enter();
            match session.process_message(body) {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(session = %key, error = %e, "request refused");
                    if session.is_done() {
                        self.registry.remove(&key);
                    }
                    return Err(e.into());
                }
            }
        };

        if reply.done {
            self.registry.remove(&key);
            info!(session = %key, "session finished");
        }
        let body = reply.message.ok_or_else(|| ServerError::NoAnswer(key.clone()))?;
        Ok(Response {
            body,
            encoding,
            session_done: reply.done,
        })
    }

    fn new_session(&self, session_id: &str) -> Session {
        let session = Session::new(
            self.config.session.clone(),
            session_id,
            Arc::clone(&self.factory),
            Arc::clone(&self.resume_store),
        );
        match &self.authenticator {
            Some(auth) => session.with_authenticator(Arc::clone(auth)),
            None => session,
        }
    }

    /// Returns the number of sessions in progress.
    pub fn active_sessions(&self) -> usize {
        self.registry.len()
    }

    /// Drops sessions idle for longer than the configured timeout.
    pub fn expire_idle(&self) -> usize {
        self.registry.expire_idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncml_engine::{DatastoreConfig, MemoryBackend, MemoryBackendFactory, SessionConfig};
    use syncml_testkit::{client_config, CLIENT_DB, SERVER_DB, SERVER_URI};

    fn server(backend: &MemoryBackend) -> SyncServer {
        let factory = MemoryBackendFactory::new()
            .with_datastore(DatastoreConfig::new(SERVER_DB, ""), backend.clone());
        SyncServer::new(ServerConfig::new(SERVER_URI), Arc::new(factory))
    }

    fn client(backend: &MemoryBackend, session_id: &str) -> Session {
        let factory = MemoryBackendFactory::new()
            .with_datastore(DatastoreConfig::new(CLIENT_DB, SERVER_DB), backend.clone());
        Session::new(
            client_config(),
            session_id,
            Arc::new(factory),
            Arc::new(MemoryResumeStore::new()),
        )
    }

    #[test]
    fn garbage_is_an_invalid_request() {
        let server = server(&MemoryBackend::new());
        let err = server.handle_request(b"hello").unwrap_err();
        assert!(matches!(err, ServerError::InvalidRequest(_)));
        assert!(err.is_client_error());
        assert_eq!(server.active_sessions(), 0);
    }

    #[test]
    fn session_lives_until_it_ends() {
        let server_backend = MemoryBackend::new();
        let server = server(&server_backend);
        let client_backend = MemoryBackend::new();
        client_backend.insert_local("c1", "BEGIN:VCARD\r\nN:Doe;Jane\r\nEND:VCARD\r\n");
        let mut client = client(&client_backend, "1");

        let mut request = client.start().unwrap();
        loop {
            let response = server.handle_request(&request).unwrap();
            assert_eq!(response.content_type(), "application/vnd.syncml+xml");
            if !response.session_done {
                assert_eq!(server.active_sessions(), 1);
            }
            let reply = client.process_message(&response.body).unwrap();
            match reply.message {
                Some(next) if !response.session_done => request = next,
                _ => break,
            }
        }

        assert!(client.summary().successful);
        assert_eq!(server.active_sessions(), 0);
        assert_eq!(server_backend.items().len(), 1);
    }

    #[test]
    fn resent_request_gets_the_buffered_answer() {
        let server = server(&MemoryBackend::new());
        let mut client = client(&MemoryBackend::new(), "7");
        let request = client.start().unwrap();

        let first = server.handle_request(&request).unwrap();
        let again = server.handle_request(&request).unwrap();
        assert_eq!(first, again);
        assert_eq!(server.active_sessions(), 1);
    }

    #[test]
    fn sessions_are_kept_apart() {
        let server = server(&MemoryBackend::new());
        let mut one = client(&MemoryBackend::new(), "1");
        let mut two = client(&MemoryBackend::new(), "2");
        server.handle_request(&one.start().unwrap()).unwrap();
        server.handle_request(&two.start().unwrap()).unwrap();
        assert_eq!(server.active_sessions(), 2);
    }

    #[test]
    fn session_limit_is_enforced() {
        let factory = MemoryBackendFactory::new();
        let config = ServerConfig::new(SERVER_URI)
            .with_session(SessionConfig::server(SERVER_URI))
            .with_max_sessions(1);
        let server = SyncServer::new(config, Arc::new(factory));
        let mut one = client(&MemoryBackend::new(), "1");
        let mut two = client(&MemoryBackend::new(), "2");
        server.handle_request(&one.start().unwrap()).unwrap();
        let err = server.handle_request(&two.start().unwrap()).unwrap_err();
        assert!(matches!(err, ServerError::TooManySessions(1)));
        assert!(err.is_server_error());
    }
}
