//! Integration tests for hosting many devices on one server.

use std::sync::Arc;
use syncml_engine::{
    DatastoreConfig, MemoryBackend, MemoryBackendFactory, MemoryResumeStore, Session,
    SessionConfig,
};
use syncml_protocol::StatusCode;
use syncml_server::{BasicAuthenticator, ServerConfig, SyncServer};
use syncml_testkit::prelude::*;

fn device(id: &str, backend: &MemoryBackend, config: SessionConfig) -> Session {
    let factory = MemoryBackendFactory::new().with_datastore(
        DatastoreConfig::new(CLIENT_DB, SERVER_DB),
        backend.clone(),
    );
    let config = SessionConfig {
        local_uri: id.to_string(),
        ..config
    };
    Session::new(
        config,
        "1",
        Arc::new(factory),
        Arc::new(MemoryResumeStore::new()),
    )
}

/// Runs a device against the server until the device is done.
fn sync(server: &SyncServer, client: &mut Session) {
    let mut request = client.start().unwrap();
    for _ in 0..MAX_ROUNDS {
        let response = server.handle_request(&request).unwrap();
        let reply = client.process_message(&response.body).unwrap();
        match reply.message {
            Some(next) if !response.session_done => request = next,
            _ => return,
        }
    }
    panic!("session did not end");
}

#[test]
fn devices_sync_in_parallel() {
    init_test_tracing();

    // Create server
    let server_backend = MemoryBackend::new();
    let factory = MemoryBackendFactory::new().with_datastore(
        DatastoreConfig::new(SERVER_DB, ""),
        server_backend.clone(),
    );
    let server = SyncServer::new(ServerConfig::new(SERVER_URI), Arc::new(factory));

    // Sync four devices at once
    let devices: Vec<_> = (0..4)
        .map(|d| {
            let backend = MemoryBackend::new();
            for i in 0..5 {
                backend.insert_local(format!("c{i}"), vcard(&format!("Device {d};{i}"), 400));
            }
            (format!("IMEI:{d}"), backend)
        })
        .collect();
    std::thread::scope(|scope| {
        for (id, backend) in &devices {
            let server = &server;
            scope.spawn(move || {
                let mut client = device(id, backend, client_config());
                sync(server, &mut client);
                assert!(client.summary().successful, "{id}");
            });
        }
    });

    assert_eq!(server.active_sessions(), 0);
    assert_eq!(server_backend.items().len(), 20);
}

#[test]
fn users_must_authenticate() {
    init_test_tracing();
    let factory = MemoryBackendFactory::new()
        .with_datastore(DatastoreConfig::new(SERVER_DB, ""), MemoryBackend::new());
    let users = BasicAuthenticator::new().with_user("alice", "secret");
    let server = SyncServer::new(ServerConfig::new(SERVER_URI), Arc::new(factory))
        .with_authenticator(Arc::new(users));

    // Right password
    let mut alice = device(
        "IMEI:1",
        &MemoryBackend::new(),
        client_config().with_credentials("alice", "secret"),
    );
    sync(&server, &mut alice);
    assert!(alice.summary().successful);

    // Wrong password
    let mut mallory = device(
        "IMEI:2",
        &MemoryBackend::new(),
        client_config().with_credentials("alice", "guess"),
    );
    sync(&server, &mut mallory);
    assert_eq!(
        mallory.summary().aborted,
        Some(StatusCode::INVALID_CREDENTIALS)
    );
    assert_eq!(server.active_sessions(), 0);
}

#[test]
fn idle_sessions_are_dropped() {
    init_test_tracing();
    let factory = MemoryBackendFactory::new();
    let config = ServerConfig::new(SERVER_URI).with_idle_timeout(std::time::Duration::ZERO);
    let server = SyncServer::new(config, Arc::new(factory));

    let mut client = device("IMEI:9", &MemoryBackend::new(), client_config());
    server.handle_request(&client.start().unwrap()).unwrap();
    assert_eq!(server.active_sessions(), 1);
    assert_eq!(server.expire_idle(), 1);
    assert_eq!(server.active_sessions(), 0);
}
