//! Integration tests for items split across commands and messages.

use syncml_protocol::{StatusCode, SyncMlVersion, SyncOpKind};
use syncml_testkit::prelude::*;

fn payload(len: usize) -> String {
    (0..len).map(|i| char::from(b'a' + (i % 26) as u8)).collect()
}

#[test]
fn item_above_max_obj_size_is_chunked() {
    init_test_tracing();
    let client = client_config().with_max_obj_size(Some(300));
    let mut pair = SyncPair::with_configs(client, server_config());
    let data = payload(500);
    pair.server_backend.insert_local("s1", data.clone());

    let transcript = pair.run().unwrap();

    // Find the chunks the server sent
    let ops: Vec<_> = transcript
        .to_client
        .iter()
        .flat_map(|m| sync_ops(&decode(m)))
        .collect();
    assert_eq!(ops.len(), 2);
    assert!(ops.iter().all(|op| op.kind == SyncOpKind::Add));

    let first = &ops[0].items[0];
    let first_meta = first.meta.as_ref().unwrap();
    assert_eq!(first_meta.size, Some(500));
    assert_eq!(first_meta.data_pos(), Some(0));
    assert!(first.more_data);
    assert_eq!(first.data_len(), 300);

    let second = &ops[1].items[0];
    let second_meta = second.meta.as_ref().unwrap();
    assert_eq!(second_meta.size, None);
    assert_eq!(second_meta.data_pos(), Some(300));
    assert!(!second.more_data);

    // The first chunk is acknowledged as accepted, not yet added. The last
    // chunk of an Add gets 201 rather than a plain 200, as for any Add.
    let acks: Vec<_> = transcript
        .to_server
        .iter()
        .flat_map(|m| statuses(&decode(m)))
        .filter(|s| s.cmd_ref == ops[0].cmd_id || s.cmd_ref == ops[1].cmd_id)
        .map(|s| s.code)
        .collect();
    assert_eq!(acks, vec![StatusCode::CHUNK_ACCEPTED, StatusCode::ITEM_ADDED]);

    let items = pair.client_backend.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items.values().next().unwrap().as_ref(), data.as_bytes());
    assert!(pair.client.summary().successful);
    assert!(pair.server.summary().successful);
}

#[test]
fn item_spans_several_messages() {
    init_test_tracing();
    let server = server_config().with_max_msg_size(2000);
    let mut pair = SyncPair::with_configs(client_config(), server);
    let data = payload(5000);
    pair.client_backend.insert_local("c1", data.clone());

    let transcript = pair.run().unwrap();
    assert!(transcript.to_server.iter().all(|m| m.len() <= 2000));

    let chunks: Vec<_> = transcript
        .to_server
        .iter()
        .flat_map(|m| sync_ops(&decode(m)))
        .collect();
    assert!(chunks.len() >= 3);
    assert!(chunks[..chunks.len() - 1]
        .iter()
        .all(|op| op.items[0].more_data));

    let items = pair.server_backend.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items.values().next().unwrap().as_ref(), data.as_bytes());
    assert!(pair.client.summary().successful);
    assert!(pair.server.summary().successful);
}

#[test]
fn chunked_items_survive_wbxml() {
    init_test_tracing();
    let client = client_config()
        .with_encoding(syncml_protocol::Encoding::Wbxml)
        .with_max_obj_size(Some(400));
    let mut pair = SyncPair::with_configs(client, server_config());
    let upload = payload(1500);
    let download = vcard("Doe;John", 1200);
    pair.client_backend.insert_local("c1", upload.clone());
    pair.server_backend.insert_local("s1", download.clone());

    pair.run().unwrap();

    let server_items = pair.server_backend.items();
    assert!(server_items.values().any(|v| v.as_ref() == upload.as_bytes()));
    let client_items = pair.client_backend.items();
    assert!(client_items.values().any(|v| v.as_ref() == download.as_bytes()));
    assert!(pair.client.summary().successful);
}

#[test]
fn oversized_item_is_skipped_without_large_object_support() {
    init_test_tracing();
    let client = client_config().with_version(SyncMlVersion::V1_1);
    let server = server_config().with_max_msg_size(2000);
    let mut pair = SyncPair::with_configs(client, server);
    pair.client_backend.insert_local("big", payload(5000));
    pair.client_backend.insert_local("small", payload(100));

    pair.run().unwrap();

    let client = pair.client.summary();
    assert_eq!(client.datastores[0].1.outgoing_failed, 1);
    let items = pair.server_backend.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items.values().next().unwrap().len(), 100);
}

#[test]
fn max_obj_size_below_min_split_size_is_honored() {
    init_test_tracing();
    let client = client_config().with_max_obj_size(Some(150));
    let mut pair = SyncPair::with_configs(client, server_config());
    let data = payload(500);
    pair.server_backend.insert_local("s1", data.clone());

    let transcript = pair.run().unwrap();

    let sizes: Vec<_> = transcript
        .to_client
        .iter()
        .flat_map(|m| sync_ops(&decode(m)))
        .map(|op| op.items[0].data_len())
        .collect();
    assert_eq!(sizes, vec![150, 150, 150, 50]);

    let codes: Vec<_> = transcript
        .to_server
        .iter()
        .flat_map(|m| statuses(&decode(m)))
        .filter(|s| s.cmd_kind() == Some(syncml_protocol::CommandKind::Add))
        .map(|s| s.code)
        .collect();
    assert!(!codes.contains(&StatusCode::TOO_LARGE));

    let items = pair.client_backend.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items.values().next().unwrap().as_ref(), data.as_bytes());
    assert!(pair.client.summary().successful);
}
