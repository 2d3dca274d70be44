//! Benchmark utilities.

use rand::Rng;
use syncml_protocol::{
    Item, Location, Meta, SyncCmd, SyncHdr, SyncMlVersion, SyncOpCmd, SyncOpKind, WireMessage,
};
use syncml_testkit::{SyncPair, CLIENT_DB, SERVER_DB};

/// Generate printable item data of the specified size.
pub fn random_payload(size: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..size)
        .map(|_| char::from(rng.gen_range(b' '..=b'~')))
        .collect()
}

/// Generate a message carrying one Sync with `count` Add operations.
pub fn sync_message(count: usize, payload_size: usize) -> WireMessage {
    let header = SyncHdr::new(
        SyncMlVersion::V1_2,
        "1",
        2,
        Location::new("http://sync.example.com/sync"),
        Location::new("IMEI:493005100592800"),
    );
    let mut sync = SyncCmd::new(1, Location::new(SERVER_DB), Location::new(CLIENT_DB));
    for i in 0..count {
        let item = Item::with_source(format!("{i}"))
            .meta(Meta::with_type("text/x-vcard"))
            .data(random_payload(payload_size));
        let add = SyncOpCmd::new(SyncOpKind::Add, i as u32 + 2, vec![item]);
        sync.commands.push(add.to_element());
    }
    WireMessage::new(header, vec![sync.to_element()], true)
}

/// Generate a pair whose client holds `count` new items.
pub fn loaded_pair(count: usize, payload_size: usize) -> SyncPair {
    let pair = SyncPair::new();
    for i in 0..count {
        pair.client_backend
            .insert_local(format!("c{i}"), random_payload(payload_size));
    }
    pair
}
