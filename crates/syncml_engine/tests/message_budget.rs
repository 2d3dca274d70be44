//! Property tests for message sizes and command numbering over whole sessions.

use proptest::prelude::*;
use syncml_testkit::prelude::*;

fn assert_increasing(messages: &[Vec<u8>]) {
    let ids: Vec<u32> = messages
        .iter()
        .flat_map(|m| command_ids(&decode(m)))
        .collect();
    assert!(
        ids.windows(2).all(|w| w[0] < w[1]),
        "command ids not increasing: {ids:?}"
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn sessions_respect_both_budgets(
        encoding in encoding_strategy(),
        client_max in max_msg_size_strategy(),
        server_max in max_msg_size_strategy(),
        sizes in proptest::collection::vec(50usize..1500, 1..12),
    ) {
        init_test_tracing();
        let client = client_config()
            .with_encoding(encoding)
            .with_max_msg_size(client_max);
        let server = server_config().with_max_msg_size(server_max);
        let mut pair = SyncPair::with_configs(client, server);
        for (i, size) in sizes.iter().enumerate() {
            pair.client_backend
                .insert_local(format!("c{i}"), vcard(&format!("Client;{i}"), *size));
        }
        pair.server_backend.insert_local("s1", vcard("Server;1", 1400));

        let transcript = pair.run().unwrap();

        for message in &transcript.to_server {
            prop_assert!(message.len() as u64 <= server_max);
        }
        for message in &transcript.to_client {
            prop_assert!(message.len() as u64 <= client_max);
        }
        assert_increasing(&transcript.to_server);
        assert_increasing(&transcript.to_client);

        prop_assert!(pair.client.summary().successful);
        prop_assert!(pair.server.summary().successful);
        prop_assert_eq!(pair.server_backend.items().len(), sizes.len() + 1);
        prop_assert_eq!(pair.client_backend.items().len(), sizes.len() + 1);
    }
}
