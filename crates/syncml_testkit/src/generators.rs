//! Property-based test generators.
//!
//! Provides proptest strategies for payloads, status codes and session
//! parameters.

use proptest::prelude::*;
use syncml_protocol::{Encoding, StatusCode, SyncMlVersion};

/// Strategy for item payloads of up to `max_len` octets.
///
/// Printable text keeps XML and WBXML encodings comparable.
pub fn payload_strategy(max_len: usize) -> impl Strategy<Value = String> {
    proptest::collection::vec(proptest::char::range(' ', '~'), 0..=max_len)
        .prop_map(|chars| chars.into_iter().collect())
}

/// Strategy for a set of local items keyed by ID.
pub fn local_items_strategy(
    max_items: usize,
    max_len: usize,
) -> impl Strategy<Value = Vec<(String, String)>> {
    proptest::collection::vec(payload_strategy(max_len), 0..=max_items).prop_map(|payloads| {
        payloads
            .into_iter()
            .enumerate()
            .map(|(i, data)| (format!("item{i}"), data))
            .collect()
    })
}

/// Strategy for wire encodings.
pub fn encoding_strategy() -> impl Strategy<Value = Encoding> {
    prop_oneof![Just(Encoding::Xml), Just(Encoding::Wbxml)]
}

/// Strategy for protocol versions supporting large objects.
pub fn large_object_version_strategy() -> impl Strategy<Value = SyncMlVersion> {
    prop_oneof![Just(SyncMlVersion::V1_1), Just(SyncMlVersion::V1_2)]
}

/// Strategy for maximum message sizes a session can work with.
pub fn max_msg_size_strategy() -> impl Strategy<Value = u64> {
    2_000u64..20_000
}

/// Strategy for any status code in the defined ranges.
pub fn status_code_strategy() -> impl Strategy<Value = StatusCode> {
    prop_oneof![
        (100u16..=101).prop_map(StatusCode),
        (200u16..=215).prop_map(StatusCode),
        (300u16..=305).prop_map(StatusCode),
        (400u16..=424).prop_map(StatusCode),
        (500u16..=516).prop_map(StatusCode),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn payloads_are_printable(payload in payload_strategy(64)) {
            prop_assert!(payload.len() <= 64);
            prop_assert!(payload.chars().all(|c| (' '..='~').contains(&c)));
        }

        #[test]
        fn local_ids_are_unique(items in local_items_strategy(10, 8)) {
            let mut ids: Vec<_> = items.iter().map(|(id, _)| id.clone()).collect();
            ids.dedup();
            prop_assert_eq!(ids.len(), items.len());
        }

        #[test]
        fn status_codes_are_classified(code in status_code_strategy()) {
            prop_assert!((100..600).contains(&code.code()));
        }
    }
}
