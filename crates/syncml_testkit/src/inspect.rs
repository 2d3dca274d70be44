//! Helpers for looking into encoded messages.

use syncml_protocol::{
    AlertCmd, CommandRef, Element, Encoding, ProtocolCommand, StatusCmd, SyncCmd, SyncOpCmd,
    Tag, WireMessage,
};

/// Decodes a message, panicking on malformed input.
pub fn decode(bytes: &[u8]) -> WireMessage {
    WireMessage::decode(bytes)
        .expect("Failed to decode message")
        .0
}

/// Returns the encoding of a message.
pub fn encoding_of(bytes: &[u8]) -> Encoding {
    WireMessage::decode(bytes)
        .expect("Failed to decode message")
        .1
}

/// Parses every body command of a message.
pub fn commands(message: &WireMessage) -> Vec<ProtocolCommand> {
    message
        .body
        .iter()
        .map(|e| ProtocolCommand::from_element(e).expect("Failed to parse command"))
        .collect()
}

/// Returns all command IDs of a message in document order, including
/// commands nested in Sync brackets.
pub fn command_ids(message: &WireMessage) -> Vec<u32> {
    fn collect(element: &Element, ids: &mut Vec<u32>) {
        if let Some(id) = CommandRef::of(element).cmd_id {
            ids.push(id);
        }
        if element.tag == Tag::Sync || element.tag == Tag::Atomic || element.tag == Tag::Sequence {
            for child in element.children() {
                if CommandRef::of(child).kind.is_some() {
                    collect(child, ids);
                }
            }
        }
    }
    let mut ids = Vec::new();
    for element in &message.body {
        collect(element, &mut ids);
    }
    ids
}

/// Returns the alerts of a message.
pub fn alerts(message: &WireMessage) -> Vec<AlertCmd> {
    commands(message)
        .into_iter()
        .filter_map(|c| match c {
            ProtocolCommand::Alert(alert) => Some(alert),
            _ => None,
        })
        .collect()
}

/// Returns the statuses of a message.
pub fn statuses(message: &WireMessage) -> Vec<StatusCmd> {
    commands(message)
        .into_iter()
        .filter_map(|c| match c {
            ProtocolCommand::Status(status) => Some(status),
            _ => None,
        })
        .collect()
}

/// Returns the Sync brackets of a message.
pub fn syncs(message: &WireMessage) -> Vec<SyncCmd> {
    commands(message)
        .into_iter()
        .filter_map(|c| match c {
            ProtocolCommand::Sync(sync) => Some(sync),
            _ => None,
        })
        .collect()
}

/// Returns the operations inside all Sync brackets of a message.
pub fn sync_ops(message: &WireMessage) -> Vec<SyncOpCmd> {
    syncs(message)
        .iter()
        .flat_map(|sync| sync.commands.iter())
        .map(|e| SyncOpCmd::from_element(e).expect("Failed to parse sync operation"))
        .collect()
}
