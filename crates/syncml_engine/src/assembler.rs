//! Outgoing message assembly under a size budget.
//!
//! The assembler keeps the exact encoded size of the message built so far.
//! Sizes are additive because every body command sits on the default code
//! page, so evaluating a command is a pure size computation and nothing is
//! ever encoded twice.

use crate::error::{EngineError, EngineResult};
use syncml_codec::{document_size, element_size, encode_document, PAGE_SYNCML};
use syncml_protocol::{Element, Encoding, Tag};
use tracing::warn;

/// Builds one outgoing message at a time.
#[derive(Debug)]
pub struct MessageAssembler {
    encoding: Encoding,
    namespace: &'static str,
    header: Option<Element>,
    body: Vec<Element>,
    open_sync: Option<usize>,
    used: usize,
    base: usize,
    limit: usize,
}

impl MessageAssembler {
    /// Creates an idle assembler.
    pub fn new(encoding: Encoding, namespace: &'static str) -> Self {
        Self {
            encoding,
            namespace,
            header: None,
            body: Vec::new(),
            open_sync: None,
            used: 0,
            base: 0,
            limit: 0,
        }
    }

    /// Starts a message with the given header and size limit.
    ///
    /// The Final marker is always accounted for.
    pub fn start(&mut self, header: Element, limit: usize) {
        let skeleton = Element::node(
            Tag::SyncMl,
            vec![
                header.clone(),
                Element::node(Tag::SyncBody, vec![Element::empty(Tag::Final)]),
            ],
        );
        self.used = document_size(&skeleton, self.encoding, self.namespace);
        self.base = self.used;
        self.header = Some(header);
        self.body.clear();
        self.open_sync = None;
        self.limit = limit;
    }

    /// Changes the encoding for messages started later.
    pub fn set_encoding(&mut self, encoding: Encoding, namespace: &'static str) {
        self.encoding = encoding;
        self.namespace = namespace;
    }

    /// Returns the encoding.
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Returns true while a message is being built.
    pub fn is_open(&self) -> bool {
        self.header.is_some()
    }

    /// Returns the bytes used so far.
    pub fn used(&self) -> usize {
        self.used
    }

    /// Returns the size of a message without body commands.
    pub fn base_size(&self) -> usize {
        self.base
    }

    /// Returns the bytes left in the budget. Negative once overfull.
    pub fn remaining(&self) -> isize {
        self.limit as isize - self.used as isize
    }

    /// Returns the size an element adds to the message.
    pub fn size_of(&self, element: &Element) -> usize {
        element_size(element, self.encoding, PAGE_SYNCML)
    }

    /// Returns the bytes left if the element were added.
    pub fn eval(&self, element: &Element) -> isize {
        self.remaining() - self.size_of(element) as isize
    }

    /// Returns true if the element fits the remaining budget.
    pub fn fits(&self, element: &Element) -> bool {
        self.eval(element) >= 0
    }

    /// Adds a top-level body command.
    pub fn add(&mut self, element: Element) {
        self.used += self.size_of(&element);
        self.body.push(element);
    }

    /// Adds a Sync bracket and keeps it open for operations.
    pub fn open_sync(&mut self, element: Element) {
        self.add(element);
        self.open_sync = Some(self.body.len() - 1);
    }

    /// Adds an operation to the open Sync bracket.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` when no bracket is open.
    pub fn add_to_sync(&mut self, element: Element) -> EngineResult<()> {
        let index = self
            .open_sync
            .ok_or_else(|| EngineError::InvalidState("no open Sync bracket".into()))?;
        self.used += self.size_of(&element);
        self.body[index].push(element);
        Ok(())
    }

    /// Closes the open Sync bracket.
    pub fn close_sync(&mut self) {
        self.open_sync = None;
    }

    /// Returns the number of top-level body commands.
    pub fn command_count(&self) -> usize {
        self.body.len()
    }

    /// Drops the message being built.
    pub fn abandon(&mut self) {
        self.header = None;
        self.body.clear();
        self.open_sync = None;
    }

    /// Encodes the message and resets the assembler.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` without a started message, or a codec error.
    pub fn finish(&mut self, is_final: bool) -> EngineResult<Vec<u8>> {
        let header = self
            .header
            .take()
            .ok_or_else(|| EngineError::InvalidState("no message started".into()))?;
        let mut body = std::mem::take(&mut self.body);
        if is_final {
            body.push(Element::empty(Tag::Final));
        }
        self.open_sync = None;
        let root = Element::node(
            Tag::SyncMl,
            vec![header, Element::node(Tag::SyncBody, body)],
        );
        let bytes = encode_document(&root, self.encoding, self.namespace)?;
        if bytes.len() > self.limit {
            warn!(size = bytes.len(), limit = self.limit, "message exceeds size limit");
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncml_protocol::{Location, MapItem, StatusCmd, StatusCode, SyncHdr, SyncMlVersion, CommandKind};

    fn header() -> Element {
        SyncHdr::new(
            SyncMlVersion::V1_2,
            "1",
            1,
            Location::new("http://srv"),
            Location::new("dev"),
        )
        .to_element()
    }

    fn status(cmd_ref: u32) -> Element {
        let mut s = StatusCmd::new(1, cmd_ref, CommandKind::Add, StatusCode::OK);
        s.cmd_id = cmd_ref + 1;
        s.to_element()
    }

    #[test]
    fn tracked_size_matches_output() {
        for encoding in [Encoding::Xml, Encoding::Wbxml] {
            let mut asm = MessageAssembler::new(encoding, SyncMlVersion::V1_2.namespace());
            asm.start(header(), 10_000);
            asm.add(status(1));
            asm.open_sync(Element::node(Tag::Sync, vec![Element::text(Tag::CmdId, "3")]));
            asm.add_to_sync(MapItem::new("a", "b").to_element()).unwrap();
            asm.close_sync();
            let expected = asm.used();
            let bytes = asm.finish(true).unwrap();
            assert_eq!(bytes.len(), expected, "{encoding:?}");
        }
    }

    #[test]
    fn non_final_message_is_smaller_than_tracked() {
        let mut asm = MessageAssembler::new(Encoding::Wbxml, SyncMlVersion::V1_2.namespace());
        asm.start(header(), 10_000);
        asm.add(status(1));
        let used = asm.used();
        let bytes = asm.finish(false).unwrap();
        assert!(bytes.len() < used);
        assert!(!asm.is_open());

        asm.start(header(), 10_000);
        assert_eq!(asm.used(), asm.base_size());
        asm.add(status(1));
        asm.abandon();
        assert!(!asm.is_open());
        assert!(asm.finish(true).is_err());
    }

    #[test]
    fn eval_reports_budget() {
        let mut asm = MessageAssembler::new(Encoding::Xml, SyncMlVersion::V1_2.namespace());
        asm.start(header(), 0);
        assert!(asm.remaining() < 0);
        let base = asm.used();
        asm.start(header(), base + asm.size_of(&status(1)));
        assert!(asm.fits(&status(1)));
        asm.add(status(1));
        assert_eq!(asm.remaining(), 0);
        assert!(!asm.fits(&status(2)));
    }

    #[test]
    fn sync_operations_need_open_bracket() {
        let mut asm = MessageAssembler::new(Encoding::Xml, SyncMlVersion::V1_2.namespace());
        asm.start(header(), 10_000);
        assert!(asm.add_to_sync(status(1)).is_err());
        assert_eq!(asm.command_count(), 0);
    }
}
