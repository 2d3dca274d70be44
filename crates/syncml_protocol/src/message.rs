//! Complete SyncML messages.

use crate::error::{ProtocolError, ProtocolResult};
use crate::fields::expect_tag;
use crate::header::SyncHdr;
use syncml_codec::{decode_document, encode_document, Element, Encoding, Tag};

/// A decoded SyncML message: header, body commands and the Final flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    /// Parsed header.
    pub header: SyncHdr,
    /// Body commands in element form, in document order.
    pub body: Vec<Element>,
    /// The message ends a package.
    pub is_final: bool,
}

impl WireMessage {
    /// Creates a message.
    pub fn new(header: SyncHdr, body: Vec<Element>, is_final: bool) -> Self {
        Self {
            header,
            body,
            is_final,
        }
    }

    /// Parses a `<SyncML>` root element.
    pub fn from_element(root: &Element) -> ProtocolResult<Self> {
        expect_tag(root, Tag::SyncMl)?;
        let header = root
            .child(Tag::SyncHdr)
            .ok_or_else(|| ProtocolError::missing(Tag::SyncHdr, Tag::SyncMl))?;
        let body = root
            .child(Tag::SyncBody)
            .ok_or_else(|| ProtocolError::missing(Tag::SyncBody, Tag::SyncMl))?;
        Ok(Self {
            header: SyncHdr::from_element(header)?,
            body: body
                .children()
                .iter()
                .filter(|c| c.tag != Tag::Final)
                .cloned()
                .collect(),
            is_final: body.has_child(Tag::Final),
        })
    }

    /// Builds the `<SyncML>` root element.
    pub fn to_element(&self) -> Element {
        let mut body = Element::node(Tag::SyncBody, self.body.clone());
        if self.is_final {
            body.push(Element::empty(Tag::Final));
        }
        Element::node(Tag::SyncMl, vec![self.header.to_element(), body])
    }

    /// Decodes a message, detecting the encoding.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<(Self, Encoding)> {
        let (root, encoding) = decode_document(bytes)?;
        Ok((Self::from_element(&root)?, encoding))
    }

    /// Encodes the message.
    pub fn encode(&self, encoding: Encoding) -> ProtocolResult<Vec<u8>> {
        let namespace = self
            .header
            .version()
            .map(|v| v.namespace())
            .unwrap_or_default();
        Ok(encode_document(&self.to_element(), encoding, namespace)?)
    }
}
