//! # SyncML Codec
//!
//! Element model and wire codecs for SyncML documents.
//!
//! This crate provides:
//! - A tag table covering the SyncML and MetInf vocabularies
//! - An element tree with text, opaque and nested content
//! - XML and WBXML encoders and decoders
//! - Exact size evaluation for both encodings
//!
//! ## Size Evaluation
//!
//! [`encoded_size`] returns the number of octets the encoder will emit for an
//! element without encoding it. Message assembly depends on this being exact:
//! adding a command to a container grows the document by exactly the
//! command's encoded size.
//!
//! ## Usage
//!
//! ```
//! use syncml_codec::{decode_document, encode_document, Element, Encoding, Tag};
//!
//! let root = Element::node(
//!     Tag::SyncMl,
//!     vec![Element::node(Tag::SyncBody, vec![Element::empty(Tag::Final)])],
//! );
//! let bytes = encode_document(&root, Encoding::Wbxml, "SYNCML:SYNCML1.2").unwrap();
//! let (decoded, encoding) = decode_document(&bytes).unwrap();
//! assert_eq!(decoded, root);
//! assert_eq!(encoding, Encoding::Wbxml);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod element;
mod error;
mod size;
mod tag;
mod wbxml;
mod xml;

pub use element::{Content, Element};
pub use error::{CodecError, CodecResult};
pub use size::{
    document_size, element_size, encoded_size, mb_u_int32_len, Encoding, WBXML_HEADER, XML_PROLOG,
};
pub use tag::{Tag, METINF_NAMESPACE, PAGE_METINF, PAGE_SYNCML};
pub use wbxml::{from_wbxml, to_wbxml_document, WbxmlDecoder, WbxmlEncoder};
pub use xml::{from_xml, to_xml_document, XmlDecoder, XmlEncoder};

/// Encode a complete document in the given encoding.
///
/// `namespace` is written as the root `xmlns` in XML and ignored in WBXML.
pub fn encode_document(root: &Element, encoding: Encoding, namespace: &str) -> CodecResult<Vec<u8>> {
    match encoding {
        Encoding::Xml => to_xml_document(root, namespace),
        Encoding::Wbxml => to_wbxml_document(root),
    }
}

/// Decode a document, detecting its encoding from the first octets.
pub fn decode_document(bytes: &[u8]) -> CodecResult<(Element, Encoding)> {
    let encoding = sniff_encoding(bytes)?;
    let root = match encoding {
        Encoding::Xml => from_xml(bytes)?,
        Encoding::Wbxml => from_wbxml(bytes)?,
    };
    Ok((root, encoding))
}

/// Detect the encoding of a document.
///
/// XML starts with `<` (after optional BOM and whitespace); WBXML starts
/// with a version octet 0x01..=0x03.
pub fn sniff_encoding(bytes: &[u8]) -> CodecResult<Encoding> {
    let body = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF][..]).unwrap_or(bytes);
    match body.iter().find(|b| !b.is_ascii_whitespace()) {
        Some(b'<') => Ok(Encoding::Xml),
        _ => match bytes.first() {
            Some(0x01..=0x03) => Ok(Encoding::Wbxml),
            _ => Err(CodecError::UnknownEncoding),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn leaf_tag() -> impl Strategy<Value = Tag> {
        prop_oneof![
            Just(Tag::CmdId),
            Just(Tag::LocUri),
            Just(Tag::Data),
            Just(Tag::Type),
            Just(Tag::Size),
            Just(Tag::Final),
            Just(Tag::MaxObjSize),
        ]
    }

    fn container_tag() -> impl Strategy<Value = Tag> {
        prop_oneof![
            Just(Tag::Sync),
            Just(Tag::Item),
            Just(Tag::Meta),
            Just(Tag::Anchor),
            Just(Tag::Add),
        ]
    }

    fn element() -> impl Strategy<Value = Element> {
        let leaf = prop_oneof![
            leaf_tag().prop_map(Element::empty),
            (leaf_tag(), "[a-zA-Z0-9 <>&./:-]{1,20}").prop_map(|(t, s)| Element::text(t, s)),
            (leaf_tag(), "[a-z0-9]{1,40}").prop_map(|(t, s)| Element::opaque(t, s.into_bytes())),
        ];
        leaf.prop_recursive(4, 32, 5, |inner| {
            (container_tag(), prop::collection::vec(inner, 1..5))
                .prop_map(|(t, children)| Element::node(t, children))
        })
    }

    proptest! {
        #[test]
        fn size_is_exact_for_both_encodings(e in element()) {
            let root = Element::node(Tag::SyncMl, vec![Element::node(Tag::SyncBody, vec![e])]);
            for encoding in [Encoding::Xml, Encoding::Wbxml] {
                let bytes = encode_document(&root, encoding, "SYNCML:SYNCML1.2").unwrap();
                prop_assert_eq!(bytes.len(), document_size(&root, encoding, "SYNCML:SYNCML1.2"));
                let (decoded, detected) = decode_document(&bytes).unwrap();
                prop_assert_eq!(detected, encoding);
                prop_assert_eq!(decoded, root.clone());
            }
        }
    }

    #[test]
    fn sniffing() {
        assert_eq!(sniff_encoding(b"  <SyncML/>").unwrap(), Encoding::Xml);
        assert_eq!(sniff_encoding(&WBXML_HEADER).unwrap(), Encoding::Wbxml);
        assert!(matches!(
            sniff_encoding(b"hello"),
            Err(CodecError::UnknownEncoding)
        ));
    }
}
