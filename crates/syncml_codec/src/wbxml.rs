//! WBXML encoder and decoder.

use crate::element::{Content, Element};
use crate::error::{CodecError, CodecResult};
use crate::size::WBXML_HEADER;
use crate::tag::{Tag, PAGE_SYNCML};
use bytes::Bytes;

const SWITCH_PAGE: u8 = 0x00;
const END: u8 = 0x01;
const ENTITY: u8 = 0x02;
const STR_I: u8 = 0x03;
const LITERAL: u8 = 0x04;
const STR_T: u8 = 0x83;
const OPAQUE: u8 = 0xC3;

const CONTENT_FLAG: u8 = 0x40;
const ATTRIBUTE_FLAG: u8 = 0x80;
const TOKEN_MASK: u8 = 0x3F;

/// Maximum accepted OPAQUE/string length in untrusted input.
const MAX_DATA_LENGTH: usize = 64 * 1024 * 1024;

/// Encode a complete WBXML document with the given root element.
///
/// # Errors
///
/// Returns an error if text content contains a NUL character.
pub fn to_wbxml_document(root: &Element) -> CodecResult<Vec<u8>> {
    let mut encoder = WbxmlEncoder::new();
    encoder.buffer.extend_from_slice(&WBXML_HEADER);
    encoder.encode(root)?;
    Ok(encoder.into_bytes())
}

/// A WBXML encoder producing the exact byte counts of [`crate::encoded_size`].
pub struct WbxmlEncoder {
    buffer: Vec<u8>,
    page: u8,
}

impl WbxmlEncoder {
    /// Create a new encoder starting on the SyncML code page.
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            page: PAGE_SYNCML,
        }
    }

    /// Encode an element at the current page state.
    pub fn encode(&mut self, element: &Element) -> CodecResult<()> {
        let page = element.tag.page();
        self.switch_to(page);

        let has_content = match &element.content {
            Content::Empty => false,
            Content::Children(children) => !children.is_empty(),
            _ => true,
        };
        let token = element.tag.token();
        if !has_content {
            self.buffer.push(token);
            return Ok(());
        }
        self.buffer.push(token | CONTENT_FLAG);

        match &element.content {
            Content::Text(s) => {
                if s.as_bytes().contains(&0) {
                    return Err(CodecError::encoding_failed("NUL character in text"));
                }
                self.buffer.push(STR_I);
                self.buffer.extend_from_slice(s.as_bytes());
                self.buffer.push(0);
            }
            Content::Opaque(data) => {
                self.buffer.push(OPAQUE);
                self.write_mb_u_int32(data.len());
                self.buffer.extend_from_slice(data);
            }
            Content::Children(children) => {
                for child in children {
                    self.encode(child)?;
                }
                self.switch_to(page);
            }
            Content::Empty => {}
        }
        self.buffer.push(END);
        Ok(())
    }

    /// Consume this encoder and return the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    fn switch_to(&mut self, page: u8) {
        if self.page != page {
            self.buffer.push(SWITCH_PAGE);
            self.buffer.push(page);
            self.page = page;
        }
    }

    fn write_mb_u_int32(&mut self, value: usize) {
        let mut groups = [0u8; 10];
        let mut n = 0;
        let mut v = value;
        loop {
            groups[n] = (v & 0x7f) as u8;
            n += 1;
            v >>= 7;
            if v == 0 {
                break;
            }
        }
        for i in (0..n).rev() {
            let continuation = if i > 0 { 0x80 } else { 0 };
            self.buffer.push(groups[i] | continuation);
        }
    }
}

impl Default for WbxmlEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode a WBXML document and return its root element.
///
/// # Errors
///
/// Returns an error for truncated input, unknown tokens or attributes.
pub fn from_wbxml(bytes: &[u8]) -> CodecResult<Element> {
    let mut decoder = WbxmlDecoder::new(bytes);
    decoder.header()?;
    let token = decoder.next_tag_token()?;
    decoder.element(token)
}

/// A WBXML decoder for the SyncML vocabulary.
pub struct WbxmlDecoder<'a> {
    data: &'a [u8],
    pos: usize,
    page: u8,
    string_table: &'a [u8],
}

impl<'a> WbxmlDecoder<'a> {
    /// Create a new decoder for the given bytes.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            page: PAGE_SYNCML,
            string_table: &[],
        }
    }

    fn read_byte(&mut self) -> CodecResult<u8> {
        let byte = *self.data.get(self.pos).ok_or(CodecError::UnexpectedEof)?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_bytes(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        if len > MAX_DATA_LENGTH || self.pos + len > self.data.len() {
            return Err(CodecError::UnexpectedEof);
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn read_mb_u_int32(&mut self) -> CodecResult<usize> {
        let mut value: usize = 0;
        for _ in 0..5 {
            let byte = self.read_byte()?;
            value = (value << 7) | usize::from(byte & 0x7f);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(CodecError::decoding_failed(self.pos, "mb_u_int32 too long"))
    }

    fn header(&mut self) -> CodecResult<()> {
        let _version = self.read_byte()?;
        let public_id = self.read_mb_u_int32()?;
        if public_id == 0 {
            // Public id given as string table index.
            let _index = self.read_mb_u_int32()?;
        }
        let charset = self.read_mb_u_int32()?;
        if charset != 0x6A && charset != 0 {
            return Err(CodecError::unsupported(format!("charset {charset}")));
        }
        let table_len = self.read_mb_u_int32()?;
        self.string_table = self.read_bytes(table_len)?;
        Ok(())
    }

    fn next_tag_token(&mut self) -> CodecResult<u8> {
        loop {
            let byte = self.read_byte()?;
            if byte == SWITCH_PAGE {
                self.page = self.read_byte()?;
            } else {
                return Ok(byte);
            }
        }
    }

    fn read_inline_string(&mut self) -> CodecResult<&'a [u8]> {
        let rest = &self.data[self.pos..];
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(CodecError::UnexpectedEof)?;
        self.pos += end + 1;
        Ok(&rest[..end])
    }

    fn table_string(&self, offset: usize) -> CodecResult<&'a [u8]> {
        let rest = self
            .string_table
            .get(offset..)
            .ok_or_else(|| CodecError::decoding_failed(self.pos, "string table offset"))?;
        let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
        Ok(&rest[..end])
    }

    fn element(&mut self, token: u8) -> CodecResult<Element> {
        if token & ATTRIBUTE_FLAG != 0 {
            return Err(CodecError::unsupported("attributes"));
        }
        if token == LITERAL {
            return Err(CodecError::unsupported("literal tags"));
        }
        let page = self.page;
        let tag = Tag::from_token(page, token & TOKEN_MASK)
            .ok_or_else(|| CodecError::unknown_tag(format!("page {page} token {token:#04x}")))?;
        if token & CONTENT_FLAG == 0 {
            return Ok(Element::empty(tag));
        }

        let mut children = Vec::new();
        let mut text: Vec<u8> = Vec::new();
        let mut opaque: Option<Vec<u8>> = None;

        loop {
            let byte = self.read_byte()?;
            match byte {
                END => break,
                SWITCH_PAGE => self.page = self.read_byte()?,
                STR_I => {
                    let s = self.read_inline_string()?;
                    text.extend_from_slice(s);
                }
                STR_T => {
                    let offset = self.read_mb_u_int32()?;
                    let s = self.table_string(offset)?;
                    text.extend_from_slice(s);
                }
                ENTITY => {
                    let code = self.read_mb_u_int32()?;
                    let ch = u32::try_from(code)
                        .ok()
                        .and_then(char::from_u32)
                        .ok_or_else(|| CodecError::decoding_failed(self.pos, "bad entity"))?;
                    let mut buf = [0u8; 4];
                    text.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
                }
                OPAQUE => {
                    let len = self.read_mb_u_int32()?;
                    let data = self.read_bytes(len)?;
                    opaque.get_or_insert_with(Vec::new).extend_from_slice(data);
                }
                other => children.push(self.element(other)?),
            }
        }

        let content = if !children.is_empty() {
            Content::Children(children)
        } else if let Some(data) = opaque {
            Content::Opaque(Bytes::from(data))
        } else if text.is_empty() {
            Content::Empty
        } else {
            Content::Text(String::from_utf8(text).map_err(|_| CodecError::InvalidUtf8)?)
        };
        Ok(Element::new(tag, content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::size::{document_size, encoded_size, Encoding};

    fn sample() -> Element {
        Element::node(
            Tag::SyncMl,
            vec![
                Element::node(
                    Tag::SyncHdr,
                    vec![
                        Element::text(Tag::VerDtd, "1.2"),
                        Element::node(
                            Tag::Meta,
                            vec![
                                Element::text(Tag::MaxMsgSize, "20000"),
                                Element::text(Tag::MaxObjSize, "4000000"),
                            ],
                        ),
                    ],
                ),
                Element::node(
                    Tag::SyncBody,
                    vec![
                        Element::node(
                            Tag::Replace,
                            vec![
                                Element::text(Tag::CmdId, "7"),
                                Element::node(
                                    Tag::Item,
                                    vec![
                                        Element::node(
                                            Tag::Meta,
                                            vec![Element::text(Tag::Size, "300")],
                                        ),
                                        Element::opaque(Tag::Data, vec![0u8, 1, 2, 255]),
                                        Element::empty(Tag::MoreData),
                                    ],
                                ),
                            ],
                        ),
                        Element::empty(Tag::Final),
                    ],
                ),
            ],
        )
    }

    #[test]
    fn document_roundtrip() {
        let root = sample();
        let bytes = to_wbxml_document(&root).unwrap();
        assert_eq!(&bytes[..4], &WBXML_HEADER);
        assert_eq!(from_wbxml(&bytes).unwrap(), root);
    }

    #[test]
    fn size_matches_encoder() {
        let root = sample();
        let bytes = to_wbxml_document(&root).unwrap();
        assert_eq!(bytes.len(), document_size(&root, Encoding::Wbxml, ""));

        for child in root.children() {
            let mut encoder = WbxmlEncoder::new();
            encoder.encode(child).unwrap();
            assert_eq!(encoder.into_bytes().len(), encoded_size(child, Encoding::Wbxml));
        }
    }

    #[test]
    fn large_opaque_length_prefix() {
        let data = vec![0x41u8; 300];
        let e = Element::opaque(Tag::Data, data.clone());
        let mut encoder = WbxmlEncoder::new();
        encoder.encode(&e).unwrap();
        let bytes = encoder.into_bytes();
        // token, OPAQUE, two-byte length
        assert_eq!(&bytes[..4], &[0x0F | CONTENT_FLAG, OPAQUE, 0x82, 0x2C]);
        assert_eq!(bytes.len(), encoded_size(&e, Encoding::Wbxml));
    }

    #[test]
    fn nul_in_text_rejected() {
        let e = Element::text(Tag::Data, "a\0b");
        assert!(WbxmlEncoder::new().encode(&e).is_err());
    }

    #[test]
    fn string_table_references() {
        // version, public id, charset, table "hi\0", SyncML(content) LocURI(content) STR_T 0 END END
        let doc = [
            0x02, 0x01, 0x6A, 0x03, b'h', b'i', 0x00, 0x6D, 0x57, STR_T, 0x00, END, END,
        ];
        let root = from_wbxml(&doc).unwrap();
        assert_eq!(root.child_text(Tag::LocUri).as_deref(), Some("hi"));
    }

    #[test]
    fn truncated_input() {
        let bytes = to_wbxml_document(&sample()).unwrap();
        assert!(from_wbxml(&bytes[..bytes.len() - 3]).is_err());
        assert!(matches!(
            from_wbxml(&[0x02, 0x01, 0x6A, 0x00, 0xC5]),
            Err(CodecError::Unsupported { .. })
        ));
    }
}
