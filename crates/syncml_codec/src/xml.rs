//! XML encoder and decoder.

use crate::element::{Content, Element};
use crate::error::{CodecError, CodecResult};
use crate::size::{opaque_form, page_namespace, OpaqueForm, XML_PROLOG};
use crate::tag::{Tag, PAGE_SYNCML};
use bytes::Bytes;

/// Encode a complete XML document with the given root element.
///
/// # Errors
///
/// Returns an error if opaque content is not representable in XML.
pub fn to_xml_document(root: &Element, namespace: &str) -> CodecResult<Vec<u8>> {
    let mut encoder = XmlEncoder::new();
    encoder.write_raw(XML_PROLOG);
    encoder.encode_with_namespace(root, PAGE_SYNCML, Some(namespace))?;
    Ok(encoder.into_bytes())
}

/// An XML encoder producing the exact byte counts of [`crate::encoded_size`].
pub struct XmlEncoder {
    buffer: Vec<u8>,
}

impl XmlEncoder {
    /// Create a new encoder.
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Encode an element whose parent is on `parent_page`.
    pub fn encode(&mut self, element: &Element, parent_page: u8) -> CodecResult<()> {
        let page = element.tag.page();
        let namespace = if page != parent_page {
            page_namespace(page)
        } else {
            None
        };
        self.encode_with_namespace(element, parent_page, namespace)
    }

    /// Consume this encoder and return the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    fn write_raw(&mut self, s: &str) {
        self.buffer.extend_from_slice(s.as_bytes());
    }

    fn write_escaped(&mut self, s: &str) {
        for b in s.bytes() {
            match b {
                b'&' => self.write_raw("&amp;"),
                b'<' => self.write_raw("&lt;"),
                b'>' => self.write_raw("&gt;"),
                _ => self.buffer.push(b),
            }
        }
    }

    fn encode_with_namespace(
        &mut self,
        element: &Element,
        _parent_page: u8,
        namespace: Option<&str>,
    ) -> CodecResult<()> {
        let name = element.tag.name();
        self.buffer.push(b'<');
        self.write_raw(name);
        if let Some(ns) = namespace {
            self.write_raw(" xmlns=\"");
            self.write_raw(ns);
            self.buffer.push(b'"');
        }

        let is_empty = match &element.content {
            Content::Empty => true,
            Content::Children(children) => children.is_empty(),
            _ => false,
        };
        if is_empty {
            self.write_raw("/>");
            return Ok(());
        }
        self.buffer.push(b'>');

        match &element.content {
            Content::Text(s) => self.write_escaped(s),
            Content::Opaque(data) => self.write_opaque(data)?,
            Content::Children(children) => {
                let page = element.tag.page();
                for child in children {
                    self.encode(child, page)?;
                }
            }
            Content::Empty => {}
        }

        self.write_raw("</");
        self.write_raw(name);
        self.buffer.push(b'>');
        Ok(())
    }

    fn write_opaque(&mut self, data: &[u8]) -> CodecResult<()> {
        let text = std::str::from_utf8(data).map_err(|_| {
            CodecError::encoding_failed("binary data cannot be represented in XML")
        })?;
        match opaque_form(data) {
            OpaqueForm::Cdata => {
                self.write_raw("<![CDATA[");
                self.write_raw(text);
                self.write_raw("]]>");
            }
            OpaqueForm::EscapedText => self.write_escaped(text),
        }
        Ok(())
    }
}

impl Default for XmlEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode an XML document and return its root element.
///
/// # Errors
///
/// Returns an error for malformed XML or unknown element names.
pub fn from_xml(bytes: &[u8]) -> CodecResult<Element> {
    let text = std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)?;
    let mut decoder = XmlDecoder::new(text);
    decoder.skip_misc()?;
    let root = decoder.element()?;
    decoder.skip_misc()?;
    if !decoder.at_end() {
        return Err(decoder.error("trailing content after root element"));
    }
    Ok(root)
}

/// A minimal XML decoder for the SyncML vocabulary.
///
/// Attributes are parsed and discarded; namespaces are implied by the tag
/// table. Comments, processing instructions and DOCTYPE are skipped.
pub struct XmlDecoder<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> XmlDecoder<'a> {
    /// Create a new decoder.
    pub fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn error(&self, message: &str) -> CodecError {
        CodecError::decoding_failed(self.pos, message)
    }

    fn skip_whitespace(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.input.len() - trimmed.len();
    }

    fn skip_until(&mut self, terminator: &str) -> CodecResult<&'a str> {
        let rest = self.rest();
        match rest.find(terminator) {
            Some(idx) => {
                self.pos += idx + terminator.len();
                Ok(&rest[..idx])
            }
            None => Err(CodecError::UnexpectedEof),
        }
    }

    /// Skip prolog, comments, doctype and whitespace.
    fn skip_misc(&mut self) -> CodecResult<()> {
        loop {
            self.skip_whitespace();
            let rest = self.rest();
            if rest.starts_with("<?") {
                self.skip_until("?>")?;
            } else if rest.starts_with("<!--") {
                self.skip_until("-->")?;
            } else if rest.starts_with("<!DOCTYPE") {
                self.skip_until(">")?;
            } else {
                return Ok(());
            }
        }
    }

    fn name(&mut self) -> CodecResult<&'a str> {
        let rest = self.rest();
        let end = rest
            .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
            .ok_or(CodecError::UnexpectedEof)?;
        if end == 0 {
            return Err(self.error("expected element name"));
        }
        self.pos += end;
        Ok(&rest[..end])
    }

    fn element(&mut self) -> CodecResult<Element> {
        if !self.rest().starts_with('<') {
            return Err(self.error("expected '<'"));
        }
        self.pos += 1;
        let qualified = self.name()?;
        let local = qualified.rsplit(':').next().unwrap_or(qualified);
        let tag = Tag::from_name(local).ok_or_else(|| CodecError::unknown_tag(local))?;

        // Attributes are irrelevant to SyncML content.
        let rest = self.rest();
        let close = rest.find('>').ok_or(CodecError::UnexpectedEof)?;
        let self_closing = rest[..close].trim_end().ends_with('/');
        self.pos += close + 1;
        if self_closing {
            return Ok(Element::empty(tag));
        }

        let mut children = Vec::new();
        let mut text = String::new();
        let mut opaque: Option<Vec<u8>> = None;

        loop {
            let rest = self.rest();
            if rest.is_empty() {
                return Err(CodecError::UnexpectedEof);
            }
            if rest.starts_with("</") {
                self.pos += 2;
                let end_name = self.name()?;
                let end_local = end_name.rsplit(':').next().unwrap_or(end_name);
                if end_local != tag.name() {
                    return Err(self.error("mismatched closing tag"));
                }
                self.skip_whitespace();
                if !self.rest().starts_with('>') {
                    return Err(self.error("expected '>'"));
                }
                self.pos += 1;
                break;
            } else if rest.starts_with("<![CDATA[") {
                self.pos += "<![CDATA[".len();
                let data = self.skip_until("]]>")?;
                opaque
                    .get_or_insert_with(Vec::new)
                    .extend_from_slice(data.as_bytes());
            } else if rest.starts_with("<!--") {
                self.skip_until("-->")?;
            } else if rest.starts_with('<') {
                children.push(self.element()?);
            } else {
                let end = rest.find('<').unwrap_or(rest.len());
                let raw = &rest[..end];
                self.pos += end;
                let decoded = unescape(raw).map_err(|m| self.error(m))?;
                match opaque.as_mut() {
                    Some(buf) => buf.extend_from_slice(decoded.as_bytes()),
                    None => text.push_str(&decoded),
                }
            }
        }

        let content = if !children.is_empty() {
            Content::Children(children)
        } else if let Some(mut data) = opaque {
            if !text.is_empty() {
                let mut joined = text.into_bytes();
                joined.append(&mut data);
                data = joined;
            }
            Content::Opaque(Bytes::from(data))
        } else if text.is_empty() {
            Content::Empty
        } else {
            Content::Text(text)
        };
        Ok(Element::new(tag, content))
    }
}

fn unescape(raw: &str) -> Result<String, &'static str> {
    if !raw.contains('&') {
        return Ok(raw.to_string());
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(idx) = rest.find('&') {
        out.push_str(&rest[..idx]);
        rest = &rest[idx + 1..];
        let end = rest.find(';').ok_or("unterminated entity")?;
        let entity = &rest[..end];
        rest = &rest[end + 1..];
        let ch = match entity {
            "lt" => '<',
            "gt" => '>',
            "amp" => '&',
            "quot" => '"',
            "apos" => '\'',
            _ => {
                let code = if let Some(hex) = entity.strip_prefix("#x") {
                    u32::from_str_radix(hex, 16).ok()
                } else if let Some(dec) = entity.strip_prefix('#') {
                    dec.parse().ok()
                } else {
                    None
                };
                code.and_then(char::from_u32).ok_or("unknown entity")?
            }
        };
        out.push(ch);
    }
    out.push_str(rest);
    Ok(out)
}
