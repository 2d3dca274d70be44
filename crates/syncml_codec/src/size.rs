//! Size evaluation for both wire encodings.
//!
//! The functions here compute the exact number of octets the encoders in
//! [`crate::xml`] and [`crate::wbxml`] will emit for an element, without
//! encoding it. Message assembly relies on this to decide whether a command
//! still fits the outgoing message before committing it.
//!
//! Both encoders follow the same code page rule so sizes are context free:
//! an element on a different page than its parent announces the page
//! (WBXML `SWITCH_PAGE`, XML `xmlns`), and every element leaves the WBXML
//! page state on its own page when it ends.

use crate::element::{Content, Element};
use crate::tag::{METINF_NAMESPACE, PAGE_METINF, PAGE_SYNCML};

/// Wire encoding of a SyncML document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// Textual XML.
    Xml,
    /// Binary WBXML.
    Wbxml,
}

impl Encoding {
    /// Returns the MIME type used on the transport.
    pub fn mime_type(self) -> &'static str {
        match self {
            Encoding::Xml => "application/vnd.syncml+xml",
            Encoding::Wbxml => "application/vnd.syncml+wbxml",
        }
    }
}

/// WBXML document header: version 1.2, unknown public id, UTF-8, no string table.
pub const WBXML_HEADER: [u8; 4] = [0x02, 0x01, 0x6A, 0x00];

/// XML prolog written before the root element.
pub const XML_PROLOG: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>";

const CDATA_OPEN: &str = "<![CDATA[";
const CDATA_CLOSE: &str = "]]>";

/// Returns the encoded size of an element whose parent is on the SyncML page.
pub fn encoded_size(element: &Element, encoding: Encoding) -> usize {
    element_size(element, encoding, PAGE_SYNCML)
}

/// Returns the encoded size of an element in the given page context.
///
/// For XML `context_page` is the parent's page; for WBXML it is the page
/// state in effect when the element starts.
pub fn element_size(element: &Element, encoding: Encoding, context_page: u8) -> usize {
    match encoding {
        Encoding::Xml => xml_size(element, context_page),
        Encoding::Wbxml => wbxml_size(element, context_page),
    }
}

/// Returns the size of a complete document with the given root element.
pub fn document_size(root: &Element, encoding: Encoding, namespace: &str) -> usize {
    match encoding {
        Encoding::Xml => XML_PROLOG.len() + xml_size_with_attr(root, PAGE_SYNCML, xmlns_len(namespace)),
        Encoding::Wbxml => WBXML_HEADER.len() + wbxml_size(root, PAGE_SYNCML),
    }
}

/// Length of a multi-byte unsigned integer as used by WBXML.
pub fn mb_u_int32_len(mut value: usize) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

/// Namespace announced for a code page in XML.
pub(crate) fn page_namespace(page: u8) -> Option<&'static str> {
    match page {
        PAGE_METINF => Some(METINF_NAMESPACE),
        _ => None,
    }
}

/// Length of ` xmlns="<namespace>"`.
pub(crate) fn xmlns_len(namespace: &str) -> usize {
    " xmlns=\"\"".len() + namespace.len()
}

/// Length of text after XML escaping.
pub(crate) fn escaped_len(text: &str) -> usize {
    text.bytes()
        .map(|b| match b {
            b'&' => 5,
            b'<' | b'>' => 4,
            _ => 1,
        })
        .sum()
}

/// How opaque data is written in XML.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpaqueForm {
    Cdata,
    EscapedText,
}

pub(crate) fn opaque_form(data: &[u8]) -> OpaqueForm {
    match std::str::from_utf8(data) {
        Ok(s) if s.contains(CDATA_CLOSE) => OpaqueForm::EscapedText,
        _ => OpaqueForm::Cdata,
    }
}

fn xml_opaque_len(data: &[u8]) -> usize {
    match (opaque_form(data), std::str::from_utf8(data)) {
        (OpaqueForm::EscapedText, Ok(s)) => escaped_len(s),
        _ => CDATA_OPEN.len() + data.len() + CDATA_CLOSE.len(),
    }
}

fn xml_size(element: &Element, parent_page: u8) -> usize {
    let page = element.tag.page();
    let attr = if page != parent_page {
        page_namespace(page).map_or(0, xmlns_len)
    } else {
        0
    };
    xml_size_with_attr(element, parent_page, attr)
}

fn xml_size_with_attr(element: &Element, _parent_page: u8, attr: usize) -> usize {
    let name = element.tag.name().len();
    let page = element.tag.page();
    // "<Name" + attr + ">" ... "</Name>"
    let open = 1 + name + attr + 1;
    let close = 2 + name + 1;
    match &element.content {
        Content::Empty => 1 + name + attr + 2,
        Content::Children(children) if children.is_empty() => 1 + name + attr + 2,
        Content::Text(s) => open + escaped_len(s) + close,
        Content::Opaque(b) => open + xml_opaque_len(b) + close,
        Content::Children(children) => {
            open + children.iter().map(|c| xml_size(c, page)).sum::<usize>() + close
        }
    }
}

fn wbxml_size(element: &Element, entry_page: u8) -> usize {
    let page = element.tag.page();
    let mut size = if page != entry_page { 2 } else { 0 };
    size += 1;
    match &element.content {
        Content::Empty => {}
        Content::Children(children) if children.is_empty() => {}
        // STR_I + bytes + terminator + END
        Content::Text(s) => size += 1 + s.len() + 1 + 1,
        // OPAQUE + length + bytes + END
        Content::Opaque(b) => size += 1 + mb_u_int32_len(b.len()) + b.len() + 1,
        Content::Children(children) => {
            let mut current = page;
            for child in children {
                size += wbxml_size(child, current);
                current = child.tag.page();
            }
            if current != page {
                size += 2;
            }
            size += 1;
        }
    }
    size
}
