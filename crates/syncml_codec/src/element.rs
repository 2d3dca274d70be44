//! Element tree shared by both wire encodings.

use crate::tag::Tag;
use bytes::Bytes;
use std::borrow::Cow;

/// Content of an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    /// No content (`<NoResp/>`).
    Empty,
    /// Character data.
    Text(String),
    /// Opaque octets (WBXML OPAQUE, XML CDATA).
    Opaque(Bytes),
    /// Nested elements.
    Children(Vec<Element>),
}

/// A SyncML element.
///
/// Elements are the unit the wire codecs read and write; protocol types
/// convert to and from them. Attributes are not part of the model: SyncML
/// carries everything in element content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Element tag.
    pub tag: Tag,
    /// Element content.
    pub content: Content,
}

impl Element {
    /// Creates an element with the given content.
    pub fn new(tag: Tag, content: Content) -> Self {
        Self { tag, content }
    }

    /// Creates an empty element.
    pub fn empty(tag: Tag) -> Self {
        Self::new(tag, Content::Empty)
    }

    /// Creates a text element.
    pub fn text(tag: Tag, text: impl Into<String>) -> Self {
        Self::new(tag, Content::Text(text.into()))
    }

    /// Creates an opaque data element.
    pub fn opaque(tag: Tag, data: impl Into<Bytes>) -> Self {
        Self::new(tag, Content::Opaque(data.into()))
    }

    /// Creates an element with children.
    pub fn node(tag: Tag, children: Vec<Element>) -> Self {
        if children.is_empty() {
            Self::empty(tag)
        } else {
            Self::new(tag, Content::Children(children))
        }
    }

    /// Appends a child, turning empty content into a child list.
    ///
    /// Text or opaque content is replaced.
    pub fn push(&mut self, child: Element) {
        match &mut self.content {
            Content::Children(children) => children.push(child),
            other => *other = Content::Children(vec![child]),
        }
    }

    /// Appends a child if present.
    pub fn push_opt(&mut self, child: Option<Element>) {
        if let Some(child) = child {
            self.push(child);
        }
    }

    /// Returns the child elements (empty for leaf content).
    pub fn children(&self) -> &[Element] {
        match &self.content {
            Content::Children(children) => children,
            _ => &[],
        }
    }

    /// Returns the first child with the given tag.
    pub fn child(&self, tag: Tag) -> Option<&Element> {
        self.children().iter().find(|c| c.tag == tag)
    }

    /// Returns all children with the given tag.
    pub fn children_with(&self, tag: Tag) -> impl Iterator<Item = &Element> {
        self.children().iter().filter(move |c| c.tag == tag)
    }

    /// Returns true if a child with the given tag exists.
    pub fn has_child(&self, tag: Tag) -> bool {
        self.child(tag).is_some()
    }

    /// Returns the content as text.
    ///
    /// Opaque content is returned if it is valid UTF-8; empty content
    /// yields an empty string.
    pub fn text_value(&self) -> Option<Cow<'_, str>> {
        match &self.content {
            Content::Text(s) => Some(Cow::Borrowed(s.as_str())),
            Content::Opaque(b) => std::str::from_utf8(b).ok().map(Cow::Borrowed),
            Content::Empty => Some(Cow::Borrowed("")),
            Content::Children(_) => None,
        }
    }

    /// Returns the content as octets.
    pub fn bytes_value(&self) -> Option<Bytes> {
        match &self.content {
            Content::Text(s) => Some(Bytes::copy_from_slice(s.as_bytes())),
            Content::Opaque(b) => Some(b.clone()),
            Content::Empty => Some(Bytes::new()),
            Content::Children(_) => None,
        }
    }

    /// Returns the trimmed text of the first child with the given tag.
    pub fn child_text(&self, tag: Tag) -> Option<String> {
        self.child(tag)
            .and_then(|c| c.text_value())
            .map(|s| s.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_without_children_is_empty() {
        let e = Element::node(Tag::Meta, vec![]);
        assert_eq!(e.content, Content::Empty);
    }

    #[test]
    fn push_converts_empty() {
        let mut e = Element::empty(Tag::Item);
        e.push(Element::text(Tag::LocUri, "./contacts"));
        assert_eq!(e.children().len(), 1);
        assert_eq!(e.child_text(Tag::LocUri).as_deref(), Some("./contacts"));
    }

    #[test]
    fn child_text_trims() {
        let e = Element::node(Tag::Status, vec![Element::text(Tag::Data, " 200\n")]);
        assert_eq!(e.child_text(Tag::Data).as_deref(), Some("200"));
        assert_eq!(e.child_text(Tag::CmdRef), None);
    }

    #[test]
    fn opaque_as_text() {
        let e = Element::opaque(Tag::Data, &b"BEGIN:VCARD"[..]);
        assert_eq!(e.text_value().as_deref(), Some("BEGIN:VCARD"));
        let bin = Element::opaque(Tag::Data, vec![0xff, 0xfe]);
        assert!(bin.text_value().is_none());
        assert_eq!(bin.bytes_value().unwrap().len(), 2);
    }
}
