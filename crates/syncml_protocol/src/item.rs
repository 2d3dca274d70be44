//! Items and locations.

use crate::error::{ProtocolError, ProtocolResult};
use crate::fields::{expect_tag, flag, required_text, text_opt};
use crate::meta::Meta;
use bytes::Bytes;
use syncml_codec::{Element, Tag};

/// A `<Source>` or `<Target>` location.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    /// Location URI.
    pub uri: String,
    /// Optional display name.
    pub name: Option<String>,
}

impl Location {
    /// Creates a location from a URI.
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            name: None,
        }
    }

    /// Parses a location element (`Source`, `Target`, `SourceParent`, ...).
    pub fn from_element(element: &Element) -> ProtocolResult<Self> {
        Ok(Self {
            uri: required_text(element, Tag::LocUri)?,
            name: element.child_text(Tag::LocName),
        })
    }

    /// Builds a location element with the given tag.
    pub fn to_element(&self, tag: Tag) -> Element {
        let mut e = Element::node(tag, vec![Element::text(Tag::LocUri, self.uri.clone())]);
        e.push_opt(text_opt(Tag::LocName, &self.name));
        e
    }

    pub(crate) fn child_of(parent: &Element, tag: Tag) -> ProtocolResult<Option<Self>> {
        parent.child(tag).map(Self::from_element).transpose()
    }

    pub(crate) fn required_child(parent: &Element, tag: Tag) -> ProtocolResult<Self> {
        Self::child_of(parent, tag)?.ok_or_else(|| ProtocolError::missing(tag, parent.tag))
    }
}

/// An `<Item>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Item {
    /// Target location.
    pub target: Option<Location>,
    /// Source location.
    pub source: Option<Location>,
    /// Parent of the source item.
    pub source_parent: Option<Location>,
    /// Parent of the target item.
    pub target_parent: Option<Location>,
    /// Item meta information.
    pub meta: Option<Meta>,
    /// Item payload.
    pub data: Option<Bytes>,
    /// More data follows in a later chunk.
    pub more_data: bool,
}

impl Item {
    /// Creates an item with a source URI.
    pub fn with_source(uri: impl Into<String>) -> Self {
        Self {
            source: Some(Location::new(uri)),
            ..Self::default()
        }
    }

    /// Creates an item with a target URI.
    pub fn with_target(uri: impl Into<String>) -> Self {
        Self {
            target: Some(Location::new(uri)),
            ..Self::default()
        }
    }

    /// Sets the payload.
    pub fn data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Sets the meta information.
    pub fn meta(mut self, meta: Meta) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Returns the source URI.
    pub fn source_uri(&self) -> Option<&str> {
        self.source.as_ref().map(|l| l.uri.as_str())
    }

    /// Returns the target URI.
    pub fn target_uri(&self) -> Option<&str> {
        self.target.as_ref().map(|l| l.uri.as_str())
    }

    /// Returns the payload length.
    pub fn data_len(&self) -> usize {
        self.data.as_ref().map_or(0, Bytes::len)
    }

    /// Returns the payload as text, if it is UTF-8.
    pub fn data_text(&self) -> Option<&str> {
        self.data.as_deref().and_then(|d| std::str::from_utf8(d).ok())
    }

    /// Parses an `<Item>` element.
    pub fn from_element(element: &Element) -> ProtocolResult<Self> {
        expect_tag(element, Tag::Item)?;
        // Data with nested markup has no byte form and is dropped.
        let data = element.child(Tag::Data).and_then(Element::bytes_value);
        Ok(Self {
            target: Location::child_of(element, Tag::Target)?,
            source: Location::child_of(element, Tag::Source)?,
            source_parent: Location::child_of(element, Tag::SourceParent)?,
            target_parent: Location::child_of(element, Tag::TargetParent)?,
            meta: Meta::child_of(element)?,
            data,
            more_data: element.has_child(Tag::MoreData),
        })
    }

    /// Builds an `<Item>` element.
    pub fn to_element(&self) -> Element {
        let mut e = Element::empty(Tag::Item);
        e.push_opt(self.target.as_ref().map(|l| l.to_element(Tag::Target)));
        e.push_opt(self.source.as_ref().map(|l| l.to_element(Tag::Source)));
        e.push_opt(self.source_parent.as_ref().map(|l| l.to_element(Tag::SourceParent)));
        e.push_opt(self.target_parent.as_ref().map(|l| l.to_element(Tag::TargetParent)));
        e.push_opt(Meta::opt_element(&self.meta));
        e.push_opt(self.data.as_ref().map(|d| Element::opaque(Tag::Data, d.clone())));
        e.push_opt(flag(Tag::MoreData, self.more_data));
        e
    }

    pub(crate) fn all_in(parent: &Element) -> ProtocolResult<Vec<Self>> {
        parent.children_with(Tag::Item).map(Self::from_element).collect()
    }
}

/// A `<MapItem>` pairing a remote and a local identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MapItem {
    /// Identifier at the map's recipient.
    pub target: String,
    /// Identifier at the map's sender.
    pub source: String,
}

impl MapItem {
    /// Creates a map item.
    pub fn new(target: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            source: source.into(),
        }
    }

    /// Parses a `<MapItem>` element.
    pub fn from_element(element: &Element) -> ProtocolResult<Self> {
        expect_tag(element, Tag::MapItem)?;
        Ok(Self {
            target: Location::required_child(element, Tag::Target)?.uri,
            source: Location::required_child(element, Tag::Source)?.uri,
        })
    }

    /// Builds a `<MapItem>` element.
    pub fn to_element(&self) -> Element {
        Element::node(
            Tag::MapItem,
            vec![
                Location::new(self.target.clone()).to_element(Tag::Target),
                Location::new(self.source.clone()).to_element(Tag::Source),
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_roundtrip_with_chunk_flag() {
        let mut meta = Meta::with_type("text/plain");
        meta.size = Some(500);
        meta.set_data_pos(Some(0));
        let item = Item {
            more_data: true,
            ..Item::with_source("42").meta(meta).data(&b"hello"[..])
        };
        let e = item.to_element();
        assert!(e.has_child(Tag::MoreData));
        assert_eq!(Item::from_element(&e).unwrap(), item);
    }

    #[test]
    fn item_text_data_is_bytes() {
        let e = Element::node(
            Tag::Item,
            vec![
                Location::new("./contacts").to_element(Tag::Target),
                Element::text(Tag::Data, "BEGIN:VCARD"),
            ],
        );
        let item = Item::from_element(&e).unwrap();
        assert_eq!(item.target_uri(), Some("./contacts"));
        assert_eq!(item.data_text(), Some("BEGIN:VCARD"));
        assert_eq!(item.data_len(), 11);
    }

    #[test]
    fn map_item_requires_both_sides() {
        let ok = MapItem::new("srv-1", "cli-9");
        assert_eq!(MapItem::from_element(&ok.to_element()).unwrap(), ok);

        let missing = Element::node(
            Tag::MapItem,
            vec![Location::new("srv-1").to_element(Tag::Target)],
        );
        assert!(matches!(
            MapItem::from_element(&missing),
            Err(ProtocolError::MissingElement { element: Tag::Source, .. })
        ));
    }
}
