//! Meta information (`<Meta>` with MetInf children).

use crate::error::ProtocolResult;
use crate::fields::{expect_tag, number_opt, optional_number, text_opt};
use syncml_codec::{Element, Tag};

const DATA_POS_PREFIX: &str = "dataPos=";

/// Sync anchors of a datastore.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Anchor {
    /// Anchor of the last successful session.
    pub last: Option<String>,
    /// Anchor of the current session.
    pub next: String,
}

impl Anchor {
    /// Creates an anchor pair.
    pub fn new(last: Option<String>, next: impl Into<String>) -> Self {
        Self {
            last,
            next: next.into(),
        }
    }

    fn from_element(element: &Element) -> Self {
        Self {
            last: element.child_text(Tag::Last),
            next: element.child_text(Tag::Next).unwrap_or_default(),
        }
    }

    fn to_element(&self) -> Element {
        let mut e = Element::empty(Tag::Anchor);
        e.push_opt(text_opt(Tag::Last, &self.last));
        e.push(Element::text(Tag::Next, self.next.clone()));
        e
    }
}

/// Contents of a `<Meta>` element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Meta {
    /// Content type.
    pub content_type: Option<String>,
    /// Content format (`b64`, `chr`, ...).
    pub format: Option<String>,
    /// Total size of a chunked object.
    pub size: Option<u64>,
    /// Maximum message size the sender accepts.
    pub max_msg_size: Option<u64>,
    /// Maximum object size the sender accepts.
    pub max_obj_size: Option<u64>,
    /// Sync anchors.
    pub anchor: Option<Anchor>,
    /// Next nonce for digest authentication.
    pub next_nonce: Option<String>,
    /// Content version.
    pub version: Option<String>,
    /// Experimental meta information.
    pub emi: Vec<String>,
}

impl Meta {
    /// Creates meta information with a content type.
    pub fn with_type(content_type: impl Into<String>) -> Self {
        Self {
            content_type: Some(content_type.into()),
            ..Self::default()
        }
    }

    /// Returns true if no field is set.
    pub fn is_empty(&self) -> bool {
        *self == Meta::default()
    }

    /// Returns the chunk offset announced by a `dataPos=` EMI entry.
    pub fn data_pos(&self) -> Option<u64> {
        self.emi
            .iter()
            .find_map(|e| e.trim().strip_prefix(DATA_POS_PREFIX))
            .and_then(|v| v.trim().parse().ok())
    }

    /// Replaces any `dataPos=` EMI entry.
    pub fn set_data_pos(&mut self, pos: Option<u64>) {
        self.emi.retain(|e| !e.trim().starts_with(DATA_POS_PREFIX));
        if let Some(pos) = pos {
            self.emi.push(format!("{DATA_POS_PREFIX}{pos}"));
        }
    }

    /// Parses a `<Meta>` element.
    pub fn from_element(element: &Element) -> ProtocolResult<Self> {
        expect_tag(element, Tag::Meta)?;
        // Some implementations wrap MetInf in an explicit <MetInf> element.
        let source = element.child(Tag::MetInf).unwrap_or(element);
        Ok(Self {
            content_type: source.child_text(Tag::Type),
            format: source.child_text(Tag::Format),
            size: optional_number(source, Tag::Size)?,
            max_msg_size: optional_number(source, Tag::MaxMsgSize)?,
            max_obj_size: optional_number(source, Tag::MaxObjSize)?,
            anchor: source.child(Tag::Anchor).map(Anchor::from_element),
            next_nonce: source.child_text(Tag::NextNonce),
            version: source.child_text(Tag::Version),
            emi: source
                .children_with(Tag::Emi)
                .filter_map(|e| e.text_value().map(|s| s.trim().to_string()))
                .collect(),
        })
    }

    /// Builds a `<Meta>` element.
    pub fn to_element(&self) -> Element {
        let mut e = Element::empty(Tag::Meta);
        e.push_opt(text_opt(Tag::Format, &self.format));
        e.push_opt(text_opt(Tag::Type, &self.content_type));
        e.push_opt(self.anchor.as_ref().map(Anchor::to_element));
        e.push_opt(text_opt(Tag::Version, &self.version));
        e.push_opt(text_opt(Tag::NextNonce, &self.next_nonce));
        e.push_opt(number_opt(Tag::MaxMsgSize, self.max_msg_size));
        e.push_opt(number_opt(Tag::MaxObjSize, self.max_obj_size));
        e.push_opt(number_opt(Tag::Size, self.size));
        for emi in &self.emi {
            e.push(Element::text(Tag::Emi, emi.clone()));
        }
        e
    }

    /// Parses an optional `<Meta>` child.
    pub(crate) fn child_of(parent: &Element) -> ProtocolResult<Option<Self>> {
        parent.child(Tag::Meta).map(Self::from_element).transpose()
    }

    /// Builds an optional `<Meta>` child, omitted when empty.
    pub(crate) fn opt_element(meta: &Option<Meta>) -> Option<Element> {
        meta.as_ref().filter(|m| !m.is_empty()).map(Meta::to_element)
    }
}
