//! Helpers for reading typed values out of elements.

use crate::error::{ProtocolError, ProtocolResult};
use std::str::FromStr;
use syncml_codec::{Element, Tag};

pub(crate) fn required_text(parent: &Element, tag: Tag) -> ProtocolResult<String> {
    parent
        .child_text(tag)
        .ok_or_else(|| ProtocolError::missing(tag, parent.tag))
}

pub(crate) fn optional_number<T: FromStr>(parent: &Element, tag: Tag) -> ProtocolResult<Option<T>> {
    match parent.child_text(tag) {
        None => Ok(None),
        Some(text) => text
            .parse()
            .map(Some)
            .map_err(|_| ProtocolError::invalid(tag, text)),
    }
}

pub(crate) fn required_number<T: FromStr>(parent: &Element, tag: Tag) -> ProtocolResult<T> {
    optional_number(parent, tag)?.ok_or_else(|| ProtocolError::missing(tag, parent.tag))
}

pub(crate) fn expect_tag(element: &Element, expected: Tag) -> ProtocolResult<()> {
    if element.tag == expected {
        Ok(())
    } else {
        Err(ProtocolError::UnexpectedElement {
            expected,
            found: element.tag,
        })
    }
}

pub(crate) fn text_opt(tag: Tag, value: &Option<String>) -> Option<Element> {
    value.as_ref().map(|v| Element::text(tag, v.clone()))
}

pub(crate) fn number_opt<T: ToString>(tag: Tag, value: Option<T>) -> Option<Element> {
    value.map(|v| Element::text(tag, v.to_string()))
}

pub(crate) fn flag(tag: Tag, set: bool) -> Option<Element> {
    set.then(|| Element::empty(tag))
}
