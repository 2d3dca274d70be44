//! Credentials (`<Cred>`).

use crate::error::ProtocolResult;
use crate::fields::{expect_tag, required_text};
use crate::meta::Meta;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use syncml_codec::{Element, Tag};

/// Authentication type for basic credentials.
pub const AUTH_BASIC: &str = "syncml:auth-basic";

/// Credentials sent in a header or Alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cred {
    /// Authentication type and format.
    pub meta: Meta,
    /// Encoded credential data.
    pub data: String,
}

impl Cred {
    /// Creates `syncml:auth-basic` credentials.
    pub fn basic(user: &str, password: &str) -> Self {
        let mut meta = Meta::with_type(AUTH_BASIC);
        meta.format = Some("b64".to_string());
        Self {
            meta,
            data: STANDARD.encode(format!("{user}:{password}")),
        }
    }

    /// Returns the authentication type, defaulting to basic.
    pub fn auth_type(&self) -> &str {
        self.meta.content_type.as_deref().unwrap_or(AUTH_BASIC)
    }

    /// Decodes basic credentials into user and password.
    ///
    /// Returns `None` for other authentication types or malformed data.
    pub fn decode_basic(&self) -> Option<(String, String)> {
        if self.auth_type() != AUTH_BASIC {
            return None;
        }
        let raw = STANDARD.decode(self.data.trim()).ok()?;
        let text = String::from_utf8(raw).ok()?;
        let (user, password) = text.split_once(':')?;
        Some((user.to_string(), password.to_string()))
    }

    /// Parses a `<Cred>` element.
    pub fn from_element(element: &Element) -> ProtocolResult<Self> {
        expect_tag(element, Tag::Cred)?;
        Ok(Self {
            meta: Meta::child_of(element)?.unwrap_or_default(),
            data: required_text(element, Tag::Data)?,
        })
    }

    /// Builds a `<Cred>` element.
    pub fn to_element(&self) -> Element {
        let mut e = Element::empty(Tag::Cred);
        e.push_opt(Meta::opt_element(&Some(self.meta.clone())));
        e.push(Element::text(Tag::Data, self.data.clone()));
        e
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_roundtrip() {
        let cred = Cred::basic("alice", "s3cr:et");
        assert_eq!(cred.data, "YWxpY2U6czNjcjpldA==");
        let parsed = Cred::from_element(&cred.to_element()).unwrap();
        assert_eq!(
            parsed.decode_basic(),
            Some(("alice".to_string(), "s3cr:et".to_string()))
        );
    }

    #[test]
    fn other_types_are_not_decoded() {
        let mut cred = Cred::basic("a", "b");
        cred.meta.content_type = Some("syncml:auth-md5".into());
        assert_eq!(cred.decode_basic(), None);

        let garbage = Cred {
            meta: Meta::default(),
            data: "***".into(),
        };
        assert_eq!(garbage.decode_basic(), None);
    }
}
