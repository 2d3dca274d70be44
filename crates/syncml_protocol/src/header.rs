//! Message header (`<SyncHdr>`).

use crate::cred::Cred;
use crate::error::{ProtocolError, ProtocolResult};
use crate::fields::{expect_tag, flag, required_number, required_text, text_opt};
use crate::item::Location;
use crate::meta::Meta;
use syncml_codec::{Element, Tag};

/// SyncML protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SyncMlVersion {
    /// SyncML 1.0.
    V1_0,
    /// SyncML 1.1.
    V1_1,
    /// SyncML 1.2 (OMA DS).
    V1_2,
}

impl SyncMlVersion {
    /// Returns the `<VerDTD>` value.
    pub fn ver_dtd(self) -> &'static str {
        match self {
            SyncMlVersion::V1_0 => "1.0",
            SyncMlVersion::V1_1 => "1.1",
            SyncMlVersion::V1_2 => "1.2",
        }
    }

    /// Returns the `<VerProto>` value.
    pub fn ver_proto(self) -> &'static str {
        match self {
            SyncMlVersion::V1_0 => "SyncML/1.0",
            SyncMlVersion::V1_1 => "SyncML/1.1",
            SyncMlVersion::V1_2 => "SyncML/1.2",
        }
    }

    /// Returns the XML namespace of the root element.
    pub fn namespace(self) -> &'static str {
        match self {
            SyncMlVersion::V1_0 => "SYNCML:SYNCML1.0",
            SyncMlVersion::V1_1 => "SYNCML:SYNCML1.1",
            SyncMlVersion::V1_2 => "SYNCML:SYNCML1.2",
        }
    }

    /// Returns the URI of the device information object.
    pub fn devinf_uri(self) -> &'static str {
        match self {
            SyncMlVersion::V1_0 => "./devinf10",
            SyncMlVersion::V1_1 => "./devinf11",
            SyncMlVersion::V1_2 => "./devinf12",
        }
    }

    /// Returns true if this version knows large object support.
    pub fn supports_large_objects(self) -> bool {
        self >= SyncMlVersion::V1_1
    }

    /// Parses a `<VerDTD>` value.
    pub fn from_ver_dtd(value: &str) -> Option<Self> {
        match value.trim() {
            "1.0" => Some(SyncMlVersion::V1_0),
            "1.1" => Some(SyncMlVersion::V1_1),
            "1.2" => Some(SyncMlVersion::V1_2),
            _ => None,
        }
    }
}

/// A SyncML message header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncHdr {
    /// Raw `<VerDTD>` value.
    pub ver_dtd: String,
    /// Raw `<VerProto>` value.
    pub ver_proto: String,
    /// Session identifier.
    pub session_id: String,
    /// Message identifier.
    pub msg_id: u32,
    /// Recipient.
    pub target: Location,
    /// Sender.
    pub source: Location,
    /// URI to send responses to.
    pub resp_uri: Option<String>,
    /// The sender requests no statuses.
    pub no_resp: bool,
    /// Credentials.
    pub cred: Option<Cred>,
    /// Meta information (MaxMsgSize, MaxObjSize).
    pub meta: Option<Meta>,
}

impl SyncHdr {
    /// Creates a header for the given version.
    pub fn new(
        version: SyncMlVersion,
        session_id: impl Into<String>,
        msg_id: u32,
        target: Location,
        source: Location,
    ) -> Self {
        Self {
            ver_dtd: version.ver_dtd().to_string(),
            ver_proto: version.ver_proto().to_string(),
            session_id: session_id.into(),
            msg_id,
            target,
            source,
            resp_uri: None,
            no_resp: false,
            cred: None,
            meta: None,
        }
    }

    /// Returns the negotiated version.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedVersion` for unknown `<VerDTD>` values.
    pub fn version(&self) -> ProtocolResult<SyncMlVersion> {
        SyncMlVersion::from_ver_dtd(&self.ver_dtd)
            .ok_or_else(|| ProtocolError::UnsupportedVersion(self.ver_dtd.clone()))
    }

    /// Parses a `<SyncHdr>` element.
    pub fn from_element(element: &Element) -> ProtocolResult<Self> {
        expect_tag(element, Tag::SyncHdr)?;
        Ok(Self {
            ver_dtd: required_text(element, Tag::VerDtd)?,
            ver_proto: element.child_text(Tag::VerProto).unwrap_or_default(),
            session_id: required_text(element, Tag::SessionId)?,
            msg_id: required_number(element, Tag::MsgId)?,
            target: Location::required_child(element, Tag::Target)?,
            source: Location::required_child(element, Tag::Source)?,
            resp_uri: element.child_text(Tag::RespUri),
            no_resp: element.has_child(Tag::NoResp),
            cred: element.child(Tag::Cred).map(Cred::from_element).transpose()?,
            meta: Meta::child_of(element)?,
        })
    }

    /// Builds a `<SyncHdr>` element.
    pub fn to_element(&self) -> Element {
        let mut e = Element::node(
            Tag::SyncHdr,
            vec![
                Element::text(Tag::VerDtd, self.ver_dtd.clone()),
                Element::text(Tag::VerProto, self.ver_proto.clone()),
                Element::text(Tag::SessionId, self.session_id.clone()),
                Element::text(Tag::MsgId, self.msg_id.to_string()),
                self.target.to_element(Tag::Target),
                self.source.to_element(Tag::Source),
            ],
        );
        e.push_opt(text_opt(Tag::RespUri, &self.resp_uri));
        e.push_opt(flag(Tag::NoResp, self.no_resp));
        e.push_opt(self.cred.as_ref().map(Cred::to_element));
        e.push_opt(Meta::opt_element(&self.meta));
        e
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> SyncHdr {
        let mut hdr = SyncHdr::new(
            SyncMlVersion::V1_2,
            "S1",
            1,
            Location::new("http://sync.example.com"),
            Location::new("IMEI:4930051"),
        );
        hdr.cred = Some(Cred::basic("user", "pw"));
        hdr.meta = Some(Meta {
            max_msg_size: Some(20000),
            ..Meta::default()
        });
        hdr
    }

    #[test]
    fn header_roundtrip() {
        let hdr = header();
        let parsed = SyncHdr::from_element(&hdr.to_element()).unwrap();
        assert_eq!(parsed, hdr);
        assert_eq!(parsed.version().unwrap(), SyncMlVersion::V1_2);
    }

    #[test]
    fn missing_session_id() {
        let mut e = header().to_element();
        if let syncml_codec::Content::Children(children) = &mut e.content {
            children.retain(|c| c.tag != Tag::SessionId);
        }
        assert!(matches!(
            SyncHdr::from_element(&e),
            Err(ProtocolError::MissingElement { element: Tag::SessionId, .. })
        ));
    }

    #[test]
    fn versions() {
        assert_eq!(SyncMlVersion::from_ver_dtd(" 1.1 "), Some(SyncMlVersion::V1_1));
        assert_eq!(SyncMlVersion::from_ver_dtd("2.0"), None);
        assert!(!SyncMlVersion::V1_0.supports_large_objects());
        assert!(SyncMlVersion::V1_2.supports_large_objects());
        assert_eq!(SyncMlVersion::V1_1.devinf_uri(), "./devinf11");
    }
}
