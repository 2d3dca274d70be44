//! SyncML element vocabulary.
//!
//! Every element the codec understands belongs to one of two WBXML code
//! pages: page 0 holds the SyncML command vocabulary, page 1 the MetInf
//! vocabulary used inside `<Meta>`. The same table drives the WBXML token
//! mapping, the XML element names and the namespace switches of both
//! encodings.

/// WBXML code page of the SyncML vocabulary.
pub const PAGE_SYNCML: u8 = 0;

/// WBXML code page of the MetInf vocabulary.
pub const PAGE_METINF: u8 = 1;

/// XML namespace announced when entering the MetInf code page.
pub const METINF_NAMESPACE: &str = "syncml:metinf";

macro_rules! tags {
    ($($variant:ident => ($page:literal, $token:literal, $name:literal)),+ $(,)?) => {
        /// A SyncML or MetInf element tag.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[allow(missing_docs)]
        pub enum Tag {
            $($variant,)+
        }

        impl Tag {
            /// Returns the XML element name.
            pub fn name(self) -> &'static str {
                match self {
                    $(Tag::$variant => $name,)+
                }
            }

            /// Returns the WBXML code page.
            pub fn page(self) -> u8 {
                match self {
                    $(Tag::$variant => $page,)+
                }
            }

            /// Returns the WBXML token (without content/attribute flags).
            pub fn token(self) -> u8 {
                match self {
                    $(Tag::$variant => $token,)+
                }
            }

            /// Looks up a tag by XML element name.
            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($name => Some(Tag::$variant),)+
                    _ => None,
                }
            }

            /// Looks up a tag by WBXML code page and token.
            pub fn from_token(page: u8, token: u8) -> Option<Self> {
                match (page, token) {
                    $(($page, $token) => Some(Tag::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

tags! {
    Add => (0, 0x05, "Add"),
    Alert => (0, 0x06, "Alert"),
    Archive => (0, 0x07, "Archive"),
    Atomic => (0, 0x08, "Atomic"),
    Chal => (0, 0x09, "Chal"),
    Cmd => (0, 0x0A, "Cmd"),
    CmdId => (0, 0x0B, "CmdID"),
    CmdRef => (0, 0x0C, "CmdRef"),
    Copy => (0, 0x0D, "Copy"),
    Cred => (0, 0x0E, "Cred"),
    Data => (0, 0x0F, "Data"),
    Delete => (0, 0x10, "Delete"),
    Exec => (0, 0x11, "Exec"),
    Final => (0, 0x12, "Final"),
    Get => (0, 0x13, "Get"),
    Item => (0, 0x14, "Item"),
    Lang => (0, 0x15, "Lang"),
    LocName => (0, 0x16, "LocName"),
    LocUri => (0, 0x17, "LocURI"),
    Map => (0, 0x18, "Map"),
    MapItem => (0, 0x19, "MapItem"),
    Meta => (0, 0x1A, "Meta"),
    MsgId => (0, 0x1B, "MsgID"),
    MsgRef => (0, 0x1C, "MsgRef"),
    NoResp => (0, 0x1D, "NoResp"),
    NoResults => (0, 0x1E, "NoResults"),
    Put => (0, 0x1F, "Put"),
    Replace => (0, 0x20, "Replace"),
    RespUri => (0, 0x21, "RespURI"),
    Results => (0, 0x22, "Results"),
    Search => (0, 0x23, "Search"),
    Sequence => (0, 0x24, "Sequence"),
    SessionId => (0, 0x25, "SessionID"),
    SftDel => (0, 0x26, "SftDel"),
    Source => (0, 0x27, "Source"),
    SourceRef => (0, 0x28, "SourceRef"),
    Status => (0, 0x29, "Status"),
    Sync => (0, 0x2A, "Sync"),
    SyncBody => (0, 0x2B, "SyncBody"),
    SyncHdr => (0, 0x2C, "SyncHdr"),
    SyncMl => (0, 0x2D, "SyncML"),
    Target => (0, 0x2E, "Target"),
    TargetRef => (0, 0x2F, "TargetRef"),
    VerDtd => (0, 0x31, "VerDTD"),
    VerProto => (0, 0x32, "VerProto"),
    NumberOfChanges => (0, 0x33, "NumberOfChanges"),
    MoreData => (0, 0x34, "MoreData"),
    SourceParent => (0, 0x39, "SourceParent"),
    TargetParent => (0, 0x3A, "TargetParent"),
    Move => (0, 0x3B, "Move"),
    Correlator => (0, 0x3C, "Correlator"),
    Anchor => (1, 0x05, "Anchor"),
    Emi => (1, 0x06, "EMI"),
    Format => (1, 0x07, "Format"),
    FreeId => (1, 0x08, "FreeID"),
    FreeMem => (1, 0x09, "FreeMem"),
    Last => (1, 0x0A, "Last"),
    Mark => (1, 0x0B, "Mark"),
    MaxMsgSize => (1, 0x0C, "MaxMsgSize"),
    Mem => (1, 0x0D, "Mem"),
    MetInf => (1, 0x0E, "MetInf"),
    Next => (1, 0x0F, "Next"),
    NextNonce => (1, 0x10, "NextNonce"),
    SharedMem => (1, 0x11, "SharedMem"),
    Size => (1, 0x12, "Size"),
    Type => (1, 0x13, "Type"),
    Version => (1, 0x14, "Version"),
    MaxObjSize => (1, 0x15, "MaxObjSize"),
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_lookup_matches_table() {
        for tag in [Tag::SyncMl, Tag::CmdId, Tag::LocUri, Tag::MaxObjSize, Tag::Emi] {
            assert_eq!(Tag::from_name(tag.name()), Some(tag));
            assert_eq!(Tag::from_token(tag.page(), tag.token()), Some(tag));
        }
    }

    #[test]
    fn metinf_tags_live_on_page_one() {
        assert_eq!(Tag::Type.page(), PAGE_METINF);
        assert_eq!(Tag::Meta.page(), PAGE_SYNCML);
        assert_eq!(Tag::Anchor.page(), PAGE_METINF);
    }

    #[test]
    fn unknown_names() {
        assert_eq!(Tag::from_name("Frobnicate"), None);
        assert_eq!(Tag::from_token(0, 0x30), None);
        assert_eq!(Tag::from_token(2, 0x05), None);
    }
}
