//! Configuration for sync sessions.

use bytes::Bytes;
use syncml_protocol::{AlertCode, Encoding, SyncMlVersion};

/// Side of the session this engine plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// Initiates the session and sends package 1.
    Client,
    /// Answers client requests.
    Server,
}

/// Configuration for one datastore taking part in a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatastoreConfig {
    /// Local datastore URI.
    pub local_uri: String,
    /// Remote datastore URI (client side; the server learns it from the alert).
    pub remote_uri: String,
    /// Content type of the items.
    pub content_type: String,
    /// Preferred sync mode (an alert code).
    pub sync_mode: u16,
}

impl DatastoreConfig {
    /// Creates a two-way datastore configuration.
    pub fn new(local_uri: impl Into<String>, remote_uri: impl Into<String>) -> Self {
        Self {
            local_uri: local_uri.into(),
            remote_uri: remote_uri.into(),
            content_type: "text/x-vcard".to_string(),
            sync_mode: AlertCode::TWO_WAY,
        }
    }

    /// Sets the item content type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Sets the preferred sync mode.
    pub fn with_sync_mode(mut self, mode: u16) -> Self {
        self.sync_mode = mode;
        self
    }
}

/// Configuration for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Client or server.
    pub role: SessionRole,
    /// Protocol version used for outgoing messages.
    pub version: SyncMlVersion,
    /// Wire encoding for outgoing messages (servers answer in the client's).
    pub encoding: Encoding,
    /// Local device or server URI.
    pub local_uri: String,
    /// Remote URI (server URL for clients).
    pub remote_uri: String,
    /// Largest message we accept; advertised as MaxMsgSize.
    pub max_msg_size: u64,
    /// Largest item or chunk we accept; advertised as MaxObjSize.
    pub max_obj_size: Option<u64>,
    /// Largest total size we accept for an item arriving in chunks.
    pub max_item_size: Option<u64>,
    /// Replay the buffered answer when the remote resends a message.
    pub allow_retries: bool,
    /// User and password for `syncml:auth-basic`.
    pub credentials: Option<(String, String)>,
    /// Missing statuses for our Get commands are tolerated.
    pub lenient_get: bool,
    /// Local device information blob.
    pub dev_inf: Option<Bytes>,
    /// Items at or below this size are not split unless the remote's MaxObjSize is smaller.
    pub min_split_size: usize,
    /// URI the remote should send its next message to (servers only).
    pub resp_uri: Option<String>,
    /// Configured datastores (clients only; servers open them on demand).
    pub datastores: Vec<DatastoreConfig>,
}

impl SessionConfig {
    /// Creates a client configuration.
    pub fn client(local_uri: impl Into<String>, server_uri: impl Into<String>) -> Self {
        Self {
            role: SessionRole::Client,
            version: SyncMlVersion::V1_2,
            encoding: Encoding::Xml,
            local_uri: local_uri.into(),
            remote_uri: server_uri.into(),
            max_msg_size: 20_000,
            max_obj_size: Some(4_000_000),
            max_item_size: Some(64_000_000),
            allow_retries: true,
            credentials: None,
            lenient_get: true,
            dev_inf: None,
            min_split_size: 200,
            resp_uri: None,
            datastores: Vec::new(),
        }
    }

    /// Creates a server configuration.
    pub fn server(local_uri: impl Into<String>) -> Self {
        Self {
            role: SessionRole::Server,
            ..Self::client(local_uri, "")
        }
    }

    /// Sets the protocol version.
    pub fn with_version(mut self, version: SyncMlVersion) -> Self {
        self.version = version;
        self
    }

    /// Sets the wire encoding.
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Sets the maximum message size.
    pub fn with_max_msg_size(mut self, size: u64) -> Self {
        self.max_msg_size = size;
        self
    }

    /// Sets the maximum object size.
    pub fn with_max_obj_size(mut self, size: Option<u64>) -> Self {
        self.max_obj_size = size;
        self
    }

    /// Sets the limit for reassembled items.
    pub fn with_max_item_size(mut self, size: Option<u64>) -> Self {
        self.max_item_size = size;
        self
    }

    /// Enables or disables retry replay.
    pub fn with_retries(mut self, allow: bool) -> Self {
        self.allow_retries = allow;
        self
    }

    /// Sets basic credentials.
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((user.into(), password.into()));
        self
    }

    /// Sets the local device information.
    pub fn with_dev_inf(mut self, dev_inf: impl Into<Bytes>) -> Self {
        self.dev_inf = Some(dev_inf.into());
        self
    }

    /// Sets the response URI.
    pub fn with_resp_uri(mut self, uri: impl Into<String>) -> Self {
        self.resp_uri = Some(uri.into());
        self
    }

    /// Adds a datastore.
    pub fn with_datastore(mut self, datastore: DatastoreConfig) -> Self {
        self.datastores.push(datastore);
        self
    }

    /// Returns true for client sessions.
    pub fn is_client(&self) -> bool {
        self.role == SessionRole::Client
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::client("", "")
    }
}
