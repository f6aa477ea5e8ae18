use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SignalingError;

/// Room Signaling Protocol version stamped on every outbound message.
pub const RSP_VERSION: u32 = 2;
/// Publisher name advertised in the `connect` handshake.
pub const SDK_NAME: &str = "rsp-signaling.rs";
/// Publisher SDK version advertised in the `connect` handshake.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");
/// Content type of every RSP body.
pub const RSP_CONTENT_TYPE: &str = "application/room-signaling+json";
/// Event / Info-Package name used for RSP requests.
pub const RSP_EVENT_PACKAGE: &str = "room-signaling";
/// Out-of-band error header carried by session requests and responses.
pub const ERROR_HEADER: &str = "X-Twilio-Error";

/// Connection state of a signaling transport.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Initial handshake is in flight.
    Connecting,
    /// Handshake completed; updates flow immediately.
    Connected,
    /// A resync (renegotiation) is in flight.
    Syncing,
    /// Terminal state; nothing is sent or emitted after this.
    Disconnected,
}

impl ConnectionState {
    /// Whether `next` is a legal transition from this state.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        matches!(
            (self, next),
            (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Syncing)
                | (Connected, Disconnected)
                | (Syncing, Connected)
                | (Syncing, Disconnected)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Syncing => "syncing",
            Self::Disconnected => "disconnected",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A document stamped with a caller-assigned, monotonically increasing revision.
///
/// Fields other than `revision` are opaque to the transport and kept verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Revisioned {
    pub revision: u64,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Revisioned {
    pub fn new(revision: u64) -> Self {
        Self {
            revision,
            fields: Map::new(),
        }
    }

    /// Attach an opaque field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// Local participant state as published over RSP.
pub type ParticipantState = Revisioned;

/// Summary of one peer connection. `description` and `ice` are revisioned
/// independently and may arrive in separate updates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerConnectionSummary {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<Revisioned>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ice: Option<Revisioned>,
}

impl PeerConnectionSummary {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: None,
            ice: None,
        }
    }

    pub fn with_description(mut self, description: Revisioned) -> Self {
        self.description = Some(description);
        self
    }

    pub fn with_ice(mut self, ice: Revisioned) -> Self {
        self.ice = Some(ice);
        self
    }
}

/// Incremental participant and peer-connection state (`type: "update"`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Update {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant: Option<ParticipantState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_connections: Option<Vec<PeerConnectionSummary>>,
}

impl Default for Update {
    fn default() -> Self {
        Self {
            version: RSP_VERSION,
            name: None,
            participant: None,
            peer_connections: None,
        }
    }
}

impl Update {
    pub fn with_participant(mut self, participant: ParticipantState) -> Self {
        self.participant = Some(participant);
        self
    }

    pub fn with_peer_connections(mut self, peer_connections: Vec<PeerConnectionSummary>) -> Self {
        self.peer_connections = Some(peer_connections);
        self
    }

    /// Serialize as a complete RSP `update` message body.
    pub fn to_body(&self) -> Result<String, serde_json::Error> {
        OutboundMessage::Update(self.clone()).to_body()
    }
}

/// Identification of the publishing SDK in the `connect` handshake.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Publisher {
    pub name: String,
    pub sdk_version: String,
    pub user_agent: String,
}

/// Transport offered for an optional media-signaling channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelTransport {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaSignalingChannel {
    pub transports: Vec<ChannelTransport>,
}

impl MediaSignalingChannel {
    pub fn data_channel() -> Self {
        Self {
            transports: vec![ChannelTransport {
                kind: "data-channel".to_owned(),
            }],
        }
    }
}

/// Optional capability channels requested during `connect`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaSignaling {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_quality: Option<MediaSignalingChannel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_speaker: Option<MediaSignalingChannel>,
}

/// Initial handshake payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub participant: ParticipantState,
    pub version: u32,
    pub ice_servers: String,
    pub publisher: Publisher,
    pub media_signaling: MediaSignaling,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// Resync handshake payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub participant: ParticipantState,
    pub version: u32,
}

/// Messages this transport sends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundMessage {
    Connect(ConnectMessage),
    Sync(SyncMessage),
    Update(Update),
    Disconnect { version: u32 },
}

impl OutboundMessage {
    pub fn disconnect() -> Self {
        Self::Disconnect {
            version: RSP_VERSION,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::Sync(_) => "sync",
            Self::Update(_) => "update",
            Self::Disconnect { .. } => "disconnect",
        }
    }

    pub fn to_body(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Where an observed session request/response came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessageOrigin {
    /// Received from the signaling server.
    Remote,
    /// Sent by this transport and echoed back by the session layer.
    Local,
}

/// A raw session request or response, as observed by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub origin: MessageOrigin,
    pub body: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl InboundMessage {
    pub fn remote(body: impl Into<String>) -> Self {
        Self {
            origin: MessageOrigin::Remote,
            body: Some(body.into()),
            headers: Vec::new(),
        }
    }

    /// A remote message carrying only headers.
    pub fn remote_headers(headers: Vec<(String, String)>) -> Self {
        Self {
            origin: MessageOrigin::Remote,
            body: None,
            headers,
        }
    }

    pub fn local(body: impl Into<String>) -> Self {
        Self {
            origin: MessageOrigin::Local,
            body: Some(body.into()),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Low-level reason the session went away.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum DisconnectCause {
    RequestTimeout,
    ConnectionError,
    /// Any other cause reported by the session layer.
    Other(String),
}

/// Message `type` values understood on the inbound side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundKind {
    Connected,
    Synced,
    Update,
    Disconnected,
    Error,
    Unknown,
}

impl InboundKind {
    pub fn from_type(kind: Option<&str>) -> Self {
        match kind {
            Some("connected") => Self::Connected,
            Some("synced") => Self::Synced,
            Some("update") => Self::Update,
            Some("disconnected") => Self::Disconnected,
            Some("error") => Self::Error,
            _ => Self::Unknown,
        }
    }
}

/// Envelope fields the transport inspects on inbound RSP messages.
///
/// Read leniently: a field of an unexpected JSON type is treated as absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboundEnvelope {
    pub kind: Option<String>,
    pub status: Option<String>,
    pub code: Option<Value>,
    pub message: Option<String>,
}

impl InboundEnvelope {
    pub fn from_payload(payload: &Value) -> Self {
        let Value::Object(fields) = payload else {
            return Self::default();
        };
        let text = |key: &str| fields.get(key).and_then(Value::as_str).map(str::to_owned);
        Self {
            kind: text("type"),
            status: text("status"),
            code: fields.get("code").cloned(),
            message: text("message"),
        }
    }
}

/// A successfully parsed inbound RSP body.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedMessage {
    pub envelope: InboundEnvelope,
    pub payload: Value,
}

impl ParsedMessage {
    pub fn kind(&self) -> InboundKind {
        InboundKind::from_type(self.envelope.kind.as_deref())
    }

    /// `disconnected` with `status: "completed"`.
    pub fn is_room_completed(&self) -> bool {
        self.kind() == InboundKind::Disconnected
            && self.envelope.status.as_deref() == Some("completed")
    }
}

/// Public events emitted by a signaling transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum TransportEvent {
    /// Initial room snapshot; the transport is now connected.
    Connected(Value),
    /// Any post-connect RSP message (`update`, `synced`, ...).
    Message(Value),
    /// Terminal notification, delivered exactly once.
    Disconnected { error: Option<SignalingError> },
}
