use serde::{Deserialize, Serialize};

use crate::types::{
    ConnectMessage, ConnectionState, MediaSignaling, MediaSignalingChannel, OutboundMessage,
    ParticipantState, Publisher, RSP_VERSION, SDK_NAME, SDK_VERSION, SyncMessage, Update,
};

/// Static inputs to the handshake body, fixed for the life of a transport.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HandshakeProfile {
    /// Room name, omitted when connecting to an unnamed room.
    pub name: Option<String>,
    /// ICE server source status reported to the server.
    pub ice_servers: String,
    pub user_agent: String,
    /// Request the network-quality data channel.
    pub network_quality: bool,
    /// Request the dominant-speaker data channel.
    pub dominant_speaker: bool,
    /// SDP format hint (for example `unified` or `planb`).
    pub sdp_format: Option<String>,
}

impl HandshakeProfile {
    /// Body the session should send next, given the transport's current state.
    ///
    /// `connecting` sends `connect`, `syncing` sends `sync`, `connected` sends
    /// a full `update` and `disconnected` sends the bare `disconnect`.
    pub fn message_for(
        &self,
        state: ConnectionState,
        participant: ParticipantState,
    ) -> OutboundMessage {
        match state {
            ConnectionState::Disconnected => OutboundMessage::disconnect(),
            ConnectionState::Connecting => OutboundMessage::Connect(ConnectMessage {
                name: self.name.clone(),
                participant,
                version: RSP_VERSION,
                ice_servers: self.ice_servers.clone(),
                publisher: Publisher {
                    name: SDK_NAME.to_owned(),
                    sdk_version: SDK_VERSION.to_owned(),
                    user_agent: self.user_agent.clone(),
                },
                media_signaling: self.media_signaling(),
                format: self.sdp_format.clone(),
            }),
            ConnectionState::Syncing => OutboundMessage::Sync(SyncMessage {
                name: self.name.clone(),
                participant,
                version: RSP_VERSION,
            }),
            ConnectionState::Connected => OutboundMessage::Update(Update {
                name: self.name.clone(),
                participant: Some(participant),
                ..Update::default()
            }),
        }
    }

    fn media_signaling(&self) -> MediaSignaling {
        MediaSignaling {
            network_quality: self
                .network_quality
                .then(MediaSignalingChannel::data_channel),
            active_speaker: self
                .dominant_speaker
                .then(MediaSignalingChannel::data_channel),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;
    use crate::types::Revisioned;

    fn profile() -> HandshakeProfile {
        HandshakeProfile {
            name: Some("room-1".into()),
            ice_servers: "success".into(),
            user_agent: "rsp-smoke/1.0".into(),
            network_quality: true,
            dominant_speaker: false,
            sdp_format: Some("unified".into()),
        }
    }

    fn body(message: OutboundMessage) -> Value {
        serde_json::from_str(&message.to_body().expect("encode")).expect("json")
    }

    #[test]
    fn connecting_sends_full_connect() {
        let message = profile().message_for(ConnectionState::Connecting, Revisioned::new(1));
        assert_eq!(
            body(message),
            json!({
                "type": "connect",
                "name": "room-1",
                "participant": { "revision": 1 },
                "version": 2,
                "ice_servers": "success",
                "publisher": {
                    "name": SDK_NAME,
                    "sdk_version": SDK_VERSION,
                    "user_agent": "rsp-smoke/1.0"
                },
                "media_signaling": {
                    "network_quality": { "transports": [{ "type": "data-channel" }] }
                },
                "format": "unified"
            })
        );
    }

    #[test]
    fn syncing_sends_sync_without_publisher() {
        let message = profile().message_for(ConnectionState::Syncing, Revisioned::new(4));
        assert_eq!(
            body(message),
            json!({
                "type": "sync",
                "name": "room-1",
                "participant": { "revision": 4 },
                "version": 2
            })
        );
    }

    #[test]
    fn connected_sends_update() {
        let message = profile().message_for(ConnectionState::Connected, Revisioned::new(5));
        assert_eq!(message.kind(), "update");
    }

    #[test]
    fn disconnected_sends_bare_disconnect() {
        let message = profile().message_for(ConnectionState::Disconnected, Revisioned::new(9));
        assert_eq!(body(message), json!({ "type": "disconnect", "version": 2 }));
    }

    #[test]
    fn unnamed_room_omits_name() {
        let message = HandshakeProfile::default()
            .message_for(ConnectionState::Connecting, Revisioned::new(1));
        assert!(body(message).get("name").is_none());
    }
}
