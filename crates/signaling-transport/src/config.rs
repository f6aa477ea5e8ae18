use serde::{Deserialize, Serialize};
use signaling_core::{HandshakeProfile, RetryPolicy};
use signaling_session::invite_headers;

pub const DEFAULT_COMMAND_BUFFER: usize = 128;
pub const DEFAULT_EVENT_BUFFER: usize = 512;
/// Reported as `ice_servers` when the caller did not resolve ICE servers.
pub const DEFAULT_ICE_SERVERS_STATUS: &str = "success";

/// Everything needed to start one signaling transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TransportConfig {
    /// Room name, `None` for an ad-hoc room.
    pub name: Option<String>,
    pub access_token: String,
    /// ICE server source status reported in `connect`.
    pub ice_servers: String,
    pub user_agent: String,
    pub network_quality: bool,
    pub dominant_speaker: bool,
    pub sdp_format: Option<String>,
    pub retry: RetryPolicy,
    pub command_buffer: usize,
    pub event_buffer: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            name: None,
            access_token: String::new(),
            ice_servers: DEFAULT_ICE_SERVERS_STATUS.to_owned(),
            user_agent: String::new(),
            network_quality: false,
            dominant_speaker: false,
            sdp_format: None,
            retry: RetryPolicy::default(),
            command_buffer: DEFAULT_COMMAND_BUFFER,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl TransportConfig {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Headers for the initial session invite.
    pub fn session_headers(&self) -> Vec<(String, String)> {
        invite_headers(&self.access_token)
    }

    pub fn handshake_profile(&self) -> HandshakeProfile {
        HandshakeProfile {
            name: self.name.clone(),
            ice_servers: self.ice_servers.clone(),
            user_agent: self.user_agent.clone(),
            network_quality: self.network_quality,
            dominant_speaker: self.dominant_speaker,
            sdp_format: self.sdp_format.clone(),
        }
    }
}
