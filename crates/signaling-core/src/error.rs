use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ConnectionState;

/// Stable signaling error kinds surfaced to the owner of a transport.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SignalingErrorKind {
    /// The underlying session timed out.
    ConnectionTimeout,
    /// The underlying session failed at the transport level.
    Connection,
    /// The underlying session closed without a more specific cause.
    ConnectionDisconnected,
    /// The server ended the room normally.
    RoomCompleted,
    /// An inbound body could not be parsed. Never fatal.
    IncomingMessageInvalid,
    /// Server-defined error carried by an `error` message or error header.
    Server,
}

/// Broad grouping of error codes, used for logging and owner-side handling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SignalingErrorCategory {
    /// Access token or authorization problem.
    Auth,
    /// Signaling connection lifecycle (530xx).
    Connection,
    /// Room lifecycle (531xx).
    Room,
    /// Participant constraints (532xx).
    Participant,
    /// Track constraints (533xx).
    Track,
    /// Media description negotiation (534xx).
    Media,
    /// Configuration / TURN acquisition (535xx).
    Configuration,
    /// Anything else.
    Unknown,
}

pub const CONNECTION_ERROR_CODE: u32 = 53000;
pub const CONNECTION_DISCONNECTED_CODE: u32 = 53001;
pub const CONNECTION_TIMEOUT_CODE: u32 = 53002;
pub const INCOMING_MESSAGE_INVALID_CODE: u32 = 53003;
pub const ROOM_COMPLETED_CODE: u32 = 53118;

const KNOWN_ERRORS: &[(u32, &str)] = &[
    (20101, "Invalid Access Token"),
    (CONNECTION_ERROR_CODE, "Signaling connection error"),
    (CONNECTION_DISCONNECTED_CODE, "Signaling connection disconnected"),
    (CONNECTION_TIMEOUT_CODE, "Signaling connection timed out"),
    (INCOMING_MESSAGE_INVALID_CODE, "Client received an invalid signaling message"),
    (53004, "Client sent an invalid signaling message"),
    (53100, "Room name is invalid"),
    (53101, "Room name is too long"),
    (53102, "Room name contains invalid characters"),
    (53103, "Unable to create Room"),
    (53104, "Unable to connect to Room"),
    (53105, "Room contains too many Participants"),
    (53106, "Room not found"),
    (ROOM_COMPLETED_CODE, "Room completed"),
    (53200, "Participant identity is invalid"),
    (53201, "Participant identity is too long"),
    (53202, "Participant identity contains invalid characters"),
    (53203, "Participant has too many Tracks"),
    (53204, "Participant not found"),
    (53300, "Track is invalid"),
    (53301, "Track name is invalid"),
    (53302, "Track name is too long"),
    (53303, "Track name contains invalid characters"),
    (53400, "Client is unable to create or apply a local media description"),
    (53401, "Server is unable to create or apply a local media description"),
    (53402, "Client is unable to apply a remote media description"),
    (53403, "Server is unable to apply a remote media description"),
    (53404, "No supported codec"),
    (53500, "Unable to acquire configuration"),
    (53501, "Unable to acquire TURN credentials"),
];

/// Canonical message for a known error code.
pub fn known_error_message(code: u32) -> Option<&'static str> {
    KNOWN_ERRORS
        .iter()
        .find(|(known, _)| *known == code)
        .map(|(_, message)| *message)
}

/// Map an error code to its category by numeric range.
pub fn classify_error_code(code: u32) -> SignalingErrorCategory {
    match code {
        20000..=20999 => SignalingErrorCategory::Auth,
        53000..=53099 => SignalingErrorCategory::Connection,
        53100..=53199 => SignalingErrorCategory::Room,
        53200..=53299 => SignalingErrorCategory::Participant,
        53300..=53399 => SignalingErrorCategory::Track,
        53400..=53499 => SignalingErrorCategory::Media,
        53500..=53599 => SignalingErrorCategory::Configuration,
        _ => SignalingErrorCategory::Unknown,
    }
}

/// Signaling error delivered with the terminal disconnect notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{kind:?}:{code}: {message}")]
pub struct SignalingError {
    pub kind: SignalingErrorKind,
    pub code: u32,
    pub message: String,
}

impl SignalingError {
    fn canonical(kind: SignalingErrorKind, code: u32) -> Self {
        Self {
            kind,
            code,
            message: known_error_message(code).unwrap_or("Unknown error").to_owned(),
        }
    }

    pub fn connection_timeout() -> Self {
        Self::canonical(SignalingErrorKind::ConnectionTimeout, CONNECTION_TIMEOUT_CODE)
    }

    pub fn connection() -> Self {
        Self::canonical(SignalingErrorKind::Connection, CONNECTION_ERROR_CODE)
    }

    pub fn connection_disconnected() -> Self {
        Self::canonical(
            SignalingErrorKind::ConnectionDisconnected,
            CONNECTION_DISCONNECTED_CODE,
        )
    }

    pub fn room_completed() -> Self {
        Self::canonical(SignalingErrorKind::RoomCompleted, ROOM_COMPLETED_CODE)
    }

    pub fn incoming_message_invalid() -> Self {
        Self::canonical(
            SignalingErrorKind::IncomingMessageInvalid,
            INCOMING_MESSAGE_INVALID_CODE,
        )
    }

    pub fn category(&self) -> SignalingErrorCategory {
        classify_error_code(self.code)
    }
}

/// Build a server-defined error. Known codes map to their well-known kind and
/// canonical message; unknown codes keep the server's message.
pub fn create_server_error(code: u32, message: &str) -> SignalingError {
    let kind = match code {
        CONNECTION_ERROR_CODE => SignalingErrorKind::Connection,
        CONNECTION_DISCONNECTED_CODE => SignalingErrorKind::ConnectionDisconnected,
        CONNECTION_TIMEOUT_CODE => SignalingErrorKind::ConnectionTimeout,
        INCOMING_MESSAGE_INVALID_CODE => SignalingErrorKind::IncomingMessageInvalid,
        ROOM_COMPLETED_CODE => SignalingErrorKind::RoomCompleted,
        _ => SignalingErrorKind::Server,
    };

    let message = match known_error_message(code) {
        Some(canonical) => canonical.to_owned(),
        None if message.trim().is_empty() => "Unknown error".to_owned(),
        None => message.to_owned(),
    };

    SignalingError {
        kind,
        code,
        message,
    }
}

/// Failure of one `publish` call. Never disconnects the transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
pub enum PublishError {
    /// The server answered with a non-retryable status.
    #[error("update rejected with status {status_code}")]
    Rejected { status_code: u16 },
    /// Every retry met a server-busy response.
    #[error("transport failed to send a message even after {attempts} attempts")]
    AttemptsExhausted { attempts: u32 },
    /// The transport disconnected before the update was delivered.
    #[error("transport disconnected before the update was delivered")]
    Disconnected,
    /// The update could not be encoded or the session could not carry it.
    #[error("session failed to carry update: {0}")]
    Session(String),
}

/// A requested operation is not legal from the current state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot run '{action}' while transport is {state}")]
pub struct TransitionError {
    pub state: ConnectionState,
    pub action: &'static str,
}

impl TransitionError {
    pub fn new(state: ConnectionState, action: &'static str) -> Self {
        Self { state, action }
    }
}
