//! Room Signaling Protocol (RSP) core shared by transport runtimes and sessions.
//!
//! This crate defines the wire types, the error taxonomy and failure
//! classifier, the update reducer, the publish retry policy and the sans-io
//! transport state machine. Nothing here performs I/O.

/// Async command/event channel primitives.
pub mod channel;
/// Failure classification from headers, bodies and low-level causes.
pub mod classify;
/// Stable signaling error types and code tables.
pub mod error;
/// Handshake body selection by connection state.
pub mod handshake;
/// Revision-based coalescing of queued updates.
pub mod reducer;
/// Jittered exponential backoff for publishes.
pub mod retry;
/// Transport connection state machine.
pub mod state_machine;
/// RSP message and event types.
pub mod types;

pub use channel::{EventStream, SignalingChannels, TransportChannelError};
pub use classify::{ClassificationInput, HeaderError, classify};
pub use error::{
    PublishError, SignalingError, SignalingErrorCategory, SignalingErrorKind, TransitionError,
    classify_error_code, create_server_error,
};
pub use handshake::HandshakeProfile;
pub use reducer::{reduce_peer_connections, reduce_updates};
pub use retry::{RetryDecision, RetryPolicy};
pub use state_machine::{PublishDisposition, TransportAction, TransportStateMachine};
pub use types::{
    ConnectionState, DisconnectCause, InboundMessage, MessageOrigin, OutboundMessage,
    ParticipantState, PeerConnectionSummary, Revisioned, TransportEvent, Update,
};
