//! Session seam used by the signaling transport.
//!
//! A [`Session`] is the ordered, reliable request/response channel the
//! transport rides on (for example a SIP dialog). The transport never owns the
//! dialog: it sends requests through the trait, receives [`SessionEvent`]s on
//! a channel, and exposes its current handshake body through
//! [`HandshakeSource`] so the session can pull it at negotiation time.

use std::sync::Arc;

use signaling_core::{
    ConnectionState, DisconnectCause, HandshakeProfile, InboundMessage, OutboundMessage,
    ParticipantState,
    types::{RSP_CONTENT_TYPE, RSP_EVENT_PACKAGE},
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::trace;

mod loopback;

pub use loopback::{LoopbackSession, RecordedRequest};

pub const ACCESS_TOKEN_HEADER: &str = "X-Twilio-AccessToken";
pub const SESSION_EXPIRES_HEADER: &str = "Session-Expires";
/// Session refresh interval requested on the initial invite, in seconds.
pub const SESSION_EXPIRES_SECS: u32 = 120;

/// Headers carried by the initial session invite.
pub fn invite_headers(access_token: &str) -> Vec<(String, String)> {
    vec![
        (ACCESS_TOKEN_HEADER.to_owned(), access_token.to_owned()),
        (
            SESSION_EXPIRES_HEADER.to_owned(),
            SESSION_EXPIRES_SECS.to_string(),
        ),
    ]
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The session is closed and can no longer carry requests.
    #[error("session closed")]
    Closed,
    /// The session dropped the request without answering.
    #[error("session dropped the request")]
    Dropped,
    #[error("session transport failure: {0}")]
    Transport(String),
}

/// One request the transport asks the session to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    pub method: &'static str,
    pub body: String,
    pub headers: Vec<(String, String)>,
}

impl OutboundRequest {
    /// An RSP `INFO` request.
    pub fn info(body: String) -> Self {
        Self {
            method: "INFO",
            body,
            headers: vec![
                ("Content-Type".to_owned(), RSP_CONTENT_TYPE.to_owned()),
                ("Event".to_owned(), RSP_EVENT_PACKAGE.to_owned()),
                ("Info-Package".to_owned(), RSP_EVENT_PACKAGE.to_owned()),
            ],
        }
    }

    /// A session termination (`BYE`) carrying an RSP body.
    pub fn terminate(body: String) -> Self {
        Self {
            method: "BYE",
            body,
            headers: vec![("Content-Type".to_owned(), RSP_CONTENT_TYPE.to_owned())],
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Final response to an [`OutboundRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionResponse {
    pub status_code: u16,
}

impl SessionResponse {
    pub fn new(status_code: u16) -> Self {
        Self { status_code }
    }
}

/// Response that the session will deliver later.
///
/// Handing one back means the request was already accepted for sending.
#[derive(Debug)]
pub struct PendingResponse {
    rx: oneshot::Receiver<Result<SessionResponse, SessionError>>,
}

impl PendingResponse {
    /// Create a pending response and the sender the session resolves it with.
    pub fn channel() -> (oneshot::Sender<Result<SessionResponse, SessionError>>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// A response that is already known.
    pub fn ready(result: Result<SessionResponse, SessionError>) -> Self {
        let (tx, pending) = Self::channel();
        let _ = tx.send(result);
        pending
    }

    pub async fn wait(self) -> Result<SessionResponse, SessionError> {
        self.rx.await.unwrap_or(Err(SessionError::Dropped))
    }
}

/// Events a session reports to the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The initial negotiation was answered.
    Accepted(InboundMessage),
    /// The initial negotiation failed.
    Failed {
        message: Option<InboundMessage>,
        cause: Option<DisconnectCause>,
    },
    /// The remote side ended the session.
    Bye {
        message: Option<InboundMessage>,
        cause: Option<DisconnectCause>,
    },
    /// An in-dialog RSP request (`INFO`).
    Info(InboundMessage),
    /// The user agent below the session lost its connection.
    UserAgentDisconnected {
        message: Option<InboundMessage>,
        cause: Option<DisconnectCause>,
    },
    /// The user agent stopped receiving keep-alive answers.
    KeepAliveTimeout,
}

/// Sending half of the session event channel.
#[derive(Debug, Clone)]
pub struct SessionEvents {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionEvents {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Report an event. Dropped silently once the transport has gone away.
    pub fn emit(&self, event: SessionEvent) {
        trace!(?event, "session event");
        let _ = self.tx.send(event);
    }
}

type ParticipantProvider = Arc<dyn Fn() -> ParticipantState + Send + Sync>;

/// Pull-based handshake body, always built from the transport's current state.
#[derive(Clone)]
pub struct HandshakeSource {
    profile: HandshakeProfile,
    state: watch::Receiver<ConnectionState>,
    participant: ParticipantProvider,
}

impl std::fmt::Debug for HandshakeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeSource")
            .field("profile", &self.profile)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl HandshakeSource {
    pub fn new(
        profile: HandshakeProfile,
        state: watch::Receiver<ConnectionState>,
        participant: impl Fn() -> ParticipantState + Send + Sync + 'static,
    ) -> Self {
        Self {
            profile,
            state,
            participant: Arc::new(participant),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn next_message(&self) -> OutboundMessage {
        self.profile.message_for(self.state(), (self.participant)())
    }

    pub fn next_body(&self) -> Result<String, serde_json::Error> {
        self.next_message().to_body()
    }
}

/// Everything a session needs from the transport that creates it.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub handshake: HandshakeSource,
    pub events: SessionEvents,
    /// Headers for the initial invite.
    pub headers: Vec<(String, String)>,
}

/// Request/response channel the transport is layered on.
pub trait Session: Send + Sync + 'static {
    /// Queue a request. The request counts as sent once this returns.
    fn send_request(&self, request: OutboundRequest) -> PendingResponse;

    /// Start a renegotiation; the session pulls the body from its
    /// [`HandshakeSource`].
    fn renegotiate(&self);

    /// End the dialog with the given request.
    fn terminate(&self, request: OutboundRequest);

    /// Stop the user agent and release every resource.
    fn close(&self);
}
