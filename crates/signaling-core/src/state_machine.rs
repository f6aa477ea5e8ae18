use serde_json::Value;
use tracing::{debug, info};

use crate::{
    classify::{ClassificationInput, body_error, classify, header_error, parse_body},
    error::{SignalingError, TransitionError},
    reducer::reduce_updates,
    types::{
        ConnectionState, DisconnectCause, InboundKind, InboundMessage, MessageOrigin,
        OutboundMessage, ParsedMessage, TransportEvent, Update,
    },
};

/// Side effects requested by the state machine, in the order they must run.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportAction {
    /// Deliver a public event to the owner.
    Emit(TransportEvent),
    /// Send the single update reduced from everything queued before connecting.
    Flush(Update),
    /// Ask the session to renegotiate (resync).
    Renegotiate,
    /// Ask the session to terminate with the given body.
    Terminate(OutboundMessage),
    /// Release the underlying session.
    Close,
}

/// Result of `publish` for a transport that is not disconnected.
#[derive(Debug, Clone, PartialEq)]
pub enum PublishDisposition {
    /// Connected: send immediately.
    Send(Update),
    /// Connecting or syncing: held until the next transition into connected.
    Queued,
}

/// Sans-io signaling transport state machine.
///
/// Owns the connection state, the updates waiting for a connected state and
/// the inbound messages that arrived before the owner may see them. Every
/// operation returns the actions the caller has to perform.
#[derive(Debug, Clone)]
pub struct TransportStateMachine {
    state: ConnectionState,
    updates_to_send: Vec<Update>,
    updates_received: Vec<Value>,
}

impl Default for TransportStateMachine {
    fn default() -> Self {
        Self {
            state: ConnectionState::Connecting,
            updates_to_send: Vec::new(),
            updates_received: Vec::new(),
        }
    }
}

impl TransportStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Number of updates waiting for the transport to connect.
    pub fn queued_updates(&self) -> usize {
        self.updates_to_send.len()
    }

    /// Number of inbound messages waiting to be replayed.
    pub fn buffered_messages(&self) -> usize {
        self.updates_received.len()
    }

    pub fn publish(&mut self, update: Update) -> Result<PublishDisposition, TransitionError> {
        match self.state {
            ConnectionState::Connected => Ok(PublishDisposition::Send(update)),
            ConnectionState::Connecting | ConnectionState::Syncing => {
                self.updates_to_send.push(update);
                Ok(PublishDisposition::Queued)
            }
            ConnectionState::Disconnected => Err(TransitionError::new(self.state, "publish")),
        }
    }

    pub fn sync(&mut self) -> Result<Vec<TransportAction>, TransitionError> {
        if self.state != ConnectionState::Connected {
            return Err(TransitionError::new(self.state, "sync"));
        }
        let mut actions = self.preempt(ConnectionState::Syncing);
        actions.push(TransportAction::Renegotiate);
        Ok(actions)
    }

    pub fn disconnect(
        &mut self,
        error: Option<SignalingError>,
    ) -> Result<Vec<TransportAction>, TransitionError> {
        if self.state == ConnectionState::Disconnected {
            return Err(TransitionError::new(self.state, "disconnect"));
        }

        info!(
            from = %self.state,
            code = error.as_ref().map(|err| err.code),
            "signaling transport disconnecting"
        );

        let mut actions = self.preempt(ConnectionState::Disconnected);
        actions.extend([
            TransportAction::Emit(TransportEvent::Disconnected { error }),
            TransportAction::Terminate(OutboundMessage::disconnect()),
            TransportAction::Close,
        ]);
        Ok(actions)
    }

    /// Handle the session's answer to the initial handshake.
    pub fn on_accepted(&mut self, message: &InboundMessage) -> Vec<TransportAction> {
        if self.state != ConnectionState::Connecting {
            return Vec::new();
        }
        self.on_message(message)
    }

    /// Handle an inbound RSP request or response.
    pub fn on_message(&mut self, message: &InboundMessage) -> Vec<TransportAction> {
        if message.origin == MessageOrigin::Local || self.state == ConnectionState::Disconnected {
            return Vec::new();
        }

        if let Some(header) = header_error(message) {
            return self.force_disconnect(Some(header.into_error()));
        }

        let body = match parse_body(message) {
            Ok(Some(body)) => body,
            Ok(None) => return Vec::new(),
            Err(err) => {
                debug!(code = err.code, state = %self.state, "dropping malformed RSP message");
                return Vec::new();
            }
        };

        if let Some(error) = body_error(&body) {
            return self.force_disconnect(Some(error));
        }

        self.dispatch(body)
    }

    /// The session failed (initial negotiation failure or user agent loss).
    pub fn on_session_failure(
        &mut self,
        message: Option<&InboundMessage>,
        cause: Option<DisconnectCause>,
    ) -> Vec<TransportAction> {
        if self.state == ConnectionState::Disconnected {
            return Vec::new();
        }
        let error = classify(&ClassificationInput::from_inbound(message, cause));
        self.force_disconnect(Some(error))
    }

    /// The remote side ended the session.
    pub fn on_session_terminated(
        &mut self,
        message: Option<&InboundMessage>,
        cause: Option<DisconnectCause>,
    ) -> Vec<TransportAction> {
        self.on_session_failure(message, cause)
    }

    pub fn on_keep_alive_timeout(&mut self) -> Vec<TransportAction> {
        self.force_disconnect(Some(SignalingError::connection_timeout()))
    }

    fn dispatch(&mut self, body: ParsedMessage) -> Vec<TransportAction> {
        use ConnectionState::*;

        let kind = body.kind();
        match (self.state, kind) {
            (_, InboundKind::Disconnected) => self.force_disconnect(None),
            (Connecting, InboundKind::Connected) => {
                self.enter_connected(TransportEvent::Connected(body.payload))
            }
            (Syncing, InboundKind::Synced) => {
                self.enter_connected(TransportEvent::Message(body.payload))
            }
            (Connecting, InboundKind::Synced | InboundKind::Update)
            | (Syncing, InboundKind::Update) => {
                self.updates_received.push(body.payload);
                Vec::new()
            }
            (Connected, InboundKind::Connected | InboundKind::Synced | InboundKind::Update) => {
                vec![TransportAction::Emit(TransportEvent::Message(body.payload))]
            }
            _ => {
                debug!(state = %self.state, ?kind, "ignoring RSP message");
                Vec::new()
            }
        }
    }

    /// Emit the snapshot that completes a negotiation, then enter connected.
    fn enter_connected(&mut self, snapshot: TransportEvent) -> Vec<TransportAction> {
        let mut actions = vec![TransportAction::Emit(snapshot)];
        actions.extend(self.preempt(ConnectionState::Connected));
        actions
    }

    fn force_disconnect(&mut self, error: Option<SignalingError>) -> Vec<TransportAction> {
        self.disconnect(error).unwrap_or_default()
    }

    /// Privileged transition that skips any pending negotiation. Entering
    /// connected flushes queued updates first, then replays buffered messages.
    fn preempt(&mut self, next: ConnectionState) -> Vec<TransportAction> {
        debug_assert!(self.state.can_transition_to(next), "{} -> {next}", self.state);
        debug!(from = %self.state, to = %next, "signaling transport state changed");
        self.state = next;

        match next {
            ConnectionState::Connected => {
                let mut actions = Vec::new();
                let queued = std::mem::take(&mut self.updates_to_send);
                if !queued.is_empty() {
                    actions.push(TransportAction::Flush(reduce_updates(queued)));
                }
                actions.extend(
                    self.updates_received
                        .drain(..)
                        .map(|message| TransportAction::Emit(TransportEvent::Message(message))),
                );
                actions
            }
            ConnectionState::Disconnected => {
                self.updates_to_send.clear();
                self.updates_received.clear();
                Vec::new()
            }
            ConnectionState::Connecting | ConnectionState::Syncing => Vec::new(),
        }
    }
}
