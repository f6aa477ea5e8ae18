use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use serde_json::Value;
use signaling_core::{InboundMessage, OutboundMessage};
use tokio::time::Instant;
use tracing::debug;

use crate::{
    OutboundRequest, PendingResponse, Session, SessionContext, SessionError, SessionEvent,
    SessionResponse,
};

/// A request observed by [`LoopbackSession`], with the instant it was sent.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub request: OutboundRequest,
    pub at: Instant,
}

#[derive(Debug, Default)]
struct LoopbackState {
    context: Option<SessionContext>,
    responses: VecDeque<u16>,
    requests: Vec<RecordedRequest>,
    handshakes: Vec<OutboundMessage>,
    terminations: Vec<OutboundRequest>,
    closed: bool,
}

/// In-process session that records everything the transport asks of it and
/// answers requests from a scripted list of status codes (`200` once empty).
#[derive(Debug, Clone, Default)]
pub struct LoopbackSession {
    inner: Arc<Mutex<LoopbackState>>,
}

impl LoopbackSession {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, LoopbackState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind to a transport: stores the context and records the invite body.
    pub fn attach(&self, context: SessionContext) -> Self {
        let mut state = self.state();
        state.handshakes.push(context.handshake.next_message());
        state.context = Some(context);
        self.clone()
    }

    /// Queue status codes for the next requests, in order.
    pub fn respond_with(&self, statuses: impl IntoIterator<Item = u16>) {
        self.state().responses.extend(statuses);
    }

    /// Report a session event to the attached transport.
    pub fn deliver(&self, event: SessionEvent) {
        let events = self.state().context.as_ref().map(|ctx| ctx.events.clone());
        match events {
            Some(events) => events.emit(event),
            None => debug!("loopback session not attached; dropping event"),
        }
    }

    /// Answer the initial negotiation with an RSP body.
    pub fn accept(&self, body: Value) {
        self.deliver(SessionEvent::Accepted(InboundMessage::remote(body.to_string())));
    }

    /// Deliver an in-dialog RSP request.
    pub fn info(&self, body: Value) {
        self.deliver(SessionEvent::Info(InboundMessage::remote(body.to_string())));
    }

    pub fn invite_headers(&self) -> Vec<(String, String)> {
        self.state()
            .context
            .as_ref()
            .map(|ctx| ctx.headers.clone())
            .unwrap_or_default()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state().requests.clone()
    }

    /// Bodies of every request sent so far, decoded as JSON.
    pub fn sent_bodies(&self) -> Vec<Value> {
        self.state()
            .requests
            .iter()
            .filter_map(|recorded| serde_json::from_str(&recorded.request.body).ok())
            .collect()
    }

    /// Handshake bodies pulled at invite and at each renegotiation.
    pub fn handshakes(&self) -> Vec<OutboundMessage> {
        self.state().handshakes.clone()
    }

    pub fn terminations(&self) -> Vec<OutboundRequest> {
        self.state().terminations.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }
}

impl Session for LoopbackSession {
    fn send_request(&self, request: OutboundRequest) -> PendingResponse {
        let mut state = self.state();
        if state.closed {
            return PendingResponse::ready(Err(SessionError::Closed));
        }

        state.requests.push(RecordedRequest {
            request,
            at: Instant::now(),
        });
        let status = state.responses.pop_front().unwrap_or(200);
        PendingResponse::ready(Ok(SessionResponse::new(status)))
    }

    fn renegotiate(&self) {
        let mut state = self.state();
        let handshake = state
            .context
            .as_ref()
            .map(|ctx| ctx.handshake.next_message());
        if let Some(handshake) = handshake {
            state.handshakes.push(handshake);
        }
    }

    fn terminate(&self, request: OutboundRequest) {
        self.state().terminations.push(request);
    }

    fn close(&self) {
        self.state().closed = true;
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use signaling_core::{ConnectionState, HandshakeProfile, Revisioned};
    use tokio::sync::watch;

    use super::*;
    use crate::{HandshakeSource, SessionEvents, invite_headers};

    fn attached() -> (
        LoopbackSession,
        watch::Sender<ConnectionState>,
        tokio::sync::mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (events, rx) = SessionEvents::channel();
        let context = SessionContext {
            handshake: HandshakeSource::new(HandshakeProfile::default(), state_rx, || {
                Revisioned::new(1)
            }),
            events,
            headers: invite_headers("token"),
        };
        (LoopbackSession::new().attach(context), state_tx, rx)
    }

    #[tokio::test]
    async fn answers_from_script_then_defaults_to_ok() {
        let (session, _state, _rx) = attached();
        session.respond_with([503, 404]);

        let first = session.send_request(OutboundRequest::info("{}".into()));
        let second = session.send_request(OutboundRequest::info("{}".into()));
        let third = session.send_request(OutboundRequest::info("{}".into()));

        assert_eq!(first.wait().await.expect("first").status_code, 503);
        assert_eq!(second.wait().await.expect("second").status_code, 404);
        assert_eq!(third.wait().await.expect("third").status_code, 200);
        assert_eq!(session.requests().len(), 3);
    }

    #[tokio::test]
    async fn closed_session_refuses_requests() {
        let (session, _state, _rx) = attached();
        session.close();

        let pending = session.send_request(OutboundRequest::info("{}".into()));
        assert_eq!(pending.wait().await, Err(SessionError::Closed));
        assert!(session.requests().is_empty());
    }

    #[test]
    fn records_invite_and_renegotiation_handshakes() {
        let (session, state, _rx) = attached();
        state.send_replace(ConnectionState::Syncing);
        session.renegotiate();

        let kinds: Vec<_> = session.handshakes().iter().map(|m| m.kind()).collect();
        assert_eq!(kinds, vec!["connect", "sync"]);
        assert_eq!(session.invite_headers(), invite_headers("token"));
    }

    #[tokio::test]
    async fn delivers_events_to_transport() {
        let (session, _state, mut rx) = attached();
        session.info(json!({ "type": "update" }));

        match rx.recv().await {
            Some(SessionEvent::Info(message)) => {
                assert_eq!(message.body.as_deref(), Some(r#"{"type":"update"}"#));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
