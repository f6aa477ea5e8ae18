//! Async signaling transport.
//!
//! [`spawn_transport`] starts one tokio task that owns the transport state
//! machine and its session. Callers talk to it through a cloneable
//! [`TransportHandle`] and observe it through the broadcast event stream and
//! the state watch.

use std::sync::Arc;

use signaling_core::{
    ConnectionState, EventStream, ParticipantState, SignalingChannels, SignalingError,
    TransportChannelError, TransportStateMachine, Update,
};
use signaling_session::{HandshakeSource, Session, SessionContext, SessionEvents};
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::info;

mod config;
mod publish;
mod runtime;

pub use config::{
    DEFAULT_COMMAND_BUFFER, DEFAULT_EVENT_BUFFER, DEFAULT_ICE_SERVERS_STATUS, TransportConfig,
};
pub use publish::PublishReceipt;

use publish::PublishRetrier;
use runtime::{TransportCommand, TransportRuntime};

#[derive(Clone, Debug)]
pub struct TransportHandle {
    channels: SignalingChannels<TransportCommand>,
    state: watch::Receiver<ConnectionState>,
}

impl TransportHandle {
    /// Publish an update. `None` when the transport is disconnected.
    ///
    /// Updates published while connecting or syncing are held and sent as a
    /// single reduced update once connected; their receipts resolve with that
    /// send's outcome.
    pub async fn publish(
        &self,
        update: Update,
    ) -> Result<Option<PublishReceipt>, TransportChannelError> {
        self.request(|reply| TransportCommand::Publish { update, reply }).await
    }

    /// Start a resync. `false` unless the transport was connected.
    pub async fn sync(&self) -> Result<bool, TransportChannelError> {
        self.request(|reply| TransportCommand::Sync { reply }).await
    }

    /// Disconnect with an optional error. `false` if already disconnected.
    pub async fn disconnect(
        &self,
        error: Option<SignalingError>,
    ) -> Result<bool, TransportChannelError> {
        self.request(|reply| TransportCommand::Disconnect { error, reply }).await
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn subscribe(&self) -> EventStream {
        self.channels.subscribe()
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> TransportCommand,
    ) -> Result<T, TransportChannelError> {
        let (reply, rx) = oneshot::channel();
        self.channels.send_command(command(reply)).await?;
        rx.await.map_err(|_| TransportChannelError::CommandChannelClosed)
    }
}

/// Start a transport in `connecting`.
///
/// `participant` yields the local participant state whenever the session
/// builds a handshake body. `connect` receives the session context (handshake
/// source, event sender, invite headers) and returns the session to drive.
pub fn spawn_transport<S, P, F>(
    config: TransportConfig,
    participant: P,
    connect: F,
) -> TransportHandle
where
    S: Session,
    P: Fn() -> ParticipantState + Send + Sync + 'static,
    F: FnOnce(SessionContext) -> S,
{
    let (channels, command_rx) =
        SignalingChannels::new(config.command_buffer, config.event_buffer);
    let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
    let (events, session_rx) = SessionEvents::channel();

    let session = Arc::new(connect(SessionContext {
        handshake: HandshakeSource::new(
            config.handshake_profile(),
            state_rx.clone(),
            participant,
        ),
        events,
        headers: config.session_headers(),
    }));

    let shutdown = CancellationToken::new();
    let runtime = TransportRuntime {
        events: channels.event_sender(),
        command_rx,
        session_rx,
        state_machine: TransportStateMachine::new(),
        state_tx,
        retrier: PublishRetrier::new(
            Arc::clone(&session),
            config.retry,
            state_rx.clone(),
            shutdown.clone(),
        ),
        session,
        queued: Vec::new(),
        shutdown,
    };

    info!(
        room = config.name.as_deref().unwrap_or("<unnamed>"),
        "signaling transport connecting"
    );
    tokio::spawn(runtime.run());

    TransportHandle {
        channels,
        state: state_rx,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::{Value, json};
    use signaling_core::{
        DisconnectCause, InboundMessage, PeerConnectionSummary, PublishError, RetryPolicy,
        Revisioned, SignalingErrorKind, TransportEvent, types::ERROR_HEADER,
    };
    use signaling_session::{LoopbackSession, SessionEvent};
    use tokio::time::timeout;

    use super::*;

    fn start(config: TransportConfig) -> (TransportHandle, LoopbackSession, EventStream) {
        let session = LoopbackSession::new();
        let handle = spawn_transport(config, || Revisioned::new(1), |ctx| session.attach(ctx));
        let events = handle.subscribe();
        (handle, session, events)
    }

    async fn next_event(events: &mut EventStream) -> TransportEvent {
        timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("event timeout")
            .expect("event receive")
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    async fn connect(session: &LoopbackSession, events: &mut EventStream) -> Value {
        let snapshot = json!({ "type": "connected", "sid": "RM1", "participant": {} });
        session.accept(snapshot.clone());
        assert_eq!(next_event(events).await, TransportEvent::Connected(snapshot.clone()));
        snapshot
    }

    fn participant_update(revision: u64) -> Update {
        Update::default().with_participant(Revisioned::new(revision))
    }

    #[tokio::test(start_paused = true)]
    async fn invite_carries_connect_handshake_and_headers() {
        let config = TransportConfig::new("token").with_name("room-1");
        let (handle, session, _events) = start(config);

        assert_eq!(handle.state(), ConnectionState::Connecting);
        let handshakes = session.handshakes();
        assert_eq!(handshakes.len(), 1);
        assert_eq!(handshakes[0].kind(), "connect");
        assert_eq!(
            session.invite_headers(),
            vec![
                ("X-Twilio-AccessToken".to_owned(), "token".to_owned()),
                ("Session-Expires".to_owned(), "120".to_owned()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_snapshot_precedes_buffered_update_and_flush() {
        let (handle, session, mut events) = start(TransportConfig::new("token"));

        let first = handle
            .publish(participant_update(1))
            .await
            .expect("runtime")
            .expect("accepted while connecting");
        let second = handle
            .publish(
                participant_update(2).with_peer_connections(vec![PeerConnectionSummary::new("a")]),
            )
            .await
            .expect("runtime")
            .expect("accepted while connecting");

        let early = json!({ "type": "update", "participant": { "revision": 9 } });
        session.info(early.clone());
        settle().await;
        assert!(session.requests().is_empty());

        connect(&session, &mut events).await;
        assert_eq!(next_event(&mut events).await, TransportEvent::Message(early));
        assert_eq!(handle.state(), ConnectionState::Connected);

        let sent = session.sent_bodies();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0],
            json!({
                "type": "update",
                "version": 2,
                "participant": { "revision": 2 },
                "peer_connections": [{ "id": "a" }]
            })
        );

        assert_eq!(first.outcome().await, Ok(()));
        assert_eq!(second.outcome().await, Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn glare_free_sync() {
        let (handle, session, mut events) = start(TransportConfig::new("token"));
        connect(&session, &mut events).await;

        assert!(handle.sync().await.expect("runtime"));
        assert_eq!(handle.state(), ConnectionState::Syncing);
        assert_eq!(session.handshakes().last().map(|m| m.kind()), Some("sync"));
        assert!(!handle.sync().await.expect("runtime"));

        let update = json!({ "type": "update", "peer_connections": [] });
        let synced = json!({ "type": "synced", "participant": { "revision": 2 } });
        session.info(update.clone());
        session.info(synced.clone());

        assert_eq!(next_event(&mut events).await, TransportEvent::Message(synced));
        assert_eq!(next_event(&mut events).await, TransportEvent::Message(update));
        assert_eq!(handle.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn normal_completion_reports_room_completed_once() {
        let (handle, session, mut events) = start(TransportConfig::new("token"));
        connect(&session, &mut events).await;

        session.info(json!({ "type": "disconnected", "status": "completed" }));
        match next_event(&mut events).await {
            TransportEvent::Disconnected { error: Some(err) } => {
                assert_eq!(err.kind, SignalingErrorKind::RoomCompleted);
                assert_eq!(err.code, 53118);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(handle.state(), ConnectionState::Disconnected);

        let terminations = session.terminations();
        assert_eq!(terminations.len(), 1);
        assert_eq!(
            serde_json::from_str::<Value>(&terminations[0].body).expect("json"),
            json!({ "type": "disconnect", "version": 2 })
        );
        assert!(session.is_closed());

        session.deliver(SessionEvent::Bye {
            message: None,
            cause: Some(DisconnectCause::ConnectionError),
        });
        session.deliver(SessionEvent::KeepAliveTimeout);
        assert!(!handle.disconnect(None).await.expect("runtime"));
        assert!(handle.publish(participant_update(5)).await.expect("runtime").is_none());
        assert!(events.try_recv().is_err());
        assert_eq!(session.terminations().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn header_error_wins_over_body() {
        let (handle, session, mut events) = start(TransportConfig::new("token"));

        let response = InboundMessage::remote(r#"{ "type": "connected" }"#).with_header(
            ERROR_HEADER,
            "53205 Participant disconnected because of duplicate identity",
        );
        session.deliver(SessionEvent::Accepted(response));

        match next_event(&mut events).await {
            TransportEvent::Disconnected { error: Some(err) } => assert_eq!(err.code, 53205),
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(handle.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_negotiation_is_classified_by_cause() {
        let (_handle, session, mut events) = start(TransportConfig::new("token"));

        session.deliver(SessionEvent::Failed {
            message: None,
            cause: Some(DisconnectCause::RequestTimeout),
        });

        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Disconnected {
                error: Some(SignalingError::connection_timeout())
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn user_agent_loss_disconnects() {
        let (_handle, session, mut events) = start(TransportConfig::new("token"));
        connect(&session, &mut events).await;

        session.deliver(SessionEvent::UserAgentDisconnected {
            message: None,
            cause: None,
        });
        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Disconnected {
                error: Some(SignalingError::connection_disconnected())
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_info_is_ignored() {
        let (handle, session, mut events) = start(TransportConfig::new("token"));
        connect(&session, &mut events).await;

        session.deliver(SessionEvent::Info(InboundMessage::remote("{ nope")));
        let update = json!({ "type": "update" });
        session.info(update.clone());

        assert_eq!(next_event(&mut events).await, TransportEvent::Message(update));
        assert_eq!(handle.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn publish_retries_are_capped() {
        let config = TransportConfig::new("token").with_retry(RetryPolicy::new(5, 20, 10));
        let (handle, session, mut events) = start(config);
        connect(&session, &mut events).await;
        session.respond_with([503; 6]);

        let receipt = handle
            .publish(participant_update(1))
            .await
            .expect("runtime")
            .expect("accepted");

        assert_eq!(
            receipt.outcome().await,
            Err(PublishError::AttemptsExhausted { attempts: 5 })
        );
        assert_eq!(session.requests().len(), 6);
        assert_eq!(handle.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn late_disconnect_rejects_pending_retry() {
        let config = TransportConfig::new("token").with_retry(RetryPolicy::new(5, 500, 0));
        let (handle, session, mut events) = start(config);
        connect(&session, &mut events).await;
        session.respond_with([503, 503, 503]);

        let receipt = handle
            .publish(participant_update(1))
            .await
            .expect("runtime")
            .expect("accepted");
        settle().await;

        assert!(handle.disconnect(None).await.expect("runtime"));
        assert_eq!(receipt.outcome().await, Err(PublishError::Disconnected));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(session.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn queued_receipts_resolve_on_disconnect() {
        let (handle, _session, mut events) = start(TransportConfig::new("token"));

        let receipt = handle
            .publish(participant_update(1))
            .await
            .expect("runtime")
            .expect("accepted while connecting");
        assert!(handle.disconnect(None).await.expect("runtime"));

        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Disconnected { error: None }
        );
        assert_eq!(receipt.outcome().await, Err(PublishError::Disconnected));
    }

    #[tokio::test(start_paused = true)]
    async fn state_watch_follows_transitions() {
        let (handle, session, mut events) = start(TransportConfig::new("token"));
        let mut state = handle.watch_state();

        connect(&session, &mut events).await;
        state.changed().await.expect("state change");
        assert_eq!(*state.borrow_and_update(), ConnectionState::Connected);

        handle.disconnect(None).await.expect("runtime");
        state.changed().await.expect("state change");
        assert_eq!(*state.borrow_and_update(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_every_handle_disconnects() {
        let (handle, session, mut events) = start(TransportConfig::new("token"));
        connect(&session, &mut events).await;

        drop(handle);
        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Disconnected { error: None }
        );
        assert!(session.is_closed());
    }
}
