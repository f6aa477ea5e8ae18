use std::sync::Arc;

use signaling_core::{
    ConnectionState, PublishDisposition, PublishError, SignalingError, TransportAction,
    TransportEvent, TransportStateMachine, Update,
};
use signaling_session::{OutboundRequest, Session, SessionEvent};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::publish::{PublishReceipt, PublishRetrier, PublishWaiter, notify};

#[derive(Debug)]
pub(crate) enum TransportCommand {
    Publish {
        update: Update,
        reply: oneshot::Sender<Option<PublishReceipt>>,
    },
    Sync {
        reply: oneshot::Sender<bool>,
    },
    Disconnect {
        error: Option<SignalingError>,
        reply: oneshot::Sender<bool>,
    },
}

/// Single owner of a transport's state machine. Commands from handles and
/// events from the session are applied one at a time, in arrival order.
pub(crate) struct TransportRuntime<S: Session> {
    pub(crate) events: broadcast::Sender<TransportEvent>,
    pub(crate) command_rx: mpsc::Receiver<TransportCommand>,
    pub(crate) session_rx: mpsc::UnboundedReceiver<SessionEvent>,
    pub(crate) state_machine: TransportStateMachine,
    pub(crate) state_tx: watch::Sender<ConnectionState>,
    pub(crate) session: Arc<S>,
    pub(crate) retrier: PublishRetrier<S>,
    /// Waiters for updates accepted while connecting or syncing.
    pub(crate) queued: Vec<PublishWaiter>,
    pub(crate) shutdown: CancellationToken,
}

impl<S: Session> TransportRuntime<S> {
    pub(crate) async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(event) = self.session_rx.recv() => self.handle_session_event(event),
            }
        }

        if let Ok(actions) = self.state_machine.disconnect(None) {
            debug!("all transport handles dropped");
            self.apply(actions);
        }
    }

    fn handle_command(&mut self, command: TransportCommand) {
        match command {
            TransportCommand::Publish { update, reply } => {
                let receipt = self.handle_publish(update);
                let _ = reply.send(receipt);
            }
            TransportCommand::Sync { reply } => {
                let synced = match self.state_machine.sync() {
                    Ok(actions) => {
                        self.apply(actions);
                        true
                    }
                    Err(err) => {
                        debug!(error = %err, "sync refused");
                        false
                    }
                };
                let _ = reply.send(synced);
            }
            TransportCommand::Disconnect { error, reply } => {
                let disconnected = match self.state_machine.disconnect(error) {
                    Ok(actions) => {
                        self.apply(actions);
                        true
                    }
                    Err(err) => {
                        debug!(error = %err, "disconnect refused");
                        false
                    }
                };
                let _ = reply.send(disconnected);
            }
        }
    }

    fn handle_publish(&mut self, update: Update) -> Option<PublishReceipt> {
        match self.state_machine.publish(update) {
            Ok(PublishDisposition::Send(update)) => Some(self.retrier.publish(update)),
            Ok(PublishDisposition::Queued) => {
                let (waiter, receipt) = PublishReceipt::channel();
                self.queued.push(waiter);
                debug!(
                    state = %self.state_machine.state(),
                    queued = self.state_machine.queued_updates(),
                    "update queued until connected"
                );
                Some(receipt)
            }
            Err(err) => {
                debug!(error = %err, "publish refused");
                None
            }
        }
    }

    fn handle_session_event(&mut self, event: SessionEvent) {
        let actions = match event {
            SessionEvent::Accepted(message) => self.state_machine.on_accepted(&message),
            SessionEvent::Info(message) => self.state_machine.on_message(&message),
            SessionEvent::Failed { message, cause }
            | SessionEvent::UserAgentDisconnected { message, cause } => {
                self.state_machine.on_session_failure(message.as_ref(), cause)
            }
            SessionEvent::Bye { message, cause } => {
                self.state_machine.on_session_terminated(message.as_ref(), cause)
            }
            SessionEvent::KeepAliveTimeout => self.state_machine.on_keep_alive_timeout(),
        };
        self.apply(actions);
    }

    /// Publish the new state, then run the machine's actions in order.
    fn apply(&mut self, actions: Vec<TransportAction>) {
        let state = self.state_machine.state();
        self.state_tx.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });

        for action in actions {
            match action {
                TransportAction::Emit(event) => {
                    if let TransportEvent::Disconnected { error: Some(err) } = &event {
                        debug!(
                            code = err.code,
                            kind = ?err.kind,
                            category = ?err.category(),
                            "transport disconnected"
                        );
                    }
                    let _ = self.events.send(event);
                }
                TransportAction::Flush(update) => {
                    let waiters = std::mem::take(&mut self.queued);
                    self.retrier.publish_to(update, waiters);
                }
                TransportAction::Renegotiate => self.session.renegotiate(),
                TransportAction::Terminate(message) => match message.to_body() {
                    Ok(body) => self.session.terminate(OutboundRequest::terminate(body)),
                    Err(err) => warn!(error = %err, "failed to encode disconnect"),
                },
                TransportAction::Close => {
                    self.shutdown.cancel();
                    notify(
                        std::mem::take(&mut self.queued),
                        Err(PublishError::Disconnected),
                    );
                    self.session.close();
                }
            }
        }
    }
}
