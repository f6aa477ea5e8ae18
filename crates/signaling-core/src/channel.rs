use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::types::TransportEvent;

/// Broadcast event stream handed to transport owners.
pub type EventStream = broadcast::Receiver<TransportEvent>;

/// Errors returned by channel operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransportChannelError {
    /// The runtime stopped reading commands.
    #[error("command channel is closed")]
    CommandChannelClosed,
}

/// Command/event channel pair shared by a transport runtime and its handles.
///
/// Commands flow to exactly one runtime over `mpsc`; events fan out to every
/// subscriber over `broadcast`.
#[derive(Debug)]
pub struct SignalingChannels<C> {
    command_tx: mpsc::Sender<C>,
    event_tx: broadcast::Sender<TransportEvent>,
}

impl<C> Clone for SignalingChannels<C> {
    fn clone(&self) -> Self {
        Self {
            command_tx: self.command_tx.clone(),
            event_tx: self.event_tx.clone(),
        }
    }
}

impl<C> SignalingChannels<C> {
    /// Create a new channel set and return it with the command receiver.
    pub fn new(command_buffer: usize, event_buffer: usize) -> (Self, mpsc::Receiver<C>) {
        let (command_tx, command_rx) = mpsc::channel(command_buffer.max(1));
        let (event_tx, _) = broadcast::channel(event_buffer.max(1));

        (
            Self {
                command_tx,
                event_tx,
            },
            command_rx,
        )
    }

    /// Clone the event sender. Unlike the channel set itself, this does not
    /// keep the command channel open.
    pub fn event_sender(&self) -> broadcast::Sender<TransportEvent> {
        self.event_tx.clone()
    }

    pub fn subscribe(&self) -> EventStream {
        self.event_tx.subscribe()
    }

    pub async fn send_command(&self, command: C) -> Result<(), TransportChannelError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| TransportChannelError::CommandChannelClosed)
    }

    /// Emit an event to all current subscribers.
    ///
    /// Best-effort: events sent with no subscriber are dropped, and lagging
    /// subscribers are handled by `broadcast`.
    pub fn emit(&self, event: TransportEvent) {
        let _ = self.event_tx.send(event);
    }
}
