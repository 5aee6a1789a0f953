use std::pin::Pin;
use std::task::{Context, Poll};
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::channel::oneshot;
use futures::{Stream, StreamExt};
use log::warn;
use tokio::spawn;
use tokio::task::JoinHandle;

use crate::device::machine::{ConnectionMachine, Request, SessionConfig};
use crate::device::types::{Command, PeerDevice, SessionEvent, Snapshot};
use crate::error::{CommandError, SessionError};
use crate::transport::Transport;

/// Start the connection state machine on the current tokio runtime.
///
/// The machine stops when [`SessionController::shutdown`] is called or when every controller
/// handle has been dropped; in both cases an open link is closed before the task finishes.
pub fn session<T: Transport>(transport: T, config: SessionConfig) -> (SessionController, JoinHandle<()>) {
    let (requests_tx, requests_rx) = unbounded::<Request>();
    let machine = ConnectionMachine::new(transport, config);

    let handle = spawn(machine.run(requests_rx));

    (SessionController { requests: requests_tx }, handle)
}

/// Handle used by the presentation shell to drive the feeder connection.
///
/// Intents (discover, select, connect, ...) are queued and applied in order by the state
/// machine; their effect is observed through a [`Subscription`] or a [`Snapshot`].
#[derive(Clone)]
pub struct SessionController {
    requests: UnboundedSender<Request>,
}

impl SessionController {
    fn request(&self, request: Request) -> Result<(), SessionError> {
        self.requests.unbounded_send(request).map_err(|_| SessionError::Closed)
    }

    pub fn begin_discovery(&self) -> Result<(), SessionError> {
        self.request(Request::BeginDiscovery)
    }

    /// Discovery ended without a selection.
    pub fn cancel_discovery(&self) -> Result<(), SessionError> {
        self.request(Request::CancelDiscovery)
    }

    /// Select `peer` and start connecting to it.
    pub fn select_peer(&self, peer: PeerDevice) -> Result<(), SessionError> {
        self.request(Request::SelectPeer(peer))
    }

    /// Connect to the most recently selected peer again.
    pub fn connect(&self) -> Result<(), SessionError> {
        self.request(Request::Connect)
    }

    pub fn disconnect(&self) -> Result<(), SessionError> {
        self.request(Request::Disconnect)
    }

    /// Leave the `Failed` state.
    pub fn acknowledge(&self) -> Result<(), SessionError> {
        self.request(Request::Acknowledge)
    }

    /// Write `command` to the feeder. `Ok` means the bytes were handed to the link; the feeder
    /// does not acknowledge commands, so delivery is not guaranteed.
    pub async fn send_command(&self, command: Command) -> Result<(), CommandError> {
        let (reply, response) = oneshot::channel();
        self.request(Request::Send { command, reply })?;
        response.await.map_err(|_| SessionError::Closed)?
    }

    pub async fn send_status_request(&self) -> Result<(), CommandError> {
        self.send_command(Command::RequestStatus).await
    }

    pub async fn send_dispense(&self) -> Result<(), CommandError> {
        self.send_command(Command::Dispense).await
    }

    /// Receive every event emitted after this call, in order.
    pub fn subscribe(&self) -> Subscription {
        let (sender, receiver) = unbounded();

        if self.request(Request::Subscribe(sender)).is_err() {
            // the sender went down with the request, so the stream ends right away
            warn!("Subscribing to a session that has stopped");
        }

        Subscription { receiver }
    }

    pub async fn snapshot(&self) -> Result<Snapshot, SessionError> {
        let (reply, response) = oneshot::channel();
        self.request(Request::Snapshot(reply))?;
        response.await.map_err(|_| SessionError::Closed)
    }

    /// Stop the state machine, closing the link if one is open.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        let (reply, response) = oneshot::channel();
        self.request(Request::Shutdown(reply))?;
        response.await.map_err(|_| SessionError::Closed)
    }
}

pub struct Subscription {
    receiver: UnboundedReceiver<SessionEvent>,
}

impl Subscription {
    /// Stop receiving events. Events not yet taken from the stream are discarded.
    pub fn unsubscribe(mut self) {
        self.receiver.close();
    }
}

impl Stream for Subscription {
    type Item = SessionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_next_unpin(cx)
    }
}
