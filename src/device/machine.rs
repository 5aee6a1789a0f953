//! The connection state machine.
//!
//! A single task owns the connection state, the open link and everything derived from it.
//! Requests from [`SessionController`](crate::device::session::SessionController) handles,
//! results of background discovery/connect attempts and inbound link events all funnel into
//! that one task, so transitions are applied strictly one at a time.
//!
//! ```text
//! Idle          --discover-->     Discovering
//! Idle          --select(p)-->    Connecting(p)     (also from Discovering)
//! Idle          --connect-->      Connecting(last selected peer)
//! Discovering   --cancel-->       Idle
//! Connecting(p) --opened-->       Connected(p)
//! Connecting(p) --timeout|error-> Failed(reason)
//! Connected(p)  --disconnect-->   Disconnecting --> Idle   (also from Connecting)
//! Connected(p)  --dropped-->      Idle
//! Failed(r)     --acknowledge-->  Idle
//! ```
use std::time::Duration;
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::channel::oneshot;
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::spawn;
use tokio::time::{error::Elapsed, timeout};

use crate::device::constants::{CONNECT_TIMEOUT, MAX_FRAME_LEN, WRITE_DEADLINE};
use crate::device::framer::{encode, LineFramer};
use crate::device::types::{Command, ConnectionState, ErrorKind, FailureReason, PeerDevice, SessionEvent, Snapshot, StatusReport};
use crate::error::{CommandError, ConnectError, TransportError, WriteError};
use crate::logutil::escape_log;
use crate::transport::{Link, LinkEvent, Transport};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub connect_timeout: Duration,
    pub write_deadline: Duration,
    pub max_frame_len: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            connect_timeout: Duration::from_millis(CONNECT_TIMEOUT),
            write_deadline: Duration::from_millis(WRITE_DEADLINE),
            max_frame_len: MAX_FRAME_LEN,
        }
    }
}

pub(crate) enum Request {
    BeginDiscovery,
    CancelDiscovery,
    SelectPeer(PeerDevice),
    Connect,
    Disconnect,
    Acknowledge,
    Send { command: Command, reply: oneshot::Sender<Result<(), CommandError>> },
    Subscribe(UnboundedSender<SessionEvent>),
    Snapshot(oneshot::Sender<Snapshot>),
    Shutdown(oneshot::Sender<()>),
}

// results of work that runs outside of the state machine task
enum TaskOutcome {
    Discovered {
        attempt: u64,
        result: Result<Vec<PeerDevice>, TransportError>,
    },
    Opened {
        attempt: u64,
        result: Result<Box<dyn Link>, ConnectError>,
        inbound: UnboundedReceiver<LinkEvent>,
    },
}

enum WriteOutcome {
    Finished(Result<Result<(), WriteError>, Elapsed>),
    Dropped,
}

async fn report(outcomes: UnboundedSender<TaskOutcome>, outcome: TaskOutcome) {
    if let Err(err) = outcomes.unbounded_send(outcome) {
        if let TaskOutcome::Opened { result: Ok(link), .. } = err.into_inner() {
            info!("Session stopped while connecting, closing the new link");
            link.close().await;
        }
    }
}

async fn next_link_event(inbound: &mut Option<UnboundedReceiver<LinkEvent>>) -> LinkEvent {
    match inbound {
        // a transport that hangs up its sender without saying so has lost the link as well
        Some(receiver) => receiver.next().await.unwrap_or(LinkEvent::Dropped),
        None => futures::future::pending().await,
    }
}

pub(crate) struct ConnectionMachine<T: Transport> {
    transport: T,
    config: SessionConfig,
    state: ConnectionState,
    selected: Option<PeerDevice>,
    link: Option<Box<dyn Link>>,
    inbound: Option<UnboundedReceiver<LinkEvent>>,
    framer: LineFramer,
    last_status: Option<StatusReport>,
    // bumped whenever a discovery/connect attempt starts or is abandoned; older outcomes are stale
    attempt: u64,
    outcomes_tx: UnboundedSender<TaskOutcome>,
    outcomes_rx: UnboundedReceiver<TaskOutcome>,
    subscribers: Vec<UnboundedSender<SessionEvent>>,
}

impl<T: Transport> ConnectionMachine<T> {
    pub(crate) fn new(transport: T, config: SessionConfig) -> Self {
        let (outcomes_tx, outcomes_rx) = unbounded();
        let framer = LineFramer::new(config.max_frame_len);

        ConnectionMachine {
            transport,
            config,
            state: ConnectionState::Idle,
            selected: None,
            link: None,
            inbound: None,
            framer,
            last_status: None,
            attempt: 0,
            outcomes_tx,
            outcomes_rx,
            subscribers: Vec::new(),
        }
    }

    pub(crate) async fn run(mut self, mut requests: UnboundedReceiver<Request>) {
        'mainloop: loop {
            tokio::select! {
                request = requests.next() => match request {
                    Some(request) => {
                        if !self.handle_request(request).await {
                            break 'mainloop;
                        }
                    },
                    None => {
                        info!("All session handles dropped");
                        self.teardown().await;
                        break 'mainloop;
                    },
                },
                Some(outcome) = self.outcomes_rx.next() => {
                    self.handle_outcome(outcome).await;
                },
                event = next_link_event(&mut self.inbound) => {
                    self.handle_link_event(event).await;
                },
            }
        }

        info!("Session stopped");
    }

    // returns false when the machine should stop
    async fn handle_request(&mut self, request: Request) -> bool {
        match request {
            Request::BeginDiscovery => self.begin_discovery(),
            Request::CancelDiscovery => self.cancel_discovery(),
            Request::SelectPeer(peer) => self.select_peer(peer),
            Request::Connect => self.connect(),
            Request::Disconnect => self.disconnect().await,
            Request::Acknowledge => self.acknowledge(),
            Request::Send { command, reply } => {
                let result = self.send_command(command).await;
                let _ = reply.send(result);
            },
            Request::Subscribe(subscriber) => self.subscribers.push(subscriber),
            Request::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            },
            Request::Shutdown(reply) => {
                self.teardown().await;
                let _ = reply.send(());
                return false;
            },
        }

        true
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            state: self.state.clone(),
            selected: self.selected.clone(),
            last_status: self.last_status.clone(),
        }
    }

    fn emit(&mut self, event: SessionEvent) {
        // unsubscribed receivers are closed, forget them
        self.subscribers.retain(|subscriber| subscriber.unbounded_send(event.clone()).is_ok());
    }

    fn emit_error(&mut self, kind: ErrorKind, detail: String) {
        self.emit(SessionEvent::Error { kind, detail });
    }

    fn transition(&mut self, new: ConnectionState) {
        if self.state == new {
            return;
        }

        let old = std::mem::replace(&mut self.state, new.clone());
        info!("Connection state {} -> {}", old, new);

        if new.is_connected() {
            // status from a previous session must not be mistaken for this one
            self.last_status = None;
            self.framer.reset();
        }

        self.emit(SessionEvent::StateChanged { old, new });
    }

    fn begin_discovery(&mut self) {
        match self.state {
            ConnectionState::Idle | ConnectionState::Discovering => {},
            _ => {
                warn!("Ignoring discovery request while {}", self.state);
                return;
            },
        }

        self.attempt += 1;
        let attempt = self.attempt;
        let discover = self.transport.discover();
        let outcomes = self.outcomes_tx.clone();

        self.transition(ConnectionState::Discovering);

        spawn(async move {
            let result = discover.await;
            report(outcomes, TaskOutcome::Discovered { attempt, result }).await;
        });
    }

    fn cancel_discovery(&mut self) {
        if self.state == ConnectionState::Discovering {
            info!("No device selected");
            self.attempt += 1;
            self.transition(ConnectionState::Idle);
        }
    }

    fn select_peer(&mut self, peer: PeerDevice) {
        match self.state {
            ConnectionState::Idle | ConnectionState::Discovering => {
                info!("Device selected: {}", peer);
                self.selected = Some(peer.clone());
                self.start_connect(peer);
            },
            _ => warn!("Ignoring selection of {} while {}", peer, self.state),
        }
    }

    fn connect(&mut self) {
        if self.state != ConnectionState::Idle {
            warn!("Ignoring connect request while {}", self.state);
            return;
        }

        match self.selected.clone() {
            Some(peer) => self.start_connect(peer),
            None => {
                warn!("Connect requested without a selected device");
                self.emit_error(ErrorKind::NoPeerSelected, "No device selected".to_string());
            },
        }
    }

    fn start_connect(&mut self, peer: PeerDevice) {
        self.attempt += 1;
        let attempt = self.attempt;
        let (inbound_tx, inbound_rx) = unbounded();
        let open = self.transport.open(&peer, inbound_tx);
        let outcomes = self.outcomes_tx.clone();
        let limit = self.config.connect_timeout;

        self.transition(ConnectionState::Connecting(peer));

        spawn(async move {
            let result = match timeout(limit, open).await {
                Ok(result) => result,
                Err(_) => Err(ConnectError::Timeout { after: limit }),
            };
            report(outcomes, TaskOutcome::Opened { attempt, result, inbound: inbound_rx }).await;
        });
    }

    fn acknowledge(&mut self) {
        if let ConnectionState::Failed(_) = self.state {
            self.transition(ConnectionState::Idle);
        }
    }

    async fn handle_outcome(&mut self, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Discovered { attempt, result } => {
                if attempt != self.attempt || self.state != ConnectionState::Discovering {
                    debug!("Ignoring result of an abandoned discovery");
                    return;
                }

                match result {
                    Ok(peers) => {
                        info!("Discovered {} peer(s)", peers.len());
                        self.emit(SessionEvent::PeersDiscovered(peers));
                    },
                    Err(err) if err.is_unavailable() => {
                        warn!("Discovery failed: {}", err);
                        self.transition(ConnectionState::Failed(FailureReason::TransportUnavailable(err.to_string())));
                        self.emit_error(ErrorKind::TransportUnavailable, err.to_string());
                    },
                    Err(err) => {
                        warn!("Discovery failed: {:?}", err);
                        self.transition(ConnectionState::Idle);
                        self.emit_error(ErrorKind::DiscoveryFailed, err.to_string());
                    },
                }
            },
            TaskOutcome::Opened { attempt, result, inbound } => {
                let peer = match &self.state {
                    ConnectionState::Connecting(peer) if attempt == self.attempt => Some(peer.clone()),
                    _ => None,
                };

                match (result, peer) {
                    (Ok(link), Some(peer)) => {
                        self.link = Some(link);
                        self.inbound = Some(inbound);
                        self.transition(ConnectionState::Connected(peer));
                    },
                    (Err(err), Some(_)) => {
                        warn!("Connecting to peer failed: {}", err);
                        let (reason, kind) = match &err {
                            ConnectError::Timeout { .. } => (FailureReason::Timeout, ErrorKind::ConnectTimeout),
                            ConnectError::Unavailable { reason } => (
                                FailureReason::TransportUnavailable(reason.clone()),
                                ErrorKind::TransportUnavailable,
                            ),
                            other => (FailureReason::Rejected(other.to_string()), ErrorKind::ConnectRejected),
                        };
                        self.transition(ConnectionState::Failed(reason));
                        self.emit_error(kind, err.to_string());
                    },
                    (Ok(link), None) => {
                        info!("Closing link of an abandoned connection attempt");
                        self.close_link(link).await;
                    },
                    (Err(err), None) => {
                        debug!("Abandoned connection attempt failed: {}", err);
                    },
                }
            },
        }
    }

    async fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Data(chunk) => self.ingest(&chunk),
            LinkEvent::Dropped => {
                let link = self.link.take();
                self.drop_link(link).await;
            },
        }
    }

    fn ingest(&mut self, chunk: &[u8]) {
        let frames: Vec<_> = self.framer.decode(chunk).collect();

        for frame in frames {
            match frame {
                Ok(report) => {
                    info!("Status received: {}", escape_log(&report.text));
                    self.last_status = Some(report.clone());
                    self.emit(SessionEvent::StatusReceived(report));
                },
                Err(err) => {
                    warn!("Dropping malformed inbound data: {}", err);
                    self.emit_error(ErrorKind::FrameTooLarge, err.to_string());
                },
            }
        }
    }

    async fn close_link(&mut self, link: Box<dyn Link>) {
        if timeout(self.config.write_deadline, link.close()).await.is_err() {
            warn!("Closing the link took too long");
        }
    }

    async fn drop_link(&mut self, link: Option<Box<dyn Link>>) {
        self.inbound = None;
        if let Some(link) = link {
            self.close_link(link).await;
        }

        if !self.state.is_connected() {
            return;
        }

        let detail = match self.state.peer() {
            Some(peer) => format!("Lost connection to {}", peer.name),
            None => "Lost connection".to_string(),
        };
        warn!("{}", detail);

        self.selected = None;
        self.transition(ConnectionState::Idle);
        self.emit_error(ErrorKind::LinkDropped, detail);
    }

    async fn disconnect(&mut self) {
        match self.state {
            ConnectionState::Connected(_) => {
                self.transition(ConnectionState::Disconnecting);
                self.inbound = None;
                if let Some(link) = self.link.take() {
                    self.close_link(link).await;
                }
                self.transition(ConnectionState::Idle);
            },
            ConnectionState::Connecting(_) => {
                // the attempt keeps running in the background; its link is closed when it shows up
                self.attempt += 1;
                self.transition(ConnectionState::Disconnecting);
                self.transition(ConnectionState::Idle);
            },
            ConnectionState::Discovering => self.cancel_discovery(),
            ConnectionState::Idle | ConnectionState::Disconnecting | ConnectionState::Failed(_) => {
                debug!("Nothing to disconnect");
            },
        }
    }

    async fn send_command(&mut self, command: Command) -> Result<(), CommandError> {
        let mut link = match (self.state.is_connected(), self.link.take()) {
            (true, Some(link)) => link,
            (_, link) => {
                self.link = link;
                warn!("Not connected, dropping {} command", command);
                let detail = format!("Cannot send {} while {}", command, self.state);
                self.emit_error(ErrorKind::NotConnected, detail);
                return Err(CommandError::NotConnected);
            },
        };

        let bytes = encode(command);
        debug!("Sending {} ({:#04x})", command, bytes[0]);

        let outcome = {
            let write = timeout(self.config.write_deadline, link.write(&bytes));
            tokio::pin!(write);

            // keep consuming link events while the write is in flight, a drop abandons the command
            'write: loop {
                tokio::select! {
                    biased;

                    event = next_link_event(&mut self.inbound) => match event {
                        LinkEvent::Data(chunk) => self.ingest(&chunk),
                        LinkEvent::Dropped => break 'write WriteOutcome::Dropped,
                    },
                    result = &mut write => break 'write WriteOutcome::Finished(result),
                }
            }
        };

        match outcome {
            WriteOutcome::Finished(Ok(Ok(()))) => {
                self.link = Some(link);
                Ok(())
            },
            WriteOutcome::Finished(Ok(Err(err))) => {
                self.link = Some(link);
                warn!("Failed to send {}: {:?}", command, err);
                self.emit_error(ErrorKind::WriteFailed, err.to_string());
                Err(err.into())
            },
            WriteOutcome::Finished(Err(_)) => {
                self.link = Some(link);
                warn!("Sending {} took too long", command);
                self.emit_error(ErrorKind::WriteFailed, format!("Sending {} took too long", command));
                Err(CommandError::WriteTimeout)
            },
            WriteOutcome::Dropped => {
                warn!("Link dropped while sending {}", command);
                self.drop_link(Some(link)).await;
                Err(CommandError::Abandoned)
            },
        }
    }

    async fn teardown(&mut self) {
        // abandon whatever is still running in the background
        self.attempt += 1;
        self.disconnect().await;
        self.subscribers.clear();
    }
}
