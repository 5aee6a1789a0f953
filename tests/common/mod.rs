//! In-memory transport used to drive the session without a radio.
#![allow(dead_code)] // not every test binary uses every helper

use std::sync::{Arc, Mutex};
use std::time::Duration;
use futures::channel::mpsc::UnboundedSender;
use futures::future::{pending, ready, BoxFuture, FutureExt};
use futures::StreamExt;
use tokio::sync::Notify;

use feeder_control::device::machine::SessionConfig;
use feeder_control::device::session::{session, SessionController, Subscription};
use feeder_control::device::types::{ConnectionState, PeerDevice, SessionEvent};
use feeder_control::error::{ConnectError, TransportError, WriteError};
use feeder_control::transport::{Link, LinkEvent, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenBehavior {
    Accept,
    Reject,
    Hang,
    Unavailable,
    // the link is handed out once the test calls `release_open`
    Gated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteBehavior {
    Complete,
    Hang,
    Fail,
}

struct FakeState {
    peers: Vec<PeerDevice>,
    radio_off: bool,
    open_behavior: OpenBehavior,
    write_behavior: WriteBehavior,
    opened: Vec<PeerDevice>,
    writes: Vec<Vec<u8>>,
    closes: usize,
    inbound: Option<UnboundedSender<LinkEvent>>,
    // a real radio reports its own teardown as a drop
    drop_on_close: bool,
}

#[derive(Clone)]
pub struct FakeTransport {
    state: Arc<Mutex<FakeState>>,
    write_started: Arc<Notify>,
    open_gate: Arc<Notify>,
    link_closed: Arc<Notify>,
}

pub fn feeder() -> PeerDevice {
    PeerDevice::new("Feeder", "AA:BB:CC:DD:EE:FF")
}

impl FakeTransport {
    pub fn new(peers: Vec<PeerDevice>) -> Self {
        FakeTransport {
            state: Arc::new(Mutex::new(FakeState {
                peers,
                radio_off: false,
                open_behavior: OpenBehavior::Accept,
                write_behavior: WriteBehavior::Complete,
                opened: Vec::new(),
                writes: Vec::new(),
                closes: 0,
                inbound: None,
                drop_on_close: false,
            })),
            write_started: Arc::new(Notify::new()),
            open_gate: Arc::new(Notify::new()),
            link_closed: Arc::new(Notify::new()),
        }
    }

    pub fn set_open_behavior(&self, behavior: OpenBehavior) {
        self.state.lock().unwrap().open_behavior = behavior;
    }

    pub fn set_write_behavior(&self, behavior: WriteBehavior) {
        self.state.lock().unwrap().write_behavior = behavior;
    }

    pub fn set_drop_on_close(&self) {
        self.state.lock().unwrap().drop_on_close = true;
    }

    /// Let a `Gated` open complete.
    pub fn release_open(&self) {
        self.open_gate.notify_one();
    }

    pub fn set_radio_off(&self) {
        self.state.lock().unwrap().radio_off = true;
    }

    pub fn opened(&self) -> Vec<PeerDevice> {
        self.state.lock().unwrap().opened.clone()
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().writes.clone()
    }

    pub fn closes(&self) -> usize {
        self.state.lock().unwrap().closes
    }

    /// Deliver bytes as if the feeder had sent them.
    pub fn push_inbound(&self, bytes: &[u8]) {
        let state = self.state.lock().unwrap();
        let inbound = state.inbound.as_ref().expect("no open link");
        inbound.unbounded_send(LinkEvent::Data(bytes.to_vec())).expect("link receiver is gone");
    }

    /// Simulate the feeder going out of range.
    pub fn drop_link(&self) {
        let inbound = self.state.lock().unwrap().inbound.take().expect("no open link");
        // the session may already have stopped listening
        let _ = inbound.unbounded_send(LinkEvent::Dropped);
    }

    pub async fn write_started(&self) {
        self.write_started.notified().await;
    }

    pub async fn link_closed(&self) {
        tokio::time::timeout(Duration::from_secs(60), self.link_closed.notified())
            .await
            .expect("timed out waiting for the link to close");
    }
}

impl Transport for FakeTransport {
    fn discover(&self) -> BoxFuture<'static, Result<Vec<PeerDevice>, TransportError>> {
        let state = self.state.lock().unwrap();
        let result = if state.radio_off {
            Err(TransportError::Unavailable { reason: "radio is off".to_string() })
        } else {
            Ok(state.peers.clone())
        };

        ready(result).boxed()
    }

    fn open(&self, peer: &PeerDevice, inbound: UnboundedSender<LinkEvent>) -> BoxFuture<'static, Result<Box<dyn Link>, ConnectError>> {
        let mut state = self.state.lock().unwrap();
        state.opened.push(peer.clone());

        match state.open_behavior {
            OpenBehavior::Accept => {
                state.inbound = Some(inbound);
                let link: Box<dyn Link> = Box::new(FakeLink { transport: self.clone() });
                ready(Ok(link)).boxed()
            },
            OpenBehavior::Reject => ready(Err(ConnectError::Rejected { reason: "pairing refused".to_string() })).boxed(),
            OpenBehavior::Hang => pending().boxed(),
            OpenBehavior::Unavailable => ready(Err(ConnectError::Unavailable { reason: "radio is off".to_string() })).boxed(),
            OpenBehavior::Gated => {
                state.inbound = Some(inbound);
                let link: Box<dyn Link> = Box::new(FakeLink { transport: self.clone() });
                let gate = self.open_gate.clone();
                async move {
                    gate.notified().await;
                    Ok::<_, ConnectError>(link)
                }.boxed()
            },
        }
    }
}

struct FakeLink {
    transport: FakeTransport,
}

impl Link for FakeLink {
    fn write(&mut self, bytes: &[u8]) -> BoxFuture<'_, Result<(), WriteError>> {
        let behavior = {
            let mut state = self.transport.state.lock().unwrap();
            state.writes.push(bytes.to_vec());
            state.write_behavior
        };
        self.transport.write_started.notify_one();

        match behavior {
            WriteBehavior::Complete => ready(Ok(())).boxed(),
            WriteBehavior::Hang => pending().boxed(),
            WriteBehavior::Fail => ready(Err(WriteError::Closed)).boxed(),
        }
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, ()> {
        let mut state = self.transport.state.lock().unwrap();
        state.closes += 1;
        if let Some(inbound) = state.inbound.take() {
            if state.drop_on_close {
                let _ = inbound.unbounded_send(LinkEvent::Dropped);
            }
        }
        self.transport.link_closed.notify_one();
        ready(()).boxed()
    }
}

pub fn start(transport: &FakeTransport) -> (SessionController, Subscription, tokio::task::JoinHandle<()>) {
    start_with(transport, SessionConfig::default())
}

pub fn start_with(transport: &FakeTransport, config: SessionConfig) -> (SessionController, Subscription, tokio::task::JoinHandle<()>) {
    let (controller, handle) = session(transport.clone(), config);
    let events = controller.subscribe();
    (controller, events, handle)
}

pub async fn next_event(events: &mut Subscription) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(60), events.next())
        .await
        .expect("timed out waiting for a session event")
        .expect("subscription ended")
}

/// Skip events until the state machine enters `expected`.
pub async fn wait_for_state(events: &mut Subscription, expected: ConnectionState) {
    loop {
        if let SessionEvent::StateChanged { new, .. } = next_event(events).await {
            if new == expected {
                return;
            }
        }
    }
}

pub async fn connected(transport: &FakeTransport) -> (SessionController, Subscription, tokio::task::JoinHandle<()>) {
    let (controller, mut events, handle) = start(transport);
    controller.select_peer(feeder()).unwrap();
    wait_for_state(&mut events, ConnectionState::Connected(feeder())).await;
    (controller, events, handle)
}
