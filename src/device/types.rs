use std::fmt;

/// A feeder found by scanning. Immutable once selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerDevice {
    pub name: String,
    // opaque identifier handed back to the transport when opening a link
    pub address: String,
}

impl PeerDevice {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        PeerDevice { name: name.into(), address: address.into() }
    }
}

impl fmt::Display for PeerDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.address)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Timeout,
    Rejected(String),
    TransportUnavailable(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Timeout => write!(f, "connection timed out"),
            FailureReason::Rejected(reason) => write!(f, "connection rejected: {}", reason),
            FailureReason::TransportUnavailable(reason) => write!(f, "bluetooth unavailable: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Discovering,
    Connecting(PeerDevice),
    Connected(PeerDevice),
    Disconnecting,
    Failed(FailureReason),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected(_))
    }

    pub fn peer(&self) -> Option<&PeerDevice> {
        match self {
            ConnectionState::Connecting(peer) | ConnectionState::Connected(peer) => Some(peer),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "Idle"),
            ConnectionState::Discovering => write!(f, "Discovering"),
            ConnectionState::Connecting(peer) => write!(f, "Connecting({})", peer),
            ConnectionState::Connected(peer) => write!(f, "Connected({})", peer),
            ConnectionState::Disconnecting => write!(f, "Disconnecting"),
            ConnectionState::Failed(reason) => write!(f, "Failed({})", reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    RequestStatus,
    Dispense,
}

impl Command {
    pub fn opcode(self) -> u8 {
        match self {
            Command::RequestStatus => crate::device::constants::OPCODE_REQUEST_STATUS,
            Command::Dispense => crate::device::constants::OPCODE_DISPENSE,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = match self {
            Command::RequestStatus => "RequestStatus",
            Command::Dispense => "Dispense",
        };

        write!(f, "{}", result)
    }
}

/// The feeder's last reported state, as free-form text (e.g. "Food: 50%").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub text: String,
}

impl StatusReport {
    pub fn new(text: impl Into<String>) -> Self {
        StatusReport { text: text.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    TransportUnavailable,
    DiscoveryFailed,
    ConnectTimeout,
    ConnectRejected,
    NoPeerSelected,
    NotConnected,
    WriteFailed,
    LinkDropped,
    FrameTooLarge,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged { old: ConnectionState, new: ConnectionState },
    PeersDiscovered(Vec<PeerDevice>),
    StatusReceived(StatusReport),
    Error { kind: ErrorKind, detail: String },
}

/// Point-in-time view of the session, answered by the state machine task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub state: ConnectionState,
    pub selected: Option<PeerDevice>,
    pub last_status: Option<StatusReport>,
}
