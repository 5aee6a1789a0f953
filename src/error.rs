use std::io;
use std::str::Utf8Error;
use std::time::Duration;
use thiserror::Error;
use btleplug;
use serde_json;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

impl ConfigError {
    pub fn is_file_not_found_error(&self) -> bool {
        match self {
            ConfigError::IOError { source } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start application (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to start application (radio): {source}")]
    Transport { #[from] source: TransportError },

    #[error("Failed to start application (io): {source}")]
    IOError { #[from] source: io::Error },
}

/// Failures while talking to the radio outside of a peer connection (scanning, adapter lookup).
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Bluetooth radio is unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Error communicating with the radio (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },
}

impl TransportError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, TransportError::Unavailable { .. })
    }
}

#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("Bluetooth radio is unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Peer {address} is out of range or was never discovered")]
    PeerNotFound { address: String },

    #[error("The peer does not expose the serial data characteristic")]
    MissingCharacteristic,

    #[error("The peer rejected the connection: {reason}")]
    Rejected { reason: String },

    #[error("The peer did not respond within {after:?}")]
    Timeout { after: Duration },

    #[error("Error connecting to peer (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },
}

impl From<TransportError> for ConnectError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Unavailable { reason } => ConnectError::Unavailable { reason },
            TransportError::Btle { source } => ConnectError::Btle { source },
        }
    }
}

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("The link is closed")]
    Closed,

    #[error("Error writing to peer (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FramerError {
    #[error("Inbound frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },
}

/// Outcome of a command submission that did not (provably) reach the peer.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Not connected to a feeder")]
    NotConnected,

    #[error("The link dropped before the command was written")]
    Abandoned,

    #[error("Writing the command took too long")]
    WriteTimeout,

    #[error("Failed to write the command: {source}")]
    Write { #[from] source: WriteError },

    #[error("The session has stopped")]
    SessionClosed { #[from] source: SessionError },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("The session task has stopped")]
    Closed,
}
