//! The raw byte pipe between this host and the feeder.
//!
//! A [`Transport`] finds peers and opens [`Link`]s to them. Inbound bytes are pushed, not
//! polled: `open` receives the sending half of a channel and the transport forwards every
//! chunk it receives as [`LinkEvent::Data`]. A link that goes away on its own is reported as
//! [`LinkEvent::Dropped`] on the same channel, never as an error on a later write.
//! Transports do not interpret payloads.

use futures::channel::mpsc::UnboundedSender;
use futures::future::BoxFuture;

use crate::device::types::PeerDevice;
use crate::error::{ConnectError, TransportError, WriteError};

pub mod btle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Data(Vec<u8>),
    Dropped,
}

pub trait Transport: Send + 'static {
    /// Scan for feeders. An empty list is a valid outcome.
    fn discover(&self) -> BoxFuture<'static, Result<Vec<PeerDevice>, TransportError>>;

    /// Establish a link to `peer`. Does not time out on its own; callers bound the wait.
    fn open(&self, peer: &PeerDevice, inbound: UnboundedSender<LinkEvent>) -> BoxFuture<'static, Result<Box<dyn Link>, ConnectError>>;
}

pub trait Link: Send {
    fn write(&mut self, bytes: &[u8]) -> BoxFuture<'_, Result<(), WriteError>>;

    /// Release the link. Consumes the link, so it can only happen once.
    fn close(self: Box<Self>) -> BoxFuture<'static, ()>;
}
