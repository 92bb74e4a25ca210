//! The transport abstraction the client runs on.
//!
//! The client never touches sockets itself. It issues `connect`/`send`/
//! `close` against a [`Transport`] and receives readiness through the
//! [`TransportHandler`] callbacks, all on one designated I/O thread driven
//! by [`Transport::poll`]. The real implementation is
//! [`tcp::TcpTransport`]; tests substitute scripted fakes.

use std::net::SocketAddr;

use bytes::Bytes;
use thiserror::Error;

pub mod tcp;

/// Transport-level failures. These are distinct from [`crate::HttpError`]:
/// the client maps them onto its own error state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// A connection attempt to this address is already pending.
    #[error("connect already pending for {0}")]
    AlreadyConnecting(SocketAddr),
    /// No live connection to this address.
    #[error("no connection to {0}")]
    NotConnected(SocketAddr),
    /// Underlying I/O failure.
    #[error("i/o error: {0}")]
    Io(String),
}

/// Result of a [`TransportHandler::on_data`] call.
///
/// `NeedMore` (or `Consumed(0)`) leaves the buffer untouched; the transport
/// re-offers the whole accumulated buffer when more bytes arrive, so a
/// handler can safely wait for a complete frame without losing data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseResult {
    /// The handler consumed `n` bytes from the front of the buffer.
    Consumed(usize),
    /// The handler needs more data before it can make progress.
    NeedMore,
}

/// Callbacks delivered by [`Transport::poll`].
///
/// Each callback receives the transport itself so the handler can send or
/// close from inside the callback.
pub trait TransportHandler {
    /// A connection attempt completed. `connected` is the address that was
    /// passed to [`Transport::connect`]; `peer` is the remote endpoint.
    /// Returning `false` rejects the connection and the transport closes it.
    fn on_connected(
        &mut self,
        io: &mut dyn Transport,
        peer: SocketAddr,
        connected: SocketAddr,
    ) -> bool;

    /// A connection dropped or a connection attempt failed.
    fn on_disconnected(&mut self, io: &mut dyn Transport, addr: SocketAddr, reason: &str);

    /// Received data. `data` is the whole accumulated receive buffer for
    /// this connection.
    fn on_data(&mut self, io: &mut dyn Transport, addr: SocketAddr, data: &[u8]) -> ParseResult;
}

/// An asynchronous, event-driven byte transport keyed by socket address.
pub trait Transport {
    /// Starts a connection attempt. Completion is reported via
    /// [`TransportHandler::on_connected`] (or `on_disconnected` on failure).
    fn connect(&mut self, addr: SocketAddr) -> Result<(), TransportError>;

    /// Queues bytes for sending on an established connection.
    fn send(&mut self, addr: SocketAddr, data: Bytes) -> Result<(), TransportError>;

    /// Tears down a connection or a pending attempt. Closing an address that
    /// was never opened is a no-op.
    fn close(&mut self, addr: SocketAddr);

    /// Drains pending I/O events, invoking the handler's callbacks on the
    /// calling thread. Never blocks.
    fn poll(&mut self, handler: &mut dyn TransportHandler);
}
