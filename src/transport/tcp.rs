//! Tokio-backed TCP transport.
//!
//! Socket I/O runs as tasks on a [`tokio::runtime::Handle`]; completions
//! flow back over an unbounded channel and are drained synchronously by
//! [`Transport::poll`] on the designated I/O-loop thread. This keeps the
//! client state machine single-threaded while the actual reads and writes
//! happen on the runtime.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

use crate::transport::{ParseResult, Transport, TransportError, TransportHandler};

/// I/O completion delivered from a connection task to the poll loop.
enum Event {
    Connected { addr: SocketAddr, peer: SocketAddr },
    ConnectFailed { addr: SocketAddr, reason: String },
    Data { addr: SocketAddr, chunk: Bytes },
    Closed { addr: SocketAddr, reason: String },
}

/// Per-connection bookkeeping. Dropping this (via [`Transport::close`])
/// signals the connection task to shut down.
struct Conn {
    write_tx: mpsc::UnboundedSender<Bytes>,
    _shutdown: oneshot::Sender<()>,
    /// Accumulated receive buffer, re-offered to the handler until consumed.
    buf: BytesMut,
}

/// The real [`Transport`], keyed by the address passed to `connect`.
pub struct TcpTransport {
    handle: tokio::runtime::Handle,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    conns: HashMap<SocketAddr, Conn>,
}

impl TcpTransport {
    /// Creates a transport whose socket tasks run on the given runtime.
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            handle,
            events_tx,
            events_rx,
            conns: HashMap::new(),
        }
    }

    fn dispatch(&mut self, event: Event, handler: &mut dyn TransportHandler) {
        match event {
            Event::Connected { addr, peer } => {
                // close() may have raced the completion.
                if !self.conns.contains_key(&addr) {
                    return;
                }
                tracing::debug!(%addr, %peer, "connection established");
                if !handler.on_connected(self, peer, addr) {
                    self.close(addr);
                }
            }
            Event::ConnectFailed { addr, reason } => {
                if self.conns.remove(&addr).is_some() {
                    tracing::debug!(%addr, %reason, "connection attempt failed");
                    handler.on_disconnected(self, addr, &reason);
                }
            }
            Event::Data { addr, chunk } => {
                let Some(conn) = self.conns.get_mut(&addr) else {
                    return;
                };
                conn.buf.extend_from_slice(&chunk);
                // Move the buffer out so the handler may send/close on the
                // transport from inside the callback.
                let mut buf = std::mem::take(&mut conn.buf);
                while !buf.is_empty() {
                    match handler.on_data(self, addr, &buf) {
                        ParseResult::NeedMore | ParseResult::Consumed(0) => break,
                        ParseResult::Consumed(n) => buf.advance(n.min(buf.len())),
                    }
                }
                if let Some(conn) = self.conns.get_mut(&addr) {
                    conn.buf = buf;
                }
            }
            Event::Closed { addr, reason } => {
                if self.conns.remove(&addr).is_some() {
                    tracing::debug!(%addr, %reason, "connection closed");
                    handler.on_disconnected(self, addr, &reason);
                }
            }
        }
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self, addr: SocketAddr) -> Result<(), TransportError> {
        if self.conns.contains_key(&addr) {
            return Err(TransportError::AlreadyConnecting(addr));
        }
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.conns.insert(
            addr,
            Conn {
                write_tx,
                _shutdown: shutdown_tx,
                buf: BytesMut::new(),
            },
        );
        tracing::debug!(%addr, "starting connection attempt");
        self.handle
            .spawn(run_connection(addr, self.events_tx.clone(), write_rx, shutdown_rx));
        Ok(())
    }

    fn send(&mut self, addr: SocketAddr, data: Bytes) -> Result<(), TransportError> {
        let conn = self
            .conns
            .get(&addr)
            .ok_or(TransportError::NotConnected(addr))?;
        conn.write_tx
            .send(data)
            .map_err(|_| TransportError::NotConnected(addr))
    }

    fn close(&mut self, addr: SocketAddr) {
        // Dropping the Conn drops the shutdown sender, which stops the task.
        if self.conns.remove(&addr).is_some() {
            tracing::debug!(%addr, "closing connection");
        }
    }

    fn poll(&mut self, handler: &mut dyn TransportHandler) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.dispatch(event, handler);
        }
    }
}

/// Connection task: connect, then shuttle bytes until shutdown or EOF.
///
/// A locally initiated close (shutdown signal) produces no event; the caller
/// already tore down its own state. Remote close and I/O errors surface as
/// [`Event::Closed`] with the reason string.
async fn run_connection(
    addr: SocketAddr,
    events: mpsc::UnboundedSender<Event>,
    mut write_rx: mpsc::UnboundedReceiver<Bytes>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let stream = tokio::select! {
        _ = &mut shutdown_rx => return,
        res = TcpStream::connect(addr) => match res {
            Ok(stream) => stream,
            Err(e) => {
                let _ = events.send(Event::ConnectFailed { addr, reason: e.to_string() });
                return;
            }
        },
    };
    let peer = stream.peer_addr().unwrap_or(addr);
    if events.send(Event::Connected { addr, peer }).is_err() {
        return;
    }

    let (mut rd, mut wr) = stream.into_split();
    let mut chunk = BytesMut::with_capacity(8 * 1024);
    loop {
        tokio::select! {
            _ = &mut shutdown_rx => return,
            res = rd.read_buf(&mut chunk) => match res {
                Ok(0) => {
                    let _ = events.send(Event::Closed { addr, reason: "connection closed".into() });
                    return;
                }
                Ok(_) => {
                    let _ = events.send(Event::Data { addr, chunk: chunk.split().freeze() });
                }
                Err(e) => {
                    let _ = events.send(Event::Closed { addr, reason: e.to_string() });
                    return;
                }
            },
            msg = write_rx.recv() => match msg {
                Some(data) => {
                    if let Err(e) = wr.write_all(&data).await {
                        let _ = events.send(Event::Closed { addr, reason: e.to_string() });
                        return;
                    }
                }
                // Sender dropped: the connection was closed locally.
                None => return,
            },
        }
    }
}
