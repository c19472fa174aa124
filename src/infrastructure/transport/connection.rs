//! Per-peer virtual connections over the shared socket

use super::{Result, TransportError};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::debug;

/// Write half of the shared socket. Safe to use from any number of tasks.
#[derive(Debug, Clone)]
pub struct PacketWriter {
    socket: Arc<UdpSocket>,
}

impl PacketWriter {
    pub fn new(socket: Arc<UdpSocket>) -> Self {
        Self { socket }
    }

    /// Send one datagram. Failures are returned, never retried.
    pub async fn write_packet(&self, peer: SocketAddr, payload: &[u8]) -> Result<usize> {
        debug!("Sending {} bytes to {} via UDP", payload.len(), peer);
        self.socket
            .send_to(payload, peer)
            .await
            .map_err(|source| TransportError::Send { peer, source })
    }
}

/// Handle owned by the task serving one peer.
///
/// The registry keeps the sending side of the inbound queue; once it evicts
/// the peer, reads and writes on this handle fail with [`TransportError::Closed`].
#[derive(Debug)]
pub struct VirtualConnection {
    peer: SocketAddr,
    inbound: mpsc::Receiver<Bytes>,
    closed: Arc<AtomicBool>,
    writer: PacketWriter,
}

impl VirtualConnection {
    pub(crate) fn new(
        peer: SocketAddr,
        inbound: mpsc::Receiver<Bytes>,
        closed: Arc<AtomicBool>,
        writer: PacketWriter,
    ) -> Self {
        Self {
            peer,
            inbound,
            closed,
            writer,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Wait for the next datagram from this peer, in arrival order
    pub async fn read(&mut self) -> Result<Bytes> {
        if self.is_closed() {
            return Err(TransportError::Closed(self.peer));
        }
        self.inbound
            .recv()
            .await
            .ok_or(TransportError::Closed(self.peer))
    }

    /// Send a datagram back to this peer
    pub async fn write(&self, payload: &[u8]) -> Result<usize> {
        if self.is_closed() {
            return Err(TransportError::Closed(self.peer));
        }
        self.writer.write_packet(self.peer, payload).await
    }
}
