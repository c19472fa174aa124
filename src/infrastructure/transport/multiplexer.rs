//! Single-socket receive loop

use super::connection::PacketWriter;
use super::registry::{ConnectionHandler, ConnectionRegistry};
use super::{Result, TransportError};
use crate::config::TransportConfig;
use crate::infrastructure::metrics;
use crate::infrastructure::task::ShutdownSignal;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, error, info, warn};

/// Owns the datagram socket and demultiplexes it by source address.
///
/// [`run`](Self::run) is the only reader of the socket; writes go through
/// cloned [`PacketWriter`]s from any task.
pub struct PacketMultiplexer {
    socket: Arc<UdpSocket>,
    registry: Arc<ConnectionRegistry>,
    recv_buffer_size: usize,
}

impl PacketMultiplexer {
    /// Bind the socket and prepare a registry that hands new peers to `handler`
    pub async fn bind(
        addr: SocketAddr,
        handler: Arc<dyn ConnectionHandler>,
        config: &TransportConfig,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        let socket = Arc::new(socket);
        info!("UDP transport listening on {}", socket.local_addr()?);

        let registry = Arc::new(ConnectionRegistry::new(
            handler,
            PacketWriter::new(Arc::clone(&socket)),
            config.inbound_queue_capacity,
            config.idle_timeout(),
        ));

        Ok(Self {
            socket,
            registry,
            recv_buffer_size: config.recv_buffer_size.max(1),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn writer(&self) -> PacketWriter {
        PacketWriter::new(Arc::clone(&self.socket))
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Best-effort single datagram send
    pub async fn write_packet(&self, peer: SocketAddr, payload: &[u8]) -> Result<usize> {
        self.writer().write_packet(peer, payload).await
    }

    /// Receive until shutdown or a socket error.
    ///
    /// Every datagram is copied out of the reused buffer before it is handed
    /// to the registry. On exit all connections are torn down.
    pub async fn run(self, mut shutdown: ShutdownSignal) -> Result<()> {
        let mut buf = vec![0u8; self.recv_buffer_size];

        let result = loop {
            let received = tokio::select! {
                received = self.socket.recv_from(&mut buf) => received,
                _ = shutdown.recv() => break Ok(()),
            };

            let (size, peer) = match received {
                Ok(received) => received,
                Err(e) => {
                    error!("Failed to receive UDP packet: {}", e);
                    break Err(TransportError::Receive(e));
                }
            };

            if shutdown.is_shutdown() {
                break Ok(());
            }

            debug!("Received {} bytes from {} via UDP", size, peer);
            if size == buf.len() {
                warn!(
                    "UDP datagram from {} likely truncated (filled {} byte buffer)",
                    peer, size
                );
            }
            metrics::record_packet_received();

            let packet = Bytes::copy_from_slice(&buf[..size]);
            self.registry.add_packet(peer, packet).await;
        };

        self.registry.close_all().await;
        info!("UDP transport stopped");
        result
    }
}
