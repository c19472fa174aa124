//! Peer address → virtual connection map

use super::connection::{PacketWriter, VirtualConnection};
use crate::infrastructure::metrics;
use crate::infrastructure::task::Sweep;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Serves one peer for the lifetime of its virtual connection
#[async_trait]
pub trait ConnectionHandler: Send + Sync + 'static {
    async fn handle(&self, conn: VirtualConnection);
}

/// Registry-side state of a live connection
struct ConnectionEntry {
    inbound: mpsc::Sender<Bytes>,
    closed: Arc<AtomicBool>,
    last_activity: Instant,
}

impl ConnectionEntry {
    /// Mark closed and drop the sender so pending reads wake with `Closed`
    fn close(self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Concurrent map from peer address to its connection.
///
/// The first datagram from an unknown peer creates a connection and spawns
/// a [`ConnectionHandler`] task for it; later datagrams are queued in
/// arrival order. Each peer has its own bounded queue, filled without
/// waiting, so a slow handler only loses its own datagrams.
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<SocketAddr, ConnectionEntry>>,
    handler: Arc<dyn ConnectionHandler>,
    writer: PacketWriter,
    queue_capacity: usize,
    idle_timeout: Duration,
}

impl ConnectionRegistry {
    pub fn new(
        handler: Arc<dyn ConnectionHandler>,
        writer: PacketWriter,
        queue_capacity: usize,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            handler,
            writer,
            queue_capacity: queue_capacity.max(1),
            idle_timeout,
        }
    }

    /// Route a datagram to its peer's connection, creating it on first contact
    pub async fn add_packet(&self, peer: SocketAddr, payload: Bytes) {
        let mut connections = self.connections.lock().await;

        let payload = match connections.get_mut(&peer) {
            Some(entry) => {
                entry.last_activity = Instant::now();
                match entry.inbound.try_send(payload) {
                    Ok(()) => return,
                    Err(TrySendError::Full(_)) => {
                        warn!("Inbound queue for {} is full, dropping datagram", peer);
                        metrics::record_packet_dropped("queue_full");
                        return;
                    }
                    Err(TrySendError::Closed(payload)) => {
                        debug!("Handler for {} has exited, reopening connection", peer);
                        payload
                    }
                }
            }
            None => payload,
        };

        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let closed = Arc::new(AtomicBool::new(false));
        let conn = VirtualConnection::new(peer, rx, closed.clone(), self.writer.clone());

        // Fresh queue with capacity >= 1: cannot be full.
        let _ = tx.try_send(payload);
        connections.insert(
            peer,
            ConnectionEntry {
                inbound: tx,
                closed,
                last_activity: Instant::now(),
            },
        );
        let count = connections.len();
        drop(connections);

        info!("New connection from {}", peer);
        metrics::update_active_connections(count);

        let handler = Arc::clone(&self.handler);
        tokio::spawn(async move {
            handler.handle(conn).await;
            debug!("Handler for {} finished", peer);
        });
    }

    /// Evict connections idle for longer than the configured window
    pub async fn sweep_idle(&self) -> Vec<SocketAddr> {
        self.evict_idle(self.idle_timeout).await
    }

    /// Evict connections idle for longer than `window`
    pub async fn evict_idle(&self, window: Duration) -> Vec<SocketAddr> {
        let mut connections = self.connections.lock().await;
        let now = Instant::now();

        let idle: Vec<SocketAddr> = connections
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.last_activity) > window)
            .map(|(peer, _)| *peer)
            .collect();

        for peer in &idle {
            if let Some(entry) = connections.remove(peer) {
                entry.close();
                info!("Closed idle connection {}", peer);
            }
        }

        let count = connections.len();
        drop(connections);

        if !idle.is_empty() {
            metrics::record_connections_evicted(idle.len());
        }
        metrics::update_active_connections(count);
        idle
    }

    /// Tear down every connection
    pub async fn close_all(&self) {
        let mut connections = self.connections.lock().await;
        let count = connections.len();
        for (_, entry) in connections.drain() {
            entry.close();
        }
        drop(connections);

        if count > 0 {
            info!("Closed {} connections", count);
        }
        metrics::update_active_connections(0);
    }

    pub async fn contains(&self, peer: &SocketAddr) -> bool {
        self.connections.lock().await.contains_key(peer)
    }

    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }
}

#[async_trait]
impl Sweep for ConnectionRegistry {
    async fn sweep(&self) -> usize {
        self.sweep_idle().await.len()
    }
}
