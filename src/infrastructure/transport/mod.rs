//! Connectionless transport multiplexer
//!
//! A single UDP socket is turned into many independent per-peer connections:
//!
//! ```text
//!   UdpSocket ──recv──▶ PacketMultiplexer ──add_packet──▶ ConnectionRegistry
//!       ▲                                                  │ (one queue per peer)
//!       │                                                  ▼
//!   PacketWriter ◀──────write────── VirtualConnection ◀── handler task per peer
//! ```
//!
//! Connections are created on the first datagram from a peer and torn down
//! by a janitor once idle for longer than the configured window.

pub mod connection;
pub mod multiplexer;
pub mod registry;

pub use connection::{PacketWriter, VirtualConnection};
pub use multiplexer::PacketMultiplexer;
pub use registry::{ConnectionHandler, ConnectionRegistry};

use std::net::SocketAddr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to bind UDP socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to receive UDP packet: {0}")]
    Receive(#[source] std::io::Error),

    #[error("Failed to send UDP packet to {peer}: {source}")]
    Send {
        peer: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection closed ({0})")]
    Closed(SocketAddr),

    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;
