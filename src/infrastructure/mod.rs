//! Infrastructure layer - Technical implementations
//!
//! This layer contains:
//! - The UDP transport multiplexer
//! - The SIP registrar protocol
//! - Background task and metrics plumbing

pub mod metrics;
pub mod protocols;
pub mod task;
pub mod transport;
