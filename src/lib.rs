//! YakYak Registrar - a SIP registrar built with Rust
//!
//! Authenticates REGISTER requests with HTTP Digest over a single UDP socket
//! and keeps a directory of the users currently registered.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used types
pub use application::RegistrarService;
pub use config::Config;
pub use domain::shared::error::{DomainError, Result};
