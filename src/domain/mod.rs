//! Domain layer - Core business logic and rules
//!
//! - Accounts: the credentials the registrar authenticates against
//! - Registrations: the directory of currently registered users
//! - Repository interfaces: ports for persistence

pub mod registration;
pub mod shared;
pub mod user;

// Re-export commonly used types
pub use shared::{DomainError, Result};
