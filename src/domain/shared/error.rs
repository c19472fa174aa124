//! Domain errors

use thiserror::Error;

/// Domain result type
pub type Result<T> = std::result::Result<T, DomainError>;

/// Failures a store backend can report to the SIP layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}
