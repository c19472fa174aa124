//! Shared kernel - types used by every domain module

pub mod error;

pub use error::{DomainError, Result};
