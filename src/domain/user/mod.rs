//! Account domain: the credential store consulted during digest verification

pub mod entity;
pub mod repository;

pub use entity::Account;
pub use repository::{AccountRepository, InMemoryAccountRepository};

#[cfg(test)]
pub use repository::MockAccountRepository;
