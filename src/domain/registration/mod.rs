//! Registration domain: the directory of currently registered users

pub mod entity;
pub mod store;

pub use entity::RegisteredUser;
pub use store::{InMemoryRegisteredUserStore, RegisteredUserStore};

#[cfg(test)]
pub use store::MockRegisteredUserStore;
