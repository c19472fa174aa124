//! Registered user store

use super::entity::RegisteredUser;
use crate::domain::shared::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Directory of registered users, keyed by username.
///
/// Only the registrar mutates it, and only after a verified REGISTER.
/// Expiry enforcement beyond explicit removal is left to implementations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RegisteredUserStore: Send + Sync {
    /// Create or refresh a registration
    async fn upsert(&self, user: RegisteredUser) -> Result<()>;

    /// Remove a registration, returning it if it existed
    async fn remove(&self, username: &str) -> Result<Option<RegisteredUser>>;

    async fn get(&self, username: &str) -> Result<Option<RegisteredUser>>;

    async fn count(&self) -> Result<usize>;
}

/// Volatile in-memory registered user store
#[derive(Default)]
pub struct InMemoryRegisteredUserStore {
    users: RwLock<HashMap<String, RegisteredUser>>,
}

impl InMemoryRegisteredUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RegisteredUserStore for InMemoryRegisteredUserStore {
    async fn upsert(&self, user: RegisteredUser) -> Result<()> {
        let mut users = self.users.write().await;
        debug!(
            "Upserting registration for {} at {}",
            user.username, user.peer
        );
        users.insert(user.username.clone(), user);
        Ok(())
    }

    async fn remove(&self, username: &str) -> Result<Option<RegisteredUser>> {
        let mut users = self.users.write().await;
        Ok(users.remove(username))
    }

    async fn get(&self, username: &str) -> Result<Option<RegisteredUser>> {
        let users = self.users.read().await;
        Ok(users.get(username).cloned())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.users.read().await.len())
    }
}
