//! Account repository interface and in-memory implementation

use super::entity::Account;
use crate::domain::shared::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Read-only credential lookup used by digest verification
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Find an account by username; `Ok(None)` when it does not exist
    async fn find_by_username(&self, username: &str) -> Result<Option<Account>>;
}

/// In-memory account store, seeded from configuration
#[derive(Default)]
pub struct InMemoryAccountRepository {
    accounts: RwLock<HashMap<String, Account>>,
}

impl InMemoryAccountRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_accounts(accounts: impl IntoIterator<Item = Account>) -> Self {
        let accounts = accounts
            .into_iter()
            .map(|account| (account.username.clone(), account))
            .collect();
        Self {
            accounts: RwLock::new(accounts),
        }
    }
}

#[async_trait]
impl AccountRepository for InMemoryAccountRepository {
    async fn find_by_username(&self, username: &str) -> Result<Option<Account>> {
        let accounts = self.accounts.read().await;
        Ok(accounts.get(username).cloned())
    }
}
