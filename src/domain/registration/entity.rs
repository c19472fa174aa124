//! Registered user entity

use chrono::{DateTime, Duration, Utc};
use std::net::SocketAddr;

/// An active registration: who registered, and where they can be reached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredUser {
    pub username: String,
    /// Address of record, `user@domain`
    pub aor: String,
    pub display_name: Option<String>,
    /// Peer address of the connection the REGISTER arrived on
    pub peer: SocketAddr,
    pub contact: Option<String>,
    pub user_agent: Option<String>,
    pub registered_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl RegisteredUser {
    pub fn new(
        username: impl Into<String>,
        aor: impl Into<String>,
        peer: SocketAddr,
        expires: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            username: username.into(),
            aor: aor.into(),
            display_name: None,
            peer,
            contact: None,
            user_agent: None,
            registered_at: now,
            expires_at: now + Duration::seconds(expires as i64),
        }
    }

    pub fn with_display_name(mut self, display_name: Option<String>) -> Self {
        self.display_name = display_name;
        self
    }

    pub fn with_contact(mut self, contact: Option<String>) -> Self {
        self.contact = contact;
        self
    }

    pub fn with_user_agent(mut self, user_agent: Option<String>) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}
