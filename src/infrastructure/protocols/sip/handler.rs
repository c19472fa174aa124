//! SIP request handlers

use super::message::{SipError, SipRequest, SipResponse};
use async_trait::async_trait;
use std::net::SocketAddr;

/// Trait for handling SIP requests
#[async_trait]
pub trait SipHandler: Send + Sync {
    /// Handle a SIP request received from `source`
    async fn handle_request(
        &self,
        request: SipRequest,
        source: SocketAddr,
    ) -> Result<SipResponse, SipError>;
}
