//! SIP server: per-peer request loop on top of the packet multiplexer

use super::builder::ResponseBuilder;
use super::handler::SipHandler;
use super::message::{SipMessage, SipMethod, SipRequest, SipResponse};
use crate::infrastructure::transport::{ConnectionHandler, VirtualConnection};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Dispatches SIP requests to the handler registered for their method.
///
/// Each virtual connection gets its own task running [`handle`], which
/// processes that peer's datagrams strictly in arrival order.
///
/// [`handle`]: ConnectionHandler::handle
pub struct SipServer {
    handlers: RwLock<HashMap<SipMethod, Arc<dyn SipHandler>>>,
}

impl SipServer {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register_handler(&self, method: SipMethod, handler: Arc<dyn SipHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.insert(method, handler);
        info!("Registered handler for SIP method: {}", method);
    }

    /// Produce the response for one request.
    ///
    /// Methods without a handler get 501; handler errors become 500.
    pub async fn dispatch(&self, request: SipRequest, source: SocketAddr) -> SipResponse {
        let handler = match request.method() {
            Some(method) => self.handlers.read().await.get(&method).cloned(),
            None => None,
        };

        let Some(handler) = handler else {
            warn!(
                "No handler registered for method {} from {}",
                request.inner.method, source
            );
            return ResponseBuilder::not_implemented().build_for_request(&request);
        };

        match handler.handle_request(request.clone(), source).await {
            Ok(response) => response,
            Err(e) => {
                error!("Handler error for request from {}: {}", source, e);
                ResponseBuilder::server_internal_error()
                    .reason(e.to_string())
                    .build_for_request(&request)
            }
        }
    }

    /// Parse, dispatch and answer a single datagram
    async fn process_packet(&self, conn: &VirtualConnection, packet: Bytes) {
        let peer = conn.peer();
        let message = match SipMessage::parse(&packet) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping unparsable datagram from {}: {}", peer, e);
                return;
            }
        };

        match message {
            SipMessage::Request(request) => {
                debug!(
                    "Processing SIP request {} from {}",
                    request.inner.method, peer
                );
                let response = self.dispatch(request, peer).await;
                if let Err(e) = conn.write(&response.to_bytes()).await {
                    error!("Failed to send response to {}: {}", peer, e);
                }
            }
            SipMessage::Response(response) => {
                debug!(
                    "Ignoring SIP response {} from {}",
                    response.status_code(),
                    peer
                );
            }
        }
    }
}

impl Default for SipServer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionHandler for SipServer {
    async fn handle(&self, mut conn: VirtualConnection) {
        debug!("Serving SIP peer {}", conn.peer());
        loop {
            match conn.read().await {
                Ok(packet) => self.process_packet(&conn, packet).await,
                Err(e) => {
                    debug!("SIP peer {} finished: {}", conn.peer(), e);
                    return;
                }
            }
        }
    }
}
