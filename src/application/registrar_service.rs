//! Registrar service: wires transport, SIP dispatch and authentication together

use crate::config::Config;
use crate::domain::registration::RegisteredUserStore;
use crate::domain::user::AccountRepository;
use crate::infrastructure::protocols::sip::{
    ChallengeStore, DigestPolicy, RegistrationHandler, SipError, SipMethod, SipServer,
};
use crate::infrastructure::task::{shutdown_channel, spawn_janitor, ShutdownTrigger};
use crate::infrastructure::transport::{ConnectionRegistry, PacketMultiplexer, TransportError};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info};

/// A running registrar.
///
/// Owns the receive loop and both janitors; [`shutdown`](Self::shutdown)
/// stops all of them and closes every live connection.
pub struct RegistrarService {
    local_addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    challenges: Arc<ChallengeStore>,
    users: Arc<dyn RegisteredUserStore>,
    trigger: ShutdownTrigger,
    receive_loop: JoinHandle<Result<(), TransportError>>,
    janitors: Vec<JoinHandle<()>>,
}

impl RegistrarService {
    /// Bind the SIP socket and start serving REGISTER requests
    pub async fn start(
        config: &Config,
        accounts: Arc<dyn AccountRepository>,
        users: Arc<dyn RegisteredUserStore>,
    ) -> Result<Self, SipError> {
        let bind_addr = config
            .sip_bind_addr()
            .map_err(|e| SipError::Internal(e.to_string()))?;
        let algorithm = config
            .auth
            .digest_algorithm()
            .map_err(|e| SipError::Internal(e.to_string()))?;

        let challenges = Arc::new(ChallengeStore::new(config.auth.challenge_ttl()));
        let registrar = RegistrationHandler::new(
            DigestPolicy::new(config.sip.realm.clone(), algorithm),
            Arc::clone(&challenges),
            accounts,
            Arc::clone(&users),
            &config.registrar,
        );

        let server = Arc::new(SipServer::new());
        server
            .register_handler(SipMethod::Register, Arc::new(registrar))
            .await;

        let multiplexer = PacketMultiplexer::bind(bind_addr, server, &config.transport).await?;
        let local_addr = multiplexer.local_addr()?;
        let registry = multiplexer.registry();

        let (trigger, signal) = shutdown_channel();
        let janitors = vec![
            spawn_janitor(
                "connection",
                registry.clone(),
                config.transport.sweep_interval(),
                signal.clone(),
            ),
            spawn_janitor(
                "challenge",
                challenges.clone(),
                config.auth.sweep_interval(),
                signal.clone(),
            ),
        ];
        let receive_loop = tokio::spawn(multiplexer.run(signal));

        info!(
            "SIP registrar for realm {} listening on {} ({})",
            config.sip.realm, local_addr, algorithm
        );

        Ok(Self {
            local_addr,
            registry,
            challenges,
            users,
            trigger,
            receive_loop,
            janitors,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn connection_count(&self) -> usize {
        self.registry.len().await
    }

    pub fn challenge_store(&self) -> Arc<ChallengeStore> {
        Arc::clone(&self.challenges)
    }

    pub fn registered_users(&self) -> Arc<dyn RegisteredUserStore> {
        Arc::clone(&self.users)
    }

    /// Serve until `signal` resolves or the receive loop fails, then shut down
    pub async fn run_until<F>(mut self, signal: F) -> Result<(), SipError>
    where
        F: Future<Output = ()>,
    {
        let finished = tokio::select! {
            _ = signal => None,
            result = &mut self.receive_loop => Some(result),
        };

        match finished {
            None => self.shutdown().await,
            Some(result) => {
                error!("SIP receive loop exited unexpectedly");
                self.trigger.trigger();
                for janitor in self.janitors {
                    let _ = janitor.await;
                }
                Self::receive_result(result)
            }
        }
    }

    /// Stop receiving, stop the janitors and close all connections
    pub async fn shutdown(self) -> Result<(), SipError> {
        info!("Shutting down SIP registrar on {}", self.local_addr);
        self.trigger.trigger();

        let result = self.receive_loop.await;
        for janitor in self.janitors {
            let _ = janitor.await;
        }
        Self::receive_result(result)
    }

    fn receive_result(
        result: Result<Result<(), TransportError>, JoinError>,
    ) -> Result<(), SipError> {
        match result {
            Ok(inner) => Ok(inner?),
            Err(e) => Err(SipError::Internal(format!("receive loop panicked: {}", e))),
        }
    }
}
