use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use yakyak_registrar::config::Config;
use yakyak_registrar::domain::registration::InMemoryRegisteredUserStore;
use yakyak_registrar::domain::user::{Account, InMemoryAccountRepository};
use yakyak_registrar::infrastructure::metrics::init_metrics;
use yakyak_registrar::RegistrarService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::load(None)?;

    // Initialize tracing; RUST_LOG wins over the configured level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    info!("Starting YakYak SIP registrar");

    if config.metrics.enabled {
        let listen = config.metrics_listen_addr()?;
        init_metrics(listen)?;
        info!("Prometheus metrics available on http://{}/metrics", listen);
    }

    let accounts = InMemoryAccountRepository::with_accounts(
        config
            .auth
            .accounts
            .iter()
            .map(|account| Account::new(account.username.clone(), account.password.clone())),
    );
    if config.auth.accounts.is_empty() {
        warn!("No accounts configured; every REGISTER will be rejected");
    } else {
        info!("Loaded {} accounts", config.auth.accounts.len());
    }

    let service = RegistrarService::start(
        &config,
        Arc::new(accounts),
        Arc::new(InMemoryRegisteredUserStore::new()),
    )
    .await?;

    info!("Press Ctrl+C to stop");
    service
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    info!("YakYak SIP registrar stopped");
    Ok(())
}
