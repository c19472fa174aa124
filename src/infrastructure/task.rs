//! Background task plumbing: shutdown signalling and periodic janitors

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Create a linked shutdown trigger/signal pair
pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, ShutdownSignal { inner: rx })
}

/// Owner side of the shutdown channel
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            inner: self.tx.subscribe(),
        }
    }
}

/// Observer side of the shutdown channel, cheap to clone into tasks
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    inner: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn is_shutdown(&self) -> bool {
        *self.inner.borrow()
    }

    /// Resolves once shutdown is triggered or the trigger is dropped
    pub async fn recv(&mut self) {
        if *self.inner.borrow() {
            return;
        }

        while self.inner.changed().await.is_ok() {
            if *self.inner.borrow() {
                return;
            }
        }
    }
}

/// State that a janitor periodically prunes
#[async_trait]
pub trait Sweep: Send + Sync {
    /// Evict stale entries and return how many were removed
    async fn sweep(&self) -> usize;
}

/// Spawn a janitor that calls `target.sweep()` every `interval` until shutdown.
///
/// The first sweep happens one full interval after spawning.
pub fn spawn_janitor(
    name: &'static str,
    target: Arc<dyn Sweep>,
    interval: Duration,
    mut shutdown: ShutdownSignal,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Starting {} janitor (interval: {:?})", name, interval);
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = target.sweep().await;
                    if removed > 0 {
                        info!("{} janitor evicted {} entries", name, removed);
                    } else {
                        debug!("{} janitor: nothing to evict", name);
                    }
                }
                _ = shutdown.recv() => break,
            }
        }

        info!("{} janitor stopped", name);
    })
}
