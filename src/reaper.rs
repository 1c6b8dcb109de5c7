//! Lease reaper: returns stale claims to the queue.
//!
//! A claim that is never followed by an assignment would otherwise strand
//! its item forever. The reaper wakes every `interval` and releases every
//! claim older than `lease`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, error, info};

use crate::config;
use crate::error::Result;
use crate::ledger::Ledger;
use crate::model::ItemId;
use crate::queue::QueueService;

/// Configuration for the lease reaper.
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// How long a claim may stay un-assigned.
    pub lease: Duration,
    /// Time between sweeps.
    pub interval: Duration,
}

/// Same defaults as [`crate::config::Config`] uses when the env vars are unset.
impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            lease: Duration::from_secs(config::DEFAULT_CLAIM_LEASE_SECS),
            interval: Duration::from_secs(config::DEFAULT_REAPER_INTERVAL_SECS),
        }
    }
}

pub struct LeaseReaper<L> {
    queue: QueueService<L>,
    config: ReaperConfig,
    shutdown: Arc<Notify>,
}

impl<L> Clone for LeaseReaper<L> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            config: self.config.clone(),
            shutdown: Arc::clone(&self.shutdown),
        }
    }
}

impl<L: Ledger> LeaseReaper<L> {
    pub fn new(queue: QueueService<L>, config: ReaperConfig) -> Self {
        Self {
            queue,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Signal the reaper to stop after the current sweep.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Release every claim older than the lease, once.
    pub async fn sweep(&self) -> Result<Vec<ItemId>> {
        self.queue.release_expired(self.config.lease).await
    }

    /// Sweep on every interval tick until shutdown.
    pub async fn run(&self) -> Result<()> {
        info!(
            lease_secs = self.config.lease.as_secs(),
            interval_secs = self.config.interval.as_secs(),
            "lease reaper started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("lease reaper shutting down");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.config.interval) => {}
            }

            match self.sweep().await {
                Ok(released) if released.is_empty() => debug!("no expired claims"),
                Ok(_) => {}
                Err(e) => error!("lease sweep failed: {e}"),
            }
        }
    }
}
