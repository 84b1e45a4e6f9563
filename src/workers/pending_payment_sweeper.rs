//! Pending payment sweeper
//!
//! Pending records belong to payments whose callback may never come. Records
//! older than the retention window are purged on a fixed interval; a callback
//! that still arrives afterwards is credited from the gateway-reported amount.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::CreditsConfig;
use crate::services::pending_payments::{PendingPaymentStore, StoreResult};

#[derive(Debug, Clone)]
pub struct PendingPaymentSweeperConfig {
    /// How often the worker wakes up
    pub sweep_interval: Duration,
    /// Records older than this are purged
    pub retention: Duration,
}

impl Default for PendingPaymentSweeperConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(3600),
            retention: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

impl From<&CreditsConfig> for PendingPaymentSweeperConfig {
    fn from(config: &CreditsConfig) -> Self {
        Self {
            sweep_interval: Duration::from_secs(config.pending_sweep_interval_secs.max(1)),
            retention: Duration::from_secs(config.pending_ttl_secs),
        }
    }
}

pub struct PendingPaymentSweeper {
    store: Arc<dyn PendingPaymentStore>,
    config: PendingPaymentSweeperConfig,
}

impl PendingPaymentSweeper {
    pub fn new(store: Arc<dyn PendingPaymentStore>, config: PendingPaymentSweeperConfig) -> Self {
        Self { store, config }
    }

    /// One sweep; returns how many records were purged
    pub async fn sweep_once(&self) -> StoreResult<u64> {
        let retention = chrono::Duration::from_std(self.config.retention)
            .unwrap_or_else(|_| chrono::Duration::days(7));
        self.store.purge_older_than(Utc::now() - retention).await
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            sweep_interval_secs = self.config.sweep_interval.as_secs(),
            retention_secs = self.config.retention.as_secs(),
            "pending payment sweeper started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("pending payment sweeper stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.sweep_interval) => {
                    match self.sweep_once().await {
                        Ok(0) => {}
                        Ok(purged) => info!(purged = purged, "Purged expired pending payments"),
                        Err(e) => error!(error = %e, "Pending payment sweep failed"),
                    }
                }
            }
        }
    }
}
