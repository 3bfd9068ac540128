//! The periodic reclamation sweep.

use std::time::Duration;

use checkout_store::{CheckoutStore, Result};
use chrono::{DateTime, Utc};
use tokio::sync::watch;

/// Configuration for the reclamation sweep.
#[derive(Debug, Clone)]
pub struct ReclaimerConfig {
    /// Time between passes when running as a background loop.
    pub interval: Duration,
    /// Maximum carts examined per pass. A pass that hits the cap leaves
    /// the remainder for the next pass rather than holding a long scan.
    pub batch_size: usize,
}

impl Default for ReclaimerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            batch_size: 100,
        }
    }
}

/// Totals for one reclamation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    pub carts_reclaimed: u64,
    pub units_returned: u64,
}

/// Background sweep that returns expired carts' stock to the ledger.
pub struct Reclaimer<S: CheckoutStore> {
    store: S,
    config: ReclaimerConfig,
}

impl<S: CheckoutStore> Reclaimer<S> {
    /// Creates a new reclaimer over the given store.
    pub fn new(store: S, config: ReclaimerConfig) -> Self {
        Self { store, config }
    }

    /// Runs one pass at the current wall-clock time.
    pub async fn run_once(&self) -> Result<ReclaimReport> {
        self.run_once_at(Utc::now()).await
    }

    /// Runs one pass treating `now` as the current time.
    ///
    /// Candidates come from an unlocked scan; each cart is then reclaimed
    /// in its own transaction which re-verifies expiry and non-settlement
    /// under the cart lock. A candidate that settled, refreshed, or was
    /// taken by a concurrent pass in the meantime is skipped.
    #[tracing::instrument(skip(self))]
    pub async fn run_once_at(&self, now: DateTime<Utc>) -> Result<ReclaimReport> {
        let expired = self.store.list_expired(now, self.config.batch_size).await?;

        let mut report = ReclaimReport::default();
        for cart_id in expired {
            match self.store.reclaim_cart(cart_id, now).await {
                Ok(Some(reclaimed)) => {
                    report.carts_reclaimed += 1;
                    report.units_returned += reclaimed.units_returned;
                }
                Ok(None) => {}
                Err(err) if err.is_retryable() => {
                    // Lock contention on one cart shouldn't kill the pass.
                    tracing::warn!(%cart_id, error = %err, "skipping contended cart");
                }
                Err(err) => return Err(err),
            }
        }

        if report.carts_reclaimed > 0 {
            metrics::counter!("carts_reclaimed_total").increment(report.carts_reclaimed);
            metrics::counter!("stock_units_reclaimed_total").increment(report.units_returned);
            tracing::info!(
                carts = report.carts_reclaimed,
                units = report.units_returned,
                "reclaimed expired carts"
            );
        }

        Ok(report)
    }

    /// Runs passes on the configured interval until `shutdown` flips to
    /// true. Storage errors are logged and the loop keeps going; a
    /// transiently unavailable database must not kill reclamation for the
    /// life of the process.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.run_once().await {
                        tracing::error!(error = %err, "reclamation pass failed");
                    }
                }
                changed = shutdown.changed() => {
                    // A dropped sender counts as shutdown.
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("reclaimer shutting down");
                        return;
                    }
                }
            }
        }
    }
}
