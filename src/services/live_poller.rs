use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, instrument};

use super::batch_migration::BatchReport;
use super::order_sync::OrderSyncCoordinator;
use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::models::{SyncMode, SyncOrigin};
use crate::storefront::{OrderFilter, StorefrontClient};

/// Safety net for missed webhooks: re-reads the most recently modified orders.
/// Unchanged orders skip on their content hash.
#[derive(Clone)]
pub struct LivePoller {
    client: Arc<dyn StorefrontClient>,
    sync: OrderSyncCoordinator,
    page_size: u32,
    pages: u32,
}

impl LivePoller {
    pub fn new(client: Arc<dyn StorefrontClient>, sync: OrderSyncCoordinator, cfg: &AppConfig) -> Self {
        Self {
            client,
            sync,
            page_size: cfg.sync.effective_page_size(),
            pages: cfg.sync.poll_pages.max(1),
        }
    }

    #[instrument(skip(self), fields(pages = self.pages))]
    pub async fn poll_once(&self) -> Result<BatchReport, ServiceError> {
        let filter = OrderFilter::recent();
        let mut report = BatchReport::default();

        for page in 1..=self.pages {
            let fetched = self.client.fetch_orders(page, self.page_size, &filter).await?;
            for (id, reason) in &fetched.rejected {
                report.record_error(format!("order {:?}: {}", id, reason));
            }
            if fetched.orders.is_empty() {
                break;
            }
            for order in &fetched.orders {
                let outcome = self
                    .sync
                    .sync_order(order, SyncOrigin::Poll, SyncMode::Live)
                    .await;
                report.record(&outcome);
            }
            report.pages_processed += 1;
            if fetched.total_pages.map_or(false, |total| page >= total) {
                break;
            }
        }

        info!(
            created = report.created,
            updated = report.updated,
            deferred = report.deferred,
            errored = report.errored,
            "Poll finished"
        );
        Ok(report)
    }

    /// Polls every `interval` until `shutdown` flips to true.
    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        error!(error = %e, "Poll failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Poller stopping");
                        return;
                    }
                }
            }
        }
    }
}
