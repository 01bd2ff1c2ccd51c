//! Paginated historical backfill.
//!
//! Pages are fetched through the rate-limited storefront client, resolved
//! against a page-scoped cache, and committed in batches where every order
//! sits in its own savepoint. Progress is derived from the ledger plus a
//! completion mark per page, so a restart resumes at the contiguous page
//! watermark even across pages that wrote nothing.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use super::order_sync::{OrderSyncCoordinator, PreparedSync};
use super::page_cache::PageCache;
use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::models::{ExternalOrder, SyncMode, SyncOrigin, SyncOutcome, SyncReport};
use crate::repositories::CommitOutcome;
use crate::storefront::{OrderFilter, StorefrontClient};

const MAX_ERROR_SAMPLES: usize = 10;

#[derive(Debug, Clone)]
pub struct BackfillOptions {
    /// First page to fetch; defaults to the checkpoint watermark.
    pub start_page: Option<u32>,
    pub max_pages: Option<u32>,
    pub workers: usize,
    pub mode: SyncMode,
}

impl BackfillOptions {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            start_page: None,
            max_pages: cfg.sync.max_pages,
            workers: cfg.sync.workers.max(1),
            mode: SyncMode::Historical,
        }
    }
}

/// Aggregate outcome of a backfill run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub deferred: usize,
    pub errored: usize,
    pub pages_processed: u32,
    pub error_samples: Vec<String>,
}

impl BatchReport {
    pub fn record(&mut self, report: &SyncReport) {
        match report.outcome {
            SyncOutcome::Created => self.created += 1,
            SyncOutcome::Updated => self.updated += 1,
            SyncOutcome::Skipped => self.skipped += 1,
            SyncOutcome::Deferred => self.deferred += 1,
            SyncOutcome::Errored => {
                let message = report.error.clone().unwrap_or_default();
                self.record_error(format!("order {}: {}", report.external_id, message));
            }
        }
    }

    pub fn record_error(&mut self, sample: String) {
        self.errored += 1;
        if self.error_samples.len() < MAX_ERROR_SAMPLES {
            self.error_samples.push(sample);
        }
    }

    pub fn merge(&mut self, other: BatchReport) {
        self.created += other.created;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.deferred += other.deferred;
        self.errored += other.errored;
        self.pages_processed += other.pages_processed;
        for sample in other.error_samples {
            if self.error_samples.len() >= MAX_ERROR_SAMPLES {
                break;
            }
            self.error_samples.push(sample);
        }
    }

    pub fn total(&self) -> usize {
        self.created + self.updated + self.skipped + self.deferred + self.errored
    }
}

#[derive(Clone)]
pub struct BatchMigrationCoordinator {
    client: Arc<dyn StorefrontClient>,
    sync: OrderSyncCoordinator,
    page_size: u32,
    commit_every: usize,
    events: Option<EventSender>,
}

impl BatchMigrationCoordinator {
    pub fn new(client: Arc<dyn StorefrontClient>, sync: OrderSyncCoordinator, cfg: &AppConfig) -> Self {
        Self {
            client,
            sync,
            page_size: cfg.sync.effective_page_size(),
            commit_every: cfg.sync.commit_every.max(1),
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Runs the backfill from the checkpoint (or `options.start_page`) to the
    /// last page the storefront reports, splitting the span across workers.
    #[instrument(skip(self, options), fields(workers = options.workers))]
    pub async fn run(&self, options: BackfillOptions) -> Result<BatchReport, ServiceError> {
        let first = match options.start_page {
            Some(page) => page.max(1),
            None => {
                let cursor = self.sync.store().checkpoint().await?;
                // The watermark page may have been cut short; it is replayed and skips cheaply.
                cursor.last_page.max(1)
            }
        };
        info!(first_page = first, page_size = self.page_size, "Starting backfill");

        let filter = OrderFilter::for_backfill(options.mode);
        let mut report = BatchReport::default();
        let page = self
            .client
            .fetch_orders(first, self.page_size, &filter)
            .await
            .map_err(ServiceError::from)?;
        let total_pages = page.total_pages;
        if page.orders.is_empty() && page.rejected.is_empty() {
            info!(page = first, "Nothing to backfill");
            return Ok(report);
        }
        report.merge(self.process_page(first, page.orders, page.rejected, options.mode).await);

        let mut last = match total_pages {
            Some(total) => total,
            None => {
                report.merge(self.run_range(first + 1, None, options.mode).await);
                return Ok(report);
            }
        };
        if let Some(max) = options.max_pages {
            last = last.min(first.saturating_add(max.saturating_sub(1)));
        }
        if last <= first {
            return Ok(report);
        }

        let mut tasks = JoinSet::new();
        for (start, end) in partition(first + 1, last, options.workers) {
            let worker = self.clone();
            let mode = options.mode;
            tasks.spawn(async move { worker.run_range(start, Some(end), mode).await });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(partial) => report.merge(partial),
                Err(e) => {
                    error!(error = %e, "Backfill worker panicked");
                    report.record_error(format!("worker failed: {}", e));
                }
            }
        }

        info!(
            pages = report.pages_processed,
            created = report.created,
            updated = report.updated,
            skipped = report.skipped,
            errored = report.errored,
            "Backfill finished"
        );
        Ok(report)
    }

    /// Processes `start..=end`, or until an empty page when `end` is unknown.
    /// A page that cannot be fetched stops the range so the watermark stays honest.
    async fn run_range(&self, start: u32, end: Option<u32>, mode: SyncMode) -> BatchReport {
        let filter = OrderFilter::for_backfill(mode);
        let mut report = BatchReport::default();
        let mut page = start;
        while end.map_or(true, |end| page <= end) {
            let fetched = match self.client.fetch_orders(page, self.page_size, &filter).await {
                Ok(fetched) => fetched,
                Err(e) => {
                    error!(page, error = %e, "Page fetch failed, stopping range");
                    report.record_error(format!("page {}: {}", page, e));
                    break;
                }
            };
            if fetched.orders.is_empty() && fetched.rejected.is_empty() {
                break;
            }
            report.merge(self.process_page(page, fetched.orders, fetched.rejected, mode).await);
            page += 1;
        }
        report
    }

    #[instrument(skip(self, orders, rejected), fields(orders = orders.len()))]
    async fn process_page(
        &self,
        page: u32,
        orders: Vec<ExternalOrder>,
        rejected: Vec<(Option<i64>, String)>,
        mode: SyncMode,
    ) -> BatchReport {
        let mut report = BatchReport {
            pages_processed: 1,
            ..Default::default()
        };
        for (id, reason) in rejected {
            warn!(page, external_id = ?id, reason = %reason, "Rejected undecodable order");
            report.record_error(match id {
                Some(id) => format!("order {}: {}", id, reason),
                None => format!("page {}: {}", page, reason),
            });
        }

        let store = self.sync.store().clone();
        let cache = match PageCache::build(store.as_ref(), &orders, self.sync.label_overrides()).await
        {
            Ok(cache) => cache,
            Err(e) => {
                warn!(page, error = %e, "Page cache unavailable, resolving without it");
                PageCache::default()
            }
        };

        let mut pending: Vec<(&ExternalOrder, PreparedSync)> = Vec::new();
        for order in &orders {
            let prepared = self
                .sync
                .prepare(order, SyncOrigin::Backfill, mode, Some(page), Some(&cache))
                .await;
            match prepared {
                Ok(prepared) if prepared.change.is_none() => {
                    report.record(&self.sync.finalize(&prepared).await);
                }
                Ok(prepared) => {
                    pending.push((order, prepared));
                    if pending.len() >= self.commit_every {
                        self.flush(&mut pending, page, mode, &mut report).await;
                    }
                }
                Err(e) => {
                    report.record(&self.sync.record_error(order.id, SyncOrigin::Backfill, e).await);
                }
            }
        }
        self.flush(&mut pending, page, mode, &mut report).await;

        // Orders that errored stay on the ledger for live retries; the page itself is done.
        if let Err(e) = self.sync.store().mark_page_done(page).await {
            warn!(page, error = %e, "Could not mark page done; it will be replayed");
        }

        info!(
            page,
            created = report.created,
            updated = report.updated,
            errored = report.errored,
            "Backfill page done"
        );
        if let Some(events) = &self.events {
            let event = Event::BackfillPageCompleted {
                page,
                orders: orders.len(),
                errors: report.errored,
                timestamp: Utc::now(),
            };
            if let Err(e) = events.send(event).await {
                warn!("Dropping backfill event: {}", e);
            }
        }
        report
    }

    async fn flush(
        &self,
        pending: &mut Vec<(&ExternalOrder, PreparedSync)>,
        page: u32,
        mode: SyncMode,
        report: &mut BatchReport,
    ) {
        if pending.is_empty() {
            return;
        }
        let batch = std::mem::take(pending);
        let changes = batch
            .iter()
            .filter_map(|(_, prepared)| prepared.change.clone())
            .collect();

        let results = match self.sync.store().commit_batch(changes).await {
            Ok(results) => results,
            Err(e) => {
                warn!(page, error = %e, orders = batch.len(), "Batch commit failed, syncing orders one by one");
                for (order, _) in &batch {
                    let single = self
                        .sync
                        .sync_order_from_page(order, SyncOrigin::Backfill, mode, Some(page))
                        .await;
                    report.record(&single);
                }
                return;
            }
        };

        for ((order, prepared), result) in batch.iter().zip(results) {
            let outcome = match result {
                Ok(CommitOutcome::Applied) => self.sync.finalize(prepared).await,
                Ok(CommitOutcome::AlreadyExists) | Ok(CommitOutcome::VersionConflict) => {
                    // Raced with a live sync; take the single-order path with its reload loop.
                    self.sync
                        .sync_order_from_page(order, SyncOrigin::Backfill, mode, Some(page))
                        .await
                }
                Err(e) => self.sync.record_error(order.id, SyncOrigin::Backfill, e).await,
            };
            report.record(&outcome);
        }
    }
}

/// Splits `first..=last` into at most `workers` contiguous, disjoint ranges.
pub fn partition(first: u32, last: u32, workers: usize) -> Vec<(u32, u32)> {
    if last < first {
        return Vec::new();
    }
    let span = (last - first + 1) as usize;
    let workers = workers.clamp(1, span);
    let base = span / workers;
    let extra = span % workers;

    let mut ranges = Vec::with_capacity(workers);
    let mut start = first;
    for i in 0..workers {
        let len = (base + usize::from(i < extra)) as u32;
        let end = start + len - 1;
        ranges.push((start, end));
        start = end + 1;
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(2, 10, 3, vec![(2, 4), (5, 7), (8, 10)])]
    #[case(2, 11, 3, vec![(2, 5), (6, 8), (9, 11)])]
    #[case(1, 2, 8, vec![(1, 1), (2, 2)])]
    #[case(4, 4, 1, vec![(4, 4)])]
    fn partitions_are_contiguous_and_disjoint(
        #[case] first: u32,
        #[case] last: u32,
        #[case] workers: usize,
        #[case] expected: Vec<(u32, u32)>,
    ) {
        assert_eq!(partition(first, last, workers), expected);
    }

    #[test]
    fn empty_span_has_no_ranges() {
        assert!(partition(5, 4, 2).is_empty());
    }

    #[test]
    fn report_keeps_ten_error_samples() {
        let mut report = BatchReport::default();
        for id in 0..15 {
            report.record(&SyncReport::errored(id, None, "boom".into()));
        }
        report.record(&SyncReport::new(99, SyncOutcome::Created, None));
        assert_eq!(report.errored, 15);
        assert_eq!(report.error_samples.len(), MAX_ERROR_SAMPLES);
        assert_eq!(report.total(), 16);
    }
}
