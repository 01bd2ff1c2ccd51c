//! Customer ingestion from the storefront's customer accounts.
//!
//! Accounts go through the same resolver as order customers, so an account
//! and the orders placed with it converge on one customer row.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::batch_migration::BatchReport;
use super::customer_resolver::CustomerResolver;
use super::territory_resolver::TerritoryResolver;
use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::models::{Customer, ExternalCustomer};
use crate::repositories::SyncStore;
use crate::storefront::StorefrontClient;

const DEFAULT_PAGE_SIZE: u32 = 100;

#[derive(Clone)]
pub struct CustomerSync {
    client: Arc<dyn StorefrontClient>,
    store: Arc<dyn SyncStore>,
    resolver: CustomerResolver,
    label_overrides: HashMap<String, String>,
    page_size: u32,
}

impl CustomerSync {
    pub fn new(
        client: Arc<dyn StorefrontClient>,
        store: Arc<dyn SyncStore>,
        label_overrides: HashMap<String, String>,
    ) -> Self {
        Self {
            client,
            resolver: CustomerResolver::new(store.clone()),
            store,
            label_overrides,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn from_config(
        client: Arc<dyn StorefrontClient>,
        store: Arc<dyn SyncStore>,
        cfg: &AppConfig,
    ) -> Self {
        Self::new(client, store, cfg.territory_labels.clone())
            .with_page_size(cfg.sync.effective_page_size())
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Upserts one account. Returns the stored customer and whether it was created.
    pub async fn sync_customer(
        &self,
        external: &ExternalCustomer,
    ) -> Result<(Customer, bool), ServiceError> {
        let territories = TerritoryResolver::load(self.store.as_ref(), &self.label_overrides).await?;
        self.upsert(external, &territories).await
    }

    async fn upsert(
        &self,
        external: &ExternalCustomer,
        territories: &TerritoryResolver,
    ) -> Result<(Customer, bool), ServiceError> {
        if external.has_address() {
            let resolved = self
                .resolver
                .resolve_or_create(external, territories, None)
                .await?;
            Ok((resolved.customer, resolved.created))
        } else {
            self.resolver.upsert_contact(external, None).await
        }
    }

    /// Pulls one page and upserts every account on it.
    #[instrument(skip(self, territories))]
    pub async fn sync_page(
        &self,
        page: u32,
        territories: &TerritoryResolver,
    ) -> Result<(BatchReport, Option<u32>), ServiceError> {
        let fetched = self.client.fetch_customers(page, self.page_size).await?;
        let mut report = BatchReport::default();
        for (id, reason) in &fetched.rejected {
            report.record_error(format!("customer {:?}: {}", id, reason));
        }
        for external in &fetched.customers {
            match self.upsert(external, territories).await {
                Ok((_, true)) => report.created += 1,
                Ok((_, false)) => report.updated += 1,
                Err(e) => {
                    warn!(customer = ?external.external_id, error = %e, "Customer sync failed");
                    report.record_error(format!("customer {:?}: {}", external.external_id, e));
                }
            }
        }
        if !fetched.customers.is_empty() || !fetched.rejected.is_empty() {
            report.pages_processed = 1;
        }
        Ok((report, fetched.total_pages))
    }

    /// Walks the account listing from `start_page` until an empty page, the
    /// reported last page, or `max_pages`.
    #[instrument(skip(self))]
    pub async fn sync_all(
        &self,
        start_page: u32,
        max_pages: Option<u32>,
    ) -> Result<BatchReport, ServiceError> {
        let territories = TerritoryResolver::load(self.store.as_ref(), &self.label_overrides).await?;
        let mut report = BatchReport::default();
        let mut page = start_page.max(1);
        let mut walked = 0;

        loop {
            if max_pages.map_or(false, |max| walked >= max) {
                break;
            }
            let (page_report, total_pages) = self.sync_page(page, &territories).await?;
            walked += 1;
            let empty = page_report.pages_processed == 0;
            report.merge(page_report);
            if empty || total_pages.map_or(false, |total| page >= total) {
                break;
            }
            page += 1;
        }

        info!(
            pages = report.pages_processed,
            created = report.created,
            matched = report.updated,
            errored = report.errored,
            "Customer sync finished"
        );
        Ok(report)
    }
}
