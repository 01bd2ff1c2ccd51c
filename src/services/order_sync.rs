//! Order sync coordinator: turns one storefront order into a document write.
//!
//! Every attempt is a pure `prepare` step producing a [`DocumentChange`] and a
//! single atomic commit. Concurrent attempts for the same order are serialized
//! by the store: a losing create re-enters the update path, a stale update is
//! reloaded and retried.

use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::bundle_expander;
use super::customer_resolver::CustomerResolver;
use super::delivery_slot::parse_delivery_slot;
use super::page_cache::PageCache;
use super::payment_reconciler::{categorize, PaymentReconciler};
use super::pricing_context::PricingContextResolver;
use super::territory_resolver::TerritoryResolver;
use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::models::{
    Charge, DocumentPatch, DocumentState, DocumentUpdate, ExternalCustomer, ExternalOrder,
    FinancialDocument, OrderStatus, SettlementRecord, SettlementStatus, SyncMode, SyncOrigin,
    SyncOutcome, SyncRecord, SyncReport,
};
use crate::repositories::{CommitOutcome, DocumentChange, SyncStore};

/// Create, reload-after-lost-create, reload-after-version-conflict.
const MAX_PASSES: usize = 3;

/// What one attempt decided to do for one order.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedSync {
    pub external_id: i64,
    pub outcome: SyncOutcome,
    pub document_id: Option<Uuid>,
    /// `None` when nothing needs to be written.
    pub change: Option<DocumentChange>,
}

impl PreparedSync {
    fn without_write(external_id: i64, outcome: SyncOutcome, document_id: Option<Uuid>) -> Self {
        Self {
            external_id,
            outcome,
            document_id,
            change: None,
        }
    }

    pub fn report(&self) -> SyncReport {
        SyncReport::new(self.external_id, self.outcome, self.document_id)
    }

    fn settlement(&self) -> Option<&SettlementRecord> {
        match &self.change {
            Some(DocumentChange::Create { settlement, .. })
            | Some(DocumentChange::Update { settlement, .. }) => settlement.as_ref(),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct OrderSyncCoordinator {
    store: Arc<dyn SyncStore>,
    customers: CustomerResolver,
    pricing: PricingContextResolver,
    payments: PaymentReconciler,
    label_overrides: HashMap<String, String>,
    default_currency: String,
    attempt_timeout: Duration,
    events: Option<EventSender>,
}

impl OrderSyncCoordinator {
    pub fn new(store: Arc<dyn SyncStore>, cfg: &AppConfig) -> Self {
        Self {
            customers: CustomerResolver::new(store.clone()),
            pricing: PricingContextResolver::new(store.clone(), cfg.defaults.clone()),
            payments: PaymentReconciler::new(&cfg.payments),
            label_overrides: cfg.territory_labels.clone(),
            default_currency: cfg.defaults.currency.clone(),
            attempt_timeout: cfg.sync.attempt_timeout(),
            events: None,
            store,
        }
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    pub fn store(&self) -> &Arc<dyn SyncStore> {
        &self.store
    }

    pub fn label_overrides(&self) -> &HashMap<String, String> {
        &self.label_overrides
    }

    /// Syncs one order end to end. Never returns an error: failures are
    /// recorded on the ledger entry and reported as `Errored`.
    #[instrument(skip(self, order), fields(external_id = order.id, status = %order.status))]
    pub async fn sync_order(
        &self,
        order: &ExternalOrder,
        origin: SyncOrigin,
        mode: SyncMode,
    ) -> SyncReport {
        self.sync_order_from_page(order, origin, mode, None).await
    }

    /// Like [`sync_order`](Self::sync_order), remembering the backfill page the order came from.
    pub async fn sync_order_from_page(
        &self,
        order: &ExternalOrder,
        origin: SyncOrigin,
        mode: SyncMode,
        source_page: Option<u32>,
    ) -> SyncReport {
        let attempt = self.attempt(order, origin, mode, source_page);
        let result = match tokio::time::timeout(self.attempt_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(ServiceError::TransientUpstream(format!(
                "sync attempt exceeded {:?}",
                self.attempt_timeout
            ))),
        };
        match result {
            Ok(prepared) => self.finalize(&prepared).await,
            Err(e) => self.record_error(order.id, origin, e).await,
        }
    }

    async fn attempt(
        &self,
        order: &ExternalOrder,
        origin: SyncOrigin,
        mode: SyncMode,
        source_page: Option<u32>,
    ) -> Result<PreparedSync, ServiceError> {
        let mut last_document = None;
        for pass in 1..=MAX_PASSES {
            let prepared = self.prepare(order, origin, mode, source_page, None).await?;
            let Some(change) = prepared.change.clone() else {
                return Ok(prepared);
            };
            match self.store.commit(change).await? {
                CommitOutcome::Applied => return Ok(prepared),
                CommitOutcome::AlreadyExists => {
                    info!(external_id = order.id, pass, "Lost create race, re-entering update path");
                }
                CommitOutcome::VersionConflict => {
                    warn!(external_id = order.id, pass, "Document changed underneath, reloading");
                }
            }
            last_document = prepared.document_id;
        }
        Err(ServiceError::ConcurrentModification(
            last_document.unwrap_or_else(Uuid::nil),
        ))
    }

    /// Decides what to write for `order` without writing the document.
    /// Customer and address upserts happen here; they are idempotent.
    pub async fn prepare(
        &self,
        order: &ExternalOrder,
        origin: SyncOrigin,
        mode: SyncMode,
        source_page: Option<u32>,
        cache: Option<&PageCache>,
    ) -> Result<PreparedSync, ServiceError> {
        if let OrderStatus::Unmapped(raw) = &order.status {
            return Err(ServiceError::ValidationError(format!(
                "order {} has unmapped status '{}'",
                order.id, raw
            )));
        }

        let record = match cache.and_then(|c| c.sync_record(order.id)) {
            Some(record) => Some(record.clone()),
            None => self.store.get_sync_record(order.id).await?,
        };
        let content_hash = order.content_hash();

        if let Some(record) = &record {
            if record.content_hash == content_hash
                && record.last_status == order.status
                && record.outcome != SyncOutcome::Errored
            {
                let mut touched = record.clone();
                touched.outcome = SyncOutcome::Skipped;
                touched.origin = origin;
                touched.last_error = None;
                touched.synced_at = Utc::now();
                return Ok(PreparedSync {
                    external_id: order.id,
                    outcome: SyncOutcome::Skipped,
                    document_id: Some(record.document_id),
                    change: Some(DocumentChange::Touch { record: touched }),
                });
            }
        }

        let document_id = record.as_ref().map(|r| r.document_id);
        match mode {
            SyncMode::Historical if !order.status.is_final() => {
                return Ok(PreparedSync::without_write(
                    order.id,
                    SyncOutcome::Skipped,
                    document_id,
                ));
            }
            SyncMode::Live if order.status.is_awaiting() => {
                return Ok(PreparedSync::without_write(
                    order.id,
                    SyncOutcome::Deferred,
                    document_id,
                ));
            }
            _ => {}
        }

        let new_record = SyncRecord {
            external_order_id: order.id,
            document_id: document_id.unwrap_or_else(Uuid::nil),
            last_status: order.status.clone(),
            last_external_update: order.modified_at.or(order.created_at),
            content_hash,
            outcome: SyncOutcome::Created,
            origin,
            source_page: source_page.or(record.as_ref().and_then(|r| r.source_page)),
            last_error: None,
            synced_at: Utc::now(),
        };

        match record {
            None => self.prepare_create(order, mode, new_record, cache).await,
            Some(existing) => self.prepare_update(order, mode, existing, new_record, cache).await,
        }
    }

    async fn prepare_create(
        &self,
        order: &ExternalOrder,
        mode: SyncMode,
        mut record: SyncRecord,
        cache: Option<&PageCache>,
    ) -> Result<PreparedSync, ServiceError> {
        let lines = bundle_expander::expand(&order.line_items)?;
        let territories = self.territories(cache).await?;
        let external = ExternalCustomer::from_order(order);
        let resolved = self
            .customers
            .resolve_or_create(&external, &territories, cache)
            .await?;

        let territory = if resolved.customer.territory_locked {
            resolved.customer.territory.clone()
        } else {
            resolved
                .territory
                .code
                .clone()
                .or_else(|| resolved.customer.territory.clone())
        };
        let pricing = self.pricing.resolve(territory.as_deref(), cache).await;
        let charges = self.delivery_charges(territory.as_deref(), cache).await?;

        let now = Utc::now();
        let mut document = FinancialDocument {
            id: Uuid::new_v4(),
            external_order_id: order.id,
            order_number: order.number.clone(),
            state: DocumentState::Draft,
            customer_id: resolved.customer.id,
            billing_address_id: Some(resolved.billing_address_id),
            shipping_address_id: Some(resolved.shipping_address_id),
            territory,
            pricing,
            currency: if order.currency.trim().is_empty() {
                self.default_currency.clone()
            } else {
                order.currency.clone()
            },
            lines,
            charges,
            payment_category: order.payment_method.as_deref().map(categorize),
            settlement_status: SettlementStatus::Unsettled,
            fulfilment_state: Some(order.status.as_str().to_string()),
            delivery_slot: parse_delivery_slot(order),
            version: 1,
            created_at: now,
            updated_at: now,
        };

        apply_transitions(&mut document, &order.status, mode)?;
        let settlement = self.settle(&mut document, mode, &[]);

        record.document_id = document.id;
        record.outcome = SyncOutcome::Created;
        Ok(PreparedSync {
            external_id: order.id,
            outcome: SyncOutcome::Created,
            document_id: Some(document.id),
            change: Some(DocumentChange::Create {
                document,
                record,
                settlement,
            }),
        })
    }

    async fn prepare_update(
        &self,
        order: &ExternalOrder,
        mode: SyncMode,
        existing: SyncRecord,
        mut record: SyncRecord,
        cache: Option<&PageCache>,
    ) -> Result<PreparedSync, ServiceError> {
        let mut document = self
            .store
            .get_document(existing.document_id)
            .await?
            .ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "sync record for order {} points at missing document {}",
                    order.id, existing.document_id
                ))
            })?;

        if document.state == DocumentState::Cancelled {
            if order.status.is_cancellation() {
                record.outcome = SyncOutcome::Skipped;
                record.document_id = document.id;
                return Ok(PreparedSync {
                    external_id: order.id,
                    outcome: SyncOutcome::Skipped,
                    document_id: Some(document.id),
                    change: Some(DocumentChange::Touch { record }),
                });
            }
            return Err(ServiceError::StateConflict(format!(
                "document {} is cancelled but order {} is now {}",
                document.id, order.id, order.status
            )));
        }

        let lines = bundle_expander::expand(&order.line_items)?;
        let territories = self.territories(cache).await?;
        let external = ExternalCustomer::from_order(order);
        let resolved = self
            .customers
            .resolve_or_create(&external, &territories, cache)
            .await?;
        let pricing = self.pricing.resolve(document.territory.as_deref(), cache).await;

        let was_draft = document.state == DocumentState::Draft;
        let expected_version = document.version;
        let state_before = document.state;

        // Finalized lines never change; drift is reported and the status still applies.
        if !was_draft && lines != document.lines && !order.status.is_cancellation() {
            let message = format!(
                "order {} line items differ from submitted document {}",
                order.id, document.id
            );
            warn!(external_id = order.id, document_id = %document.id, "Line items drifted after submission");
            counter!("storefront_sync.line_drift", 1);
            self.publish(Event::StateConflictDetected {
                external_id: order.id,
                document_id: Some(document.id),
                message,
            })
            .await;
        }

        let update = DocumentUpdate {
            customer_id: was_draft.then_some(resolved.customer.id),
            lines: was_draft.then_some(lines),
            charges: None,
            patch: DocumentPatch {
                payment_category: order.payment_method.as_deref().map(categorize),
                settlement_status: None,
                fulfilment_state: (!order.status.is_cancellation())
                    .then(|| order.status.as_str().to_string()),
                delivery_slot: parse_delivery_slot(order),
                pricing_profile: pricing.profile_ref.clone(),
            },
        };
        let mut changed = document.apply_update(update)?;
        if was_draft {
            document.billing_address_id = Some(resolved.billing_address_id);
            document.shipping_address_id = Some(resolved.shipping_address_id);
        }

        apply_transitions(&mut document, &order.status, mode)?;
        changed |= document.state != state_before;

        let existing_settlements = self.store.settlements_for(document.id).await?;
        let settlement = self.settle(&mut document, mode, &existing_settlements);
        changed |= settlement.is_some();

        let outcome = if changed {
            SyncOutcome::Updated
        } else {
            SyncOutcome::Skipped
        };
        document.version = expected_version + 1;
        record.document_id = document.id;
        record.outcome = outcome;

        Ok(PreparedSync {
            external_id: order.id,
            outcome,
            document_id: Some(document.id),
            change: Some(DocumentChange::Update {
                document,
                expected_version,
                replace_lines: was_draft,
                record,
                settlement,
            }),
        })
    }

    async fn territories(
        &self,
        cache: Option<&PageCache>,
    ) -> Result<Arc<TerritoryResolver>, ServiceError> {
        match cache {
            Some(cache) => Ok(cache.territories()),
            None => TerritoryResolver::load(self.store.as_ref(), &self.label_overrides).await,
        }
    }

    async fn delivery_charges(
        &self,
        territory: Option<&str>,
        cache: Option<&PageCache>,
    ) -> Result<Vec<Charge>, ServiceError> {
        let Some(code) = territory else {
            return Ok(Vec::new());
        };
        let charge = match cache.and_then(|c| c.territory(code)) {
            Some(t) => t.delivery_charge,
            None => self
                .store
                .get_territory(code)
                .await?
                .and_then(|t| t.delivery_charge),
        };
        Ok(charge
            .filter(|amount| *amount > Decimal::ZERO)
            .map(|amount| Charge {
                description: format!("Shipping Income ({})", code),
                amount,
            })
            .into_iter()
            .collect())
    }

    fn settle(
        &self,
        document: &mut FinancialDocument,
        mode: SyncMode,
        existing: &[SettlementRecord],
    ) -> Option<SettlementRecord> {
        if mode != SyncMode::Live {
            return None;
        }
        let settlement = self.payments.settlement_for(document, existing)?;
        document.settlement_status = SettlementStatus::Settled;
        Some(settlement)
    }

    /// Logs, counts and publishes a prepared and committed sync.
    pub async fn finalize(&self, prepared: &PreparedSync) -> SyncReport {
        let report = prepared.report();
        if let Some(settlement) = prepared.settlement() {
            counter!("storefront_sync.settlements_created", 1);
            self.publish(Event::SettlementCreated {
                document_id: settlement.document_id,
                amount: settlement.amount,
                category: settlement.category,
            })
            .await;
        }
        self.emit(&report).await;
        report
    }

    /// Records a failed attempt on the ledger entry, if one exists.
    pub async fn record_error(
        &self,
        external_id: i64,
        origin: SyncOrigin,
        err: ServiceError,
    ) -> SyncReport {
        let message = err.to_string();
        let document_id = match self.store.get_sync_record(external_id).await {
            Ok(record) => record.map(|r| r.document_id),
            Err(_) => None,
        };

        match &err {
            ServiceError::StateConflict(_) | ServiceError::ArithmeticInvariantViolation(_) => {
                error!(external_id, error = %message, kind = err.kind(), "Order needs manual review");
                self.publish(Event::StateConflictDetected {
                    external_id,
                    document_id,
                    message: message.clone(),
                })
                .await;
            }
            _ => warn!(
                external_id,
                error = %message,
                kind = err.kind(),
                retryable = err.is_retryable(),
                "Order sync failed"
            ),
        }

        if document_id.is_some() {
            if let Err(e) = self.store.record_failure(external_id, origin, &message).await {
                error!(external_id, error = %e, "Could not record sync failure");
            }
        }

        let mut report = SyncReport::errored(external_id, document_id, message);
        report.retryable = err.is_retryable();
        self.emit(&report).await;
        report
    }

    async fn emit(&self, report: &SyncReport) {
        let outcome: &'static str = report.outcome.into();
        counter!("storefront_sync.orders", 1, "outcome" => outcome);
        info!(
            external_id = report.external_id,
            outcome,
            document_id = ?report.document_id,
            "Order sync finished"
        );
        self.publish(Event::OrderSynced(report.clone())).await;
    }

    async fn publish(&self, event: Event) {
        if let Some(events) = &self.events {
            if let Err(e) = events.send(event).await {
                warn!("Dropping sync event: {}", e);
            }
        }
    }
}

/// Moves a document toward the state the order status implies in `mode`.
fn apply_transitions(
    document: &mut FinancialDocument,
    status: &OrderStatus,
    mode: SyncMode,
) -> Result<(), ServiceError> {
    if status.is_cancellation() {
        return document.cancel();
    }
    match (mode, status) {
        (SyncMode::Live, OrderStatus::Processing | OrderStatus::Completed) => {
            if document.state == DocumentState::Draft {
                document.submit()?;
            }
        }
        (SyncMode::Historical, OrderStatus::Completed) => {
            if document.state == DocumentState::Draft {
                document.submit()?;
            }
            document.mark_paid()?;
        }
        _ => {}
    }
    Ok(())
}
