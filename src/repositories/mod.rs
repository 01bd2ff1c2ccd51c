//! Persistence seam for the target business system.
//!
//! Every uniqueness rule the engine relies on lives behind [`SyncStore`]:
//! one ledger entry and one document per external order, one customer per
//! match key, one address per (customer, fingerprint), one settlement per
//! idempotency key.

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::{
    Address, AddressKind, CheckpointCursor, Customer, CustomerKey, FinancialDocument,
    PricingProfile, SettlementRecord, SyncOrigin, SyncRecord, Territory,
};

pub mod memory;
pub mod sea_orm_store;

pub use memory::InMemorySyncStore;
pub use sea_orm_store::SeaOrmSyncStore;

/// One order's worth of writes, applied atomically.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentChange {
    /// First materialization. Loses to any existing document for the same order.
    Create {
        document: FinancialDocument,
        record: SyncRecord,
        settlement: Option<SettlementRecord>,
    },
    /// Writes `document` only if the stored version still equals `expected_version`.
    Update {
        document: FinancialDocument,
        expected_version: i32,
        replace_lines: bool,
        record: SyncRecord,
        settlement: Option<SettlementRecord>,
    },
    /// Refreshes outcome, origin and timestamp of an existing ledger entry.
    Touch { record: SyncRecord },
}

impl DocumentChange {
    pub fn external_order_id(&self) -> i64 {
        match self {
            Self::Create { record, .. } | Self::Update { record, .. } | Self::Touch { record } => {
                record.external_order_id
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Applied,
    /// A create found the order already materialized; nothing was written.
    AlreadyExists,
    /// An update found a newer document version; nothing was written.
    VersionConflict,
}

#[async_trait]
pub trait SyncStore: Send + Sync {
    async fn get_sync_record(&self, external_order_id: i64)
        -> Result<Option<SyncRecord>, ServiceError>;

    async fn get_sync_records(
        &self,
        external_order_ids: &[i64],
    ) -> Result<Vec<SyncRecord>, ServiceError>;

    /// Stores the error on an existing ledger entry without touching its document link.
    async fn record_failure(
        &self,
        external_order_id: i64,
        origin: SyncOrigin,
        error: &str,
    ) -> Result<(), ServiceError>;

    /// Contiguous backfill watermark derived from ledger entries and page marks.
    async fn checkpoint(&self) -> Result<CheckpointCursor, ServiceError>;

    /// Records that a backfill page was fetched and every order on it was
    /// processed, so the watermark can pass pages that wrote no ledger entry.
    async fn mark_page_done(&self, page: u32) -> Result<(), ServiceError>;

    async fn get_document(&self, id: Uuid) -> Result<Option<FinancialDocument>, ServiceError>;

    async fn get_document_by_external_id(
        &self,
        external_order_id: i64,
    ) -> Result<Option<FinancialDocument>, ServiceError>;

    async fn commit(&self, change: DocumentChange) -> Result<CommitOutcome, ServiceError>;

    /// Applies changes in one transaction, each isolated so a failure only discards its own writes.
    async fn commit_batch(
        &self,
        changes: Vec<DocumentChange>,
    ) -> Result<Vec<Result<CommitOutcome, ServiceError>>, ServiceError>;

    async fn find_customer(&self, key: &CustomerKey) -> Result<Option<Customer>, ServiceError>;

    async fn find_customers(&self, keys: &[CustomerKey]) -> Result<Vec<Customer>, ServiceError>;

    /// Inserts unless a customer with the same match key exists; returns the stored row.
    async fn insert_customer_if_absent(&self, customer: Customer)
        -> Result<Customer, ServiceError>;

    async fn update_customer(&self, customer: &Customer) -> Result<(), ServiceError>;

    async fn list_addresses(&self, customer_ids: &[Uuid]) -> Result<Vec<Address>, ServiceError>;

    /// Returns the stored address and whether this call inserted it.
    async fn insert_address_if_absent(
        &self,
        address: Address,
    ) -> Result<(Address, bool), ServiceError>;

    /// Moves the default flag to `address_id`, clearing the previous holder in the same write.
    async fn set_default_address(
        &self,
        customer_id: Uuid,
        address_id: Uuid,
        kind: AddressKind,
    ) -> Result<(), ServiceError>;

    /// Gives `address_id` the flag only if no address of the customer holds it.
    async fn claim_default_address(
        &self,
        customer_id: Uuid,
        address_id: Uuid,
        kind: AddressKind,
    ) -> Result<bool, ServiceError>;

    async fn list_territories(&self) -> Result<Vec<Territory>, ServiceError>;

    async fn get_territory(&self, code: &str) -> Result<Option<Territory>, ServiceError>;

    async fn upsert_territory(&self, territory: Territory) -> Result<(), ServiceError>;

    async fn list_pricing_profiles(&self) -> Result<Vec<PricingProfile>, ServiceError>;

    async fn get_pricing_profile(&self, name: &str)
        -> Result<Option<PricingProfile>, ServiceError>;

    async fn upsert_pricing_profile(&self, profile: PricingProfile) -> Result<(), ServiceError>;

    async fn settlements_for(
        &self,
        document_id: Uuid,
    ) -> Result<Vec<SettlementRecord>, ServiceError>;
}

/// Resume cursor from the pages that have ledger entries or completion marks.
pub(crate) fn contiguous_checkpoint(
    mut pages: Vec<u32>,
    last_id_on_page: impl Fn(u32) -> Option<i64>,
) -> CheckpointCursor {
    pages.sort_unstable();
    pages.dedup();
    let mut last_page = 0;
    for page in pages {
        if page == last_page + 1 {
            last_page = page;
        } else if page > last_page + 1 {
            break;
        }
    }
    CheckpointCursor {
        last_page,
        last_external_id: if last_page == 0 {
            None
        } else {
            last_id_on_page(last_page)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_stops_at_first_gap() {
        let cursor = contiguous_checkpoint(vec![3, 1, 2, 5, 2], |p| Some(p as i64 * 100));
        assert_eq!(cursor.last_page, 3);
        assert_eq!(cursor.last_external_id, Some(300));
    }

    #[test]
    fn checkpoint_without_first_page_is_empty() {
        let cursor = contiguous_checkpoint(vec![2, 3], |_| Some(1));
        assert_eq!(cursor, CheckpointCursor::default());
    }
}
