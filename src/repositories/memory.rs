use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{contiguous_checkpoint, CommitOutcome, DocumentChange, SyncStore};
use crate::errors::ServiceError;
use crate::models::{
    Address, AddressKind, CheckpointCursor, Customer, CustomerKey, FinancialDocument,
    PricingProfile, SettlementRecord, SyncOrigin, SyncOutcome, SyncRecord, Territory,
};

#[derive(Debug, Default)]
struct State {
    records: HashMap<i64, SyncRecord>,
    documents: HashMap<Uuid, FinancialDocument>,
    documents_by_order: HashMap<i64, Uuid>,
    customers: HashMap<Uuid, Customer>,
    addresses: HashMap<Uuid, Address>,
    territories: BTreeMap<String, Territory>,
    profiles: BTreeMap<String, PricingProfile>,
    settlements: HashMap<String, SettlementRecord>,
    pages_done: BTreeSet<u32>,
}

impl State {
    fn apply(&mut self, change: &DocumentChange) -> Result<CommitOutcome, ServiceError> {
        match change {
            DocumentChange::Create {
                document,
                record,
                settlement,
            } => {
                if self.records.contains_key(&record.external_order_id)
                    || self.documents_by_order.contains_key(&document.external_order_id)
                {
                    return Ok(CommitOutcome::AlreadyExists);
                }
                if self.documents.contains_key(&document.id) {
                    return Err(ServiceError::database_error_message(format!(
                        "duplicate document id {}",
                        document.id
                    )));
                }
                self.documents_by_order
                    .insert(document.external_order_id, document.id);
                self.documents.insert(document.id, document.clone());
                self.records
                    .insert(record.external_order_id, record.clone());
                self.insert_settlement(settlement);
                Ok(CommitOutcome::Applied)
            }
            DocumentChange::Update {
                document,
                expected_version,
                record,
                settlement,
                ..
            } => {
                let stored = self.documents.get(&document.id).ok_or_else(|| {
                    ServiceError::NotFound(format!("document {}", document.id))
                })?;
                if stored.version != *expected_version {
                    return Ok(CommitOutcome::VersionConflict);
                }
                if stored.external_order_id != document.external_order_id {
                    return Err(ServiceError::database_error_message(format!(
                        "document {} belongs to order {}",
                        document.id, stored.external_order_id
                    )));
                }
                self.documents.insert(document.id, document.clone());
                self.records
                    .insert(record.external_order_id, record.clone());
                self.insert_settlement(settlement);
                Ok(CommitOutcome::Applied)
            }
            DocumentChange::Touch { record } => {
                if let Some(stored) = self.records.get_mut(&record.external_order_id) {
                    stored.outcome = record.outcome;
                    stored.origin = record.origin;
                    stored.last_error = record.last_error.clone();
                    stored.synced_at = record.synced_at;
                }
                Ok(CommitOutcome::Applied)
            }
        }
    }

    fn insert_settlement(&mut self, settlement: &Option<SettlementRecord>) {
        let Some(settlement) = settlement else {
            return;
        };
        // One settlement per document, whatever its category.
        if self
            .settlements
            .values()
            .any(|s| s.document_id == settlement.document_id)
        {
            return;
        }
        self.settlements
            .entry(settlement.idempotency_key.clone())
            .or_insert_with(|| settlement.clone());
    }

    fn find_customer(&self, key: &CustomerKey) -> Option<&Customer> {
        let match_key = key.match_key();
        self.customers
            .values()
            .find(|c| c.match_key == match_key)
            .or_else(|| {
                let mut matches: Vec<&Customer> =
                    self.customers.values().filter(|c| c.matches(key)).collect();
                matches.sort_by_key(|c| c.created_at);
                matches.into_iter().next()
            })
    }
}

/// Process-local store. Every operation takes one lock, so each call is atomic.
#[derive(Debug, Default)]
pub struct InMemorySyncStore {
    state: Mutex<State>,
}

impl InMemorySyncStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, ServiceError> {
        self.state
            .lock()
            .map_err(|_| ServiceError::InternalError("in-memory store lock poisoned".into()))
    }

    /// Number of materialized documents.
    pub fn document_count(&self) -> usize {
        self.lock().map(|s| s.documents.len()).unwrap_or_default()
    }

    pub fn customer_count(&self) -> usize {
        self.lock().map(|s| s.customers.len()).unwrap_or_default()
    }
}

#[async_trait]
impl SyncStore for InMemorySyncStore {
    async fn get_sync_record(
        &self,
        external_order_id: i64,
    ) -> Result<Option<SyncRecord>, ServiceError> {
        Ok(self.lock()?.records.get(&external_order_id).cloned())
    }

    async fn get_sync_records(
        &self,
        external_order_ids: &[i64],
    ) -> Result<Vec<SyncRecord>, ServiceError> {
        let state = self.lock()?;
        Ok(external_order_ids
            .iter()
            .filter_map(|id| state.records.get(id).cloned())
            .collect())
    }

    async fn record_failure(
        &self,
        external_order_id: i64,
        origin: SyncOrigin,
        error: &str,
    ) -> Result<(), ServiceError> {
        if let Some(record) = self.lock()?.records.get_mut(&external_order_id) {
            record.outcome = SyncOutcome::Errored;
            record.origin = origin;
            record.last_error = Some(error.to_string());
            record.synced_at = Utc::now();
        }
        Ok(())
    }

    async fn checkpoint(&self) -> Result<CheckpointCursor, ServiceError> {
        let state = self.lock()?;
        let pages = state
            .records
            .values()
            .filter_map(|r| r.source_page)
            .chain(state.pages_done.iter().copied())
            .collect();
        Ok(contiguous_checkpoint(pages, |page| {
            state
                .records
                .values()
                .filter(|r| r.source_page == Some(page))
                .map(|r| r.external_order_id)
                .max()
        }))
    }

    async fn mark_page_done(&self, page: u32) -> Result<(), ServiceError> {
        self.lock()?.pages_done.insert(page);
        Ok(())
    }

    async fn get_document(&self, id: Uuid) -> Result<Option<FinancialDocument>, ServiceError> {
        Ok(self.lock()?.documents.get(&id).cloned())
    }

    async fn get_document_by_external_id(
        &self,
        external_order_id: i64,
    ) -> Result<Option<FinancialDocument>, ServiceError> {
        let state = self.lock()?;
        Ok(state
            .documents_by_order
            .get(&external_order_id)
            .and_then(|id| state.documents.get(id))
            .cloned())
    }

    async fn commit(&self, change: DocumentChange) -> Result<CommitOutcome, ServiceError> {
        self.lock()?.apply(&change)
    }

    async fn commit_batch(
        &self,
        changes: Vec<DocumentChange>,
    ) -> Result<Vec<Result<CommitOutcome, ServiceError>>, ServiceError> {
        let mut state = self.lock()?;
        Ok(changes.iter().map(|change| state.apply(change)).collect())
    }

    async fn find_customer(&self, key: &CustomerKey) -> Result<Option<Customer>, ServiceError> {
        Ok(self.lock()?.find_customer(key).cloned())
    }

    async fn find_customers(&self, keys: &[CustomerKey]) -> Result<Vec<Customer>, ServiceError> {
        let state = self.lock()?;
        let mut found: HashMap<Uuid, Customer> = HashMap::new();
        for customer in state.customers.values() {
            if keys
                .iter()
                .any(|k| customer.matches(k) || customer.match_key == k.match_key())
            {
                found.insert(customer.id, customer.clone());
            }
        }
        Ok(found.into_values().collect())
    }

    async fn insert_customer_if_absent(
        &self,
        customer: Customer,
    ) -> Result<Customer, ServiceError> {
        let mut state = self.lock()?;
        if let Some(existing) = state
            .customers
            .values()
            .find(|c| c.match_key == customer.match_key)
        {
            return Ok(existing.clone());
        }
        state.customers.insert(customer.id, customer.clone());
        Ok(customer)
    }

    async fn update_customer(&self, customer: &Customer) -> Result<(), ServiceError> {
        let mut state = self.lock()?;
        match state.customers.get_mut(&customer.id) {
            Some(stored) => {
                *stored = customer.clone();
                Ok(())
            }
            None => Err(ServiceError::NotFound(format!("customer {}", customer.id))),
        }
    }

    async fn list_addresses(&self, customer_ids: &[Uuid]) -> Result<Vec<Address>, ServiceError> {
        let state = self.lock()?;
        let mut addresses: Vec<Address> = state
            .addresses
            .values()
            .filter(|a| customer_ids.contains(&a.customer_id))
            .cloned()
            .collect();
        addresses.sort_by_key(|a| a.created_at);
        Ok(addresses)
    }

    async fn insert_address_if_absent(
        &self,
        address: Address,
    ) -> Result<(Address, bool), ServiceError> {
        let mut state = self.lock()?;
        if let Some(existing) = state.addresses.values().find(|a| {
            a.customer_id == address.customer_id && a.fingerprint == address.fingerprint
        }) {
            return Ok((existing.clone(), false));
        }
        state.addresses.insert(address.id, address.clone());
        Ok((address, true))
    }

    async fn set_default_address(
        &self,
        customer_id: Uuid,
        address_id: Uuid,
        kind: AddressKind,
    ) -> Result<(), ServiceError> {
        let mut state = self.lock()?;
        if !state
            .addresses
            .get(&address_id)
            .is_some_and(|a| a.customer_id == customer_id)
        {
            return Err(ServiceError::NotFound(format!("address {}", address_id)));
        }
        for address in state
            .addresses
            .values_mut()
            .filter(|a| a.customer_id == customer_id)
        {
            address.set_default(kind, address.id == address_id);
        }
        Ok(())
    }

    async fn claim_default_address(
        &self,
        customer_id: Uuid,
        address_id: Uuid,
        kind: AddressKind,
    ) -> Result<bool, ServiceError> {
        let mut state = self.lock()?;
        let held = state
            .addresses
            .values()
            .any(|a| a.customer_id == customer_id && a.is_default(kind));
        if held {
            return Ok(false);
        }
        match state.addresses.get_mut(&address_id) {
            Some(address) if address.customer_id == customer_id => {
                address.set_default(kind, true);
                Ok(true)
            }
            _ => Err(ServiceError::NotFound(format!("address {}", address_id))),
        }
    }

    async fn list_territories(&self) -> Result<Vec<Territory>, ServiceError> {
        Ok(self.lock()?.territories.values().cloned().collect())
    }

    async fn get_territory(&self, code: &str) -> Result<Option<Territory>, ServiceError> {
        Ok(self.lock()?.territories.get(code).cloned())
    }

    async fn upsert_territory(&self, territory: Territory) -> Result<(), ServiceError> {
        self.lock()?
            .territories
            .insert(territory.code.clone(), territory);
        Ok(())
    }

    async fn list_pricing_profiles(&self) -> Result<Vec<PricingProfile>, ServiceError> {
        Ok(self.lock()?.profiles.values().cloned().collect())
    }

    async fn get_pricing_profile(
        &self,
        name: &str,
    ) -> Result<Option<PricingProfile>, ServiceError> {
        Ok(self.lock()?.profiles.get(name).cloned())
    }

    async fn upsert_pricing_profile(&self, profile: PricingProfile) -> Result<(), ServiceError> {
        self.lock()?.profiles.insert(profile.name.clone(), profile);
        Ok(())
    }

    async fn settlements_for(
        &self,
        document_id: Uuid,
    ) -> Result<Vec<SettlementRecord>, ServiceError> {
        Ok(self
            .lock()?
            .settlements
            .values()
            .filter(|s| s.document_id == document_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AddressBlock, OrderStatus};

    fn customer(match_key: &str) -> Customer {
        Customer {
            id: Uuid::new_v4(),
            match_key: match_key.into(),
            external_id: None,
            display_name: "Test".into(),
            email: None,
            phone: None,
            territory: None,
            territory_locked: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn record(id: i64, page: Option<u32>) -> SyncRecord {
        SyncRecord {
            external_order_id: id,
            document_id: Uuid::new_v4(),
            last_status: OrderStatus::Completed,
            last_external_update: None,
            content_hash: "h".into(),
            outcome: SyncOutcome::Created,
            origin: SyncOrigin::Backfill,
            source_page: page,
            last_error: None,
            synced_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn concurrent_customer_inserts_converge() {
        let store = InMemorySyncStore::new();
        let first = store
            .insert_customer_if_absent(customer("email:a@example.com"))
            .await
            .unwrap();
        let second = store
            .insert_customer_if_absent(customer("email:a@example.com"))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.customer_count(), 1);
    }

    #[tokio::test]
    async fn default_flag_moves_atomically() {
        let store = InMemorySyncStore::new();
        let owner = store
            .insert_customer_if_absent(customer("ext:1"))
            .await
            .unwrap();
        let block = |line: &str| AddressBlock {
            line1: line.into(),
            city: "Cairo".into(),
            ..Default::default()
        };
        let (a, _) = store
            .insert_address_if_absent(Address::from_block(owner.id, &block("1 Nile St")))
            .await
            .unwrap();
        let (b, _) = store
            .insert_address_if_absent(Address::from_block(owner.id, &block("2 Nile St")))
            .await
            .unwrap();

        assert!(store
            .claim_default_address(owner.id, a.id, AddressKind::Billing)
            .await
            .unwrap());
        assert!(!store
            .claim_default_address(owner.id, b.id, AddressKind::Billing)
            .await
            .unwrap());
        store
            .set_default_address(owner.id, b.id, AddressKind::Billing)
            .await
            .unwrap();

        let holders: Vec<_> = store
            .list_addresses(&[owner.id])
            .await
            .unwrap()
            .into_iter()
            .filter(|a| a.is_default_billing)
            .collect();
        assert_eq!(holders.len(), 1);
        assert_eq!(holders[0].id, b.id);
    }

    #[tokio::test]
    async fn record_failure_keeps_document_link() {
        let store = InMemorySyncStore::new();
        let rec = record(9, None);
        store.lock().unwrap().records.insert(9, rec.clone());

        store
            .record_failure(9, SyncOrigin::Webhook, "boom")
            .await
            .unwrap();
        let stored = store.get_sync_record(9).await.unwrap().unwrap();
        assert_eq!(stored.document_id, rec.document_id);
        assert_eq!(stored.outcome, SyncOutcome::Errored);
        assert_eq!(stored.last_error.as_deref(), Some("boom"));

        store
            .record_failure(10, SyncOrigin::Webhook, "unseen")
            .await
            .unwrap();
        assert!(store.get_sync_record(10).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn checkpoint_reads_backfill_pages() {
        let store = InMemorySyncStore::new();
        {
            let mut state = store.lock().unwrap();
            for (id, page) in [(1, 1), (2, 1), (3, 2), (7, 4)] {
                state.records.insert(id, record(id, Some(page)));
            }
        }
        let cursor = store.checkpoint().await.unwrap();
        assert_eq!(cursor.last_page, 2);
        assert_eq!(cursor.last_external_id, Some(3));
    }

    #[tokio::test]
    async fn page_marks_close_gaps_without_ledger_entries() {
        let store = InMemorySyncStore::new();
        store.lock().unwrap().records.insert(9, record(9, Some(2)));
        assert_eq!(store.checkpoint().await.unwrap().last_page, 0);

        store.mark_page_done(1).await.unwrap();
        store.mark_page_done(3).await.unwrap();
        let cursor = store.checkpoint().await.unwrap();
        assert_eq!(cursor.last_page, 3);
        assert_eq!(cursor.last_external_id, None);
    }
}
