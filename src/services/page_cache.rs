//! Read-only lookups pre-resolved for one page of orders.
//!
//! A miss means "not known when the page started"; callers fall back to the
//! store so rows created earlier in the same page are still found.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::territory_resolver::TerritoryResolver;
use crate::errors::ServiceError;
use crate::models::{
    Address, Customer, CustomerKey, ExternalCustomer, ExternalOrder, PricingProfile, SyncRecord,
    Territory,
};
use crate::repositories::SyncStore;

#[derive(Debug, Clone, Default)]
pub struct PageCache {
    territories: Arc<TerritoryResolver>,
    territory_rows: HashMap<String, Territory>,
    profiles: HashMap<String, PricingProfile>,
    customers: Vec<Customer>,
    addresses: HashMap<Uuid, Vec<Address>>,
    records: HashMap<i64, SyncRecord>,
}

impl PageCache {
    pub async fn build(
        store: &dyn SyncStore,
        orders: &[ExternalOrder],
        label_overrides: &HashMap<String, String>,
    ) -> Result<Self, ServiceError> {
        let territory_list = store.list_territories().await?;
        let territories = Arc::new(TerritoryResolver::new(&territory_list, label_overrides));
        let territory_rows = territory_list
            .into_iter()
            .map(|t| (t.code.clone(), t))
            .collect();
        let profiles = store
            .list_pricing_profiles()
            .await?
            .into_iter()
            .map(|p| (p.name.clone(), p))
            .collect();

        let keys: Vec<CustomerKey> = orders
            .iter()
            .flat_map(|o| ExternalCustomer::from_order(o).keys())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let customers = store.find_customers(&keys).await?;
        let customer_ids: Vec<Uuid> = customers.iter().map(|c| c.id).collect();
        let mut addresses: HashMap<Uuid, Vec<Address>> = HashMap::new();
        for address in store.list_addresses(&customer_ids).await? {
            addresses.entry(address.customer_id).or_default().push(address);
        }

        let ids: Vec<i64> = orders.iter().map(|o| o.id).collect();
        let records = store
            .get_sync_records(&ids)
            .await?
            .into_iter()
            .map(|r| (r.external_order_id, r))
            .collect();

        debug!(
            orders = orders.len(),
            customers = customers.len(),
            "Built page lookup cache"
        );

        Ok(Self {
            territories,
            territory_rows,
            profiles,
            customers,
            addresses,
            records,
        })
    }

    pub fn territories(&self) -> Arc<TerritoryResolver> {
        Arc::clone(&self.territories)
    }

    pub fn territory(&self, code: &str) -> Option<&Territory> {
        self.territory_rows.get(code)
    }

    pub fn profile(&self, name: &str) -> Option<&PricingProfile> {
        self.profiles.get(name)
    }

    /// Oldest customer matching the key, like the store lookup.
    pub fn find_customer(&self, key: &CustomerKey) -> Option<&Customer> {
        let match_key = key.match_key();
        self.customers
            .iter()
            .filter(|c| c.match_key == match_key || c.matches(key))
            .min_by_key(|c| c.created_at)
    }

    pub fn addresses_for(&self, customer_id: Uuid) -> &[Address] {
        self.addresses
            .get(&customer_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn sync_record(&self, external_order_id: i64) -> Option<&SyncRecord> {
        self.records.get(&external_order_id)
    }
}
