use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::page_cache::PageCache;
use super::territory_resolver::{TerritoryMatch, TerritoryResolver};
use crate::errors::ServiceError;
use crate::models::{Address, AddressBlock, AddressKind, Customer, ExternalCustomer};
use crate::repositories::SyncStore;

/// Customer and addresses a document should point at.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCustomer {
    pub customer: Customer,
    pub billing_address_id: Uuid,
    pub shipping_address_id: Uuid,
    pub territory: TerritoryMatch,
    pub created: bool,
}

/// Idempotent upsert of the customer behind an order.
#[derive(Clone)]
pub struct CustomerResolver {
    store: Arc<dyn SyncStore>,
}

impl CustomerResolver {
    pub fn new(store: Arc<dyn SyncStore>) -> Self {
        Self { store }
    }

    #[instrument(skip_all, fields(display_name = %external.display_name))]
    pub async fn resolve_or_create(
        &self,
        external: &ExternalCustomer,
        territories: &TerritoryResolver,
        cache: Option<&PageCache>,
    ) -> Result<ResolvedCustomer, ServiceError> {
        let billing_block = external.billing.as_ref().or(external.shipping.as_ref());
        let shipping_block = external.shipping.as_ref().or(external.billing.as_ref());
        let (Some(billing_block), Some(shipping_block)) = (billing_block, shipping_block) else {
            return Err(ServiceError::ValidationError(
                "order carries no usable billing or shipping address".to_string(),
            ));
        };

        let (mut customer, created) = self.find_or_insert(external, cache).await?;
        let mut dirty = backfill_contact(&mut customer, external);

        let mut inserted_now = HashSet::new();
        let billing = self
            .sync_address(&customer, billing_block, AddressKind::Billing, cache, &mut inserted_now)
            .await?;
        let shipping = self
            .sync_address(&customer, shipping_block, AddressKind::Shipping, cache, &mut inserted_now)
            .await?;

        let territory = resolve_territory(territories, shipping_block, billing_block);
        if let Some(code) = territory.code.as_deref() {
            if customer.territory_locked {
                debug!(customer_id = %customer.id, "Territory locked, keeping operator value");
            } else if customer.territory.as_deref() != Some(code) {
                info!(
                    customer_id = %customer.id,
                    from = ?customer.territory,
                    to = code,
                    "Updating customer territory"
                );
                customer.territory = Some(code.to_string());
                dirty = true;
            }
        }

        if dirty {
            customer.updated_at = Utc::now();
            self.store.update_customer(&customer).await?;
        }

        Ok(ResolvedCustomer {
            customer,
            billing_address_id: billing,
            shipping_address_id: shipping,
            territory,
            created,
        })
    }

    /// Upserts the customer row alone, for accounts without a usable address.
    pub async fn upsert_contact(
        &self,
        external: &ExternalCustomer,
        cache: Option<&PageCache>,
    ) -> Result<(Customer, bool), ServiceError> {
        let (mut customer, created) = self.find_or_insert(external, cache).await?;
        if backfill_contact(&mut customer, external) {
            customer.updated_at = Utc::now();
            self.store.update_customer(&customer).await?;
        }
        Ok((customer, created))
    }

    async fn find_or_insert(
        &self,
        external: &ExternalCustomer,
        cache: Option<&PageCache>,
    ) -> Result<(Customer, bool), ServiceError> {
        let keys = external.keys();
        let Some(primary) = keys.first() else {
            return Err(ServiceError::ValidationError(
                "order has no customer id, email or phone".to_string(),
            ));
        };

        for key in &keys {
            if let Some(found) = cache.and_then(|c| c.find_customer(key)) {
                return Ok((found.clone(), false));
            }
            if let Some(found) = self.store.find_customer(key).await? {
                return Ok((found, false));
            }
        }

        let now = Utc::now();
        let candidate = Customer {
            id: Uuid::new_v4(),
            match_key: primary.match_key(),
            external_id: external.external_id.clone(),
            display_name: external.display_name.clone(),
            email: external.email.clone(),
            phone: external.phone.clone(),
            territory: None,
            territory_locked: false,
            created_at: now,
            updated_at: now,
        };
        let candidate_id = candidate.id;
        let stored = self.store.insert_customer_if_absent(candidate).await?;
        let created = stored.id == candidate_id;
        if created {
            info!(customer_id = %stored.id, match_key = %stored.match_key, "Created customer");
        }
        Ok((stored, created))
    }

    async fn sync_address(
        &self,
        customer: &Customer,
        block: &AddressBlock,
        kind: AddressKind,
        cache: Option<&PageCache>,
        inserted_now: &mut HashSet<Uuid>,
    ) -> Result<Uuid, ServiceError> {
        let candidate = Address::from_block(customer.id, block);
        let cached = cache.and_then(|c| {
            c.addresses_for(customer.id)
                .iter()
                .find(|a| a.fingerprint == candidate.fingerprint)
                .cloned()
        });

        let (address, inserted) = match cached {
            Some(existing) => (existing, false),
            None => self.store.insert_address_if_absent(candidate).await?,
        };
        if inserted {
            inserted_now.insert(address.id);
        }

        if inserted_now.contains(&address.id) {
            self.store
                .set_default_address(customer.id, address.id, kind)
                .await?;
        } else if !address.is_default(kind) {
            self.store
                .claim_default_address(customer.id, address.id, kind)
                .await?;
        }
        Ok(address.id)
    }
}

/// Fills contact fields the stored customer is missing.
fn backfill_contact(customer: &mut Customer, external: &ExternalCustomer) -> bool {
    let mut changed = false;
    if customer.email.is_none() && external.email.is_some() {
        customer.email = external.email.clone();
        changed = true;
    }
    if customer.phone.is_none() && external.phone.is_some() {
        customer.phone = external.phone.clone();
        changed = true;
    }
    if customer.external_id.is_none() && external.external_id.is_some() {
        customer.external_id = external.external_id.clone();
        changed = true;
    }
    changed
}

fn resolve_territory(
    territories: &TerritoryResolver,
    shipping: &AddressBlock,
    billing: &AddressBlock,
) -> TerritoryMatch {
    let from_shipping = territories.resolve(&shipping.state);
    if from_shipping.matched {
        return from_shipping;
    }
    territories.resolve(&billing.state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Territory;
    use crate::repositories::InMemorySyncStore;
    use assert_matches::assert_matches;
    use std::collections::HashMap;

    fn block(line1: &str, state: &str) -> AddressBlock {
        AddressBlock {
            first_name: "Mona".into(),
            last_name: "Adel".into(),
            line1: line1.into(),
            city: "Cairo".into(),
            state: state.into(),
            country: "EG".into(),
            ..Default::default()
        }
    }

    fn external(email: Option<&str>, phone: Option<&str>, shipping: Option<AddressBlock>) -> ExternalCustomer {
        ExternalCustomer {
            external_id: None,
            display_name: "Mona Adel".into(),
            email: email.map(str::to_string),
            phone: phone.map(str::to_string),
            billing: Some(block("5 Tahrir St", "Nasr City - مدينه نصر")),
            shipping,
        }
    }

    fn territories() -> TerritoryResolver {
        TerritoryResolver::new(
            &[
                Territory {
                    code: "EGNASRCITY".into(),
                    labels: vec!["Nasr City - مدينه نصر".into()],
                    pricing_profile: None,
                    delivery_charge: None,
                },
                Territory {
                    code: "EGMAADI".into(),
                    labels: vec!["Maadi - المعادي".into()],
                    pricing_profile: None,
                    delivery_charge: None,
                },
            ],
            &HashMap::new(),
        )
    }

    #[tokio::test]
    async fn matches_by_email_before_creating() {
        let store = Arc::new(InMemorySyncStore::new());
        let resolver = CustomerResolver::new(store.clone());

        let first = resolver
            .resolve_or_create(&external(Some("mona@example.com"), None, None), &territories(), None)
            .await
            .unwrap();
        assert!(first.created);

        let second = resolver
            .resolve_or_create(
                &external(Some("mona@example.com"), Some("+201001234567"), None),
                &territories(),
                None,
            )
            .await
            .unwrap();
        assert!(!second.created);
        assert_eq!(second.customer.id, first.customer.id);
        assert_eq!(second.customer.phone.as_deref(), Some("+201001234567"));
        assert_eq!(store.customer_count(), 1);
    }

    #[tokio::test]
    async fn missing_shipping_reuses_billing_with_both_defaults() {
        let store = Arc::new(InMemorySyncStore::new());
        let resolver = CustomerResolver::new(store.clone());
        let resolved = resolver
            .resolve_or_create(&external(Some("a@b.co"), None, None), &territories(), None)
            .await
            .unwrap();

        assert_eq!(resolved.billing_address_id, resolved.shipping_address_id);
        let addresses = store.list_addresses(&[resolved.customer.id]).await.unwrap();
        assert_eq!(addresses.len(), 1);
        assert!(addresses[0].is_default_billing && addresses[0].is_default_shipping);
        assert_eq!(resolved.customer.territory.as_deref(), Some("EGNASRCITY"));
    }

    #[tokio::test]
    async fn new_shipping_address_takes_the_flag() {
        let store = Arc::new(InMemorySyncStore::new());
        let resolver = CustomerResolver::new(store.clone());
        let first = resolver
            .resolve_or_create(&external(Some("a@b.co"), None, None), &territories(), None)
            .await
            .unwrap();
        let second = resolver
            .resolve_or_create(
                &external(Some("a@b.co"), None, Some(block("9 Road 9", "Maadi - المعادي"))),
                &territories(),
                None,
            )
            .await
            .unwrap();

        let addresses = store.list_addresses(&[first.customer.id]).await.unwrap();
        assert_eq!(addresses.len(), 2);
        let shipping_holders: Vec<_> = addresses.iter().filter(|a| a.is_default_shipping).collect();
        assert_eq!(shipping_holders.len(), 1);
        assert_eq!(shipping_holders[0].id, second.shipping_address_id);
        assert_eq!(addresses.iter().filter(|a| a.is_default_billing).count(), 1);
        assert_eq!(second.customer.territory.as_deref(), Some("EGMAADI"));
    }

    #[tokio::test]
    async fn unresolved_zone_never_downgrades_territory() {
        let store = Arc::new(InMemorySyncStore::new());
        let resolver = CustomerResolver::new(store.clone());
        resolver
            .resolve_or_create(&external(Some("a@b.co"), None, None), &territories(), None)
            .await
            .unwrap();

        let mut unknown = external(Some("a@b.co"), None, None);
        unknown.billing = Some(block("5 Tahrir St", "Atlantis"));
        let resolved = resolver
            .resolve_or_create(&unknown, &territories(), None)
            .await
            .unwrap();
        assert!(!resolved.territory.matched);
        assert_eq!(resolved.customer.territory.as_deref(), Some("EGNASRCITY"));
    }

    #[tokio::test]
    async fn locked_territory_is_kept() {
        let store = Arc::new(InMemorySyncStore::new());
        let resolver = CustomerResolver::new(store.clone());
        let mut first = resolver
            .resolve_or_create(&external(Some("a@b.co"), None, None), &territories(), None)
            .await
            .unwrap()
            .customer;
        first.territory = Some("EGMAADI".into());
        first.territory_locked = true;
        store.update_customer(&first).await.unwrap();

        let resolved = resolver
            .resolve_or_create(&external(Some("a@b.co"), None, None), &territories(), None)
            .await
            .unwrap();
        assert_eq!(resolved.customer.territory.as_deref(), Some("EGMAADI"));
    }

    #[tokio::test]
    async fn orders_without_address_or_identity_are_rejected() {
        let store = Arc::new(InMemorySyncStore::new());
        let resolver = CustomerResolver::new(store);

        let mut no_address = external(Some("a@b.co"), None, None);
        no_address.billing = None;
        assert_matches!(
            resolver.resolve_or_create(&no_address, &territories(), None).await,
            Err(ServiceError::ValidationError(_))
        );

        let anonymous = external(None, None, None);
        assert_matches!(
            resolver.resolve_or_create(&anonymous, &territories(), None).await,
            Err(ServiceError::ValidationError(_))
        );
    }
}
