#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use storefront_sync::{
    config::AppConfig,
    models::{
        AddressBlock, DeliveryArea, ExternalCustomer, ExternalOrder, LineItem, OrderStatus,
        Territory,
    },
    repositories::{InMemorySyncStore, SyncStore},
    services::OrderSyncCoordinator,
    storefront::{CustomerPage, OrderFilter, OrderPage, StorefrontClient, StorefrontError},
};

pub const MAADI: &str = "Maadi - المعادي";
pub const NASR_CITY: &str = "Nasr City - مدينه نصر";

pub fn config() -> AppConfig {
    let mut cfg = AppConfig::new("sqlite::memory:".to_string(), "http://shop.test".to_string());
    cfg.db_max_connections = 1;
    cfg.db_min_connections = 1;
    cfg.sync.commit_every = 2;
    cfg.sync.attempt_timeout_secs = 10;
    cfg.payments.settlement_account = Some("Kashier Clearing".to_string());
    cfg
}

pub fn address(state: &str) -> AddressBlock {
    AddressBlock {
        first_name: "Mona".into(),
        last_name: "Adel".into(),
        email: Some("mona@example.com".into()),
        phone: Some("01001234567".into()),
        line1: "5 Tahrir St".into(),
        city: "Cairo".into(),
        state: state.into(),
        country: "EG".into(),
        ..Default::default()
    }
}

pub fn line(line_id: i64, product_id: i64, price: Decimal, quantity: i64) -> LineItem {
    LineItem {
        line_id,
        product_id,
        sku: Some(format!("SKU-{}", product_id)),
        name: format!("Product {}", product_id),
        quantity,
        unit_price: price,
        is_bundle_parent: false,
        parent_link: None,
    }
}

/// One plain line of 2 x 50.00 shipped to Maadi.
pub fn order(id: i64, status: &str) -> ExternalOrder {
    ExternalOrder {
        id,
        number: id.to_string(),
        status: OrderStatus::parse(status),
        currency: "EGP".into(),
        total: dec!(100),
        line_items: vec![line(1, 7, dec!(50), 2)],
        billing: Some(address(MAADI)),
        shipping: None,
        customer_id: Some(id % 7 + 1),
        payment_method: Some("cod".into()),
        meta: vec![],
        created_at: None,
        modified_at: None,
    }
}

/// Bundle of 100.00 priced from two children listed at 60.00 and 40.00.
pub fn bundle_order(id: i64, status: &str) -> ExternalOrder {
    let mut order = order(id, status);
    order.line_items = vec![
        LineItem {
            is_bundle_parent: true,
            ..line(10, 90, dec!(100.00), 1)
        },
        LineItem {
            parent_link: Some(90),
            ..line(11, 91, dec!(60.00), 1)
        },
        LineItem {
            parent_link: Some(90),
            ..line(12, 92, dec!(40.00), 1)
        },
    ];
    order
}

pub async fn seeded_store() -> Arc<InMemorySyncStore> {
    let store = Arc::new(InMemorySyncStore::new());
    seed_territories(store.as_ref()).await;
    store
}

pub async fn seed_territories(store: &dyn SyncStore) {
    for (code, label, charge) in [
        ("EGMAADI", MAADI, Some(dec!(25))),
        ("EGNASRCITY", NASR_CITY, None),
    ] {
        store
            .upsert_territory(Territory {
                code: code.into(),
                labels: vec![label.into()],
                pricing_profile: None,
                delivery_charge: charge,
            })
            .await
            .expect("seed territory");
    }
}

pub fn coordinator(store: Arc<dyn SyncStore>) -> OrderSyncCoordinator {
    OrderSyncCoordinator::new(store, &config())
}

/// Storefront double serving fixed pages and recording what was asked for.
#[derive(Default)]
pub struct FakeStorefront {
    pages: BTreeMap<u32, Vec<ExternalOrder>>,
    failing_pages: HashSet<u32>,
    fetched: Mutex<Vec<u32>>,
    filters: Mutex<Vec<OrderFilter>>,
    areas: Vec<DeliveryArea>,
    customer_pages: BTreeMap<u32, Vec<ExternalCustomer>>,
    fetched_customers: Mutex<Vec<u32>>,
}

impl FakeStorefront {
    pub fn with_pages(pages: Vec<Vec<ExternalOrder>>) -> Self {
        Self {
            pages: pages
                .into_iter()
                .enumerate()
                .map(|(i, orders)| (i as u32 + 1, orders))
                .collect(),
            ..Default::default()
        }
    }

    pub fn failing_on(mut self, page: u32) -> Self {
        self.failing_pages.insert(page);
        self
    }

    pub fn with_areas(mut self, areas: Vec<DeliveryArea>) -> Self {
        self.areas = areas;
        self
    }

    pub fn with_customer_pages(mut self, pages: Vec<Vec<ExternalCustomer>>) -> Self {
        self.customer_pages = pages
            .into_iter()
            .enumerate()
            .map(|(i, customers)| (i as u32 + 1, customers))
            .collect();
        self
    }

    pub fn fetched_customer_pages(&self) -> Vec<u32> {
        self.fetched_customers.lock().unwrap().clone()
    }

    pub fn fetched_pages(&self) -> Vec<u32> {
        self.fetched.lock().unwrap().clone()
    }

    pub fn requested_filters(&self) -> Vec<OrderFilter> {
        self.filters.lock().unwrap().clone()
    }

    pub fn clear_fetched(&self) {
        self.fetched.lock().unwrap().clear();
    }
}

#[async_trait]
impl StorefrontClient for FakeStorefront {
    async fn fetch_orders(
        &self,
        page: u32,
        _page_size: u32,
        filter: &OrderFilter,
    ) -> Result<OrderPage, StorefrontError> {
        self.fetched.lock().unwrap().push(page);
        self.filters.lock().unwrap().push(filter.clone());
        if self.failing_pages.contains(&page) {
            return Err(StorefrontError::Transient(format!("page {} unavailable", page)));
        }
        Ok(OrderPage {
            orders: self.pages.get(&page).cloned().unwrap_or_default(),
            rejected: vec![],
            total_pages: Some(self.pages.len() as u32),
        })
    }

    async fn fetch_order(&self, id: i64) -> Result<ExternalOrder, StorefrontError> {
        self.pages
            .values()
            .flatten()
            .find(|o| o.id == id)
            .cloned()
            .ok_or_else(|| StorefrontError::Api {
                status: 404,
                message: format!("order {} not found", id),
            })
    }

    async fn fetch_delivery_areas(&self) -> Result<Vec<DeliveryArea>, StorefrontError> {
        Ok(self.areas.clone())
    }

    async fn fetch_customers(
        &self,
        page: u32,
        _page_size: u32,
    ) -> Result<CustomerPage, StorefrontError> {
        self.fetched_customers.lock().unwrap().push(page);
        Ok(CustomerPage {
            customers: self.customer_pages.get(&page).cloned().unwrap_or_default(),
            rejected: vec![],
            total_pages: Some(self.customer_pages.len() as u32),
        })
    }
}

/// Storefront account with a Maadi billing address.
pub fn account(id: i64, email: &str) -> ExternalCustomer {
    let mut billing = address(MAADI);
    billing.email = Some(email.to_string());
    ExternalCustomer {
        external_id: Some(id.to_string()),
        display_name: format!("Account {}", id),
        email: Some(email.to_string()),
        phone: None,
        billing: Some(billing),
        shipping: None,
    }
}
