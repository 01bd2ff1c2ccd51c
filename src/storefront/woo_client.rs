use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use metrics::counter;
use serde::Deserialize;
use serde_json::Value;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::payload::{decode_customer, decode_order, WooOrder};
use super::{CustomerPage, OrderFilter, OrderPage, StorefrontClient, StorefrontError};
use crate::config::{StorefrontConfig, STOREFRONT_MAX_PAGE_SIZE};
use crate::models::{DeliveryArea, ExternalOrder};
use crate::retry::{with_retry, RetryConfig, StorefrontRetryPolicy};

const TOTAL_PAGES_HEADER: &str = "x-wp-totalpages";
const DELIVERY_AREAS_ROUTE: &str = "wp-json/jarz/v1/delivery-areas";

#[derive(Debug, Deserialize)]
struct DeliveryAreasBody {
    #[serde(default)]
    areas: Vec<DeliveryArea>,
}

/// WooCommerce REST client authenticated with consumer key and secret.
#[derive(Clone)]
pub struct WooClient {
    http: reqwest::Client,
    base_url: String,
    consumer_key: String,
    consumer_secret: String,
    api_version: String,
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    retry: RetryConfig,
}

impl WooClient {
    pub fn new(cfg: &StorefrontConfig) -> Result<Self, StorefrontError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .gzip(true)
            .build()
            .map_err(|e| StorefrontError::Transient(e.to_string()))?;
        let per_minute = NonZeroU32::new(cfg.requests_per_minute).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            consumer_key: cfg.consumer_key.clone(),
            consumer_secret: cfg.consumer_secret.clone(),
            api_version: cfg.api_version.clone(),
            limiter: Arc::new(RateLimiter::direct(Quota::per_minute(per_minute))),
            retry: RetryConfig::default(),
        })
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn url(&self, resource: &str) -> String {
        let resource = resource.trim_start_matches('/');
        if resource.starts_with("wp-json") {
            format!("{}/{}", self.base_url, resource)
        } else {
            format!("{}/wp-json/wc/{}/{}", self.base_url, self.api_version, resource)
        }
    }

    async fn get_once(
        &self,
        resource: &str,
        query: &[(&str, String)],
    ) -> Result<(Value, Option<u32>), StorefrontError> {
        self.limiter.until_ready().await;

        let response = self
            .http
            .get(self.url(resource))
            .query(query)
            .query(&[
                ("consumer_key", self.consumer_key.as_str()),
                ("consumer_secret", self.consumer_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| StorefrontError::Transient(e.to_string()))?;

        let status = response.status();
        let total_pages = response
            .headers()
            .get(TOTAL_PAGES_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok());

        if !status.is_success() {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("HTTP error")
                .to_string();
            return Err(StorefrontError::from_status(status.as_u16(), message));
        }

        let body = response
            .json::<Value>()
            .await
            .map_err(|e| StorefrontError::Decode(e.to_string()))?;
        Ok((body, total_pages))
    }

    async fn get(
        &self,
        resource: &str,
        query: &[(&str, String)],
    ) -> Result<(Value, Option<u32>), StorefrontError> {
        let mut attempt = 0;
        with_retry(&self.retry, StorefrontRetryPolicy, || {
            attempt += 1;
            if attempt > 1 {
                counter!("storefront_sync.upstream_retries", 1);
            }
            self.get_once(resource, query)
        })
        .await
    }
}

#[async_trait]
impl StorefrontClient for WooClient {
    #[instrument(skip(self, filter))]
    async fn fetch_orders(
        &self,
        page: u32,
        page_size: u32,
        filter: &OrderFilter,
    ) -> Result<OrderPage, StorefrontError> {
        let mut query = vec![
            ("page", page.max(1).to_string()),
            (
                "per_page",
                page_size.clamp(1, STOREFRONT_MAX_PAGE_SIZE).to_string(),
            ),
            ("order", filter.order.to_string()),
            (
                "orderby",
                if filter.by_modified { "modified" } else { "id" }.to_string(),
            ),
        ];
        if !filter.statuses.is_empty() {
            query.push(("status", filter.statuses.join(",")));
        }
        if let Some(after) = filter.modified_after {
            query.push(("modified_after", after.format("%Y-%m-%dT%H:%M:%S").to_string()));
        }

        let (body, total_pages) = self.get("orders", &query).await?;
        let Value::Array(items) = body else {
            return Err(StorefrontError::Decode(
                "order listing is not an array".to_string(),
            ));
        };

        let mut result = OrderPage {
            total_pages,
            ..Default::default()
        };
        for item in items {
            match decode_order(item) {
                Ok(order) => result.orders.push(order),
                Err((id, message)) => {
                    warn!(page, external_id = ?id, error = %message, "Skipping undecodable order");
                    result.rejected.push((id, message));
                }
            }
        }
        debug!(page, count = result.orders.len(), "Fetched order page");
        Ok(result)
    }

    #[instrument(skip(self))]
    async fn fetch_order(&self, id: i64) -> Result<ExternalOrder, StorefrontError> {
        let (body, _) = self.get(&format!("orders/{}", id), &[]).await?;
        serde_json::from_value::<WooOrder>(body)
            .map_err(|e| StorefrontError::Decode(e.to_string()))?
            .into_order()
    }

    #[instrument(skip(self))]
    async fn fetch_delivery_areas(&self) -> Result<Vec<DeliveryArea>, StorefrontError> {
        let (body, _) = self.get(DELIVERY_AREAS_ROUTE, &[]).await?;
        let parsed: DeliveryAreasBody =
            serde_json::from_value(body).map_err(|e| StorefrontError::Decode(e.to_string()))?;
        Ok(parsed.areas)
    }

    #[instrument(skip(self))]
    async fn fetch_customers(
        &self,
        page: u32,
        page_size: u32,
    ) -> Result<CustomerPage, StorefrontError> {
        let query = [
            ("page", page.max(1).to_string()),
            (
                "per_page",
                page_size.clamp(1, STOREFRONT_MAX_PAGE_SIZE).to_string(),
            ),
            ("order", "asc".to_string()),
            ("orderby", "id".to_string()),
        ];
        let (body, total_pages) = self.get("customers", &query).await?;
        let Value::Array(items) = body else {
            return Err(StorefrontError::Decode(
                "customer listing is not an array".to_string(),
            ));
        };

        let mut result = CustomerPage {
            total_pages,
            ..Default::default()
        };
        for item in items {
            match decode_customer(item) {
                Ok(customer) => result.customers.push(customer),
                Err((id, message)) => {
                    warn!(page, customer_id = ?id, error = %message, "Skipping undecodable customer");
                    result.rejected.push((id, message));
                }
            }
        }
        debug!(page, count = result.customers.len(), "Fetched customer page");
        Ok(result)
    }
}
