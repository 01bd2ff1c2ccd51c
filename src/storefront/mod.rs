//! Read side of the storefront REST API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::errors::ServiceError;
use crate::models::{DeliveryArea, ExternalCustomer, ExternalOrder, SyncMode};

pub mod payload;
pub mod woo_client;

pub use payload::{WooAddress, WooCustomer, WooLineItem, WooMeta, WooOrder};
pub use woo_client::WooClient;

#[derive(Debug, Error)]
pub enum StorefrontError {
    /// Network failure, rate limit or 5xx; another attempt may succeed.
    #[error("transient storefront failure: {0}")]
    Transient(String),

    #[error("storefront returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("could not decode storefront response: {0}")]
    Decode(String),
}

impl StorefrontError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Classifies an HTTP status returned by the storefront.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if status == 429 || status >= 500 {
            Self::Transient(format!("{}: {}", status, message))
        } else {
            Self::Api { status, message }
        }
    }
}

impl From<StorefrontError> for ServiceError {
    fn from(err: StorefrontError) -> Self {
        match err {
            StorefrontError::Transient(msg) => ServiceError::TransientUpstream(msg),
            StorefrontError::Api { status: 404, message } => ServiceError::NotFound(message),
            StorefrontError::Api { status, message } => {
                ServiceError::ExternalApiError(format!("{}: {}", status, message))
            }
            StorefrontError::Decode(msg) => ServiceError::ValidationError(msg),
        }
    }
}

/// Sort direction of an order listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ListOrder {
    /// Oldest first by id; keeps page contents stable during a backfill.
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderFilter {
    pub statuses: Vec<String>,
    pub modified_after: Option<DateTime<Utc>>,
    pub order: ListOrder,
    /// Sort by last modification instead of id.
    pub by_modified: bool,
}

impl OrderFilter {
    /// Every order, oldest first.
    pub fn backfill() -> Self {
        Self::default()
    }

    /// Final statuses only, oldest first. Open orders are never materialized
    /// by a historical import, so they are not fetched either.
    pub fn historical() -> Self {
        Self {
            statuses: ["completed", "cancelled", "refunded"]
                .into_iter()
                .map(String::from)
                .collect(),
            ..Default::default()
        }
    }

    pub fn for_backfill(mode: SyncMode) -> Self {
        match mode {
            SyncMode::Historical => Self::historical(),
            SyncMode::Live => Self::backfill(),
        }
    }

    /// Most recently modified first.
    pub fn recent() -> Self {
        Self {
            order: ListOrder::Desc,
            by_modified: true,
            ..Default::default()
        }
    }
}

/// One listing page. Orders that failed to decode are returned separately so
/// the rest of the page still syncs.
#[derive(Debug, Clone, Default)]
pub struct OrderPage {
    pub orders: Vec<ExternalOrder>,
    pub rejected: Vec<(Option<i64>, String)>,
    pub total_pages: Option<u32>,
}

/// One page of customer accounts, oldest first.
#[derive(Debug, Clone, Default)]
pub struct CustomerPage {
    pub customers: Vec<ExternalCustomer>,
    pub rejected: Vec<(Option<i64>, String)>,
    pub total_pages: Option<u32>,
}

#[async_trait]
pub trait StorefrontClient: Send + Sync {
    async fn fetch_orders(
        &self,
        page: u32,
        page_size: u32,
        filter: &OrderFilter,
    ) -> Result<OrderPage, StorefrontError>;

    async fn fetch_order(&self, id: i64) -> Result<ExternalOrder, StorefrontError>;

    async fn fetch_delivery_areas(&self) -> Result<Vec<DeliveryArea>, StorefrontError>;

    async fn fetch_customers(&self, page: u32, page_size: u32)
        -> Result<CustomerPage, StorefrontError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn status_classification() {
        assert!(StorefrontError::from_status(429, "slow down").is_transient());
        assert!(StorefrontError::from_status(503, "maintenance").is_transient());
        assert!(!StorefrontError::from_status(404, "missing").is_transient());
        assert!(!StorefrontError::from_status(401, "bad key").is_transient());
    }

    #[test]
    fn maps_into_service_taxonomy() {
        assert_matches!(
            ServiceError::from(StorefrontError::from_status(502, "bad gateway")),
            ServiceError::TransientUpstream(_)
        );
        assert_matches!(
            ServiceError::from(StorefrontError::from_status(404, "no order")),
            ServiceError::NotFound(_)
        );
        assert_matches!(
            ServiceError::from(StorefrontError::Decode("bad json".into())),
            ServiceError::ValidationError(_)
        );
    }
}
