use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::errors::ServiceError;

/// Storefront order status. Anything outside the known set is kept verbatim so
/// the caller can reject it explicitly instead of guessing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OrderStatus {
    Pending,
    OnHold,
    Processing,
    Completed,
    Cancelled,
    Refunded,
    Unmapped(String),
}

impl OrderStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Self::Pending,
            "on-hold" | "on_hold" => Self::OnHold,
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "cancelled" | "canceled" => Self::Cancelled,
            "refunded" => Self::Refunded,
            _ => Self::Unmapped(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::OnHold => "on-hold",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
            Self::Unmapped(raw) => raw.as_str(),
        }
    }

    /// Statuses that end in a cancelled document.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Refunded)
    }

    /// Statuses a historical backfill materializes.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Refunded)
    }

    /// Statuses the live path holds back until the order moves on.
    pub fn is_awaiting(&self) -> bool {
        matches!(self, Self::Pending | Self::OnHold)
    }
}

impl From<String> for OrderStatus {
    fn from(raw: String) -> Self {
        OrderStatus::parse(&raw)
    }
}

impl From<OrderStatus> for String {
    fn from(status: OrderStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Billing or shipping block as sent by the storefront.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressBlock {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub line1: String,
    pub line2: String,
    pub city: String,
    /// Free-text zone field; carries the delivery area label.
    pub state: String,
    pub postcode: String,
    pub country: String,
}

impl AddressBlock {
    /// A block with nothing to locate a delivery is treated as absent.
    pub fn is_usable(&self) -> bool {
        !self.line1.trim().is_empty() || !self.city.trim().is_empty()
    }

    pub fn full_name(&self) -> Option<String> {
        let name = format!("{} {}", self.first_name.trim(), self.last_name.trim());
        let name = name.trim();
        if name.is_empty() {
            None
        } else {
            Some(name.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub line_id: i64,
    pub product_id: i64,
    pub sku: Option<String>,
    pub name: String,
    pub quantity: i64,
    pub unit_price: Decimal,
    pub is_bundle_parent: bool,
    /// Product id of the bundle parent this line belongs to.
    pub parent_link: Option<i64>,
}

impl LineItem {
    /// Reference used on the invoice: SKU when present, else the product id.
    pub fn item_ref(&self) -> String {
        match self.sku.as_deref().map(str::trim) {
            Some(sku) if !sku.is_empty() => sku.to_string(),
            _ => format!("product:{}", self.product_id),
        }
    }

    pub fn gross(&self) -> Result<Decimal, ServiceError> {
        self.unit_price
            .checked_mul(Decimal::from(self.quantity))
            .ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "line {}: {} x {} overflows",
                    self.line_id, self.quantity, self.unit_price
                ))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaEntry {
    pub key: String,
    pub value: String,
}

/// Immutable snapshot of one storefront order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalOrder {
    pub id: i64,
    pub number: String,
    pub status: OrderStatus,
    pub currency: String,
    pub total: Decimal,
    pub line_items: Vec<LineItem>,
    pub billing: Option<AddressBlock>,
    pub shipping: Option<AddressBlock>,
    pub customer_id: Option<i64>,
    pub payment_method: Option<String>,
    #[serde(default)]
    pub meta: Vec<MetaEntry>,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
}

impl ExternalOrder {
    pub fn meta_value(&self, key: &str) -> Option<&str> {
        self.meta
            .iter()
            .find(|m| m.key.trim() == key)
            .map(|m| m.value.trim())
            .filter(|v| !v.is_empty())
    }

    /// Fingerprint over the fields that change what gets materialized.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.id.to_be_bytes());
        hasher.update(self.total.normalize().to_string().as_bytes());
        hasher.update(self.currency.as_bytes());
        hasher.update(self.status.as_str().as_bytes());
        hasher.update((self.line_items.len() as u64).to_be_bytes());
        for line in &self.line_items {
            hasher.update(line.line_id.to_be_bytes());
            hasher.update(line.quantity.to_be_bytes());
            hasher.update(line.unit_price.normalize().to_string().as_bytes());
        }
        if let Some(modified) = self.modified_at.or(self.created_at) {
            hasher.update(modified.to_rfc3339().as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}
