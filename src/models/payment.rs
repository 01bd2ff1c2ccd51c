use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Internal payment-method category.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
pub enum PaymentCategory {
    Instapay,
    Cash,
    #[strum(serialize = "Kashier Card")]
    KashierCard,
    #[strum(serialize = "Kashier Wallet")]
    KashierWallet,
    Other,
}

impl PaymentCategory {
    /// Methods whose money is already confirmed by the gateway.
    pub fn is_gateway_settled(&self) -> bool {
        matches!(self, Self::KashierCard | Self::KashierWallet)
    }

    pub fn parse_label(label: &str) -> Option<Self> {
        Self::from_str(label).ok()
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum SettlementStatus {
    Unsettled,
    Settled,
}

/// Payment entry linked to exactly one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementRecord {
    pub id: Uuid,
    pub document_id: Uuid,
    pub idempotency_key: String,
    pub amount: Decimal,
    pub category: PaymentCategory,
    pub account: String,
    pub reference: String,
    pub created_at: DateTime<Utc>,
}

impl SettlementRecord {
    pub fn idempotency_key_for(document_id: Uuid, category: PaymentCategory) -> String {
        format!("{}:{}", document_id, category)
    }
}
