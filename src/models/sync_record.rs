use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::order::OrderStatus;

/// Result of one sync attempt for one order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    Created,
    Updated,
    Skipped,
    Deferred,
    #[strum(serialize = "error")]
    #[serde(rename = "error")]
    Errored,
}

/// Entry point an attempt came through.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SyncOrigin {
    Webhook,
    Poll,
    Backfill,
}

/// Which statuses get materialized and how they settle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// Backfill of closed orders: completed ends Paid without a settlement entry.
    Historical,
    /// Webhooks and polls: pending/on-hold wait, the rest are materialized.
    Live,
}

/// Idempotency ledger entry, one per external order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub external_order_id: i64,
    pub document_id: Uuid,
    pub last_status: OrderStatus,
    pub last_external_update: Option<DateTime<Utc>>,
    pub content_hash: String,
    pub outcome: SyncOutcome,
    pub origin: SyncOrigin,
    pub source_page: Option<u32>,
    pub last_error: Option<String>,
    pub synced_at: DateTime<Utc>,
}

/// Per-order result surfaced to callers, logs and events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub external_id: i64,
    pub outcome: SyncOutcome,
    pub document_id: Option<Uuid>,
    pub error: Option<String>,
    /// Set on errors another attempt may clear.
    #[serde(default)]
    pub retryable: bool,
}

impl SyncReport {
    pub fn new(external_id: i64, outcome: SyncOutcome, document_id: Option<Uuid>) -> Self {
        Self {
            external_id,
            outcome,
            document_id,
            error: None,
            retryable: false,
        }
    }

    pub fn errored(external_id: i64, document_id: Option<Uuid>, error: String) -> Self {
        Self {
            external_id,
            outcome: SyncOutcome::Errored,
            document_id,
            error: Some(error),
            retryable: false,
        }
    }
}

/// Resume point for a backfill: every page up to `last_page` has ledger entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointCursor {
    pub last_page: u32,
    pub last_external_id: Option<i64>,
}
