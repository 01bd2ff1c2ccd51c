use chrono::Utc;
use tracing::{error, warn};
use uuid::Uuid;

use crate::config::PaymentsConfig;
use crate::models::{DocumentState, FinancialDocument, PaymentCategory, SettlementRecord};

/// Maps a storefront payment-method code to its internal category.
pub fn categorize(method_code: &str) -> PaymentCategory {
    match method_code.trim().to_ascii_lowercase().as_str() {
        "instapay" => PaymentCategory::Instapay,
        "cod" => PaymentCategory::Cash,
        "kashier_card" => PaymentCategory::KashierCard,
        "kashier_wallet" => PaymentCategory::KashierWallet,
        other => {
            warn!(method = other, "Unknown payment method, categorized as Other");
            PaymentCategory::Other
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PaymentReconciler {
    settlement_account: Option<String>,
}

impl PaymentReconciler {
    pub fn new(cfg: &PaymentsConfig) -> Self {
        Self {
            settlement_account: cfg
                .settlement_account
                .clone()
                .filter(|a| !a.trim().is_empty()),
        }
    }

    /// Settlement entry owed by a submitted, gateway-paid document. A document
    /// settles at most once: any entry in `existing` for it, even one recorded
    /// under another category, means nothing is owed.
    pub fn settlement_for(
        &self,
        document: &FinancialDocument,
        existing: &[SettlementRecord],
    ) -> Option<SettlementRecord> {
        let category = document.payment_category?;
        if !category.is_gateway_settled() || document.state != DocumentState::Submitted {
            return None;
        }

        if existing.iter().any(|s| s.document_id == document.id) {
            return None;
        }
        let key = SettlementRecord::idempotency_key_for(document.id, category);

        let Some(account) = self.settlement_account.clone() else {
            error!(
                document_id = %document.id,
                category = %category,
                "No settlement account configured, skipping gateway settlement"
            );
            return None;
        };

        Some(SettlementRecord {
            id: Uuid::new_v4(),
            document_id: document.id,
            idempotency_key: key,
            amount: document.total(),
            category,
            account,
            reference: document.order_number.clone(),
            created_at: Utc::now(),
        })
    }
}
