use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::payment::{PaymentCategory, SettlementStatus};
use super::territory::PricingContext;
use crate::errors::ServiceError;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum DocumentState {
    Draft,
    Submitted,
    Paid,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LineKind {
    Plain,
    BundleParent,
    BundleChild { parent_line_id: i64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub external_line_id: i64,
    pub item_ref: String,
    pub name: String,
    pub quantity: i64,
    pub rate: Decimal,
    pub discount_percentage: Decimal,
    pub net_amount: Decimal,
    pub kind: LineKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Charge {
    pub description: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverySlot {
    pub date: NaiveDate,
    pub time_from: NaiveTime,
    pub duration_minutes: u32,
}

/// Fields that may change on a submitted document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentPatch {
    pub payment_category: Option<PaymentCategory>,
    pub settlement_status: Option<SettlementStatus>,
    pub fulfilment_state: Option<String>,
    pub delivery_slot: Option<DeliverySlot>,
    pub pricing_profile: Option<String>,
}

/// Desired content for an existing document. `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentUpdate {
    pub customer_id: Option<Uuid>,
    pub lines: Option<Vec<InvoiceLine>>,
    pub charges: Option<Vec<Charge>>,
    pub patch: DocumentPatch,
}

/// Invoice materialized from one storefront order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialDocument {
    pub id: Uuid,
    pub external_order_id: i64,
    pub order_number: String,
    pub state: DocumentState,
    pub customer_id: Uuid,
    pub billing_address_id: Option<Uuid>,
    pub shipping_address_id: Option<Uuid>,
    pub territory: Option<String>,
    pub pricing: PricingContext,
    pub currency: String,
    pub lines: Vec<InvoiceLine>,
    pub charges: Vec<Charge>,
    pub payment_category: Option<PaymentCategory>,
    pub settlement_status: SettlementStatus,
    pub fulfilment_state: Option<String>,
    pub delivery_slot: Option<DeliverySlot>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FinancialDocument {
    pub fn total(&self) -> Decimal {
        let lines: Decimal = self.lines.iter().map(|l| l.net_amount).sum();
        let charges: Decimal = self.charges.iter().map(|c| c.amount).sum();
        lines + charges
    }

    pub fn is_finalized(&self) -> bool {
        self.state != DocumentState::Draft
    }

    pub fn submit(&mut self) -> Result<(), ServiceError> {
        match self.state {
            DocumentState::Draft => {
                self.state = DocumentState::Submitted;
                self.touch();
                Ok(())
            }
            other => Err(self.conflict(format!("cannot submit a {} document", other))),
        }
    }

    /// Draft documents are submitted first; a draft is never cancelled directly.
    pub fn cancel(&mut self) -> Result<(), ServiceError> {
        match self.state {
            DocumentState::Draft => {
                self.submit()?;
                self.cancel()
            }
            DocumentState::Submitted => {
                self.state = DocumentState::Cancelled;
                self.touch();
                Ok(())
            }
            DocumentState::Cancelled => Ok(()),
            DocumentState::Paid => Err(self.conflict("cannot cancel a paid document".into())),
        }
    }

    pub fn mark_paid(&mut self) -> Result<(), ServiceError> {
        match self.state {
            DocumentState::Submitted => {
                self.state = DocumentState::Paid;
                self.settlement_status = SettlementStatus::Settled;
                self.touch();
                Ok(())
            }
            DocumentState::Paid => Ok(()),
            other => Err(self.conflict(format!("cannot mark a {} document paid", other))),
        }
    }

    /// Applies an update, enforcing that finalized documents only take whitelisted
    /// fields. On error the document is left untouched. Returns whether anything changed.
    pub fn apply_update(&mut self, update: DocumentUpdate) -> Result<bool, ServiceError> {
        if self.is_finalized() {
            if let Some(lines) = &update.lines {
                if *lines != self.lines {
                    return Err(self.conflict("line items are immutable after submission".into()));
                }
            }
            if let Some(charges) = &update.charges {
                if *charges != self.charges {
                    return Err(self.conflict("charges are immutable after submission".into()));
                }
            }
            if let Some(customer_id) = update.customer_id {
                if customer_id != self.customer_id {
                    return Err(self.conflict("customer is immutable after submission".into()));
                }
            }
            if self.state == DocumentState::Cancelled && !self.patch_is_noop(&update.patch) {
                return Err(self.conflict("cancelled documents cannot be patched".into()));
            }
        }

        let mut changed = false;
        if !self.is_finalized() {
            if let Some(lines) = update.lines {
                changed |= lines != self.lines;
                self.lines = lines;
            }
            if let Some(charges) = update.charges {
                changed |= charges != self.charges;
                self.charges = charges;
            }
            if let Some(customer_id) = update.customer_id {
                changed |= customer_id != self.customer_id;
                self.customer_id = customer_id;
            }
        }
        changed |= self.apply_patch(update.patch);
        if changed {
            self.touch();
        }
        Ok(changed)
    }

    fn patch_is_noop(&self, patch: &DocumentPatch) -> bool {
        patch
            .payment_category
            .map_or(true, |c| self.payment_category == Some(c))
            && patch
                .settlement_status
                .map_or(true, |s| self.settlement_status == s)
            && patch
                .fulfilment_state
                .as_ref()
                .map_or(true, |f| self.fulfilment_state.as_ref() == Some(f))
            && patch
                .delivery_slot
                .map_or(true, |d| self.delivery_slot == Some(d))
            && patch
                .pricing_profile
                .as_ref()
                .map_or(true, |p| self.pricing.profile_ref.as_ref() == Some(p))
    }

    fn apply_patch(&mut self, patch: DocumentPatch) -> bool {
        let mut changed = false;
        if let Some(category) = patch.payment_category {
            changed |= self.payment_category != Some(category);
            self.payment_category = Some(category);
        }
        if let Some(status) = patch.settlement_status {
            changed |= self.settlement_status != status;
            self.settlement_status = status;
        }
        if let Some(fulfilment) = patch.fulfilment_state {
            changed |= self.fulfilment_state.as_ref() != Some(&fulfilment);
            self.fulfilment_state = Some(fulfilment);
        }
        if let Some(slot) = patch.delivery_slot {
            changed |= self.delivery_slot != Some(slot);
            self.delivery_slot = Some(slot);
        }
        if let Some(profile) = patch.pricing_profile {
            changed |= self.pricing.profile_ref.as_ref() != Some(&profile);
            self.pricing.profile_ref = Some(profile);
        }
        changed
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn conflict(&self, message: String) -> ServiceError {
        ServiceError::StateConflict(format!(
            "document {} (order {}): {}",
            self.id, self.external_order_id, message
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::territory::PricingSource;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    fn line(id: i64, net: Decimal) -> InvoiceLine {
        InvoiceLine {
            external_line_id: id,
            item_ref: format!("SKU-{}", id),
            name: format!("Item {}", id),
            quantity: 1,
            rate: net,
            discount_percentage: Decimal::ZERO,
            net_amount: net,
            kind: LineKind::Plain,
        }
    }

    fn draft() -> FinancialDocument {
        FinancialDocument {
            id: Uuid::new_v4(),
            external_order_id: 500,
            order_number: "500".into(),
            state: DocumentState::Draft,
            customer_id: Uuid::new_v4(),
            billing_address_id: None,
            shipping_address_id: None,
            territory: None,
            pricing: PricingContext {
                warehouse: None,
                price_list: None,
                company: None,
                profile_ref: None,
                source: PricingSource::Defaults,
            },
            currency: "EGP".into(),
            lines: vec![line(1, dec!(60)), line(2, dec!(40))],
            charges: vec![],
            payment_category: None,
            settlement_status: SettlementStatus::Unsettled,
            fulfilment_state: None,
            delivery_slot: None,
            version: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn cancelling_a_draft_passes_through_submitted() {
        let mut doc = draft();
        doc.cancel().unwrap();
        assert_eq!(doc.state, DocumentState::Cancelled);
    }

    #[test]
    fn paid_documents_cannot_be_cancelled() {
        let mut doc = draft();
        doc.submit().unwrap();
        doc.mark_paid().unwrap();
        assert_matches!(doc.cancel(), Err(ServiceError::StateConflict(_)));
        assert_eq!(doc.state, DocumentState::Paid);
    }

    #[test]
    fn submitted_lines_are_immutable() {
        let mut doc = draft();
        doc.submit().unwrap();
        let before = doc.clone();

        let result = doc.apply_update(DocumentUpdate {
            lines: Some(vec![line(1, dec!(100))]),
            patch: DocumentPatch {
                fulfilment_state: Some("out_for_delivery".into()),
                ..Default::default()
            },
            ..Default::default()
        });

        assert_matches!(result, Err(ServiceError::StateConflict(_)));
        assert_eq!(doc, before);
    }

    #[test]
    fn submitted_documents_accept_whitelisted_patch() {
        let mut doc = draft();
        doc.submit().unwrap();

        let changed = doc
            .apply_update(DocumentUpdate {
                lines: Some(doc.lines.clone()),
                patch: DocumentPatch {
                    payment_category: Some(PaymentCategory::Cash),
                    pricing_profile: Some("Cairo East".into()),
                    ..Default::default()
                },
                ..Default::default()
            })
            .unwrap();

        assert!(changed);
        assert_eq!(doc.payment_category, Some(PaymentCategory::Cash));
        assert_eq!(doc.pricing.profile_ref.as_deref(), Some("Cairo East"));
        assert_eq!(doc.total(), dec!(100));
    }

    #[test]
    fn draft_lines_are_replaced() {
        let mut doc = draft();
        let changed = doc
            .apply_update(DocumentUpdate {
                lines: Some(vec![line(3, dec!(25))]),
                ..Default::default()
            })
            .unwrap();
        assert!(changed);
        assert_eq!(doc.total(), dec!(25));
    }
}
