//! Domain types shared by the resolvers, the coordinator and the stores.

pub mod customer;
pub mod document;
pub mod order;
pub mod payment;
pub mod sync_record;
pub mod territory;

pub use customer::{Address, AddressKind, Customer, CustomerKey, ExternalCustomer};
pub use document::{
    Charge, DeliverySlot, DocumentPatch, DocumentState, DocumentUpdate, FinancialDocument,
    InvoiceLine, LineKind,
};
pub use order::{AddressBlock, ExternalOrder, LineItem, MetaEntry, OrderStatus};
pub use payment::{PaymentCategory, SettlementRecord, SettlementStatus};
pub use sync_record::{CheckpointCursor, SyncMode, SyncOrigin, SyncOutcome, SyncRecord, SyncReport};
pub use territory::{DeliveryArea, PricingContext, PricingProfile, PricingSource, Territory};

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::errors::ServiceError;

/// Minor units per major unit for every supported currency.
pub const MINOR_UNITS: u32 = 2;

/// Converts an amount to integer minor units, rounding half away from zero.
///
/// Amounts that do not fit an `i64` of minor units are rejected.
pub fn to_minor(amount: Decimal) -> Result<i64, ServiceError> {
    amount
        .round_dp_with_strategy(MINOR_UNITS, RoundingStrategy::MidpointAwayFromZero)
        .checked_mul(Decimal::from(10_i64.pow(MINOR_UNITS)))
        .and_then(|d| d.to_i64())
        .ok_or_else(|| ServiceError::ValidationError(format!("amount {} is out of range", amount)))
}

pub fn from_minor(minor: i64) -> Decimal {
    Decimal::new(minor, MINOR_UNITS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn minor_unit_conversion_rounds_half_away_from_zero() {
        assert_eq!(to_minor(dec!(10.005)).unwrap(), 1001);
        assert_eq!(to_minor(dec!(99.994)).unwrap(), 9999);
        assert_eq!(from_minor(12345), dec!(123.45));
    }

    #[test]
    fn amounts_beyond_minor_unit_range_are_rejected() {
        let err = to_minor(Decimal::from(i64::MAX)).unwrap_err();
        assert!(matches!(err, ServiceError::ValidationError(_)));
        assert!(to_minor(Decimal::MAX).is_err());
        assert_eq!(to_minor(from_minor(i64::MAX)).unwrap(), i64::MAX);
    }
}
