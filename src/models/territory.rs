use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Territory {
    /// Canonical code, e.g. `EGNASRCITY`.
    pub code: String,
    /// Accepted display labels, bilingual form and each half.
    pub labels: Vec<String>,
    pub pricing_profile: Option<String>,
    /// Delivery income added to new documents for this zone.
    pub delivery_charge: Option<Decimal>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingProfile {
    pub name: String,
    pub warehouse: Option<String>,
    pub price_list: Option<String>,
    pub company: Option<String>,
}

/// Where each pricing field came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum PricingSource {
    Profile,
    Partial,
    Defaults,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingContext {
    pub warehouse: Option<String>,
    pub price_list: Option<String>,
    pub company: Option<String>,
    pub profile_ref: Option<String>,
    pub source: PricingSource,
}

/// Delivery area as listed by the storefront.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryArea {
    pub code: String,
    #[serde(default)]
    pub en: Option<String>,
    #[serde(default)]
    pub ar: Option<String>,
}
