use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::order::{AddressBlock, ExternalOrder};

/// Which default flag an address carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum AddressKind {
    Billing,
    Shipping,
}

/// Lookup keys, in the order the resolver tries them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CustomerKey {
    ExternalId(String),
    Email(String),
    Phone(String),
}

impl CustomerKey {
    /// Stable unique key stored on the customer row.
    pub fn match_key(&self) -> String {
        match self {
            Self::ExternalId(id) => format!("ext:{}", id),
            Self::Email(email) => format!("email:{}", email),
            Self::Phone(phone) => format!("phone:{}", phone),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: Uuid,
    pub match_key: String,
    pub external_id: Option<String>,
    pub display_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub territory: Option<String>,
    /// Set by an operator; resolution never overwrites it.
    pub territory_locked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    pub fn matches(&self, key: &CustomerKey) -> bool {
        match key {
            CustomerKey::ExternalId(id) => self.external_id.as_deref() == Some(id.as_str()),
            CustomerKey::Email(email) => self.email.as_deref() == Some(email.as_str()),
            CustomerKey::Phone(phone) => self.phone.as_deref() == Some(phone.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub fingerprint: String,
    pub line1: String,
    pub line2: String,
    pub city: String,
    pub state: String,
    pub postcode: String,
    pub country: String,
    pub phone: Option<String>,
    pub is_default_billing: bool,
    pub is_default_shipping: bool,
    pub created_at: DateTime<Utc>,
}

impl Address {
    pub fn from_block(customer_id: Uuid, block: &AddressBlock) -> Self {
        Self {
            id: Uuid::new_v4(),
            customer_id,
            fingerprint: address_fingerprint(block),
            line1: block.line1.trim().to_string(),
            line2: block.line2.trim().to_string(),
            city: block.city.trim().to_string(),
            state: block.state.trim().to_string(),
            postcode: block.postcode.trim().to_string(),
            country: block.country.trim().to_string(),
            phone: block.phone.as_deref().and_then(normalize_phone),
            is_default_billing: false,
            is_default_shipping: false,
            created_at: Utc::now(),
        }
    }

    pub fn is_default(&self, kind: AddressKind) -> bool {
        match kind {
            AddressKind::Billing => self.is_default_billing,
            AddressKind::Shipping => self.is_default_shipping,
        }
    }

    pub fn set_default(&mut self, kind: AddressKind, value: bool) {
        match kind {
            AddressKind::Billing => self.is_default_billing = value,
            AddressKind::Shipping => self.is_default_shipping = value,
        }
    }
}

/// Customer identity as read off an order or a storefront customer account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalCustomer {
    pub external_id: Option<String>,
    pub display_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub billing: Option<AddressBlock>,
    pub shipping: Option<AddressBlock>,
}

impl ExternalCustomer {
    pub fn from_order(order: &ExternalOrder) -> Self {
        let billing = order.billing.clone().filter(AddressBlock::is_usable);
        let shipping = order.shipping.clone().filter(AddressBlock::is_usable);

        let email = order
            .billing
            .as_ref()
            .and_then(|b| b.email.as_deref())
            .or_else(|| order.shipping.as_ref().and_then(|s| s.email.as_deref()))
            .and_then(normalize_email);
        let phone = order
            .billing
            .as_ref()
            .and_then(|b| b.phone.as_deref())
            .and_then(normalize_phone)
            .or_else(|| {
                order
                    .shipping
                    .as_ref()
                    .and_then(|s| s.phone.as_deref())
                    .and_then(normalize_phone)
            });
        let display_name = order
            .billing
            .as_ref()
            .and_then(AddressBlock::full_name)
            .or_else(|| order.shipping.as_ref().and_then(AddressBlock::full_name))
            .or_else(|| email.clone())
            .or_else(|| phone.clone())
            .unwrap_or_else(|| format!("Storefront customer {}", order.id));

        Self {
            external_id: order.customer_id.filter(|id| *id > 0).map(|id| id.to_string()),
            display_name,
            email,
            phone,
            billing,
            shipping,
        }
    }

    pub fn has_address(&self) -> bool {
        self.billing.is_some() || self.shipping.is_some()
    }

    /// Keys to try, strongest first.
    pub fn keys(&self) -> Vec<CustomerKey> {
        let mut keys = Vec::with_capacity(3);
        if let Some(id) = &self.external_id {
            keys.push(CustomerKey::ExternalId(id.clone()));
        }
        if let Some(email) = &self.email {
            keys.push(CustomerKey::Email(email.clone()));
        }
        if let Some(phone) = &self.phone {
            keys.push(CustomerKey::Phone(phone.clone()));
        }
        keys
    }
}

pub fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        None
    } else {
        Some(email)
    }
}

/// Keeps digits and a leading '+'.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let mut phone = String::with_capacity(trimmed.len());
    if trimmed.starts_with('+') {
        phone.push('+');
    }
    phone.extend(trimmed.chars().filter(|c| c.is_ascii_digit()));
    if phone.trim_start_matches('+').len() < 5 {
        None
    } else {
        Some(phone)
    }
}

/// Dedupe key for an address: normalized first line plus locality.
pub fn address_fingerprint(block: &AddressBlock) -> String {
    fn squash(s: &str) -> String {
        s.split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }
    format!("{}|{}", squash(&block.line1), squash(&block.city))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_normalization_keeps_leading_plus() {
        assert_eq!(normalize_phone("+20 100-123 4567").as_deref(), Some("+201001234567"));
        assert_eq!(normalize_phone("0100 123 4567").as_deref(), Some("01001234567"));
        assert_eq!(normalize_phone("n/a"), None);
    }

    #[test]
    fn fingerprint_ignores_case_and_spacing() {
        let a = AddressBlock {
            line1: "12  Abbas El Akkad St".into(),
            city: "Nasr City".into(),
            ..Default::default()
        };
        let b = AddressBlock {
            line1: "12 abbas el akkad st ".into(),
            city: " NASR CITY".into(),
            ..Default::default()
        };
        assert_eq!(address_fingerprint(&a), address_fingerprint(&b));
    }

    #[test]
    fn keys_follow_match_priority() {
        let customer = ExternalCustomer {
            external_id: Some("17".into()),
            display_name: "Mona".into(),
            email: Some("mona@example.com".into()),
            phone: None,
            billing: None,
            shipping: None,
        };
        assert_eq!(
            customer.keys(),
            vec![
                CustomerKey::ExternalId("17".into()),
                CustomerKey::Email("mona@example.com".into())
            ]
        );
    }
}
