//! Wire types of the WooCommerce v3 order and customer resources.

use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::str::FromStr;

use super::StorefrontError;
use crate::models::customer::{normalize_email, normalize_phone};
use crate::models::{AddressBlock, ExternalCustomer, ExternalOrder, LineItem, MetaEntry, OrderStatus};

/// Line meta key linking a bundle child to its parent's product id.
pub const BUNDLE_PARENT_META: &str = "_woosb_parent_id";
/// Line meta key present on bundle parents.
pub const BUNDLE_IDS_META: &str = "_woosb_ids";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WooMeta {
    #[serde(default)]
    pub id: Option<i64>,
    pub key: String,
    #[serde(default)]
    pub value: Value,
}

impl WooMeta {
    /// Scalar values as text; structured values are not carried over.
    pub fn value_string(&self) -> Option<String> {
        match &self.value {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WooAddress {
    pub first_name: String,
    pub last_name: String,
    pub company: String,
    pub address_1: String,
    pub address_2: String,
    pub city: String,
    pub state: String,
    pub postcode: String,
    pub country: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl From<WooAddress> for AddressBlock {
    fn from(a: WooAddress) -> Self {
        AddressBlock {
            first_name: a.first_name,
            last_name: a.last_name,
            email: a.email.filter(|e| !e.trim().is_empty()),
            phone: a.phone.filter(|p| !p.trim().is_empty()),
            line1: a.address_1,
            line2: a.address_2,
            city: a.city,
            state: a.state,
            postcode: a.postcode,
            country: a.country,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WooLineItem {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub product_id: i64,
    #[serde(default)]
    pub quantity: i64,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub price: Value,
    #[serde(default)]
    pub subtotal: Value,
    #[serde(default)]
    pub meta_data: Vec<WooMeta>,
}

impl WooLineItem {
    fn meta(&self, key: &str) -> Option<&WooMeta> {
        self.meta_data.iter().find(|m| m.key == key)
    }

    fn parent_link(&self) -> Option<i64> {
        self.meta(BUNDLE_PARENT_META)
            .and_then(WooMeta::value_string)
            .and_then(|v| v.trim().parse().ok())
    }

    /// Unit price from the pre-discount subtotal, falling back to `price`.
    fn unit_price(&self) -> Option<Decimal> {
        if self.quantity != 0 {
            if let Some(subtotal) = decimal_value(&self.subtotal) {
                return Some(subtotal / Decimal::from(self.quantity));
            }
        }
        decimal_value(&self.price)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WooOrder {
    pub id: i64,
    #[serde(default)]
    pub number: Option<String>,
    pub status: String,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub total: Value,
    #[serde(default)]
    pub customer_id: i64,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub date_created_gmt: Option<String>,
    #[serde(default)]
    pub date_modified_gmt: Option<String>,
    #[serde(default)]
    pub billing: Option<WooAddress>,
    #[serde(default)]
    pub shipping: Option<WooAddress>,
    #[serde(default)]
    pub line_items: Vec<WooLineItem>,
    #[serde(default)]
    pub meta_data: Vec<WooMeta>,
}

impl WooOrder {
    pub fn into_order(self) -> Result<ExternalOrder, StorefrontError> {
        let total = decimal_value(&self.total).ok_or_else(|| {
            StorefrontError::Decode(format!("order {}: unreadable total {}", self.id, self.total))
        })?;

        let parent_products: HashSet<i64> = self
            .line_items
            .iter()
            .filter_map(WooLineItem::parent_link)
            .collect();

        let mut line_items = Vec::with_capacity(self.line_items.len());
        for item in &self.line_items {
            let unit_price = item.unit_price().ok_or_else(|| {
                StorefrontError::Decode(format!(
                    "order {}: line {} has no readable price",
                    self.id, item.id
                ))
            })?;
            let parent_link = item.parent_link();
            let is_bundle_parent = parent_link.is_none()
                && (parent_products.contains(&item.product_id)
                    || item.meta(BUNDLE_IDS_META).is_some());
            line_items.push(LineItem {
                line_id: item.id,
                product_id: item.product_id,
                sku: item.sku.clone().filter(|s| !s.trim().is_empty()),
                name: item.name.clone(),
                quantity: item.quantity,
                unit_price,
                is_bundle_parent,
                parent_link,
            });
        }

        let meta = self
            .meta_data
            .iter()
            .filter_map(|m| {
                m.value_string().map(|value| MetaEntry {
                    key: m.key.clone(),
                    value,
                })
            })
            .collect();

        Ok(ExternalOrder {
            id: self.id,
            number: self.number.unwrap_or_else(|| self.id.to_string()),
            status: OrderStatus::parse(&self.status),
            currency: self.currency,
            total,
            line_items,
            billing: self.billing.map(AddressBlock::from),
            shipping: self.shipping.map(AddressBlock::from),
            customer_id: Some(self.customer_id).filter(|id| *id > 0),
            payment_method: self.payment_method.filter(|m| !m.trim().is_empty()),
            meta,
            created_at: self.date_created_gmt.as_deref().and_then(parse_timestamp),
            modified_at: self.date_modified_gmt.as_deref().and_then(parse_timestamp),
        })
    }
}

/// Decodes one element of an order listing, keeping the id for error reports.
pub fn decode_order(value: Value) -> Result<ExternalOrder, (Option<i64>, String)> {
    let id = value.get("id").and_then(Value::as_i64);
    serde_json::from_value::<WooOrder>(value)
        .map_err(|e| StorefrontError::Decode(e.to_string()))
        .and_then(WooOrder::into_order)
        .map_err(|e| (id, e.to_string()))
}

/// A storefront customer account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WooCustomer {
    pub id: i64,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub billing: Option<WooAddress>,
    #[serde(default)]
    pub shipping: Option<WooAddress>,
}

impl WooCustomer {
    pub fn into_customer(self) -> Result<ExternalCustomer, StorefrontError> {
        if self.id <= 0 {
            return Err(StorefrontError::Decode(format!(
                "customer id {} is not a storefront account",
                self.id
            )));
        }
        let billing = self.billing.map(AddressBlock::from);
        let shipping = self.shipping.map(AddressBlock::from);

        let email = self
            .email
            .as_deref()
            .and_then(normalize_email)
            .or_else(|| billing.as_ref().and_then(|b| b.email.as_deref()).and_then(normalize_email));
        let phone = [&billing, &shipping]
            .into_iter()
            .flatten()
            .find_map(|block| block.phone.as_deref().and_then(normalize_phone));
        let account_name = AddressBlock {
            first_name: self.first_name,
            last_name: self.last_name,
            ..Default::default()
        }
        .full_name();
        let display_name = account_name
            .or_else(|| billing.as_ref().and_then(AddressBlock::full_name))
            .or_else(|| shipping.as_ref().and_then(AddressBlock::full_name))
            .or_else(|| email.clone())
            .or_else(|| self.username.filter(|u| !u.trim().is_empty()))
            .unwrap_or_else(|| format!("Storefront customer {}", self.id));

        Ok(ExternalCustomer {
            external_id: Some(self.id.to_string()),
            display_name,
            email,
            phone,
            billing: billing.filter(AddressBlock::is_usable),
            shipping: shipping.filter(AddressBlock::is_usable),
        })
    }
}

/// Decodes one element of a customer listing, keeping the id for error reports.
pub fn decode_customer(value: Value) -> Result<ExternalCustomer, (Option<i64>, String)> {
    let id = value.get("id").and_then(Value::as_i64);
    serde_json::from_value::<WooCustomer>(value)
        .map_err(|e| StorefrontError::Decode(e.to_string()))
        .and_then(WooCustomer::into_customer)
        .map_err(|e| (id, e.to_string()))
}

fn decimal_value(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Decimal::from_str(s.trim()).ok(),
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
                .ok()
                .map(|n| n.and_utc())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn bundle_order() -> Value {
        json!({
            "id": 500,
            "number": "500",
            "status": "processing",
            "currency": "EGP",
            "total": "100.00",
            "customer_id": 0,
            "payment_method": "kashier_card",
            "date_created_gmt": "2024-03-01T09:30:00",
            "date_modified_gmt": "2024-03-01T10:00:00",
            "billing": {"first_name": "Mona", "last_name": "Adel", "address_1": "5 Tahrir", "city": "Cairo",
                        "state": "Nasr City - مدينه نصر", "email": "Mona@Example.com", "phone": "0100 123 4567"},
            "shipping": {"address_1": "", "city": ""},
            "line_items": [
                {"id": 1, "name": "Gift box", "product_id": 90, "quantity": 1, "sku": "BOX", "price": 100, "subtotal": "100.00",
                 "meta_data": [{"key": "_woosb_ids", "value": "91/1,92/1"}]},
                {"id": 2, "name": "Dates", "product_id": 91, "quantity": 1, "sku": "", "price": 60, "subtotal": "60.00",
                 "meta_data": [{"key": "_woosb_parent_id", "value": "90"}]},
                {"id": 3, "name": "Honey", "product_id": 92, "quantity": 2, "price": 20, "subtotal": "40.00",
                 "meta_data": [{"key": "_woosb_parent_id", "value": 90}]}
            ],
            "meta_data": [
                {"key": "Delivery Date", "value": "5 March, 2024"},
                {"key": "Time Slot", "value": "14:00 - 16:00"},
                {"key": "_structured", "value": {"a": 1}}
            ]
        })
    }

    #[test]
    fn decodes_bundle_links_and_prices() {
        let order = decode_order(bundle_order()).unwrap();
        assert_eq!(order.total, dec!(100.00));
        assert!(order.line_items[0].is_bundle_parent);
        assert_eq!(order.line_items[1].parent_link, Some(90));
        assert_eq!(order.line_items[1].sku, None);
        assert_eq!(order.line_items[2].unit_price, dec!(20));
        assert_eq!(order.line_items[2].parent_link, Some(90));
        assert_eq!(order.meta.len(), 2);
        assert_eq!(order.customer_id, None);
        assert!(order.modified_at.is_some());
    }

    #[test]
    fn decodes_customer_accounts() {
        let customer = decode_customer(json!({
            "id": 41,
            "email": " Hana@Example.com ",
            "first_name": "",
            "last_name": "",
            "username": "hana",
            "billing": {"first_name": "Hana", "last_name": "Samir", "address_1": "9 Road 233",
                        "city": "Cairo", "state": "Maadi - المعادي", "phone": "+20 100 555 0101"},
            "shipping": {"first_name": "", "address_1": "", "city": ""}
        }))
        .unwrap();
        assert_eq!(customer.external_id.as_deref(), Some("41"));
        assert_eq!(customer.email.as_deref(), Some("hana@example.com"));
        assert_eq!(customer.phone.as_deref(), Some("+201005550101"));
        assert_eq!(customer.display_name, "Hana Samir");
        assert!(customer.billing.is_some());
        assert!(customer.shipping.is_none());
    }

    #[test]
    fn guest_customer_ids_are_rejected() {
        let (id, message) = decode_customer(json!({"id": 0, "email": "x@example.com"})).unwrap_err();
        assert_eq!(id, Some(0));
        assert!(message.contains("customer id"));
    }

    #[test]
    fn rejects_orders_without_total() {
        let mut raw = bundle_order();
        raw["total"] = json!("n/a");
        let (id, message) = decode_order(raw).unwrap_err();
        assert_eq!(id, Some(500));
        assert!(message.contains("total"));
    }
}
