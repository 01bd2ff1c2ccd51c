//! Storefront webhook verification and decoding.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, warn};

use crate::errors::ServiceError;
use crate::models::{ExternalCustomer, ExternalOrder};
use crate::storefront::payload::{decode_customer, decode_order};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-wc-webhook-signature";
pub const TOPIC_HEADER: &str = "x-wc-webhook-topic";
pub const DELIVERY_HEADER: &str = "x-wc-webhook-delivery-id";

#[derive(Debug, Clone, PartialEq)]
pub enum WebhookPayload {
    Order(Box<ExternalOrder>),
    Customer(Box<ExternalCustomer>),
    /// Setup ping or empty delivery; acknowledge and do nothing.
    AckEmpty,
}

/// Verifies `signature` (base64 HMAC-SHA256 of the raw body) and decodes the order.
pub fn verify_and_parse_webhook(
    secret: &str,
    raw_body: &[u8],
    signature: Option<&str>,
) -> Result<WebhookPayload, ServiceError> {
    let Some(value) = verified_json(secret, raw_body, signature)? else {
        return Ok(WebhookPayload::AckEmpty);
    };
    let order = decode_order(value).map_err(|(id, reason)| rejected("order", id, reason))?;
    Ok(WebhookPayload::Order(Box::new(order)))
}

/// Same checks as [`verify_and_parse_webhook`] for a customer account body.
pub fn verify_and_parse_customer_webhook(
    secret: &str,
    raw_body: &[u8],
    signature: Option<&str>,
) -> Result<WebhookPayload, ServiceError> {
    let Some(value) = verified_json(secret, raw_body, signature)? else {
        return Ok(WebhookPayload::AckEmpty);
    };
    let customer =
        decode_customer(value).map_err(|(id, reason)| rejected("customer", id, reason))?;
    Ok(WebhookPayload::Customer(Box::new(customer)))
}

/// `None` for setup pings, otherwise the signed JSON body.
fn verified_json(
    secret: &str,
    raw_body: &[u8],
    signature: Option<&str>,
) -> Result<Option<serde_json::Value>, ServiceError> {
    if is_ping(raw_body) {
        debug!("Webhook setup ping acknowledged");
        return Ok(None);
    }

    let signature = signature
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ServiceError::Unauthorized("missing webhook signature".to_string()))?;
    verify_signature(secret, raw_body, signature)?;

    serde_json::from_slice(raw_body)
        .map(Some)
        .map_err(|e| ServiceError::ValidationError(format!("invalid webhook json: {}", e)))
}

fn rejected(resource: &str, id: Option<i64>, reason: String) -> ServiceError {
    ServiceError::ValidationError(match id {
        Some(id) => format!("{} {}: {}", resource, id, reason),
        None => reason,
    })
}

fn is_ping(raw_body: &[u8]) -> bool {
    let body = String::from_utf8_lossy(raw_body);
    let body = body.trim();
    body.is_empty() || body.starts_with("webhook_id=")
}

fn verify_signature(secret: &str, raw_body: &[u8], signature: &str) -> Result<(), ServiceError> {
    let provided = STANDARD.decode(signature).map_err(|_| {
        warn!("Webhook signature is not base64");
        ServiceError::Unauthorized("invalid webhook signature".to_string())
    })?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ServiceError::InternalError(format!("hmac key: {}", e)))?;
    mac.update(raw_body);
    mac.verify_slice(&provided).map_err(|_| {
        warn!("Webhook signature verification failed");
        ServiceError::Unauthorized("invalid webhook signature".to_string())
    })
}

/// Signature the storefront would send for `body`.
pub fn sign(secret: &str, body: &[u8]) -> Result<String, ServiceError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ServiceError::InternalError(format!("hmac key: {}", e)))?;
    mac.update(body);
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    const SECRET: &str = "whsec";

    fn body() -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": 812,
            "number": "812",
            "status": "processing",
            "currency": "EGP",
            "total": "40.00",
            "line_items": [],
            "billing": {"first_name": "Omar", "email": "omar@example.com", "address_1": "1 Nile St", "city": "Giza"}
        }))
        .unwrap()
    }

    #[test]
    fn valid_signature_yields_order() {
        let body = body();
        let sig = sign(SECRET, &body).unwrap();
        let payload = verify_and_parse_webhook(SECRET, &body, Some(&sig)).unwrap();
        assert_matches!(payload, WebhookPayload::Order(order) if order.id == 812);
    }

    #[test]
    fn pings_are_acknowledged_without_signature() {
        assert_eq!(
            verify_and_parse_webhook(SECRET, b"webhook_id=17", None).unwrap(),
            WebhookPayload::AckEmpty
        );
        assert_eq!(
            verify_and_parse_webhook(SECRET, b"  ", None).unwrap(),
            WebhookPayload::AckEmpty
        );
    }

    #[test]
    fn bad_or_missing_signature_is_unauthorized() {
        let body = body();
        assert_matches!(
            verify_and_parse_webhook(SECRET, &body, None),
            Err(ServiceError::Unauthorized(_))
        );
        let forged = sign("other", &body).unwrap();
        assert_matches!(
            verify_and_parse_webhook(SECRET, &body, Some(&forged)),
            Err(ServiceError::Unauthorized(_))
        );
        assert_matches!(
            verify_and_parse_webhook(SECRET, &body, Some("%%%")),
            Err(ServiceError::Unauthorized(_))
        );
    }

    #[test]
    fn customer_bodies_share_the_signature_check() {
        let body = serde_json::to_vec(&json!({
            "id": 41,
            "email": "hana@example.com",
            "first_name": "Hana",
            "billing": {"address_1": "9 Road 233", "city": "Cairo"}
        }))
        .unwrap();
        let sig = sign(SECRET, &body).unwrap();
        let payload = verify_and_parse_customer_webhook(SECRET, &body, Some(&sig)).unwrap();
        assert_matches!(
            payload,
            WebhookPayload::Customer(c) if c.external_id.as_deref() == Some("41")
        );
        let forged = sign("other", &body).unwrap();
        assert_matches!(
            verify_and_parse_customer_webhook(SECRET, &body, Some(&forged)),
            Err(ServiceError::Unauthorized(_))
        );
    }

    #[test]
    fn signed_garbage_is_a_validation_error() {
        let body = b"{not json".to_vec();
        let sig = sign(SECRET, &body).unwrap();
        assert_matches!(
            verify_and_parse_webhook(SECRET, &body, Some(&sig)),
            Err(ServiceError::ValidationError(_))
        );
    }
}
