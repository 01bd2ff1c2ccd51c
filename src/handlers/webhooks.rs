use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use metrics::counter;
use std::sync::Arc;
use tracing::{info, warn};

use super::AppState;
use crate::errors::ServiceError;
use crate::message_queue::{SyncJob, QUEUE_SHORT};
use crate::models::SyncOrigin;
use crate::webhooks::{
    verify_and_parse_customer_webhook, verify_and_parse_webhook, WebhookPayload, DELIVERY_HEADER,
    SIGNATURE_HEADER, TOPIC_HEADER,
};

const DELIVERY_MEMORY: usize = 10_000;

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn secret(state: &AppState) -> Result<&str, ServiceError> {
    state.webhook_secret.as_deref().ok_or_else(|| {
        warn!("Webhook received but no secret is configured");
        ServiceError::Unauthorized("webhook secret not configured".to_string())
    })
}

// POST /webhooks/orders
pub async fn order_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    if let Some(topic) = header(&headers, TOPIC_HEADER) {
        if !topic.starts_with("order.") {
            info!(topic, "Ignoring non-order webhook");
            return Ok((StatusCode::OK, "ignored"));
        }
    }

    let signature = header(&headers, SIGNATURE_HEADER);
    let payload = verify_and_parse_webhook(secret(&state)?, &body, signature)?;
    let WebhookPayload::Order(order) = payload else {
        return Ok((StatusCode::OK, "ok"));
    };

    let resource = format!("order:{}", order.id);
    let job = SyncJob::Payload {
        order,
        origin: SyncOrigin::Webhook,
    };
    enqueue_once(&state, &headers, resource, job).await
}

// POST /webhooks/customers
pub async fn customer_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    if let Some(topic) = header(&headers, TOPIC_HEADER) {
        // Deletions carry only an id; customers are never removed here.
        if !topic.starts_with("customer.") || topic == "customer.deleted" {
            info!(topic, "Ignoring customer webhook topic");
            return Ok((StatusCode::OK, "ignored"));
        }
    }

    let signature = header(&headers, SIGNATURE_HEADER);
    let payload = verify_and_parse_customer_webhook(secret(&state)?, &body, signature)?;
    let WebhookPayload::Customer(customer) = payload else {
        return Ok((StatusCode::OK, "ok"));
    };

    let resource = format!("customer:{}", customer.external_id.as_deref().unwrap_or_default());
    enqueue_once(&state, &headers, resource, SyncJob::Customer { customer }).await
}

/// Queues `job` unless this delivery of `resource` was already queued.
async fn enqueue_once(
    state: &AppState,
    headers: &HeaderMap,
    resource: String,
    job: SyncJob,
) -> Result<(StatusCode, &'static str), ServiceError> {
    let delivery_key = header(headers, DELIVERY_HEADER).map(|d| format!("{}:{}", d, resource));
    if let Some(key) = &delivery_key {
        if state.deliveries.len() >= DELIVERY_MEMORY {
            let cutoff = chrono::Utc::now() - chrono::Duration::hours(24);
            state.deliveries.retain(|_, seen| *seen > cutoff);
        }
        if state.deliveries.insert(key.clone(), chrono::Utc::now()).is_some() {
            info!(delivery = %key, "Duplicate webhook delivery");
            return Ok((StatusCode::OK, "duplicate"));
        }
    }

    // Released again when enqueue fails.
    let message_id = match state.queue.enqueue(&job, QUEUE_SHORT).await {
        Ok(id) => id,
        Err(e) => {
            if let Some(key) = &delivery_key {
                state.deliveries.remove(key);
            }
            warn!(%resource, error = %e, "Webhook could not be queued");
            return Err(e.into());
        }
    };
    counter!("storefront_sync.webhooks_accepted", 1);
    info!(%resource, %message_id, "Webhook queued");

    Ok((StatusCode::OK, "queued"))
}
