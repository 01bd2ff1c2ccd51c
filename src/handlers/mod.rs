pub mod health;
pub mod webhooks;

use axum::{routing::post, Router};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::message_queue::MessageQueue;
use crate::repositories::SyncStore;

/// Shared state for the HTTP surface.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SyncStore>,
    pub queue: Arc<dyn MessageQueue>,
    pub webhook_secret: Option<String>,
    /// Delivery ids already enqueued, for redelivery dedupe.
    pub deliveries: Arc<DashMap<String, chrono::DateTime<chrono::Utc>>>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn SyncStore>,
        queue: Arc<dyn MessageQueue>,
        webhook_secret: Option<String>,
    ) -> Self {
        Self {
            store,
            queue,
            webhook_secret,
            deliveries: Arc::new(DashMap::new()),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhooks/orders", post(webhooks::order_webhook))
        .route("/webhooks/customers", post(webhooks::customer_webhook))
        .nest("/health", health::health_routes())
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .with_state(Arc::new(state))
}
