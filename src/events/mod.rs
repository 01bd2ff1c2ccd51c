use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::{PaymentCategory, SyncOutcome, SyncReport};

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Things other parts of the business system may want to react to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    /// Outcome of one order sync attempt.
    OrderSynced(SyncReport),
    SettlementCreated {
        document_id: Uuid,
        amount: Decimal,
        category: PaymentCategory,
    },
    /// A finalized document disagrees with the storefront and needs an operator.
    StateConflictDetected {
        external_id: i64,
        document_id: Option<Uuid>,
        message: String,
    },
    BackfillPageCompleted {
        page: u32,
        orders: usize,
        errors: usize,
        timestamp: DateTime<Utc>,
    },
}

/// Logs every event until all senders are dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::OrderSynced(report) => match report.outcome {
                SyncOutcome::Errored => warn!(
                    external_id = report.external_id,
                    document_id = ?report.document_id,
                    error = report.error.as_deref().unwrap_or_default(),
                    "Order sync failed"
                ),
                outcome => info!(
                    external_id = report.external_id,
                    document_id = ?report.document_id,
                    outcome = %outcome,
                    "Order synced"
                ),
            },
            Event::SettlementCreated {
                document_id,
                amount,
                category,
            } => {
                info!(%document_id, %amount, %category, "Settlement recorded");
            }
            Event::StateConflictDetected {
                external_id,
                document_id,
                message,
            } => {
                error!(external_id, document_id = ?document_id, %message, "Manual review required");
            }
            Event::BackfillPageCompleted {
                page,
                orders,
                errors,
                ..
            } => {
                info!(page, orders, errors, "Backfill page completed");
            }
        }
    }

    warn!("Event processing loop has ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sender_delivers_to_receiver() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);
        sender
            .send(Event::OrderSynced(SyncReport::new(9, SyncOutcome::Skipped, None)))
            .await
            .unwrap();
        match rx.recv().await {
            Some(Event::OrderSynced(report)) => assert_eq!(report.external_id, 9),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn send_fails_once_receiver_is_gone() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);
        assert!(sender
            .send(Event::OrderSynced(SyncReport::new(1, SyncOutcome::Created, None)))
            .await
            .is_err());
    }
}
