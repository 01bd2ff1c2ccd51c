/*!
 * # Job Queue
 *
 * Sync work handed from the webhook intake and the poller to the sync worker.
 * Jobs travel as JSON payloads inside [`Message`] envelopes; each priority
 * level is a separate topic.
 */

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{ExternalCustomer, ExternalOrder, SyncOrigin};

/// Topic drained first by the worker.
pub const QUEUE_SHORT: &str = "short";
pub const QUEUE_DEFAULT: &str = "default";

/// Message queue errors
#[derive(Error, Debug)]
pub enum MessageQueueError {
    #[error("Queue is full")]
    QueueFull,
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Connection error: {0}")]
    ConnectionError(String),
}

/// Unit of sync work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncJob {
    /// Order body already in hand, e.g. from a webhook delivery.
    Payload {
        order: Box<ExternalOrder>,
        origin: SyncOrigin,
    },
    /// Order to be fetched from the storefront first.
    Fetch { external_id: i64, origin: SyncOrigin },
    /// Storefront customer account from a webhook delivery.
    Customer { customer: Box<ExternalCustomer> },
}

impl SyncJob {
    pub fn external_id(&self) -> i64 {
        match self {
            Self::Payload { order, .. } => order.id,
            Self::Fetch { external_id, .. } => *external_id,
            Self::Customer { customer } => customer
                .external_id
                .as_deref()
                .and_then(|id| id.parse().ok())
                .unwrap_or_default(),
        }
    }
}

/// Message envelope for queue items
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub topic: String,
    pub payload: serde_json::Value,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl Message {
    pub fn new(topic: String, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic,
            payload,
            timestamp: chrono::Utc::now(),
            retry_count: 0,
            max_retries: 3,
        }
    }

    pub fn job(&self) -> Result<SyncJob, MessageQueueError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| MessageQueueError::SerializationError(e.to_string()))
    }
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn publish(&self, message: Message) -> Result<(), MessageQueueError>;
    async fn subscribe(&self, topic: &str) -> Result<Option<Message>, MessageQueueError>;
    async fn ack(&self, message_id: &Uuid) -> Result<(), MessageQueueError>;
    /// Returns the message to its topic unless its retries are spent.
    async fn nack(&self, message_id: &Uuid) -> Result<(), MessageQueueError>;

    async fn enqueue(&self, job: &SyncJob, priority: &str) -> Result<Uuid, MessageQueueError> {
        let payload = serde_json::to_value(job)
            .map_err(|e| MessageQueueError::SerializationError(e.to_string()))?;
        let message = Message::new(priority.to_string(), payload);
        let id = message.id;
        self.publish(message).await?;
        Ok(id)
    }
}

#[derive(Debug, Default)]
struct QueueState {
    topics: HashMap<String, VecDeque<Message>>,
    in_flight: HashMap<Uuid, Message>,
}

/// In-memory message queue implementation
#[derive(Debug, Clone)]
pub struct InMemoryMessageQueue {
    state: Arc<Mutex<QueueState>>,
    max_size: usize,
}

impl Default for InMemoryMessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMessageQueue {
    pub fn new() -> Self {
        Self::with_max_size(1000)
    }

    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            max_size,
        }
    }

    pub fn len(&self, topic: &str) -> usize {
        self.lock()
            .map(|s| s.topics.get(topic).map_or(0, VecDeque::len))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, topic: &str) -> bool {
        self.len(topic) == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, QueueState>, MessageQueueError> {
        self.state
            .lock()
            .map_err(|_| MessageQueueError::ConnectionError("queue lock poisoned".to_string()))
    }
}

#[async_trait]
impl MessageQueue for InMemoryMessageQueue {
    async fn publish(&self, message: Message) -> Result<(), MessageQueueError> {
        let mut state = self.lock()?;
        let queue = state.topics.entry(message.topic.clone()).or_default();

        if queue.len() >= self.max_size {
            return Err(MessageQueueError::QueueFull);
        }

        queue.push_back(message);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Option<Message>, MessageQueueError> {
        let mut state = self.lock()?;
        let message = state.topics.get_mut(topic).and_then(VecDeque::pop_front);
        if let Some(message) = &message {
            state.in_flight.insert(message.id, message.clone());
        }
        Ok(message)
    }

    async fn ack(&self, message_id: &Uuid) -> Result<(), MessageQueueError> {
        self.lock()?.in_flight.remove(message_id);
        Ok(())
    }

    async fn nack(&self, message_id: &Uuid) -> Result<(), MessageQueueError> {
        let mut state = self.lock()?;
        if let Some(mut message) = state.in_flight.remove(message_id) {
            if message.retry_count < message.max_retries {
                message.retry_count += 1;
                state
                    .topics
                    .entry(message.topic.clone())
                    .or_default()
                    .push_back(message);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueued_jobs_round_trip_through_topics() {
        let queue = InMemoryMessageQueue::new();
        let job = SyncJob::Fetch {
            external_id: 77,
            origin: SyncOrigin::Poll,
        };
        queue.enqueue(&job, QUEUE_SHORT).await.unwrap();

        assert!(queue.subscribe(QUEUE_DEFAULT).await.unwrap().is_none());
        let received = queue.subscribe(QUEUE_SHORT).await.unwrap().unwrap();
        assert_eq!(received.job().unwrap(), job);
        assert!(queue.subscribe(QUEUE_SHORT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn nack_requeues_until_retries_are_spent() {
        let queue = InMemoryMessageQueue::new();
        let mut message = Message::new(QUEUE_SHORT.into(), serde_json::json!({}));
        message.max_retries = 1;
        queue.publish(message).await.unwrap();

        let first = queue.subscribe(QUEUE_SHORT).await.unwrap().unwrap();
        queue.nack(&first.id).await.unwrap();
        let second = queue.subscribe(QUEUE_SHORT).await.unwrap().unwrap();
        assert_eq!(second.retry_count, 1);
        queue.nack(&second.id).await.unwrap();
        assert!(queue.is_empty(QUEUE_SHORT));
    }

    #[tokio::test]
    async fn publish_rejects_when_full() {
        let queue = InMemoryMessageQueue::with_max_size(1);
        queue
            .publish(Message::new("t".into(), serde_json::Value::Null))
            .await
            .unwrap();
        let err = queue
            .publish(Message::new("t".into(), serde_json::Value::Null))
            .await
            .unwrap_err();
        assert!(matches!(err, MessageQueueError::QueueFull));
    }
}
