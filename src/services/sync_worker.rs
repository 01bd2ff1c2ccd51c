use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

use super::customer_sync::CustomerSync;
use super::order_sync::OrderSyncCoordinator;
use crate::errors::ServiceError;
use crate::message_queue::{Message, MessageQueue, SyncJob, QUEUE_DEFAULT, QUEUE_SHORT};
use crate::models::{SyncMode, SyncOutcome, SyncReport};
use crate::storefront::StorefrontClient;

const IDLE_DELAY: Duration = Duration::from_millis(500);

/// Drains sync jobs, short queue first.
#[derive(Clone)]
pub struct SyncWorker {
    queue: Arc<dyn MessageQueue>,
    client: Arc<dyn StorefrontClient>,
    sync: OrderSyncCoordinator,
    customers: CustomerSync,
}

impl SyncWorker {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        client: Arc<dyn StorefrontClient>,
        sync: OrderSyncCoordinator,
    ) -> Self {
        let customers = CustomerSync::new(
            client.clone(),
            sync.store().clone(),
            sync.label_overrides().clone(),
        );
        Self {
            queue,
            client,
            sync,
            customers,
        }
    }

    /// Handles every queued job and returns how many were taken.
    pub async fn drain_once(&self) -> Result<usize, ServiceError> {
        let mut handled = 0;
        while let Some(message) = self.next_message().await? {
            self.handle(message).await?;
            handled += 1;
        }
        Ok(handled)
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("Sync worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.drain_once().await {
                Ok(0) => {}
                Ok(n) => debug!(jobs = n, "Drained sync queue"),
                Err(e) => error!("sync worker error: {}", e),
            }
            tokio::select! {
                _ = sleep(IDLE_DELAY) => {}
                _ = shutdown.changed() => {}
            }
        }
        info!("Sync worker stopped");
    }

    async fn next_message(&self) -> Result<Option<Message>, ServiceError> {
        for topic in [QUEUE_SHORT, QUEUE_DEFAULT] {
            if let Some(message) = self.queue.subscribe(topic).await? {
                return Ok(Some(message));
            }
        }
        Ok(None)
    }

    async fn handle(&self, message: Message) -> Result<(), ServiceError> {
        let job = match message.job() {
            Ok(job) => job,
            Err(e) => {
                warn!(message_id = %message.id, error = %e, "Dropping undecodable job");
                self.queue.ack(&message.id).await?;
                return Ok(());
            }
        };

        let report = self.execute(&job).await;
        if report.outcome == SyncOutcome::Errored && report.retryable {
            warn!(
                external_id = report.external_id,
                retry = message.retry_count + 1,
                "Job failed, returning to queue"
            );
            self.queue.nack(&message.id).await?;
        } else {
            self.queue.ack(&message.id).await?;
        }
        Ok(())
    }

    async fn execute(&self, job: &SyncJob) -> SyncReport {
        match job {
            SyncJob::Payload { order, origin } => {
                self.sync.sync_order(order, *origin, SyncMode::Live).await
            }
            SyncJob::Fetch {
                external_id,
                origin,
            } => match self.client.fetch_order(*external_id).await {
                Ok(order) => self.sync.sync_order(&order, *origin, SyncMode::Live).await,
                Err(e) => failed(*external_id, ServiceError::from(e)),
            },
            SyncJob::Customer { customer } => match self.customers.sync_customer(customer).await {
                Ok((_, created)) => {
                    let outcome = if created {
                        SyncOutcome::Created
                    } else {
                        SyncOutcome::Updated
                    };
                    SyncReport::new(job.external_id(), outcome, None)
                }
                Err(e) => failed(job.external_id(), e),
            },
        }
    }
}

fn failed(external_id: i64, err: ServiceError) -> SyncReport {
    let mut report = SyncReport::errored(external_id, None, err.to_string());
    report.retryable = err.is_retryable();
    report
}
