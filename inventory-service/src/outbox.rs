use anyhow::Result;
use rdkafka::producer::{FutureProducer, FutureRecord};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::models::DbOutboxEvent;
use crate::store::InventoryStore;

const BATCH_SIZE: i64 = 100;

/// Publishes reservation events written alongside each ledger change.
pub struct OutboxProcessor {
    store: Arc<dyn InventoryStore>,
    producer: FutureProducer,
    topic: String,
}

impl OutboxProcessor {
    pub fn new(store: Arc<dyn InventoryStore>, producer: FutureProducer, topic: String) -> Self {
        Self { store, producer, topic }
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        let mut interval = time::interval(Duration::from_secs(5));

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.process_outbox_events().await {
                        error!("Error processing outbox events: {}", e);
                    }
                }
            }
        }

        info!("Outbox processor stopped");
    }

    async fn process_outbox_events(&self) -> Result<()> {
        let unprocessed_events = self.store.pending_events(BATCH_SIZE).await?;

        for event in unprocessed_events {
            if let Err(e) = self.publish_event(&event).await {
                error!("Failed to publish event {}: {}", event.id, e);
                continue;
            }

            self.store.mark_event_processed(event.id).await?;

            info!(event_type = %event.event_type, "Published outbox event: {}", event.id);
        }

        Ok(())
    }

    async fn publish_event(&self, event: &DbOutboxEvent) -> Result<()> {
        let json = serde_json::to_string(&event.event_data)?;
        let record = FutureRecord::to(&self.topic)
            .payload(&json)
            .key(&event.aggregate_id);

        self.producer.send(record, Duration::from_secs(5)).await
            .map_err(|(e, _)| anyhow::anyhow!("Failed to publish event: {}", e))?;

        Ok(())
    }
}
