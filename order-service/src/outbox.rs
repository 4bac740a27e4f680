use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rdkafka::producer::{FutureProducer, FutureRecord};
use shared::OutboxEvent;
use tokio::time;
use tracing::{error, info};

use crate::store::OrderStore;

const BATCH_SIZE: i64 = 100;

/// Kafka topic for an outbox event type.
pub fn topic_for(event_type: &str) -> &'static str {
    match event_type {
        "OrderReceived" | "OrderStatusChanged" => "kitchen-events",
        "PaymentIntentOpened" | "PaymentIntentCompleted" | "PaymentIntentFailed" => "payment-events",
        _ => "order-events",
    }
}

pub struct OutboxProcessor {
    store: Arc<dyn OrderStore>,
    producer: FutureProducer,
}

impl OutboxProcessor {
    pub fn new(store: Arc<dyn OrderStore>, producer: FutureProducer) -> Self {
        Self { store, producer }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(Duration::from_secs(5));

        loop {
            interval.tick().await;

            if let Err(e) = self.process_outbox_events().await {
                error!("Error processing outbox events: {}", e);
            }
        }
    }

    async fn process_outbox_events(&self) -> Result<()> {
        let events = self.store.unpublished_events(BATCH_SIZE).await?;

        for event in events {
            // stop at the first failure so later events of the order stay behind it
            if let Err(e) = self.publish_event(&event).await {
                error!("Failed to publish event {}: {}", event.id, e);
                break;
            }

            self.store.mark_published(event.id).await?;
            info!("Published {} for order {}", event.event_type, event.aggregate_id);
        }

        Ok(())
    }

    async fn publish_event(&self, event: &OutboxEvent) -> Result<()> {
        let json = serde_json::to_string(&event.event_data)?;
        let key = event.aggregate_id.to_string();
        let record = FutureRecord::to(topic_for(&event.event_type))
            .payload(&json)
            .key(&key);

        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| anyhow::anyhow!("Failed to publish event: {}", e))?;

        Ok(())
    }
}
