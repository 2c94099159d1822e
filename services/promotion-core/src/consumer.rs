//! Applies committed order messages to inventory.
//!
//! Delivery is at-least-once, so application is fenced at two levels. An
//! order-wide token short-circuits redeliveries of fully applied orders;
//! it is released on a terminal failure so a later redelivery can finish
//! the order. Each deduction is additionally fenced by a per-course
//! marker that stays behind once the decrement lands, so the retry
//! resumes where the failed delivery stopped instead of deducting the
//! earlier courses a second time.

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{Headers, Message};
use std::time::Duration;

use platform_common::inventory::{
    course_lock_key, order_lock_key, stock_key, Inventory, InventoryError,
};
use platform_common::message::{OrderMessage, ORDER_PLACED_TAG};

#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("kafka: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
    #[error("decode: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("inventory: {0}")]
    Inventory(#[from] InventoryError),
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub brokers: String,
    pub group: String,
    pub topic: String,
    pub max_retries: u32,
    pub idempotency_ttl: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            group: "promotion-inventory-consumer".to_string(),
            topic: "trade-order".to_string(),
            max_retries: 5,
            idempotency_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Deducted,
    Skipped,
}

pub struct DeductionConsumer<I> {
    inventory: I,
    cfg: ConsumerConfig,
}

impl<I: Inventory> DeductionConsumer<I> {
    pub fn new(inventory: I, cfg: ConsumerConfig) -> Self {
        Self { inventory, cfg }
    }

    pub async fn run(&self) -> Result<(), ConsumerError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.cfg.brokers)
            .set("group.id", &self.cfg.group)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "earliest")
            .create()?;
        consumer.subscribe(&[self.cfg.topic.as_str()])?;
        tracing::info!(topic = %self.cfg.topic, group = %self.cfg.group, "deduction consumer running");

        loop {
            match consumer.recv().await {
                Ok(delivery) => {
                    if !has_order_placed_tag(&delivery) {
                        continue;
                    }
                    let payload = delivery.payload().unwrap_or_default();
                    match self.apply(payload).await {
                        Ok(Applied::Deducted) => {}
                        Ok(Applied::Skipped) => {}
                        // terminal after retries: left for the dead-letter path
                        Err(err) => tracing::error!(error = %err, "deduction failed"),
                    }
                }
                Err(err) => tracing::error!(error = %err, "consumer receive failed"),
            }
        }
    }

    pub async fn apply(&self, payload: &[u8]) -> Result<Applied, ConsumerError> {
        let msg: OrderMessage = serde_json::from_slice(payload)?;
        let lock_key = order_lock_key(msg.order_id);

        match self
            .inventory
            .set_if_absent_ttl(&lock_key, "1", self.cfg.idempotency_ttl)
            .await
        {
            Ok(()) => {}
            Err(InventoryError::KeyExists) => {
                tracing::info!(order_id = msg.order_id, "order already applied, skipping");
                return Ok(Applied::Skipped);
            }
            Err(err) => return Err(err.into()),
        }

        for &course_id in &msg.course_ids {
            if let Err(err) = self.apply_course(msg.order_id, course_id).await {
                tracing::error!(
                    order_id = msg.order_id,
                    course_id,
                    error = %err,
                    "deduction aborted, releasing order token"
                );
                // per-course markers stay behind: the redelivery resumes at
                // the failed course instead of replaying the finished ones
                let _ = self.inventory.remove(&lock_key).await;
                return Err(err);
            }
        }

        tracing::info!(order_id = msg.order_id, courses = msg.course_ids.len(), "inventory applied");
        Ok(Applied::Deducted)
    }

    async fn apply_course(&self, order_id: i64, course_id: i64) -> Result<(), ConsumerError> {
        let marker = course_lock_key(order_id, course_id);
        match self
            .inventory
            .set_if_absent_ttl(&marker, "1", self.cfg.idempotency_ttl)
            .await
        {
            Ok(()) => {}
            Err(InventoryError::KeyExists) => {
                tracing::info!(order_id, course_id, "course already deducted, skipping");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        }

        if let Err(err) = self.decr_with_retry(course_id, 1).await {
            // the decrement did not land, so the marker must not outlive it
            let _ = self.inventory.remove(&marker).await;
            return Err(err);
        }
        Ok(())
    }

    async fn decr_with_retry(&self, course_id: i64, qty: i64) -> Result<(), ConsumerError> {
        let key = stock_key(course_id);
        let mut attempts = 0;
        loop {
            match self.inventory.decr(&key, qty).await {
                Ok(remaining) => {
                    tracing::info!(course_id, ?remaining, "stock deducted");
                    return Ok(());
                }
                Err(InventoryError::Kv(err)) if attempts < self.cfg.max_retries => {
                    attempts += 1;
                    let backoff = 2_u64.saturating_pow(attempts).min(64);
                    tracing::warn!(course_id, attempts, error = %err, "kv error, retrying");
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

fn has_order_placed_tag(delivery: &rdkafka::message::BorrowedMessage<'_>) -> bool {
    let Some(headers) = delivery.headers() else {
        // tagless messages predate the tag header; let them through
        return true;
    };
    headers
        .iter()
        .find(|header| header.key == "tag")
        .and_then(|header| header.value)
        .map(|value| value == ORDER_PLACED_TAG.as_bytes())
        .unwrap_or(true)
}
