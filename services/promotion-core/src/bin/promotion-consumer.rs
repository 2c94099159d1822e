use std::time::Duration;

use platform_common::env::{getenv, getenv_u32, getenv_u64};
use platform_common::inventory::RedisInventory;

use promotion_core::consumer::{ConsumerConfig, DeductionConsumer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cfg = ConsumerConfig {
        brokers: getenv("PROMOTION_MQ_BROKERS", "localhost:9092"),
        group: getenv("PROMOTION_MQ_GROUP", "promotion-inventory-consumer"),
        topic: getenv("PROMOTION_MQ_TOPIC", "trade-order"),
        max_retries: getenv_u32("PROMOTION_MQ_MAX_RETRIES", 5),
        idempotency_ttl: Duration::from_secs(getenv_u64(
            "PROMOTION_IDEMPOTENCY_TTL_SECS",
            24 * 60 * 60,
        )),
    };
    let redis_url = getenv("PROMOTION_REDIS_URL", "redis://127.0.0.1:6379");

    let inventory = RedisInventory::connect(&redis_url).await?;
    let consumer = DeductionConsumer::new(inventory, cfg);
    consumer.run().await?;
    Ok(())
}
