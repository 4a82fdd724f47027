//! Produce a few records to a local broker.
//!
//! Run with `RUST_LOG=kafwire_client=debug` to watch version negotiation and
//! partition routing.

use kafwire_client::*;
use tracing_subscriber::EnvFilter;

const TOPIC: &str = "kafwire-demo";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("kafwire - simple producer");
    println!("=========================");

    let producer = ProducerBuilder::new()
        .brokers(vec!["localhost:9092"])
        .acks(1)
        .max_message_size(1024 * 1024)
        .build()
        .await?;

    // No key: partitions are picked round robin
    let metadata = producer.send(ProduceRecord::new(TOPIC, "hello")).await?;
    println!(
        "plain record      -> partition {} offset {}",
        metadata.partition, metadata.offset
    );

    // Same key, same partition
    for event in ["login", "logout"] {
        let metadata = producer
            .send(ProduceRecord::with_key(TOPIC, "user-123", event))
            .await?;
        println!(
            "keyed {:<11} -> partition {} offset {}",
            event, metadata.partition, metadata.offset
        );
    }

    let record = ProduceRecord::builder()
        .topic(TOPIC)
        .key("order-456")
        .value(r#"{"total": 99.99}"#)
        .header("content-type", "application/json")
        .build()?;
    let metadata = producer.send(record).await?;
    println!(
        "with headers      -> partition {} offset {} (log append time {:?})",
        metadata.partition, metadata.offset, metadata.log_append_time
    );

    let batch = (1..=3)
        .map(|i| ProduceRecord::with_key(TOPIC, format!("batch-{}", i), format!("message {}", i)))
        .collect();
    for (i, metadata) in producer.send_batch(batch).await?.iter().enumerate() {
        println!(
            "batch {}           -> partition {} offset {}",
            i + 1,
            metadata.partition,
            metadata.offset
        );
    }

    producer.close().await?;
    println!("done, run `cargo run --example simple_consumer` to read them back");
    Ok(())
}
