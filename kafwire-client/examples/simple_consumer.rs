//! Join a consumer group and print what arrives.

use futures::StreamExt;
use kafwire_client::*;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const TOPIC: &str = "kafwire-demo";
const GROUP: &str = "kafwire-demo-group";

fn show(record: &ConsumeRecord) -> String {
    let key = record
        .key
        .as_ref()
        .map(|k| String::from_utf8_lossy(k).into_owned())
        .unwrap_or_else(|| "<no key>".to_string());
    let value = record
        .value
        .as_ref()
        .map(|v| String::from_utf8_lossy(v).into_owned())
        .unwrap_or_default();
    format!(
        "{}:{} offset={} key='{}' value='{}'",
        record.topic, record.partition, record.offset, key, value
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let consumer = ConsumerBuilder::new()
        .brokers(vec!["localhost:9092"])
        .group_id(GROUP)
        .topics(vec![TOPIC])
        .session_timeout(Duration::from_secs(30))
        .heartbeat_interval(Duration::from_secs(3))
        .build()
        .await?;

    println!("polling {} as member of {}", TOPIC, GROUP);
    for i in 0..5 {
        let records = consumer.poll().await?;
        if records.is_empty() {
            println!("poll {}: nothing yet", i + 1);
            tokio::time::sleep(Duration::from_millis(500)).await;
            continue;
        }
        for record in &records {
            println!("poll {}: {}", i + 1, show(record));
        }
        consumer.commit_sync().await?;
    }

    let membership = consumer.coordinator().membership().await;
    println!(
        "member {} generation {} assignment {:?}",
        membership.member_id, membership.generation_id, membership.assignment.topics
    );

    println!("streaming for 10 seconds");
    let mut count = 0usize;
    {
        let stream = consumer.stream();
        tokio::pin!(stream);
        let deadline = tokio::time::sleep(Duration::from_secs(10));
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                next = stream.next() => match next {
                    Some(Ok(record)) => {
                        count += 1;
                        println!("{}", show(&record));
                    }
                    Some(Err(e)) => {
                        eprintln!("consume failed: {}", e);
                        break;
                    }
                    None => break,
                },
                _ = &mut deadline => break,
            }
        }
    }

    if count > 0 {
        consumer.commit_sync().await?;
    }
    consumer.close().await?;
    println!("consumed {} records from the stream", count);
    Ok(())
}
