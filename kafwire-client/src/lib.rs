//! # kafwire-client
//!
//! Async client for brokers speaking the Kafka wire protocol, built on the
//! `kafwire` codec.
//!
//! ## Features
//!
//! - **Multiplexed connections**: one socket per broker carries any number of
//!   concurrent requests, matched to responses by correlation id
//! - **Version negotiation**: ApiVersions on connect, every request encoded at
//!   the highest version both sides support
//! - **Consumer groups**: join, sync, heartbeat and leave with pluggable
//!   partition assignors and static membership
//! - **Observability**: `tracing` events and in-process counters
//!
//! ## Quick Start
//!
//! ### Producer Example
//!
//! ```rust,no_run
//! use kafwire_client::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let producer = ProducerBuilder::new()
//!         .brokers(vec!["localhost:9092"])
//!         .build()
//!         .await?;
//!
//!     let record = ProduceRecord::builder()
//!         .topic("my-topic")
//!         .key("user-123")
//!         .value("hello")
//!         .build()?;
//!
//!     let metadata = producer.send(record).await?;
//!     println!("partition {} offset {}", metadata.partition, metadata.offset);
//!     Ok(())
//! }
//! ```
//!
//! ### Consumer Example
//!
//! ```rust,no_run
//! use kafwire_client::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let consumer = ConsumerBuilder::new()
//!         .brokers(vec!["localhost:9092"])
//!         .group_id("my-group")
//!         .topics(vec!["my-topic"])
//!         .build()
//!         .await?;
//!
//!     for record in consumer.poll().await? {
//!         println!("{}@{}: {:?}", record.partition, record.offset, record.value);
//!     }
//!     consumer.commit_sync().await?;
//!     consumer.close().await
//! }
//! ```

pub mod admin;
pub mod assignor;
pub mod client;
pub mod config;
pub mod connection;
pub mod consumer;
pub mod coordinator;
pub mod error;
pub mod metrics;
pub mod producer;
pub mod protocol;
pub mod transport;

pub use admin::AdminClient;
pub use assignor::{Assignor, RangeAssignor, RoundRobinAssignor};
pub use client::KafwireClient;
pub use config::*;
pub use connection::{Connection, ConnectionPool, ResponseHandle};
pub use consumer::{Consumer, ConsumerBuilder};
pub use coordinator::{GroupCoordinator, GroupMembership, GroupState};
pub use error::ClientError;
pub use producer::{Producer, ProducerBuilder};
pub use protocol::{ConsumeRecord, ProduceMetadata, ProduceRecord, TopicPartition};
pub use transport::{Dialer, TcpDialer};

/// Client library result type
pub type Result<T> = std::result::Result<T, ClientError>;

/// Client library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
