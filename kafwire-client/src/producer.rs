//! Producer client for appending records to topic partitions
//!
//! Every record travels alone in an uncompressed batch; there is no linger or
//! accumulation.

use crate::config::{ProducerConfig, ProducerConfigBuilder};
use crate::connection::{ConnectionOptions, ConnectionPool};
use crate::error::ClientError;
use crate::protocol::{now_millis, ProduceMetadata, ProduceRecord};
use crate::transport::{Dialer, TcpDialer};
use bytes::Bytes;
use dashmap::DashMap;
use kafwire::protocol::kafka::messages::{MetadataRequest, ProduceRequest};
use kafwire::protocol::kafka::records::RecordBatch;
use kafwire::protocol::kafka::API_KEY_PRODUCE;
use kafwire::{CodecError, KafkaErrorCode};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Record batches (magic v2) are accepted from Produce v3 on.
const MIN_PRODUCE_VERSION: i16 = 3;

/// One partition of a topic; `leader` is negative while no broker leads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PartitionLeader {
    partition: i32,
    leader: i32,
}

impl PartitionLeader {
    fn has_leader(&self) -> bool {
        self.leader >= 0
    }
}

/// High-level producer client for sending messages
#[derive(Debug)]
pub struct Producer {
    config: ProducerConfig,
    pool: Arc<ConnectionPool>,
    topic_metadata: DashMap<String, Arc<Vec<PartitionLeader>>>,
    round_robin: AtomicUsize,
}

impl Producer {
    /// Create a new producer with the given configuration
    pub async fn new(config: ProducerConfig) -> Result<Self, ClientError> {
        let dialer = Arc::new(TcpDialer::new(config.client_config.connection_timeout));
        Self::with_dialer(config, dialer).await
    }

    /// Create a producer that opens broker streams through `dialer`.
    pub async fn with_dialer(
        config: ProducerConfig,
        dialer: Arc<dyn Dialer>,
    ) -> Result<Self, ClientError> {
        config.validate()?;

        let pool = Arc::new(ConnectionPool::new(
            config.client_config.brokers.clone(),
            dialer,
            ConnectionOptions::from(&config.client_config),
        ));
        pool.get_connection().await?;

        info!(acks = config.acks, "producer created");
        Ok(Self {
            config,
            pool,
            topic_metadata: DashMap::new(),
            round_robin: AtomicUsize::new(0),
        })
    }

    /// Send a single record and wait for the acknowledgement the configured
    /// `acks` asks for.
    pub async fn send(&self, record: ProduceRecord) -> Result<ProduceMetadata, ClientError> {
        let size = record.payload_size();
        if size > self.config.max_message_size {
            return Err(ClientError::MessageTooLarge {
                size,
                max_size: self.config.max_message_size,
            });
        }

        let timestamp = record.timestamp.unwrap_or_else(now_millis);
        let mut batch = RecordBatch::new(timestamp);
        batch.push(record.to_record());
        let records = batch.encode_to_bytes()?;

        let retry = &self.config.client_config.retry;
        let mut attempt = 0u32;
        loop {
            match self.send_once(&record, records.clone()).await {
                Ok(metadata) => return Ok(metadata),
                Err(e) if e.is_retryable() && attempt < retry.max_retries => {
                    let delay = retry.backoff(attempt);
                    attempt += 1;
                    warn!(
                        topic = %record.topic,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "produce failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Send records one after another, stopping at the first failure.
    pub async fn send_batch(
        &self,
        records: Vec<ProduceRecord>,
    ) -> Result<Vec<ProduceMetadata>, ClientError> {
        let mut results = Vec::with_capacity(records.len());
        for record in records {
            results.push(self.send(record).await?);
        }
        Ok(results)
    }

    /// Close the producer and release resources
    pub async fn close(&self) -> Result<(), ClientError> {
        self.pool.close_all().await;
        info!("producer closed");
        Ok(())
    }

    async fn send_once(
        &self,
        record: &ProduceRecord,
        records: Bytes,
    ) -> Result<ProduceMetadata, ClientError> {
        let partitions = self.topic_partitions(&record.topic).await?;
        let target = choose_partition(record, &partitions, &self.round_robin).map_err(|e| {
            if e.is_retryable() {
                self.topic_metadata.remove(&record.topic);
            }
            e
        })?;

        let conn = self.pool.get_node(target.leader).await.map_err(|e| {
            self.topic_metadata.remove(&record.topic);
            e
        })?;
        let version = conn.negotiate_version::<ProduceRequest>()?;
        if version < MIN_PRODUCE_VERSION {
            return Err(CodecError::UnsupportedVersion {
                api_key: API_KEY_PRODUCE,
                version,
            }
            .into());
        }

        let mut request = ProduceRequest::new(version);
        request.acks = self.config.acks;
        request.timeout_ms = self.config.timeout.as_millis().min(i32::MAX as u128) as i32;
        request.add_records(&record.topic, target.partition, records);

        if self.config.acks == 0 {
            conn.send_oneway(&request).await?;
            return Ok(ProduceMetadata {
                topic: record.topic.clone(),
                partition: target.partition,
                offset: -1,
                log_append_time: None,
            });
        }

        let timeout = self.config.client_config.request_timeout + self.config.timeout;
        let response = conn.send_with_timeout(&request, timeout).await?;
        let partition = response
            .partition(&record.topic, target.partition)
            .ok_or_else(|| {
                ClientError::protocol_violation(
                    conn.broker(),
                    format!("no produce result for {}-{}", record.topic, target.partition),
                )
            })?;

        let code = partition.error();
        if !code.is_ok() {
            if code.is_stale_metadata() {
                self.topic_metadata.remove(&record.topic);
            }
            return Err(ClientError::broker(
                code,
                format!("produce {}-{}", record.topic, target.partition),
            ));
        }

        debug!(
            topic = %record.topic,
            partition = target.partition,
            offset = partition.base_offset,
            "record acknowledged"
        );
        Ok(ProduceMetadata {
            topic: record.topic.clone(),
            partition: target.partition,
            offset: partition.base_offset,
            log_append_time: (partition.log_append_time_ms >= 0)
                .then_some(partition.log_append_time_ms),
        })
    }

    async fn topic_partitions(&self, topic: &str) -> Result<Arc<Vec<PartitionLeader>>, ClientError> {
        if let Some(partitions) = self.topic_metadata.get(topic) {
            return Ok(partitions.value().clone());
        }

        let conn = self.pool.get_connection().await?;
        let version = conn.negotiate_version::<MetadataRequest>()?;
        let response = conn
            .send(&MetadataRequest::for_topics(version, vec![topic.to_string()]))
            .await?;
        self.pool.update_nodes(&response.brokers);

        let metadata = response.topic(topic).ok_or_else(|| ClientError::TopicNotFound {
            topic: topic.to_string(),
        })?;
        match metadata.error() {
            KafkaErrorCode::NoError => {}
            KafkaErrorCode::UnknownTopicOrPartition => {
                return Err(ClientError::TopicNotFound {
                    topic: topic.to_string(),
                })
            }
            code => return Err(ClientError::broker(code, format!("metadata for {}", topic))),
        }

        let mut partitions: Vec<PartitionLeader> = metadata
            .partitions
            .iter()
            .map(|p| PartitionLeader {
                partition: p.partition_index,
                leader: p.leader_id,
            })
            .collect();
        if !partitions.iter().any(PartitionLeader::has_leader) {
            return Err(ClientError::broker(
                KafkaErrorCode::LeaderNotAvailable,
                format!("no partition of {} has a leader", topic),
            ));
        }
        partitions.sort_by_key(|p| p.partition);

        let partitions = Arc::new(partitions);
        self.topic_metadata
            .insert(topic.to_string(), partitions.clone());
        Ok(partitions)
    }
}

/// Pick the partition for `record`. Keys hash over every partition of the
/// topic, so a key keeps its partition while that partition's leader is
/// offline; round robin only visits partitions that have a leader.
fn choose_partition(
    record: &ProduceRecord,
    partitions: &[PartitionLeader],
    round_robin: &AtomicUsize,
) -> Result<PartitionLeader, ClientError> {
    let chosen = match (record.partition, &record.key) {
        (Some(partition), _) => partitions
            .iter()
            .find(|p| p.partition == partition)
            .copied()
            .ok_or_else(|| {
                ClientError::broker(
                    KafkaErrorCode::UnknownTopicOrPartition,
                    format!("{}-{}", record.topic, partition),
                )
            })?,
        (None, Some(key)) => partitions[hash_partition(key, partitions.len())],
        (None, None) => {
            let led: Vec<&PartitionLeader> = partitions.iter().filter(|p| p.has_leader()).collect();
            if led.is_empty() {
                return Err(ClientError::broker(
                    KafkaErrorCode::LeaderNotAvailable,
                    format!("no partition of {} has a leader", record.topic),
                ));
            }
            *led[round_robin.fetch_add(1, Ordering::Relaxed) % led.len()]
        }
    };

    if !chosen.has_leader() {
        return Err(ClientError::broker(
            KafkaErrorCode::LeaderNotAvailable,
            format!("{}-{}", record.topic, chosen.partition),
        ));
    }
    Ok(chosen)
}

/// FNV-1a over the key bytes.
fn hash_partition(key: &[u8], partition_count: usize) -> usize {
    let mut hash = 2166136261u32;
    for byte in key {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(16777619);
    }
    (hash as usize) % partition_count
}

/// Builder for Producer
#[derive(Debug, Default)]
pub struct ProducerBuilder {
    config: ProducerConfigBuilder,
    dialer: Option<Arc<dyn Dialer>>,
}

impl ProducerBuilder {
    /// Create a new producer builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration
    pub fn with_config(config: ProducerConfig) -> Self {
        Self {
            config: ProducerConfigBuilder::from_config(config),
            dialer: None,
        }
    }

    /// Set the broker addresses
    pub fn brokers<I, S>(mut self, brokers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config = self.config.brokers(brokers);
        self
    }

    /// Acknowledgment level: 0, 1 or -1 (all in-sync replicas)
    pub fn acks(mut self, acks: i16) -> Self {
        self.config = self.config.acks(acks);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.timeout(timeout);
        self
    }

    pub fn max_message_size(mut self, size: usize) -> Self {
        self.config = self.config.max_message_size(size);
        self
    }

    /// Open broker streams through `dialer` instead of plain TCP
    pub fn dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = Some(dialer);
        self
    }

    /// Build the producer
    pub async fn build(self) -> Result<Producer, ClientError> {
        let config = self.config.build()?;
        match self.dialer {
            Some(dialer) => Producer::with_dialer(config, dialer).await,
            None => Producer::new(config).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_partition_is_stable() {
        let a = hash_partition(b"user-123", 12);
        assert_eq!(a, hash_partition(b"user-123", 12));
        assert!(a < 12);
        assert_eq!(hash_partition(b"anything", 1), 0);
    }

    #[test]
    fn test_hash_partition_known_value() {
        // FNV-1a("a") = 0xe40c292c
        assert_eq!(hash_partition(b"a", 1 << 16), 0x292c);
    }

    fn partitions(leaders: &[i32]) -> Vec<PartitionLeader> {
        leaders
            .iter()
            .enumerate()
            .map(|(partition, &leader)| PartitionLeader {
                partition: partition as i32,
                leader,
            })
            .collect()
    }

    #[test]
    fn test_key_hashes_over_every_partition() {
        let round_robin = AtomicUsize::new(0);
        let key = "user-123";
        let expected = hash_partition(key.as_bytes(), 3) as i32;
        let record = ProduceRecord::with_key("t", key, "v");

        let all_led = choose_partition(&record, &partitions(&[1, 1, 1]), &round_robin).unwrap();
        assert_eq!(all_led.partition, expected);

        // another partition losing its leader does not move the key
        let other = (expected + 1) % 3;
        let mut leaders = [1, 1, 1];
        leaders[other as usize] = -1;
        let chosen = choose_partition(&record, &partitions(&leaders), &round_robin).unwrap();
        assert_eq!(chosen.partition, expected);

        // its own partition losing the leader is retriable, not a reroute
        leaders = [1, 1, 1];
        leaders[expected as usize] = -1;
        let err = choose_partition(&record, &partitions(&leaders), &round_robin).unwrap_err();
        assert_eq!(err.broker_code(), Some(KafkaErrorCode::LeaderNotAvailable));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_round_robin_skips_leaderless_partitions() {
        let round_robin = AtomicUsize::new(0);
        let layout = partitions(&[1, -1, 2]);
        let record = ProduceRecord::new("t", "v");
        let picked: Vec<i32> = (0..4)
            .map(|_| choose_partition(&record, &layout, &round_robin).unwrap().partition)
            .collect();
        assert_eq!(picked, vec![0, 2, 0, 2]);

        let explicit = ProduceRecord::builder()
            .topic("t")
            .partition(1)
            .value("v")
            .build()
            .unwrap();
        let err = choose_partition(&explicit, &layout, &round_robin).unwrap_err();
        assert_eq!(err.broker_code(), Some(KafkaErrorCode::LeaderNotAvailable));
    }

    #[tokio::test]
    async fn test_invalid_acks_rejected() {
        let result = ProducerBuilder::new()
            .brokers(vec!["localhost:9092"])
            .acks(2)
            .build()
            .await;
        assert!(matches!(result, Err(ClientError::InvalidConfig { .. })));
    }
}
