//! Record types exchanged with the high-level producer and consumer

use bytes::Bytes;
use kafwire::protocol::kafka::records::Record;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::ClientError;

pub type TopicName = String;
pub type PartitionId = i32;
pub type Offset = i64;

/// Topic partition identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicPartition {
    pub topic: TopicName,
    pub partition: PartitionId,
}

impl TopicPartition {
    pub fn new(topic: impl Into<TopicName>, partition: PartitionId) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// High-level record for producing messages
#[derive(Debug, Clone)]
pub struct ProduceRecord {
    pub topic: TopicName,
    /// `None` lets the producer pick a partition.
    pub partition: Option<PartitionId>,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
    pub headers: Vec<(String, Option<Bytes>)>,
    /// Milliseconds since the epoch; `None` means now.
    pub timestamp: Option<i64>,
}

impl ProduceRecord {
    /// Create a new record builder
    pub fn builder() -> ProduceRecordBuilder {
        ProduceRecordBuilder::new()
    }

    /// Create a simple record with topic and value
    pub fn new<T: Into<TopicName>, V: Into<Bytes>>(topic: T, value: V) -> Self {
        Self {
            topic: topic.into(),
            partition: None,
            key: None,
            value: Some(value.into()),
            headers: Vec::new(),
            timestamp: None,
        }
    }

    /// Create a record with topic, key, and value
    pub fn with_key<T: Into<TopicName>, K: Into<Bytes>, V: Into<Bytes>>(
        topic: T,
        key: K,
        value: V,
    ) -> Self {
        Self {
            key: Some(key.into()),
            ..Self::new(topic, value)
        }
    }

    /// Size of key and value payloads.
    pub fn payload_size(&self) -> usize {
        self.key.as_ref().map_or(0, |k| k.len()) + self.value.as_ref().map_or(0, |v| v.len())
    }

    pub(crate) fn to_record(&self) -> Record {
        self.headers.iter().fold(
            Record::new(self.key.clone(), self.value.clone()),
            |record, (key, value)| record.with_header(key.clone(), value.clone()),
        )
    }
}

/// Builder for ProduceRecord
#[derive(Debug, Default)]
pub struct ProduceRecordBuilder {
    topic: Option<TopicName>,
    partition: Option<PartitionId>,
    key: Option<Bytes>,
    value: Option<Bytes>,
    headers: Vec<(String, Option<Bytes>)>,
    timestamp: Option<i64>,
}

impl ProduceRecordBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn topic<T: Into<TopicName>>(mut self, topic: T) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn partition(mut self, partition: PartitionId) -> Self {
        self.partition = Some(partition);
        self
    }

    pub fn key<K: Into<Bytes>>(mut self, key: K) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn value<V: Into<Bytes>>(mut self, value: V) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn header<K: Into<String>, V: Into<Bytes>>(mut self, key: K, value: V) -> Self {
        self.headers.push((key.into(), Some(value.into())));
        self
    }

    pub fn timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn build(self) -> Result<ProduceRecord, ClientError> {
        let topic = self
            .topic
            .ok_or_else(|| ClientError::invalid_config("record topic is required"))?;

        Ok(ProduceRecord {
            topic,
            partition: self.partition,
            key: self.key,
            value: self.value,
            headers: self.headers,
            timestamp: self.timestamp,
        })
    }
}

/// High-level record for consuming messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumeRecord {
    pub topic: TopicName,
    pub partition: PartitionId,
    pub offset: Offset,
    pub timestamp: i64,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
    pub headers: Vec<(String, Option<Bytes>)>,
}

impl ConsumeRecord {
    pub(crate) fn from_record(
        tp: &TopicPartition,
        offset: Offset,
        timestamp: i64,
        record: &Record,
    ) -> Self {
        Self {
            topic: tp.topic.clone(),
            partition: tp.partition,
            offset,
            timestamp,
            key: record.key.clone(),
            value: record.value.clone(),
            headers: record
                .headers
                .iter()
                .map(|h| (h.key.clone(), h.value.clone()))
                .collect(),
        }
    }
}

/// Metadata for a produce operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProduceMetadata {
    pub topic: TopicName,
    pub partition: PartitionId,
    /// Assigned offset, or -1 when the producer does not wait for acks.
    pub offset: Offset,
    pub log_append_time: Option<i64>,
}

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_requires_topic() {
        assert!(ProduceRecord::builder().value("v").build().is_err());

        let record = ProduceRecord::builder()
            .topic("orders")
            .key("k")
            .value("v")
            .header("source", "web")
            .partition(2)
            .build()
            .unwrap();
        assert_eq!(record.topic, "orders");
        assert_eq!(record.partition, Some(2));
        assert_eq!(record.payload_size(), 2);
    }

    #[test]
    fn test_to_record_keeps_headers_in_order() {
        let record = ProduceRecord::builder()
            .topic("t")
            .value("v")
            .header("a", "1")
            .header("b", "2")
            .build()
            .unwrap()
            .to_record();
        let keys: Vec<&str> = record.headers.iter().map(|h| h.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_topic_partition_ordering() {
        let mut tps = vec![
            TopicPartition::new("b", 0),
            TopicPartition::new("a", 1),
            TopicPartition::new("a", 0),
        ];
        tps.sort();
        assert_eq!(tps[0], TopicPartition::new("a", 0));
        assert_eq!(tps[2].to_string(), "b-0");
    }
}
