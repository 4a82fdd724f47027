//! Fetch API (ApiKey = 1), versions 0-7.

use bytes::Bytes;

use super::{api_message, api_request, Decodable, Encodable, FieldGate, VersionGates};
use crate::protocol::kafka::codec::{PacketDecoder, PacketEncoder, Result};
use crate::protocol::kafka::errors::KafkaErrorCode;
use crate::protocol::kafka::records::RecordBatch;
use crate::protocol::kafka::API_KEY_FETCH;

const MAX_BYTES: FieldGate = FieldGate::since("max_bytes", 3);
const ISOLATION_LEVEL: FieldGate = FieldGate::since("isolation_level", 4);
const SESSION: FieldGate = FieldGate::since("session_id", 7);
const PARTITION_LOG_START_OFFSET: FieldGate = FieldGate::since("partitions.log_start_offset", 5);
const FORGOTTEN_TOPICS: FieldGate = FieldGate::since("forgotten_topics_data", 7);

const THROTTLE_TIME_MS: FieldGate = FieldGate::since("throttle_time_ms", 1);
const TOP_LEVEL_ERROR: FieldGate = FieldGate::since("error_code", 7);
const LAST_STABLE_OFFSET: FieldGate = FieldGate::since("partitions.last_stable_offset", 4);
const LOG_START_OFFSET: FieldGate = FieldGate::since("partitions.log_start_offset", 5);
const ABORTED_TRANSACTIONS: FieldGate = FieldGate::since("partitions.aborted_transactions", 4);

/// Consumers always fetch as replica -1.
pub const CONSUMER_REPLICA_ID: i32 = -1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPartition {
    pub partition: i32,
    pub fetch_offset: i64,
    pub log_start_offset: i64,
    pub partition_max_bytes: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FetchTopic {
    pub topic: String,
    pub partitions: Vec<FetchPartition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ForgottenTopic {
    pub topic: String,
    pub partitions: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub version: i16,
    pub replica_id: i32,
    pub max_wait_ms: i32,
    pub min_bytes: i32,
    pub max_bytes: i32,
    /// 0 = read uncommitted, 1 = read committed.
    pub isolation_level: i8,
    pub session_id: i32,
    pub session_epoch: i32,
    pub topics: Vec<FetchTopic>,
    pub forgotten_topics_data: Vec<ForgottenTopic>,
}

impl Default for FetchRequest {
    fn default() -> Self {
        Self {
            version: 0,
            replica_id: CONSUMER_REPLICA_ID,
            max_wait_ms: 500,
            min_bytes: 1,
            max_bytes: 52_428_800,
            isolation_level: 0,
            session_id: 0,
            // -1: sessionless full fetch
            session_epoch: -1,
            topics: Vec::new(),
            forgotten_topics_data: Vec::new(),
        }
    }
}

impl FetchRequest {
    pub const GATES: VersionGates = VersionGates::new(&[
        MAX_BYTES,
        ISOLATION_LEVEL,
        SESSION,
        PARTITION_LOG_START_OFFSET,
        FORGOTTEN_TOPICS,
    ]);

    pub fn new(version: i16) -> Self {
        Self {
            version,
            ..Self::default()
        }
    }

    pub fn add_partition(&mut self, topic: &str, partition: i32, fetch_offset: i64, max_bytes: i32) {
        let entry = FetchPartition {
            partition,
            fetch_offset,
            log_start_offset: -1,
            partition_max_bytes: max_bytes,
        };
        match self.topics.iter_mut().find(|t| t.topic == topic) {
            Some(existing) => existing.partitions.push(entry),
            None => self.topics.push(FetchTopic {
                topic: topic.to_string(),
                partitions: vec![entry],
            }),
        }
    }
}

impl Encodable for FetchRequest {
    fn encode(&self, enc: &mut PacketEncoder, version: i16) -> Result<()> {
        <Self as super::ApiMessage>::check_version(version)?;
        enc.put_i32(self.replica_id);
        enc.put_i32(self.max_wait_ms);
        enc.put_i32(self.min_bytes);
        if MAX_BYTES.present(version) {
            enc.put_i32(self.max_bytes);
        }
        if ISOLATION_LEVEL.present(version) {
            enc.put_i8(self.isolation_level);
        }
        if SESSION.present(version) {
            enc.put_i32(self.session_id);
            enc.put_i32(self.session_epoch);
        }
        enc.put_array(&self.topics, |enc, topic| {
            enc.put_string(&topic.topic)?;
            enc.put_array(&topic.partitions, |enc, p| {
                enc.put_i32(p.partition);
                enc.put_i64(p.fetch_offset);
                if PARTITION_LOG_START_OFFSET.present(version) {
                    enc.put_i64(p.log_start_offset);
                }
                enc.put_i32(p.partition_max_bytes);
                Ok(())
            })
        })?;
        if FORGOTTEN_TOPICS.present(version) {
            enc.put_array(&self.forgotten_topics_data, |enc, f| {
                enc.put_string(&f.topic)?;
                enc.put_i32_array(&f.partitions)
            })?;
        }
        Ok(())
    }
}

impl Decodable for FetchRequest {
    fn decode(dec: &mut PacketDecoder<'_>, version: i16) -> Result<Self> {
        <Self as super::ApiMessage>::check_version(version)?;
        let mut request = FetchRequest::new(version);
        request.replica_id = dec.get_i32()?;
        request.max_wait_ms = dec.get_i32()?;
        request.min_bytes = dec.get_i32()?;
        if MAX_BYTES.present(version) {
            request.max_bytes = dec.get_i32()?;
        }
        if ISOLATION_LEVEL.present(version) {
            request.isolation_level = dec.get_i8()?;
        }
        if SESSION.present(version) {
            request.session_id = dec.get_i32()?;
            request.session_epoch = dec.get_i32()?;
        }
        request.topics = dec.get_array(|dec| {
            Ok(FetchTopic {
                topic: dec.get_string()?,
                partitions: dec.get_array(|dec| {
                    let partition = dec.get_i32()?;
                    let fetch_offset = dec.get_i64()?;
                    let log_start_offset = if PARTITION_LOG_START_OFFSET.present(version) {
                        dec.get_i64()?
                    } else {
                        -1
                    };
                    Ok(FetchPartition {
                        partition,
                        fetch_offset,
                        log_start_offset,
                        partition_max_bytes: dec.get_i32()?,
                    })
                })?,
            })
        })?;
        if FORGOTTEN_TOPICS.present(version) {
            request.forgotten_topics_data = dec.get_array(|dec| {
                Ok(ForgottenTopic {
                    topic: dec.get_string()?,
                    partitions: dec.get_i32_array()?,
                })
            })?;
        }
        Ok(request)
    }
}

api_message!(FetchRequest, API_KEY_FETCH, 0..=7);
api_request!(FetchRequest => FetchResponse);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AbortedTransaction {
    pub producer_id: i64,
    pub first_offset: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchablePartitionResponse {
    pub partition_index: i32,
    pub error_code: i16,
    pub high_watermark: i64,
    pub last_stable_offset: i64,
    pub log_start_offset: i64,
    pub aborted_transactions: Option<Vec<AbortedTransaction>>,
    pub records: Option<Bytes>,
}

impl Default for FetchablePartitionResponse {
    fn default() -> Self {
        Self {
            partition_index: 0,
            error_code: 0,
            high_watermark: -1,
            last_stable_offset: -1,
            log_start_offset: -1,
            aborted_transactions: None,
            records: None,
        }
    }
}

impl FetchablePartitionResponse {
    pub fn error(&self) -> KafkaErrorCode {
        KafkaErrorCode::from_i16(self.error_code)
    }

    /// Decode the record batches. A batch cut short by the broker's size
    /// limit is dropped.
    pub fn record_batches(&self) -> Result<Vec<RecordBatch>> {
        match &self.records {
            Some(records) => RecordBatch::decode_all(records),
            None => Ok(Vec::new()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FetchableTopicResponse {
    pub topic: String,
    pub partitions: Vec<FetchablePartitionResponse>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FetchResponse {
    pub version: i16,
    pub throttle_time_ms: i32,
    pub error_code: i16,
    pub session_id: i32,
    pub responses: Vec<FetchableTopicResponse>,
}

impl FetchResponse {
    pub const GATES: VersionGates = VersionGates::new(&[
        THROTTLE_TIME_MS,
        TOP_LEVEL_ERROR,
        LAST_STABLE_OFFSET,
        LOG_START_OFFSET,
        ABORTED_TRANSACTIONS,
    ]);

    pub fn new(version: i16) -> Self {
        Self {
            version,
            ..Self::default()
        }
    }

    pub fn error(&self) -> KafkaErrorCode {
        KafkaErrorCode::from_i16(self.error_code)
    }
}

impl Encodable for FetchResponse {
    fn encode(&self, enc: &mut PacketEncoder, version: i16) -> Result<()> {
        <Self as super::ApiMessage>::check_version(version)?;
        if THROTTLE_TIME_MS.present(version) {
            enc.put_i32(self.throttle_time_ms);
        }
        if TOP_LEVEL_ERROR.present(version) {
            enc.put_i16(self.error_code);
            enc.put_i32(self.session_id);
        }
        enc.put_array(&self.responses, |enc, topic| {
            enc.put_string(&topic.topic)?;
            enc.put_array(&topic.partitions, |enc, p| {
                enc.put_i32(p.partition_index);
                enc.put_i16(p.error_code);
                enc.put_i64(p.high_watermark);
                if LAST_STABLE_OFFSET.present(version) {
                    enc.put_i64(p.last_stable_offset);
                }
                if LOG_START_OFFSET.present(version) {
                    enc.put_i64(p.log_start_offset);
                }
                if ABORTED_TRANSACTIONS.present(version) {
                    enc.put_nullable_array(p.aborted_transactions.as_deref(), |enc, a| {
                        enc.put_i64(a.producer_id);
                        enc.put_i64(a.first_offset);
                        Ok(())
                    })?;
                }
                enc.put_nullable_bytes(p.records.as_deref())
            })
        })
    }
}

impl Decodable for FetchResponse {
    fn decode(dec: &mut PacketDecoder<'_>, version: i16) -> Result<Self> {
        <Self as super::ApiMessage>::check_version(version)?;
        let mut response = FetchResponse::new(version);
        if THROTTLE_TIME_MS.present(version) {
            response.throttle_time_ms = dec.get_i32()?;
        }
        if TOP_LEVEL_ERROR.present(version) {
            response.error_code = dec.get_i16()?;
            response.session_id = dec.get_i32()?;
        }
        response.responses = dec.get_array(|dec| {
            Ok(FetchableTopicResponse {
                topic: dec.get_string()?,
                partitions: dec.get_array(|dec| {
                    let mut p = FetchablePartitionResponse {
                        partition_index: dec.get_i32()?,
                        error_code: dec.get_i16()?,
                        high_watermark: dec.get_i64()?,
                        ..FetchablePartitionResponse::default()
                    };
                    if LAST_STABLE_OFFSET.present(version) {
                        p.last_stable_offset = dec.get_i64()?;
                    }
                    if LOG_START_OFFSET.present(version) {
                        p.log_start_offset = dec.get_i64()?;
                    }
                    if ABORTED_TRANSACTIONS.present(version) {
                        p.aborted_transactions = dec.get_nullable_array(|dec| {
                            Ok(AbortedTransaction {
                                producer_id: dec.get_i64()?,
                                first_offset: dec.get_i64()?,
                            })
                        })?;
                    }
                    p.records = dec.get_nullable_bytes()?;
                    Ok(p)
                })?,
            })
        })?;
        Ok(response)
    }
}

api_message!(FetchResponse, API_KEY_FETCH, 0..=7);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::kafka::messages::ApiMessage;

    #[test]
    fn test_request_v0_layout() {
        let mut request = FetchRequest::new(0);
        request.add_partition("t", 0, 10, 1024);
        let bytes = request.to_bytes().unwrap();
        // replica, wait, min_bytes, topics[1], "t", partitions[1], p, offset, max
        assert_eq!(bytes.len(), 4 + 4 + 4 + 4 + 3 + 4 + 4 + 8 + 4);
        assert_eq!(&bytes[..4], &[0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn test_request_v7_round_trip() {
        let mut request = FetchRequest::new(7);
        request.isolation_level = 1;
        request.add_partition("t", 0, 10, 1024);
        request.add_partition("t", 1, 20, 1024);
        request.forgotten_topics_data.push(ForgottenTopic {
            topic: "old".to_string(),
            partitions: vec![3],
        });
        let decoded = FetchRequest::from_bytes(&request.to_bytes().unwrap(), 7).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_response_v4_aborted_transactions() {
        let mut response = FetchResponse::new(4);
        response.responses.push(FetchableTopicResponse {
            topic: "t".to_string(),
            partitions: vec![FetchablePartitionResponse {
                partition_index: 0,
                error_code: 0,
                high_watermark: 100,
                last_stable_offset: 90,
                log_start_offset: -1,
                aborted_transactions: Some(vec![AbortedTransaction {
                    producer_id: 7,
                    first_offset: 50,
                }]),
                records: None,
            }],
        });
        let decoded = FetchResponse::from_bytes(&response.to_bytes().unwrap(), 4).unwrap();
        assert_eq!(decoded, response);
        assert!(decoded.responses[0].partitions[0]
            .record_batches()
            .unwrap()
            .is_empty());
    }
}
