//! Produce API (ApiKey = 0), versions 0-7.
//!
//! Record data travels as an already-encoded record batch
//! (see [`crate::protocol::kafka::records`]). With `acks = 0` the broker
//! sends no response at all.

use bytes::Bytes;

use super::{api_message, ApiRequest, Decodable, Encodable, FieldGate, VersionGates};
use crate::protocol::kafka::codec::{PacketDecoder, PacketEncoder, Result};
use crate::protocol::kafka::errors::KafkaErrorCode;
use crate::protocol::kafka::API_KEY_PRODUCE;

const TRANSACTIONAL_ID: FieldGate = FieldGate::since("transactional_id", 3);

const THROTTLE_TIME_MS: FieldGate = FieldGate::since("throttle_time_ms", 1);
const LOG_APPEND_TIME_MS: FieldGate = FieldGate::since("partitions.log_append_time_ms", 2);
const LOG_START_OFFSET: FieldGate = FieldGate::since("partitions.log_start_offset", 5);

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PartitionProduceData {
    pub index: i32,
    pub records: Option<Bytes>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TopicProduceData {
    pub name: String,
    pub partitions: Vec<PartitionProduceData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProduceRequest {
    pub version: i16,
    pub transactional_id: Option<String>,
    pub acks: i16,
    pub timeout_ms: i32,
    pub topics: Vec<TopicProduceData>,
}

impl ProduceRequest {
    pub const GATES: VersionGates = VersionGates::new(&[TRANSACTIONAL_ID]);

    pub fn new(version: i16) -> Self {
        Self {
            version,
            acks: -1,
            ..Self::default()
        }
    }

    /// Add one partition's record batch, grouping by topic.
    pub fn add_records(&mut self, topic: &str, partition: i32, records: Bytes) {
        let data = PartitionProduceData {
            index: partition,
            records: Some(records),
        };
        match self.topics.iter_mut().find(|t| t.name == topic) {
            Some(existing) => existing.partitions.push(data),
            None => self.topics.push(TopicProduceData {
                name: topic.to_string(),
                partitions: vec![data],
            }),
        }
    }
}

impl Encodable for ProduceRequest {
    fn encode(&self, enc: &mut PacketEncoder, version: i16) -> Result<()> {
        <Self as super::ApiMessage>::check_version(version)?;
        if TRANSACTIONAL_ID.present(version) {
            enc.put_nullable_string(self.transactional_id.as_deref())?;
        }
        enc.put_i16(self.acks);
        enc.put_i32(self.timeout_ms);
        enc.put_array(&self.topics, |enc, topic| {
            enc.put_string(&topic.name)?;
            enc.put_array(&topic.partitions, |enc, p| {
                enc.put_i32(p.index);
                enc.put_nullable_bytes(p.records.as_deref())
            })
        })
    }
}

impl Decodable for ProduceRequest {
    fn decode(dec: &mut PacketDecoder<'_>, version: i16) -> Result<Self> {
        <Self as super::ApiMessage>::check_version(version)?;
        let transactional_id = if TRANSACTIONAL_ID.present(version) {
            dec.get_nullable_string()?
        } else {
            None
        };
        Ok(Self {
            version,
            transactional_id,
            acks: dec.get_i16()?,
            timeout_ms: dec.get_i32()?,
            topics: dec.get_array(|dec| {
                Ok(TopicProduceData {
                    name: dec.get_string()?,
                    partitions: dec.get_array(|dec| {
                        Ok(PartitionProduceData {
                            index: dec.get_i32()?,
                            records: dec.get_nullable_bytes()?,
                        })
                    })?,
                })
            })?,
        })
    }
}

api_message!(ProduceRequest, API_KEY_PRODUCE, 0..=7);

impl ApiRequest for ProduceRequest {
    type Response = ProduceResponse;

    fn set_version(&mut self, version: i16) {
        self.version = version;
    }

    fn expects_response(&self) -> bool {
        self.acks != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionProduceResponse {
    pub index: i32,
    pub error_code: i16,
    pub base_offset: i64,
    pub log_append_time_ms: i64,
    pub log_start_offset: i64,
}

impl Default for PartitionProduceResponse {
    fn default() -> Self {
        Self {
            index: 0,
            error_code: 0,
            base_offset: -1,
            log_append_time_ms: -1,
            log_start_offset: -1,
        }
    }
}

impl PartitionProduceResponse {
    pub fn error(&self) -> KafkaErrorCode {
        KafkaErrorCode::from_i16(self.error_code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TopicProduceResponse {
    pub name: String,
    pub partitions: Vec<PartitionProduceResponse>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProduceResponse {
    pub version: i16,
    pub responses: Vec<TopicProduceResponse>,
    pub throttle_time_ms: i32,
}

impl ProduceResponse {
    pub const GATES: VersionGates =
        VersionGates::new(&[THROTTLE_TIME_MS, LOG_APPEND_TIME_MS, LOG_START_OFFSET]);

    pub fn new(version: i16) -> Self {
        Self {
            version,
            ..Self::default()
        }
    }

    pub fn partition(&self, topic: &str, partition: i32) -> Option<&PartitionProduceResponse> {
        self.responses
            .iter()
            .find(|t| t.name == topic)
            .and_then(|t| t.partitions.iter().find(|p| p.index == partition))
    }
}

impl Encodable for ProduceResponse {
    fn encode(&self, enc: &mut PacketEncoder, version: i16) -> Result<()> {
        <Self as super::ApiMessage>::check_version(version)?;
        enc.put_array(&self.responses, |enc, topic| {
            enc.put_string(&topic.name)?;
            enc.put_array(&topic.partitions, |enc, p| {
                enc.put_i32(p.index);
                enc.put_i16(p.error_code);
                enc.put_i64(p.base_offset);
                if LOG_APPEND_TIME_MS.present(version) {
                    enc.put_i64(p.log_append_time_ms);
                }
                if LOG_START_OFFSET.present(version) {
                    enc.put_i64(p.log_start_offset);
                }
                Ok(())
            })
        })?;
        if THROTTLE_TIME_MS.present(version) {
            enc.put_i32(self.throttle_time_ms);
        }
        Ok(())
    }
}

impl Decodable for ProduceResponse {
    fn decode(dec: &mut PacketDecoder<'_>, version: i16) -> Result<Self> {
        <Self as super::ApiMessage>::check_version(version)?;
        let responses = dec.get_array(|dec| {
            Ok(TopicProduceResponse {
                name: dec.get_string()?,
                partitions: dec.get_array(|dec| {
                    let mut p = PartitionProduceResponse {
                        index: dec.get_i32()?,
                        error_code: dec.get_i16()?,
                        base_offset: dec.get_i64()?,
                        ..PartitionProduceResponse::default()
                    };
                    if LOG_APPEND_TIME_MS.present(version) {
                        p.log_append_time_ms = dec.get_i64()?;
                    }
                    if LOG_START_OFFSET.present(version) {
                        p.log_start_offset = dec.get_i64()?;
                    }
                    Ok(p)
                })?,
            })
        })?;
        let throttle_time_ms = if THROTTLE_TIME_MS.present(version) {
            dec.get_i32()?
        } else {
            0
        };
        Ok(Self {
            version,
            responses,
            throttle_time_ms,
        })
    }
}

api_message!(ProduceResponse, API_KEY_PRODUCE, 0..=7);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::kafka::messages::ApiMessage;

    #[test]
    fn test_acks_zero_expects_no_response() {
        let mut request = ProduceRequest::new(7);
        assert!(request.expects_response());
        request.acks = 0;
        assert!(!request.expects_response());
    }

    #[test]
    fn test_request_groups_by_topic() {
        let mut request = ProduceRequest::new(3);
        request.add_records("a", 0, Bytes::from_static(b"x"));
        request.add_records("b", 0, Bytes::from_static(b"y"));
        request.add_records("a", 1, Bytes::from_static(b"z"));
        assert_eq!(request.topics.len(), 2);
        assert_eq!(request.topics[0].partitions.len(), 2);

        let decoded = ProduceRequest::from_bytes(&request.to_bytes().unwrap(), 3).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_transactional_id_gated() {
        let mut request = ProduceRequest::new(2);
        request.transactional_id = Some("tx".to_string());
        let bytes = request.to_bytes().unwrap();
        // acks(2) + timeout(4) + empty topics(4)
        assert_eq!(bytes.len(), 10);
    }

    #[test]
    fn test_response_versions() {
        let mut response = ProduceResponse::new(5);
        response.responses.push(TopicProduceResponse {
            name: "t".to_string(),
            partitions: vec![PartitionProduceResponse {
                index: 0,
                error_code: 0,
                base_offset: 42,
                log_append_time_ms: 1000,
                log_start_offset: 0,
            }],
        });
        let decoded = ProduceResponse::from_bytes(&response.to_bytes().unwrap(), 5).unwrap();
        assert_eq!(decoded, response);
        assert_eq!(decoded.partition("t", 0).unwrap().base_offset, 42);

        response.version = 0;
        let v0 = ProduceResponse::from_bytes(&response.to_bytes().unwrap(), 0).unwrap();
        assert_eq!(v0.partition("t", 0).unwrap().log_append_time_ms, -1);
    }
}
