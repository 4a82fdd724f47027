//! OffsetFetch API (ApiKey = 9), versions 0-5.
//!
//! From v2 `topics: None` fetches every committed offset of the group.

use super::{api_message, api_request, Decodable, Encodable, FieldGate, VersionGates};
use crate::protocol::kafka::codec::{PacketDecoder, PacketEncoder, Result};
use crate::protocol::kafka::errors::KafkaErrorCode;
use crate::protocol::kafka::API_KEY_OFFSET_FETCH;

const NULLABLE_TOPICS: FieldGate = FieldGate::since("topics.nullable", 2);

const THROTTLE_TIME_MS: FieldGate = FieldGate::since("throttle_time_ms", 3);
const COMMITTED_LEADER_EPOCH: FieldGate = FieldGate::since("partitions.committed_leader_epoch", 5);
const TOP_LEVEL_ERROR: FieldGate = FieldGate::since("error_code", 2);

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OffsetFetchTopic {
    pub name: String,
    pub partition_indexes: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OffsetFetchRequest {
    pub version: i16,
    pub group_id: String,
    pub topics: Option<Vec<OffsetFetchTopic>>,
}

impl OffsetFetchRequest {
    pub const GATES: VersionGates = VersionGates::new(&[NULLABLE_TOPICS]);

    pub fn new(version: i16) -> Self {
        Self {
            version,
            ..Self::default()
        }
    }

    pub fn add_partition(&mut self, topic: &str, partition: i32) {
        let topics = self.topics.get_or_insert_with(Vec::new);
        match topics.iter_mut().find(|t| t.name == topic) {
            Some(existing) => existing.partition_indexes.push(partition),
            None => topics.push(OffsetFetchTopic {
                name: topic.to_string(),
                partition_indexes: vec![partition],
            }),
        }
    }
}

fn put_topic(enc: &mut PacketEncoder, topic: &OffsetFetchTopic) -> Result<()> {
    enc.put_string(&topic.name)?;
    enc.put_i32_array(&topic.partition_indexes)
}

fn get_topic(dec: &mut PacketDecoder<'_>) -> Result<OffsetFetchTopic> {
    Ok(OffsetFetchTopic {
        name: dec.get_string()?,
        partition_indexes: dec.get_i32_array()?,
    })
}

impl Encodable for OffsetFetchRequest {
    fn encode(&self, enc: &mut PacketEncoder, version: i16) -> Result<()> {
        <Self as super::ApiMessage>::check_version(version)?;
        enc.put_string(&self.group_id)?;
        if NULLABLE_TOPICS.present(version) {
            enc.put_nullable_array(self.topics.as_deref(), put_topic)
        } else {
            enc.put_array(self.topics.as_deref().unwrap_or(&[]), put_topic)
        }
    }
}

impl Decodable for OffsetFetchRequest {
    fn decode(dec: &mut PacketDecoder<'_>, version: i16) -> Result<Self> {
        <Self as super::ApiMessage>::check_version(version)?;
        let group_id = dec.get_string()?;
        let topics = if NULLABLE_TOPICS.present(version) {
            dec.get_nullable_array(get_topic)?
        } else {
            Some(dec.get_array(get_topic)?)
        };
        Ok(Self {
            version,
            group_id,
            topics,
        })
    }
}

api_message!(OffsetFetchRequest, API_KEY_OFFSET_FETCH, 0..=5);
api_request!(OffsetFetchRequest => OffsetFetchResponse);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetFetchResponsePartition {
    pub partition_index: i32,
    /// -1 when the group has no committed offset for the partition.
    pub committed_offset: i64,
    pub committed_leader_epoch: i32,
    pub metadata: Option<String>,
    pub error_code: i16,
}

impl Default for OffsetFetchResponsePartition {
    fn default() -> Self {
        Self {
            partition_index: 0,
            committed_offset: -1,
            committed_leader_epoch: -1,
            metadata: None,
            error_code: 0,
        }
    }
}

impl OffsetFetchResponsePartition {
    pub fn error(&self) -> KafkaErrorCode {
        KafkaErrorCode::from_i16(self.error_code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OffsetFetchResponseTopic {
    pub name: String,
    pub partitions: Vec<OffsetFetchResponsePartition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OffsetFetchResponse {
    pub version: i16,
    pub throttle_time_ms: i32,
    pub topics: Vec<OffsetFetchResponseTopic>,
    pub error_code: i16,
}

impl OffsetFetchResponse {
    pub const GATES: VersionGates =
        VersionGates::new(&[THROTTLE_TIME_MS, COMMITTED_LEADER_EPOCH, TOP_LEVEL_ERROR]);

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

impl Encodable for OffsetFetchResponse {
    fn encode(&self, enc: &mut PacketEncoder, version: i16) -> Result<()> {
        <Self as super::ApiMessage>::check_version(version)?;
        if THROTTLE_TIME_MS.present(version) {
            enc.put_i32(self.throttle_time_ms);
        }
        enc.put_array(&self.topics, |enc, topic| {
            enc.put_string(&topic.name)?;
            enc.put_array(&topic.partitions, |enc, p| {
                enc.put_i32(p.partition_index);
                enc.put_i64(p.committed_offset);
                if COMMITTED_LEADER_EPOCH.present(version) {
                    enc.put_i32(p.committed_leader_epoch);
                }
                enc.put_nullable_string(p.metadata.as_deref())?;
                enc.put_i16(p.error_code);
                Ok(())
            })
        })?;
        if TOP_LEVEL_ERROR.present(version) {
            enc.put_i16(self.error_code);
        }
        Ok(())
    }
}

impl Decodable for OffsetFetchResponse {
    fn decode(dec: &mut PacketDecoder<'_>, version: i16) -> Result<Self> {
        <Self as super::ApiMessage>::check_version(version)?;
        let throttle_time_ms = if THROTTLE_TIME_MS.present(version) {
            dec.get_i32()?
        } else {
            0
        };
        let topics = dec.get_array(|dec| {
            Ok(OffsetFetchResponseTopic {
                name: dec.get_string()?,
                partitions: dec.get_array(|dec| {
                    let partition_index = dec.get_i32()?;
                    let committed_offset = dec.get_i64()?;
                    let committed_leader_epoch = if COMMITTED_LEADER_EPOCH.present(version) {
                        dec.get_i32()?
                    } else {
                        -1
                    };
                    Ok(OffsetFetchResponsePartition {
                        partition_index,
                        committed_offset,
                        committed_leader_epoch,
                        metadata: dec.get_nullable_string()?,
                        error_code: dec.get_i16()?,
                    })
                })?,
            })
        })?;
        let error_code = if TOP_LEVEL_ERROR.present(version) {
            dec.get_i16()?
        } else {
            0
        };
        Ok(Self {
            version,
            throttle_time_ms,
            topics,
            error_code,
        })
    }
}

api_message!(OffsetFetchResponse, API_KEY_OFFSET_FETCH, 0..=5);
