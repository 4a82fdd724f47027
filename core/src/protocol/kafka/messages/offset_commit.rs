//! OffsetCommit API (ApiKey = 8), versions 0-7.

use super::{api_message, api_request, Decodable, Encodable, FieldGate, VersionGates};
use crate::protocol::kafka::codec::{PacketDecoder, PacketEncoder, Result};
use crate::protocol::kafka::errors::KafkaErrorCode;
use crate::protocol::kafka::API_KEY_OFFSET_COMMIT;

const GENERATION_AND_MEMBER: FieldGate = FieldGate::since("generation_id", 1);
const GROUP_INSTANCE_ID: FieldGate = FieldGate::since("group_instance_id", 7);
const RETENTION_TIME_MS: FieldGate = FieldGate::between("retention_time_ms", 2, 4);
const COMMITTED_LEADER_EPOCH: FieldGate = FieldGate::since("partitions.committed_leader_epoch", 6);
const COMMIT_TIMESTAMP: FieldGate = FieldGate::between("partitions.commit_timestamp", 1, 1);

const THROTTLE_TIME_MS: FieldGate = FieldGate::since("throttle_time_ms", 3);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetCommitPartition {
    pub partition_index: i32,
    pub committed_offset: i64,
    pub committed_leader_epoch: i32,
    pub commit_timestamp: i64,
    pub committed_metadata: Option<String>,
}

impl OffsetCommitPartition {
    pub fn new(partition_index: i32, committed_offset: i64) -> Self {
        Self {
            partition_index,
            committed_offset,
            committed_leader_epoch: -1,
            commit_timestamp: -1,
            committed_metadata: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OffsetCommitTopic {
    pub name: String,
    pub partitions: Vec<OffsetCommitPartition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetCommitRequest {
    pub version: i16,
    pub group_id: String,
    pub generation_id: i32,
    pub member_id: String,
    pub group_instance_id: Option<String>,
    pub retention_time_ms: i64,
    pub topics: Vec<OffsetCommitTopic>,
}

impl Default for OffsetCommitRequest {
    fn default() -> Self {
        Self {
            version: 0,
            group_id: String::new(),
            generation_id: -1,
            member_id: String::new(),
            group_instance_id: None,
            // -1: broker default retention
            retention_time_ms: -1,
            topics: Vec::new(),
        }
    }
}

impl OffsetCommitRequest {
    pub const GATES: VersionGates = VersionGates::new(&[
        GENERATION_AND_MEMBER,
        GROUP_INSTANCE_ID,
        RETENTION_TIME_MS,
        COMMITTED_LEADER_EPOCH,
        COMMIT_TIMESTAMP,
    ]);

    pub fn new(version: i16) -> Self {
        Self {
            version,
            ..Self::default()
        }
    }

    pub fn add_offset(&mut self, topic: &str, partition: i32, offset: i64, metadata: Option<String>) {
        let mut entry = OffsetCommitPartition::new(partition, offset);
        entry.committed_metadata = metadata;
        match self.topics.iter_mut().find(|t| t.name == topic) {
            Some(existing) => existing.partitions.push(entry),
            None => self.topics.push(OffsetCommitTopic {
                name: topic.to_string(),
                partitions: vec![entry],
            }),
        }
    }
}

impl Encodable for OffsetCommitRequest {
    fn encode(&self, enc: &mut PacketEncoder, version: i16) -> Result<()> {
        <Self as super::ApiMessage>::check_version(version)?;
        enc.put_string(&self.group_id)?;
        if GENERATION_AND_MEMBER.present(version) {
            enc.put_i32(self.generation_id);
            enc.put_string(&self.member_id)?;
        }
        if GROUP_INSTANCE_ID.present(version) {
            enc.put_nullable_string(self.group_instance_id.as_deref())?;
        }
        if RETENTION_TIME_MS.present(version) {
            enc.put_i64(self.retention_time_ms);
        }
        enc.put_array(&self.topics, |enc, topic| {
            enc.put_string(&topic.name)?;
            enc.put_array(&topic.partitions, |enc, p| {
                enc.put_i32(p.partition_index);
                enc.put_i64(p.committed_offset);
                if COMMITTED_LEADER_EPOCH.present(version) {
                    enc.put_i32(p.committed_leader_epoch);
                }
                if COMMIT_TIMESTAMP.present(version) {
                    enc.put_i64(p.commit_timestamp);
                }
                enc.put_nullable_string(p.committed_metadata.as_deref())
            })
        })
    }
}

impl Decodable for OffsetCommitRequest {
    fn decode(dec: &mut PacketDecoder<'_>, version: i16) -> Result<Self> {
        <Self as super::ApiMessage>::check_version(version)?;
        let mut request = OffsetCommitRequest::new(version);
        request.group_id = dec.get_string()?;
        if GENERATION_AND_MEMBER.present(version) {
            request.generation_id = dec.get_i32()?;
            request.member_id = dec.get_string()?;
        }
        if GROUP_INSTANCE_ID.present(version) {
            request.group_instance_id = dec.get_nullable_string()?;
        }
        if RETENTION_TIME_MS.present(version) {
            request.retention_time_ms = dec.get_i64()?;
        }
        request.topics = dec.get_array(|dec| {
            Ok(OffsetCommitTopic {
                name: dec.get_string()?,
                partitions: dec.get_array(|dec| {
                    let mut p = OffsetCommitPartition::new(dec.get_i32()?, dec.get_i64()?);
                    if COMMITTED_LEADER_EPOCH.present(version) {
                        p.committed_leader_epoch = dec.get_i32()?;
                    }
                    if COMMIT_TIMESTAMP.present(version) {
                        p.commit_timestamp = dec.get_i64()?;
                    }
                    p.committed_metadata = dec.get_nullable_string()?;
                    Ok(p)
                })?,
            })
        })?;
        Ok(request)
    }
}

api_message!(OffsetCommitRequest, API_KEY_OFFSET_COMMIT, 0..=7);
api_request!(OffsetCommitRequest => OffsetCommitResponse);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OffsetCommitResponsePartition {
    pub partition_index: i32,
    pub error_code: i16,
}

impl OffsetCommitResponsePartition {
    pub fn error(&self) -> KafkaErrorCode {
        KafkaErrorCode::from_i16(self.error_code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OffsetCommitResponseTopic {
    pub name: String,
    pub partitions: Vec<OffsetCommitResponsePartition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OffsetCommitResponse {
    pub version: i16,
    pub throttle_time_ms: i32,
    pub topics: Vec<OffsetCommitResponseTopic>,
}

impl OffsetCommitResponse {
    pub const GATES: VersionGates = VersionGates::new(&[THROTTLE_TIME_MS]);

    pub fn new(version: i16) -> Self {
        Self {
            version,
            ..Self::default()
        }
    }

    /// First non-zero partition error, if any.
    pub fn first_error(&self) -> Option<KafkaErrorCode> {
        self.topics
            .iter()
            .flat_map(|t| t.partitions.iter())
            .map(OffsetCommitResponsePartition::error)
            .find(|code| !code.is_ok())
    }
}

impl Encodable for OffsetCommitResponse {
    fn encode(&self, enc: &mut PacketEncoder, version: i16) -> Result<()> {
        <Self as super::ApiMessage>::check_version(version)?;
        if THROTTLE_TIME_MS.present(version) {
            enc.put_i32(self.throttle_time_ms);
        }
        enc.put_array(&self.topics, |enc, topic| {
            enc.put_string(&topic.name)?;
            enc.put_array(&topic.partitions, |enc, p| {
                enc.put_i32(p.partition_index);
                enc.put_i16(p.error_code);
                Ok(())
            })
        })
    }
}

impl Decodable for OffsetCommitResponse {
    fn decode(dec: &mut PacketDecoder<'_>, version: i16) -> Result<Self> {
        <Self as super::ApiMessage>::check_version(version)?;
        let throttle_time_ms = if THROTTLE_TIME_MS.present(version) {
            dec.get_i32()?
        } else {
            0
        };
        Ok(Self {
            version,
            throttle_time_ms,
            topics: dec.get_array(|dec| {
                Ok(OffsetCommitResponseTopic {
                    name: dec.get_string()?,
                    partitions: dec.get_array(|dec| {
                        Ok(OffsetCommitResponsePartition {
                            partition_index: dec.get_i32()?,
                            error_code: dec.get_i16()?,
                        })
                    })?,
                })
            })?,
        })
    }
}

api_message!(OffsetCommitResponse, API_KEY_OFFSET_COMMIT, 0..=7);
