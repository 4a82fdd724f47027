//! Payloads of the "consumer" protocol type.
//!
//! JoinGroup and SyncGroup carry member metadata and assignments as opaque
//! bytes; consumers agree on the layout below. Newer payload versions append
//! fields, so decoding reads the fields it knows and ignores the rest.

use bytes::Bytes;
use std::collections::BTreeMap;

use crate::protocol::kafka::codec::{PacketDecoder, PacketEncoder, Result};

/// `protocol_type` used by consumer groups.
pub const CONSUMER_PROTOCOL_TYPE: &str = "consumer";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OwnedPartition {
    pub topic: String,
    pub partitions: Vec<i32>,
}

/// Subscription a member proposes when joining.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConsumerGroupMemberMetadata {
    pub version: i16,
    pub topics: Vec<String>,
    pub user_data: Option<Bytes>,
    /// v1+: partitions the member held in the previous generation.
    pub owned_partitions: Vec<OwnedPartition>,
}

impl ConsumerGroupMemberMetadata {
    pub fn new(topics: Vec<String>) -> Self {
        Self {
            version: 0,
            topics,
            ..Self::default()
        }
    }

    pub fn encode_to_bytes(&self) -> Result<Bytes> {
        let mut enc = PacketEncoder::new();
        enc.put_i16(self.version);
        enc.put_string_array(&self.topics)?;
        enc.put_nullable_bytes(self.user_data.as_deref())?;
        if self.version >= 1 {
            enc.put_array(&self.owned_partitions, |enc, owned| {
                enc.put_string(&owned.topic)?;
                enc.put_i32_array(&owned.partitions)
            })?;
        }
        enc.finish()
    }

    pub fn decode_from(bytes: &[u8]) -> Result<Self> {
        let mut dec = PacketDecoder::new(bytes);
        let version = dec.get_i16()?;
        let topics = dec.get_string_array()?;
        let user_data = dec.get_nullable_bytes()?;
        let owned_partitions = if version >= 1 {
            dec.get_array(|dec| {
                Ok(OwnedPartition {
                    topic: dec.get_string()?,
                    partitions: dec.get_i32_array()?,
                })
            })?
        } else {
            Vec::new()
        };
        Ok(Self {
            version,
            topics,
            user_data,
            owned_partitions,
        })
    }
}

/// Partitions the leader hands a member through SyncGroup.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConsumerGroupMemberAssignment {
    pub version: i16,
    pub topics: BTreeMap<String, Vec<i32>>,
    pub user_data: Option<Bytes>,
}

impl ConsumerGroupMemberAssignment {
    pub fn new(topics: BTreeMap<String, Vec<i32>>) -> Self {
        Self {
            version: 0,
            topics,
            user_data: None,
        }
    }

    pub fn partition_count(&self) -> usize {
        self.topics.values().map(Vec::len).sum()
    }

    pub fn encode_to_bytes(&self) -> Result<Bytes> {
        let mut enc = PacketEncoder::new();
        enc.put_i16(self.version);
        enc.put_array_len(self.topics.len())?;
        for (topic, partitions) in &self.topics {
            enc.put_string(topic)?;
            enc.put_i32_array(partitions)?;
        }
        enc.put_nullable_bytes(self.user_data.as_deref())?;
        enc.finish()
    }

    /// An empty payload is an empty assignment: brokers send one to members
    /// the leader gave nothing.
    pub fn decode_from(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Ok(Self::default());
        }
        let mut dec = PacketDecoder::new(bytes);
        let version = dec.get_i16()?;
        let count = dec.get_array_len()?;
        let mut topics = BTreeMap::new();
        for _ in 0..count {
            let topic = dec.get_string()?;
            let partitions = dec.get_i32_array()?;
            topics.insert(topic, partitions);
        }
        let user_data = dec.get_nullable_bytes()?;
        Ok(Self {
            version,
            topics,
            user_data,
        })
    }
}
