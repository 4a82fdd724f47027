//! SyncGroup API (ApiKey = 14), versions 0-3.
//!
//! The leader sends every member's assignment; followers send none and
//! receive theirs in the response.

use bytes::Bytes;

use super::consumer_protocol::ConsumerGroupMemberAssignment;
use super::{api_message, api_request, Decodable, Encodable, FieldGate, VersionGates};
use crate::protocol::kafka::codec::{PacketDecoder, PacketEncoder, Result};
use crate::protocol::kafka::errors::KafkaErrorCode;
use crate::protocol::kafka::API_KEY_SYNC_GROUP;

const GROUP_INSTANCE_ID: FieldGate = FieldGate::since("group_instance_id", 3);
const THROTTLE_TIME_MS: FieldGate = FieldGate::since("throttle_time_ms", 1);

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncGroupAssignment {
    pub member_id: String,
    pub assignment: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncGroupRequest {
    pub version: i16,
    pub group_id: String,
    pub generation_id: i32,
    pub member_id: String,
    pub group_instance_id: Option<String>,
    pub assignments: Vec<SyncGroupAssignment>,
}

impl SyncGroupRequest {
    pub const GATES: VersionGates = VersionGates::new(&[GROUP_INSTANCE_ID]);

    pub fn new(version: i16) -> Self {
        Self {
            version,
            ..Self::default()
        }
    }

    pub fn add_assignment(
        &mut self,
        member_id: impl Into<String>,
        assignment: &ConsumerGroupMemberAssignment,
    ) -> Result<()> {
        self.assignments.push(SyncGroupAssignment {
            member_id: member_id.into(),
            assignment: assignment.encode_to_bytes()?,
        });
        Ok(())
    }
}

impl Encodable for SyncGroupRequest {
    fn encode(&self, enc: &mut PacketEncoder, version: i16) -> Result<()> {
        <Self as super::ApiMessage>::check_version(version)?;
        enc.put_string(&self.group_id)?;
        enc.put_i32(self.generation_id);
        enc.put_string(&self.member_id)?;
        if GROUP_INSTANCE_ID.present(version) {
            enc.put_nullable_string(self.group_instance_id.as_deref())?;
        }
        enc.put_array(&self.assignments, |enc, a| {
            enc.put_string(&a.member_id)?;
            enc.put_bytes(&a.assignment)
        })
    }
}

impl Decodable for SyncGroupRequest {
    fn decode(dec: &mut PacketDecoder<'_>, version: i16) -> Result<Self> {
        <Self as super::ApiMessage>::check_version(version)?;
        let group_id = dec.get_string()?;
        let generation_id = dec.get_i32()?;
        let member_id = dec.get_string()?;
        let group_instance_id = if GROUP_INSTANCE_ID.present(version) {
            dec.get_nullable_string()?
        } else {
            None
        };
        let assignments = dec.get_array(|dec| {
            Ok(SyncGroupAssignment {
                member_id: dec.get_string()?,
                assignment: dec.get_bytes()?,
            })
        })?;
        Ok(Self {
            version,
            group_id,
            generation_id,
            member_id,
            group_instance_id,
            assignments,
        })
    }
}

api_message!(SyncGroupRequest, API_KEY_SYNC_GROUP, 0..=3);
api_request!(SyncGroupRequest => SyncGroupResponse);

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncGroupResponse {
    pub version: i16,
    pub throttle_time_ms: i32,
    pub error_code: i16,
    pub assignment: Bytes,
}

impl SyncGroupResponse {
    pub const GATES: VersionGates = VersionGates::new(&[THROTTLE_TIME_MS]);

    pub fn new(version: i16) -> Self {
        Self {
            version,
            ..Self::default()
        }
    }

    pub fn error(&self) -> KafkaErrorCode {
        KafkaErrorCode::from_i16(self.error_code)
    }

    pub fn member_assignment(&self) -> Result<ConsumerGroupMemberAssignment> {
        ConsumerGroupMemberAssignment::decode_from(&self.assignment)
    }
}

impl Encodable for SyncGroupResponse {
    fn encode(&self, enc: &mut PacketEncoder, version: i16) -> Result<()> {
        <Self as super::ApiMessage>::check_version(version)?;
        if THROTTLE_TIME_MS.present(version) {
            enc.put_i32(self.throttle_time_ms);
        }
        enc.put_i16(self.error_code);
        enc.put_bytes(&self.assignment)
    }
}

impl Decodable for SyncGroupResponse {
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
            error_code: dec.get_i16()?,
            assignment: dec.get_bytes()?,
        })
    }
}

api_message!(SyncGroupResponse, API_KEY_SYNC_GROUP, 0..=3);
