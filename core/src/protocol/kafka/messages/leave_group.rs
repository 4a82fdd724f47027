//! LeaveGroup API (ApiKey = 13), versions 0-3.
//!
//! Up to v2 a request names a single `member_id`. From v3 it carries a batch
//! of member identities, each with an optional group instance id.

use super::{api_message, api_request, Decodable, Encodable, FieldGate, VersionGates};
use crate::protocol::kafka::codec::{PacketDecoder, PacketEncoder, Result};
use crate::protocol::kafka::errors::KafkaErrorCode;
use crate::protocol::kafka::API_KEY_LEAVE_GROUP;

const MEMBER_ID: FieldGate = FieldGate::between("member_id", 0, 2);
const MEMBERS: FieldGate = FieldGate::since("members", 3);
const THROTTLE_TIME_MS: FieldGate = FieldGate::since("throttle_time_ms", 1);
const RESPONSE_MEMBERS: FieldGate = FieldGate::since("members", 3);

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MemberIdentity {
    pub member_id: String,
    pub group_instance_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LeaveGroupRequest {
    pub version: i16,
    pub group_id: String,
    pub member_id: String,
    pub members: Vec<MemberIdentity>,
}

impl LeaveGroupRequest {
    pub const GATES: VersionGates = VersionGates::new(&[MEMBER_ID, MEMBERS]);

    pub fn new(version: i16) -> Self {
        Self {
            version,
            ..Self::default()
        }
    }

    /// A request for one member, in whichever shape `version` uses.
    pub fn for_member(
        version: i16,
        group_id: impl Into<String>,
        member_id: impl Into<String>,
        group_instance_id: Option<String>,
    ) -> Self {
        let member_id = member_id.into();
        let mut request = Self::new(version);
        request.group_id = group_id.into();
        if MEMBERS.present(version) {
            request.members.push(MemberIdentity {
                member_id,
                group_instance_id,
            });
        } else {
            request.member_id = member_id;
        }
        request
    }
}

impl Encodable for LeaveGroupRequest {
    fn encode(&self, enc: &mut PacketEncoder, version: i16) -> Result<()> {
        <Self as super::ApiMessage>::check_version(version)?;
        enc.put_string(&self.group_id)?;
        if MEMBER_ID.present(version) {
            enc.put_string(&self.member_id)?;
        }
        if MEMBERS.present(version) {
            enc.put_array(&self.members, |enc, m| {
                enc.put_string(&m.member_id)?;
                enc.put_nullable_string(m.group_instance_id.as_deref())
            })?;
        }
        Ok(())
    }
}

impl Decodable for LeaveGroupRequest {
    fn decode(dec: &mut PacketDecoder<'_>, version: i16) -> Result<Self> {
        <Self as super::ApiMessage>::check_version(version)?;
        let group_id = dec.get_string()?;
        let member_id = if MEMBER_ID.present(version) {
            dec.get_string()?
        } else {
            String::new()
        };
        let members = if MEMBERS.present(version) {
            dec.get_array(|dec| {
                Ok(MemberIdentity {
                    member_id: dec.get_string()?,
                    group_instance_id: dec.get_nullable_string()?,
                })
            })?
        } else {
            Vec::new()
        };
        Ok(Self {
            version,
            group_id,
            member_id,
            members,
        })
    }
}

api_message!(LeaveGroupRequest, API_KEY_LEAVE_GROUP, 0..=3);
api_request!(LeaveGroupRequest => LeaveGroupResponse);

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MemberResponse {
    pub member_id: String,
    pub group_instance_id: Option<String>,
    pub error_code: i16,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LeaveGroupResponse {
    pub version: i16,
    pub throttle_time_ms: i32,
    pub error_code: i16,
    pub members: Vec<MemberResponse>,
}

impl LeaveGroupResponse {
    pub const GATES: VersionGates = VersionGates::new(&[THROTTLE_TIME_MS, RESPONSE_MEMBERS]);

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

impl Encodable for LeaveGroupResponse {
    fn encode(&self, enc: &mut PacketEncoder, version: i16) -> Result<()> {
        <Self as super::ApiMessage>::check_version(version)?;
        if THROTTLE_TIME_MS.present(version) {
            enc.put_i32(self.throttle_time_ms);
        }
        enc.put_i16(self.error_code);
        if RESPONSE_MEMBERS.present(version) {
            enc.put_array(&self.members, |enc, m| {
                enc.put_string(&m.member_id)?;
                enc.put_nullable_string(m.group_instance_id.as_deref())?;
                enc.put_i16(m.error_code);
                Ok(())
            })?;
        }
        Ok(())
    }
}

impl Decodable for LeaveGroupResponse {
    fn decode(dec: &mut PacketDecoder<'_>, version: i16) -> Result<Self> {
        <Self as super::ApiMessage>::check_version(version)?;
        let throttle_time_ms = if THROTTLE_TIME_MS.present(version) {
            dec.get_i32()?
        } else {
            0
        };
        let error_code = dec.get_i16()?;
        let members = if RESPONSE_MEMBERS.present(version) {
            dec.get_array(|dec| {
                Ok(MemberResponse {
                    member_id: dec.get_string()?,
                    group_instance_id: dec.get_nullable_string()?,
                    error_code: dec.get_i16()?,
                })
            })?
        } else {
            Vec::new()
        };
        Ok(Self {
            version,
            throttle_time_ms,
            error_code,
            members,
        })
    }
}

api_message!(LeaveGroupResponse, API_KEY_LEAVE_GROUP, 0..=3);
