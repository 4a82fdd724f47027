//! Heartbeat API (ApiKey = 12), versions 0-3.

use super::{api_message, api_request, Decodable, Encodable, FieldGate, VersionGates};
use crate::protocol::kafka::codec::{PacketDecoder, PacketEncoder, Result};
use crate::protocol::kafka::errors::KafkaErrorCode;
use crate::protocol::kafka::API_KEY_HEARTBEAT;

const GROUP_INSTANCE_ID: FieldGate = FieldGate::since("group_instance_id", 3);
const THROTTLE_TIME_MS: FieldGate = FieldGate::since("throttle_time_ms", 1);

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HeartbeatRequest {
    pub version: i16,
    pub group_id: String,
    pub generation_id: i32,
    pub member_id: String,
    pub group_instance_id: Option<String>,
}

impl HeartbeatRequest {
    pub const GATES: VersionGates = VersionGates::new(&[GROUP_INSTANCE_ID]);

    pub fn new(version: i16) -> Self {
        Self {
            version,
            ..Self::default()
        }
    }
}

impl Encodable for HeartbeatRequest {
    fn encode(&self, enc: &mut PacketEncoder, version: i16) -> Result<()> {
        <Self as super::ApiMessage>::check_version(version)?;
        enc.put_string(&self.group_id)?;
        enc.put_i32(self.generation_id);
        enc.put_string(&self.member_id)?;
        if GROUP_INSTANCE_ID.present(version) {
            enc.put_nullable_string(self.group_instance_id.as_deref())?;
        }
        Ok(())
    }
}

impl Decodable for HeartbeatRequest {
    fn decode(dec: &mut PacketDecoder<'_>, version: i16) -> Result<Self> {
        <Self as super::ApiMessage>::check_version(version)?;
        Ok(Self {
            version,
            group_id: dec.get_string()?,
            generation_id: dec.get_i32()?,
            member_id: dec.get_string()?,
            group_instance_id: if GROUP_INSTANCE_ID.present(version) {
                dec.get_nullable_string()?
            } else {
                None
            },
        })
    }
}

api_message!(HeartbeatRequest, API_KEY_HEARTBEAT, 0..=3);
api_request!(HeartbeatRequest => HeartbeatResponse);

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HeartbeatResponse {
    pub version: i16,
    pub throttle_time_ms: i32,
    pub error_code: i16,
}

impl HeartbeatResponse {
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
}

impl Encodable for HeartbeatResponse {
    fn encode(&self, enc: &mut PacketEncoder, version: i16) -> Result<()> {
        <Self as super::ApiMessage>::check_version(version)?;
        if THROTTLE_TIME_MS.present(version) {
            enc.put_i32(self.throttle_time_ms);
        }
        enc.put_i16(self.error_code);
        Ok(())
    }
}

impl Decodable for HeartbeatResponse {
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
        })
    }
}

api_message!(HeartbeatResponse, API_KEY_HEARTBEAT, 0..=3);
