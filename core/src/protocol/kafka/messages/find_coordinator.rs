//! FindCoordinator API (ApiKey = 10), versions 0-2.

use super::{api_message, api_request, Decodable, Encodable, FieldGate, VersionGates};
use crate::protocol::kafka::codec::{CodecError, PacketDecoder, PacketEncoder, Result};
use crate::protocol::kafka::errors::KafkaErrorCode;
use crate::protocol::kafka::API_KEY_FIND_COORDINATOR;

const KEY_TYPE: FieldGate = FieldGate::since("key_type", 1);
const THROTTLE_TIME_MS: FieldGate = FieldGate::since("throttle_time_ms", 1);
const ERROR_MESSAGE: FieldGate = FieldGate::since("error_message", 1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i8)]
pub enum CoordinatorType {
    #[default]
    Group = 0,
    Transaction = 1,
}

impl CoordinatorType {
    fn from_i8(value: i8) -> Result<Self> {
        match value {
            0 => Ok(CoordinatorType::Group),
            1 => Ok(CoordinatorType::Transaction),
            other => Err(CodecError::ValueOutOfRange {
                field: "key_type",
                value: other as i64,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FindCoordinatorRequest {
    pub version: i16,
    /// Group id (or transactional id).
    pub key: String,
    pub key_type: CoordinatorType,
}

impl FindCoordinatorRequest {
    pub const GATES: VersionGates = VersionGates::new(&[KEY_TYPE]);

    pub fn new(version: i16) -> Self {
        Self {
            version,
            ..Self::default()
        }
    }

    pub fn group(version: i16, group_id: impl Into<String>) -> Self {
        Self {
            version,
            key: group_id.into(),
            key_type: CoordinatorType::Group,
        }
    }
}

impl Encodable for FindCoordinatorRequest {
    fn encode(&self, enc: &mut PacketEncoder, version: i16) -> Result<()> {
        <Self as super::ApiMessage>::check_version(version)?;
        enc.put_string(&self.key)?;
        if KEY_TYPE.present(version) {
            enc.put_i8(self.key_type as i8);
        }
        Ok(())
    }
}

impl Decodable for FindCoordinatorRequest {
    fn decode(dec: &mut PacketDecoder<'_>, version: i16) -> Result<Self> {
        <Self as super::ApiMessage>::check_version(version)?;
        let key = dec.get_string()?;
        let key_type = if KEY_TYPE.present(version) {
            CoordinatorType::from_i8(dec.get_i8()?)?
        } else {
            CoordinatorType::Group
        };
        Ok(Self {
            version,
            key,
            key_type,
        })
    }
}

api_message!(FindCoordinatorRequest, API_KEY_FIND_COORDINATOR, 0..=2);
api_request!(FindCoordinatorRequest => FindCoordinatorResponse);

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FindCoordinatorResponse {
    pub version: i16,
    pub throttle_time_ms: i32,
    pub error_code: i16,
    pub error_message: Option<String>,
    pub node_id: i32,
    pub host: String,
    pub port: i32,
}

impl FindCoordinatorResponse {
    pub const GATES: VersionGates = VersionGates::new(&[THROTTLE_TIME_MS, ERROR_MESSAGE]);

    pub fn new(version: i16) -> Self {
        Self {
            version,
            ..Self::default()
        }
    }

    pub fn error(&self) -> KafkaErrorCode {
        KafkaErrorCode::from_i16(self.error_code)
    }

    /// `host:port` of the coordinator.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Encodable for FindCoordinatorResponse {
    fn encode(&self, enc: &mut PacketEncoder, version: i16) -> Result<()> {
        <Self as super::ApiMessage>::check_version(version)?;
        if THROTTLE_TIME_MS.present(version) {
            enc.put_i32(self.throttle_time_ms);
        }
        enc.put_i16(self.error_code);
        if ERROR_MESSAGE.present(version) {
            enc.put_nullable_string(self.error_message.as_deref())?;
        }
        enc.put_i32(self.node_id);
        enc.put_string(&self.host)?;
        enc.put_i32(self.port);
        Ok(())
    }
}

impl Decodable for FindCoordinatorResponse {
    fn decode(dec: &mut PacketDecoder<'_>, version: i16) -> Result<Self> {
        <Self as super::ApiMessage>::check_version(version)?;
        let throttle_time_ms = if THROTTLE_TIME_MS.present(version) {
            dec.get_i32()?
        } else {
            0
        };
        let error_code = dec.get_i16()?;
        let error_message = if ERROR_MESSAGE.present(version) {
            dec.get_nullable_string()?
        } else {
            None
        };
        Ok(Self {
            version,
            throttle_time_ms,
            error_code,
            error_message,
            node_id: dec.get_i32()?,
            host: dec.get_string()?,
            port: dec.get_i32()?,
        })
    }
}

api_message!(FindCoordinatorResponse, API_KEY_FIND_COORDINATOR, 0..=2);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::kafka::messages::ApiMessage;

    #[test]
    fn test_request_key_type_gated() {
        let v0 = FindCoordinatorRequest::group(0, "g");
        assert_eq!(&v0.to_bytes().unwrap()[..], &[0, 1, b'g']);
        let v1 = FindCoordinatorRequest::group(1, "g");
        assert_eq!(&v1.to_bytes().unwrap()[..], &[0, 1, b'g', 0]);
    }

    #[test]
    fn test_invalid_key_type() {
        assert!(FindCoordinatorRequest::from_bytes(&[0, 1, b'g', 7], 1).is_err());
    }

    #[test]
    fn test_response_round_trip() {
        let response = FindCoordinatorResponse {
            version: 2,
            throttle_time_ms: 0,
            error_code: 0,
            error_message: None,
            node_id: 3,
            host: "broker-3".to_string(),
            port: 9092,
        };
        let decoded =
            FindCoordinatorResponse::from_bytes(&response.to_bytes().unwrap(), 2).unwrap();
        assert_eq!(decoded, response);
        assert_eq!(decoded.address(), "broker-3:9092");
    }
}
