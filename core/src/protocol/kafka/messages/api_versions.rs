//! ApiVersions API (ApiKey = 18), versions 0-2.

use super::{api_message, api_request, Decodable, Encodable, FieldGate, VersionGates};
use crate::protocol::kafka::codec::{PacketDecoder, PacketEncoder, Result};
use crate::protocol::kafka::errors::KafkaErrorCode;
use crate::protocol::kafka::API_KEY_API_VERSIONS;

const THROTTLE_TIME_MS: FieldGate = FieldGate::since("throttle_time_ms", 1);

/// The request body is empty in every version this crate speaks.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ApiVersionsRequest {
    pub version: i16,
}

impl ApiVersionsRequest {
    pub fn new(version: i16) -> Self {
        Self { version }
    }
}

impl Encodable for ApiVersionsRequest {
    fn encode(&self, _enc: &mut PacketEncoder, version: i16) -> Result<()> {
        <Self as super::ApiMessage>::check_version(version)
    }
}

impl Decodable for ApiVersionsRequest {
    fn decode(_dec: &mut PacketDecoder<'_>, version: i16) -> Result<Self> {
        <Self as super::ApiMessage>::check_version(version)?;
        Ok(Self { version })
    }
}

api_message!(ApiVersionsRequest, API_KEY_API_VERSIONS, 0..=2);
api_request!(ApiVersionsRequest => ApiVersionsResponse);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ApiVersionsResponseKey {
    pub api_key: i16,
    pub min_version: i16,
    pub max_version: i16,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ApiVersionsResponse {
    pub version: i16,
    pub error_code: i16,
    pub api_keys: Vec<ApiVersionsResponseKey>,
    pub throttle_time_ms: i32,
}

impl ApiVersionsResponse {
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

impl Encodable for ApiVersionsResponse {
    fn encode(&self, enc: &mut PacketEncoder, version: i16) -> Result<()> {
        <Self as super::ApiMessage>::check_version(version)?;
        enc.put_i16(self.error_code);
        enc.put_array(&self.api_keys, |enc, key| {
            enc.put_i16(key.api_key);
            enc.put_i16(key.min_version);
            enc.put_i16(key.max_version);
            Ok(())
        })?;
        if THROTTLE_TIME_MS.present(version) {
            enc.put_i32(self.throttle_time_ms);
        }
        Ok(())
    }
}

impl Decodable for ApiVersionsResponse {
    fn decode(dec: &mut PacketDecoder<'_>, version: i16) -> Result<Self> {
        <Self as super::ApiMessage>::check_version(version)?;
        let error_code = dec.get_i16()?;
        let api_keys = dec.get_array(|dec| {
            Ok(ApiVersionsResponseKey {
                api_key: dec.get_i16()?,
                min_version: dec.get_i16()?,
                max_version: dec.get_i16()?,
            })
        })?;
        let throttle_time_ms = if THROTTLE_TIME_MS.present(version) {
            dec.get_i32()?
        } else {
            0
        };
        Ok(Self {
            version,
            error_code,
            api_keys,
            throttle_time_ms,
        })
    }
}

api_message!(ApiVersionsResponse, API_KEY_API_VERSIONS, 0..=2);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::kafka::messages::ApiMessage;

    #[test]
    fn test_empty_request_body() {
        assert!(ApiVersionsRequest::new(2).to_bytes().unwrap().is_empty());
        assert!(ApiVersionsRequest::new(3).to_bytes().is_err());
    }

    #[test]
    fn test_response_throttle_trails_body() {
        let response = ApiVersionsResponse {
            version: 1,
            error_code: 0,
            api_keys: vec![ApiVersionsResponseKey {
                api_key: 11,
                min_version: 0,
                max_version: 9,
            }],
            throttle_time_ms: 1,
        };
        let bytes = response.to_bytes().unwrap();
        assert_eq!(&bytes[bytes.len() - 4..], &[0, 0, 0, 1]);
        assert_eq!(
            ApiVersionsResponse::from_bytes(&bytes, 1).unwrap(),
            response
        );
    }
}
