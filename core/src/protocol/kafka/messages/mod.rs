//! Kafka Protocol Message Structures
//!
//! Request and response bodies for the APIs this crate speaks, plus the
//! request/response headers. Each message carries the version it is encoded
//! at (or was decoded from), and declares the fields whose presence depends on
//! that version in a [`VersionGates`] table consulted by both `encode` and
//! `decode`.
//!
//! Fields absent at a version are omitted on encode and left at their default
//! (`0`, `None`, empty) on decode.

use bytes::Bytes;
use std::fmt::Debug;

use super::codec::{CodecError, PacketDecoder, PacketEncoder, Result};

pub mod api_versions;
pub mod consumer_protocol;
pub mod fetch;
pub mod find_coordinator;
pub mod heartbeat;
pub mod join_group;
pub mod leave_group;
pub mod metadata;
pub mod offset_commit;
pub mod offset_fetch;
pub mod produce;
pub mod sync_group;

pub use api_versions::{ApiVersionsRequest, ApiVersionsResponse, ApiVersionsResponseKey};
pub use consumer_protocol::{
    ConsumerGroupMemberAssignment, ConsumerGroupMemberMetadata, OwnedPartition,
    CONSUMER_PROTOCOL_TYPE,
};
pub use fetch::{
    AbortedTransaction, FetchPartition, FetchRequest, FetchResponse, FetchTopic,
    FetchablePartitionResponse, FetchableTopicResponse, ForgottenTopic,
};
pub use find_coordinator::{CoordinatorType, FindCoordinatorRequest, FindCoordinatorResponse};
pub use heartbeat::{HeartbeatRequest, HeartbeatResponse};
pub use join_group::{GroupProtocol, JoinGroupRequest, JoinGroupResponse, JoinGroupResponseMember};
pub use leave_group::{LeaveGroupRequest, LeaveGroupResponse, MemberIdentity, MemberResponse};
pub use metadata::{
    MetadataBroker, MetadataPartition, MetadataRequest, MetadataResponse, MetadataTopic,
};
pub use offset_commit::{
    OffsetCommitPartition, OffsetCommitRequest, OffsetCommitResponse,
    OffsetCommitResponsePartition, OffsetCommitResponseTopic, OffsetCommitTopic,
};
pub use offset_fetch::{
    OffsetFetchRequest, OffsetFetchResponse, OffsetFetchResponsePartition,
    OffsetFetchResponseTopic, OffsetFetchTopic,
};
pub use produce::{
    PartitionProduceData, PartitionProduceResponse, ProduceRequest, ProduceResponse,
    TopicProduceData, TopicProduceResponse,
};
pub use sync_group::{SyncGroupAssignment, SyncGroupRequest, SyncGroupResponse};

// ============================================================================
// TRAITS
// ============================================================================

pub trait Encodable {
    fn encode(&self, enc: &mut PacketEncoder, version: i16) -> Result<()>;
}

pub trait Decodable: Sized {
    fn decode(dec: &mut PacketDecoder<'_>, version: i16) -> Result<Self>;
}

/// A top-level request or response body.
pub trait ApiMessage: Encodable + Decodable + Debug + Send + 'static {
    const API_KEY: i16;
    const VERSIONS: VersionRange;

    /// Version this message is encoded at, or was decoded from.
    fn version(&self) -> i16;

    fn check_version(version: i16) -> Result<()> {
        Self::VERSIONS.check(Self::API_KEY, version)
    }

    /// Encode at [`version`](Self::version).
    fn to_bytes(&self) -> Result<Bytes> {
        let mut enc = PacketEncoder::new();
        self.encode(&mut enc, self.version())?;
        enc.finish()
    }

    /// Decode a whole body. Trailing bytes are an error.
    fn from_bytes(bytes: &[u8], version: i16) -> Result<Self> {
        let mut dec = PacketDecoder::new(bytes);
        let message = Self::decode(&mut dec, version)?;
        if !dec.is_empty() {
            return Err(CodecError::InvalidFormat(format!(
                "{} trailing bytes after api {} v{} body",
                dec.remaining(),
                Self::API_KEY,
                version
            )));
        }
        Ok(message)
    }
}

pub trait ApiRequest: ApiMessage {
    type Response: ApiMessage;

    /// Set the version to encode at, typically after negotiation.
    fn set_version(&mut self, version: i16);

    /// Whether the broker answers this request at all.
    fn expects_response(&self) -> bool {
        true
    }
}

// ============================================================================
// VERSIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionRange {
    pub min: i16,
    pub max: i16,
}

impl VersionRange {
    pub const fn new(min: i16, max: i16) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, version: i16) -> bool {
        version >= self.min && version <= self.max
    }

    pub fn check(&self, api_key: i16, version: i16) -> Result<()> {
        if !self.contains(version) {
            return Err(CodecError::UnsupportedVersion { api_key, version });
        }
        Ok(())
    }
}

/// A field that exists only in a window of versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldGate {
    pub field: &'static str,
    pub since: i16,
    /// Last version carrying the field, if it was later removed.
    pub until: Option<i16>,
}

impl FieldGate {
    pub const fn since(field: &'static str, since: i16) -> Self {
        Self {
            field,
            since,
            until: None,
        }
    }

    pub const fn between(field: &'static str, since: i16, until: i16) -> Self {
        Self {
            field,
            since,
            until: Some(until),
        }
    }

    pub fn present(&self, version: i16) -> bool {
        version >= self.since && self.until.map_or(true, |until| version <= until)
    }
}

/// Static table of a message's version-gated fields.
#[derive(Debug, Clone, Copy)]
pub struct VersionGates(&'static [FieldGate]);

impl VersionGates {
    pub const fn new(gates: &'static [FieldGate]) -> Self {
        Self(gates)
    }

    pub fn gates(&self) -> &'static [FieldGate] {
        self.0
    }

    pub fn gate(&self, field: &str) -> Option<&'static FieldGate> {
        self.0.iter().find(|gate| gate.field == field)
    }

    /// Gated fields present at `version`.
    pub fn fields_at(&self, version: i16) -> Vec<&'static str> {
        self.0
            .iter()
            .filter(|gate| gate.present(version))
            .map(|gate| gate.field)
            .collect()
    }
}

// ============================================================================
// HEADERS
// ============================================================================

/// Request header v1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeader {
    pub api_key: i16,
    pub api_version: i16,
    pub correlation_id: i32,
    pub client_id: Option<String>,
}

impl RequestHeader {
    pub fn encode(&self, enc: &mut PacketEncoder) -> Result<()> {
        enc.put_i16(self.api_key);
        enc.put_i16(self.api_version);
        enc.put_i32(self.correlation_id);
        enc.put_nullable_string(self.client_id.as_deref())
    }

    pub fn decode(dec: &mut PacketDecoder<'_>) -> Result<Self> {
        Ok(Self {
            api_key: dec.get_i16()?,
            api_version: dec.get_i16()?,
            correlation_id: dec.get_i32()?,
            client_id: dec.get_nullable_string()?,
        })
    }
}

/// Response header v0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    pub correlation_id: i32,
}

impl ResponseHeader {
    pub fn encode(&self, enc: &mut PacketEncoder) {
        enc.put_i32(self.correlation_id);
    }

    pub fn decode(dec: &mut PacketDecoder<'_>) -> Result<Self> {
        Ok(Self {
            correlation_id: dec.get_i32()?,
        })
    }
}

/// Encode a complete request frame payload: header followed by body.
pub fn encode_request<R: ApiRequest>(
    request: &R,
    correlation_id: i32,
    client_id: Option<&str>,
) -> Result<Bytes> {
    let version = request.version();
    R::check_version(version)?;
    let header = RequestHeader {
        api_key: R::API_KEY,
        api_version: version,
        correlation_id,
        client_id: client_id.map(str::to_owned),
    };
    let mut enc = PacketEncoder::with_capacity(64);
    header.encode(&mut enc)?;
    request.encode(&mut enc, version)?;
    enc.finish()
}

/// Encode a complete response frame payload: header followed by body.
pub fn encode_response<M: ApiMessage>(response: &M, correlation_id: i32) -> Result<Bytes> {
    let mut enc = PacketEncoder::with_capacity(64);
    ResponseHeader { correlation_id }.encode(&mut enc);
    response.encode(&mut enc, response.version())?;
    enc.finish()
}

/// Common shape of the `impl ApiMessage` blocks below.
macro_rules! api_message {
    ($ty:ty, $key:expr, $min:literal ..= $max:literal) => {
        impl $crate::protocol::kafka::messages::ApiMessage for $ty {
            const API_KEY: i16 = $key;
            const VERSIONS: $crate::protocol::kafka::messages::VersionRange =
                $crate::protocol::kafka::messages::VersionRange::new($min, $max);

            fn version(&self) -> i16 {
                self.version
            }
        }
    };
}
pub(crate) use api_message;

/// Common shape of the `impl ApiRequest` blocks below.
macro_rules! api_request {
    ($req:ty => $resp:ty) => {
        impl $crate::protocol::kafka::messages::ApiRequest for $req {
            type Response = $resp;

            fn set_version(&mut self, version: i16) {
                self.version = version;
            }
        }
    };
}
pub(crate) use api_request;

#[cfg(test)]
mod tests {
    use super::*;

    const GATES: VersionGates = VersionGates::new(&[
        FieldGate::since("added_in_1", 1),
        FieldGate::between("removed_after_2", 1, 2),
    ]);

    #[test]
    fn test_field_gate_windows() {
        assert_eq!(GATES.fields_at(0), Vec::<&str>::new());
        assert_eq!(GATES.fields_at(1), vec!["added_in_1", "removed_after_2"]);
        assert_eq!(GATES.fields_at(3), vec!["added_in_1"]);
        assert!(GATES.gate("missing").is_none());
        assert_eq!(GATES.gate("added_in_1").map(|g| g.since), Some(1));
    }

    #[test]
    fn test_version_range() {
        let range = VersionRange::new(0, 5);
        assert!(range.contains(0) && range.contains(5));
        assert!(matches!(
            range.check(11, 6),
            Err(CodecError::UnsupportedVersion {
                api_key: 11,
                version: 6
            })
        ));
    }

    #[test]
    fn test_request_header_round_trip() {
        let header = RequestHeader {
            api_key: 3,
            api_version: 7,
            correlation_id: 42,
            client_id: Some("kafwire".to_string()),
        };
        let mut enc = PacketEncoder::new();
        header.encode(&mut enc).unwrap();
        let bytes = enc.finish().unwrap();
        assert_eq!(&bytes[..8], &[0, 3, 0, 7, 0, 0, 0, 42]);
        let decoded = RequestHeader::decode(&mut PacketDecoder::new(&bytes)).unwrap();
        assert_eq!(decoded, header);
    }
}
