//! JoinGroup API (ApiKey = 11), versions 0-5.
//!
//! ```text
//! JoinGroup Request =>
//!   group_id               string
//!   session_timeout_ms     int32
//!   rebalance_timeout_ms   int32            (v1+)
//!   member_id              string
//!   group_instance_id      nullable string  (v5+)
//!   protocol_type          string
//!   protocols              [name string, metadata bytes]
//! ```
//!
//! Protocol proposals are an ordered sequence: the broker prefers earlier
//! entries. `legacy_protocols` is an unordered name → metadata map kept for
//! callers that still build requests that way; it is written sorted by name
//! so the encoding is deterministic, and may not be combined with
//! `protocols`.

use bytes::Bytes;
use std::collections::HashMap;

use super::consumer_protocol::ConsumerGroupMemberMetadata;
use super::{api_message, api_request, Decodable, Encodable, FieldGate, VersionGates};
use crate::protocol::kafka::codec::{CodecError, PacketDecoder, PacketEncoder, Result};
use crate::protocol::kafka::errors::KafkaErrorCode;
use crate::protocol::kafka::API_KEY_JOIN_GROUP;

const REBALANCE_TIMEOUT_MS: FieldGate = FieldGate::since("rebalance_timeout_ms", 1);
const GROUP_INSTANCE_ID: FieldGate = FieldGate::since("group_instance_id", 5);
const THROTTLE_TIME_MS: FieldGate = FieldGate::since("throttle_time_ms", 2);
const MEMBER_GROUP_INSTANCE_ID: FieldGate = FieldGate::since("members.group_instance_id", 5);

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GroupProtocol {
    pub name: String,
    pub metadata: Bytes,
}

impl GroupProtocol {
    pub fn new(name: impl Into<String>, metadata: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            metadata: metadata.into(),
        }
    }

    fn encode(&self, enc: &mut PacketEncoder) -> Result<()> {
        enc.put_string(&self.name)?;
        enc.put_bytes(&self.metadata)
    }

    fn decode(dec: &mut PacketDecoder<'_>) -> Result<Self> {
        Ok(Self {
            name: dec.get_string()?,
            metadata: dec.get_bytes()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JoinGroupRequest {
    pub version: i16,
    pub group_id: String,
    pub session_timeout_ms: i32,
    pub rebalance_timeout_ms: i32,
    pub member_id: String,
    pub group_instance_id: Option<String>,
    pub protocol_type: String,
    pub protocols: Vec<GroupProtocol>,
    pub legacy_protocols: HashMap<String, Bytes>,
}

impl JoinGroupRequest {
    pub const GATES: VersionGates = VersionGates::new(&[REBALANCE_TIMEOUT_MS, GROUP_INSTANCE_ID]);

    pub fn new(version: i16) -> Self {
        Self {
            version,
            ..Self::default()
        }
    }

    /// Append a protocol proposal. Order of calls is the preference order.
    pub fn add_group_protocol(&mut self, name: impl Into<String>, metadata: impl Into<Bytes>) {
        self.protocols.push(GroupProtocol::new(name, metadata));
    }

    /// Append a "consumer" protocol proposal from structured metadata.
    pub fn add_group_protocol_metadata(
        &mut self,
        name: impl Into<String>,
        metadata: &ConsumerGroupMemberMetadata,
    ) -> Result<()> {
        let encoded = metadata.encode_to_bytes()?;
        self.add_group_protocol(name, encoded);
        Ok(())
    }

    /// Use an unordered name → metadata map for the proposals.
    pub fn with_legacy_protocols(mut self, protocols: HashMap<String, Bytes>) -> Self {
        self.legacy_protocols = protocols;
        self
    }

    /// Move `legacy_protocols` into `protocols`, sorted by name.
    pub fn normalize(&mut self) -> Result<()> {
        Self::check_protocol_forms(&self.protocols, &self.legacy_protocols)?;
        if !self.legacy_protocols.is_empty() {
            self.protocols = sorted_legacy(&self.legacy_protocols);
            self.legacy_protocols.clear();
        }
        Ok(())
    }

    fn check_protocol_forms(
        protocols: &[GroupProtocol],
        legacy: &HashMap<String, Bytes>,
    ) -> Result<()> {
        if !protocols.is_empty() && !legacy.is_empty() {
            return Err(CodecError::IncompatibleFields(
                "JoinGroupRequest cannot carry both protocols and legacy_protocols",
            ));
        }
        Ok(())
    }
}

fn sorted_legacy(legacy: &HashMap<String, Bytes>) -> Vec<GroupProtocol> {
    let mut protocols: Vec<GroupProtocol> = legacy
        .iter()
        .map(|(name, metadata)| GroupProtocol::new(name.clone(), metadata.clone()))
        .collect();
    protocols.sort_by(|a, b| a.name.cmp(&b.name));
    protocols
}

impl Encodable for JoinGroupRequest {
    fn encode(&self, enc: &mut PacketEncoder, version: i16) -> Result<()> {
        <Self as super::ApiMessage>::check_version(version)?;
        Self::check_protocol_forms(&self.protocols, &self.legacy_protocols)?;

        enc.put_string(&self.group_id)?;
        enc.put_i32(self.session_timeout_ms);
        if REBALANCE_TIMEOUT_MS.present(version) {
            enc.put_i32(self.rebalance_timeout_ms);
        }
        enc.put_string(&self.member_id)?;
        if GROUP_INSTANCE_ID.present(version) {
            enc.put_nullable_string(self.group_instance_id.as_deref())?;
        }
        enc.put_string(&self.protocol_type)?;

        if self.legacy_protocols.is_empty() {
            enc.put_array(&self.protocols, |enc, p| p.encode(enc))
        } else {
            enc.put_array(&sorted_legacy(&self.legacy_protocols), |enc, p| p.encode(enc))
        }
    }
}

impl Decodable for JoinGroupRequest {
    fn decode(dec: &mut PacketDecoder<'_>, version: i16) -> Result<Self> {
        <Self as super::ApiMessage>::check_version(version)?;

        let group_id = dec.get_string()?;
        let session_timeout_ms = dec.get_i32()?;
        let rebalance_timeout_ms = if REBALANCE_TIMEOUT_MS.present(version) {
            dec.get_i32()?
        } else {
            0
        };
        let member_id = dec.get_string()?;
        let group_instance_id = if GROUP_INSTANCE_ID.present(version) {
            dec.get_nullable_string()?
        } else {
            None
        };
        let protocol_type = dec.get_string()?;
        let protocols = dec.get_array(GroupProtocol::decode)?;

        Ok(Self {
            version,
            group_id,
            session_timeout_ms,
            rebalance_timeout_ms,
            member_id,
            group_instance_id,
            protocol_type,
            protocols,
            legacy_protocols: HashMap::new(),
        })
    }
}

api_message!(JoinGroupRequest, API_KEY_JOIN_GROUP, 0..=5);
api_request!(JoinGroupRequest => JoinGroupResponse);

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JoinGroupResponseMember {
    pub member_id: String,
    pub group_instance_id: Option<String>,
    pub metadata: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JoinGroupResponse {
    pub version: i16,
    pub throttle_time_ms: i32,
    pub error_code: i16,
    pub generation_id: i32,
    pub protocol_name: String,
    pub leader: String,
    pub member_id: String,
    pub members: Vec<JoinGroupResponseMember>,
}

impl JoinGroupResponse {
    pub const GATES: VersionGates = VersionGates::new(&[THROTTLE_TIME_MS, MEMBER_GROUP_INSTANCE_ID]);

    pub fn new(version: i16) -> Self {
        Self {
            version,
            ..Self::default()
        }
    }

    pub fn error(&self) -> KafkaErrorCode {
        KafkaErrorCode::from_i16(self.error_code)
    }

    pub fn is_leader(&self) -> bool {
        !self.member_id.is_empty() && self.leader == self.member_id
    }

    /// Decode every member's "consumer" protocol metadata. Only the leader
    /// receives a non-empty member list.
    pub fn members_metadata(&self) -> Result<Vec<(String, ConsumerGroupMemberMetadata)>> {
        self.members
            .iter()
            .map(|member| {
                ConsumerGroupMemberMetadata::decode_from(&member.metadata)
                    .map(|metadata| (member.member_id.clone(), metadata))
            })
            .collect()
    }
}

impl Encodable for JoinGroupResponse {
    fn encode(&self, enc: &mut PacketEncoder, version: i16) -> Result<()> {
        <Self as super::ApiMessage>::check_version(version)?;

        if THROTTLE_TIME_MS.present(version) {
            enc.put_i32(self.throttle_time_ms);
        }
        enc.put_i16(self.error_code);
        enc.put_i32(self.generation_id);
        enc.put_string(&self.protocol_name)?;
        enc.put_string(&self.leader)?;
        enc.put_string(&self.member_id)?;
        enc.put_array(&self.members, |enc, member| {
            enc.put_string(&member.member_id)?;
            if MEMBER_GROUP_INSTANCE_ID.present(version) {
                enc.put_nullable_string(member.group_instance_id.as_deref())?;
            }
            enc.put_bytes(&member.metadata)
        })
    }
}

impl Decodable for JoinGroupResponse {
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
            generation_id: dec.get_i32()?,
            protocol_name: dec.get_string()?,
            leader: dec.get_string()?,
            member_id: dec.get_string()?,
            members: dec.get_array(|dec| {
                let member_id = dec.get_string()?;
                let group_instance_id = if MEMBER_GROUP_INSTANCE_ID.present(version) {
                    dec.get_nullable_string()?
                } else {
                    None
                };
                Ok(JoinGroupResponseMember {
                    member_id,
                    group_instance_id,
                    metadata: dec.get_bytes()?,
                })
            })?,
        })
    }
}

api_message!(JoinGroupResponse, API_KEY_JOIN_GROUP, 0..=5);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::kafka::messages::ApiMessage;

    fn request(version: i16) -> JoinGroupRequest {
        let mut request = JoinGroupRequest::new(version);
        request.group_id = "g".to_string();
        request.session_timeout_ms = 10;
        request.rebalance_timeout_ms = 20;
        request.member_id = "m".to_string();
        request.protocol_type = "consumer".to_string();
        request
    }

    #[test]
    fn test_gate_table() {
        assert_eq!(JoinGroupRequest::GATES.fields_at(0), Vec::<&str>::new());
        assert_eq!(
            JoinGroupRequest::GATES.fields_at(1),
            vec!["rebalance_timeout_ms"]
        );
        assert_eq!(
            JoinGroupRequest::GATES.fields_at(5),
            vec!["rebalance_timeout_ms", "group_instance_id"]
        );
        assert_eq!(JoinGroupResponse::GATES.fields_at(1), Vec::<&str>::new());
    }

    #[test]
    fn test_rebalance_timeout_dropped_below_v1() {
        let v0 = request(0).to_bytes().unwrap();
        let v1 = request(1).to_bytes().unwrap();
        assert_eq!(v1.len(), v0.len() + 4);

        let decoded = JoinGroupRequest::from_bytes(&v0, 0).unwrap();
        assert_eq!(decoded.rebalance_timeout_ms, 0);
    }

    #[test]
    fn test_group_instance_id_three_states() {
        for instance in [None, Some(String::new()), Some("gid".to_string())] {
            let mut req = request(5);
            req.group_instance_id = instance.clone();
            let decoded = JoinGroupRequest::from_bytes(&req.to_bytes().unwrap(), 5).unwrap();
            assert_eq!(decoded.group_instance_id, instance);
        }
    }

    #[test]
    fn test_both_protocol_forms_rejected() {
        let mut legacy = HashMap::new();
        legacy.insert("range".to_string(), Bytes::from_static(b"r"));
        let mut req = request(1).with_legacy_protocols(legacy);
        req.add_group_protocol("roundrobin", Bytes::from_static(b"rr"));

        assert!(matches!(
            req.to_bytes(),
            Err(CodecError::IncompatibleFields(_))
        ));
        assert!(matches!(
            req.normalize(),
            Err(CodecError::IncompatibleFields(_))
        ));
    }

    #[test]
    fn test_legacy_protocols_sorted_and_deterministic() {
        let mut legacy = HashMap::new();
        for name in ["zeta", "alpha", "mid", "beta", "omega"] {
            legacy.insert(name.to_string(), Bytes::from(name.as_bytes().to_vec()));
        }
        let req = request(1).with_legacy_protocols(legacy);
        let first = req.to_bytes().unwrap();
        for _ in 0..10 {
            assert_eq!(req.to_bytes().unwrap(), first);
        }

        let decoded = JoinGroupRequest::from_bytes(&first, 1).unwrap();
        let names: Vec<_> = decoded.protocols.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta", "mid", "omega", "zeta"]);
        assert!(decoded.legacy_protocols.is_empty());

        let mut normalized = req.clone();
        normalized.normalize().unwrap();
        assert_eq!(normalized.protocols, decoded.protocols);
        assert_eq!(normalized.to_bytes().unwrap(), first);
    }

    #[test]
    fn test_ordered_protocols_keep_caller_order() {
        let mut req = request(1);
        req.add_group_protocol("roundrobin", Bytes::new());
        req.add_group_protocol("range", Bytes::new());
        let decoded = JoinGroupRequest::from_bytes(&req.to_bytes().unwrap(), 1).unwrap();
        assert_eq!(decoded.protocols[0].name, "roundrobin");
        assert_eq!(decoded.protocols[1].name, "range");
    }

    #[test]
    fn test_unsupported_version() {
        assert!(matches!(
            request(6).to_bytes(),
            Err(CodecError::UnsupportedVersion {
                api_key: 11,
                version: 6
            })
        ));
    }

    #[test]
    fn test_response_round_trip_v5() {
        let response = JoinGroupResponse {
            version: 5,
            throttle_time_ms: 3,
            error_code: 0,
            generation_id: 7,
            protocol_name: "range".to_string(),
            leader: "m-1".to_string(),
            member_id: "m-1".to_string(),
            members: vec![
                JoinGroupResponseMember {
                    member_id: "m-1".to_string(),
                    group_instance_id: Some("static-1".to_string()),
                    metadata: Bytes::from_static(&[1]),
                },
                JoinGroupResponseMember {
                    member_id: "m-2".to_string(),
                    group_instance_id: None,
                    metadata: Bytes::new(),
                },
            ],
        };
        let decoded = JoinGroupResponse::from_bytes(&response.to_bytes().unwrap(), 5).unwrap();
        assert_eq!(decoded, response);
        assert!(decoded.is_leader());
    }

    #[test]
    fn test_response_member_id_required() {
        let mut response = JoinGroupResponse::new(4);
        response.error_code = KafkaErrorCode::MemberIdRequired.as_i16();
        response.member_id = "assigned".to_string();
        let decoded = JoinGroupResponse::from_bytes(&response.to_bytes().unwrap(), 4).unwrap();
        assert_eq!(decoded.error(), KafkaErrorCode::MemberIdRequired);
        assert!(!decoded.is_leader());
    }
}
