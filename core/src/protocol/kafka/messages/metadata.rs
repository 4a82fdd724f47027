//! Metadata API (ApiKey = 3), versions 0-7.
//!
//! `topics: None` asks for every topic. At v0 the wire has no null array, so
//! an empty array means "all" there; from v1 an empty array means "none".

use super::{api_message, api_request, Decodable, Encodable, FieldGate, VersionGates};
use crate::protocol::kafka::codec::{PacketDecoder, PacketEncoder, Result};
use crate::protocol::kafka::errors::KafkaErrorCode;
use crate::protocol::kafka::API_KEY_METADATA;

const NULLABLE_TOPICS: FieldGate = FieldGate::since("topics.nullable", 1);
const ALLOW_AUTO_TOPIC_CREATION: FieldGate = FieldGate::since("allow_auto_topic_creation", 4);

const THROTTLE_TIME_MS: FieldGate = FieldGate::since("throttle_time_ms", 3);
const BROKER_RACK: FieldGate = FieldGate::since("brokers.rack", 1);
const CLUSTER_ID: FieldGate = FieldGate::since("cluster_id", 2);
const CONTROLLER_ID: FieldGate = FieldGate::since("controller_id", 1);
const IS_INTERNAL: FieldGate = FieldGate::since("topics.is_internal", 1);
const LEADER_EPOCH: FieldGate = FieldGate::since("partitions.leader_epoch", 7);
const OFFLINE_REPLICAS: FieldGate = FieldGate::since("partitions.offline_replicas", 5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataRequest {
    pub version: i16,
    pub topics: Option<Vec<String>>,
    pub allow_auto_topic_creation: bool,
}

impl Default for MetadataRequest {
    fn default() -> Self {
        Self {
            version: 0,
            topics: None,
            allow_auto_topic_creation: true,
        }
    }
}

impl MetadataRequest {
    pub const GATES: VersionGates =
        VersionGates::new(&[NULLABLE_TOPICS, ALLOW_AUTO_TOPIC_CREATION]);

    pub fn new(version: i16) -> Self {
        Self {
            version,
            ..Self::default()
        }
    }

    pub fn all_topics(version: i16) -> Self {
        Self::new(version)
    }

    pub fn for_topics(version: i16, topics: Vec<String>) -> Self {
        Self {
            version,
            topics: Some(topics),
            ..Self::default()
        }
    }
}

impl Encodable for MetadataRequest {
    fn encode(&self, enc: &mut PacketEncoder, version: i16) -> Result<()> {
        <Self as super::ApiMessage>::check_version(version)?;
        if NULLABLE_TOPICS.present(version) {
            enc.put_nullable_array(self.topics.as_deref(), |enc, t| enc.put_string(t))?;
        } else {
            enc.put_string_array(self.topics.as_deref().unwrap_or(&[]))?;
        }
        if ALLOW_AUTO_TOPIC_CREATION.present(version) {
            enc.put_bool(self.allow_auto_topic_creation);
        }
        Ok(())
    }
}

impl Decodable for MetadataRequest {
    fn decode(dec: &mut PacketDecoder<'_>, version: i16) -> Result<Self> {
        <Self as super::ApiMessage>::check_version(version)?;
        let topics = if NULLABLE_TOPICS.present(version) {
            dec.get_nullable_array(|dec| dec.get_string())?
        } else {
            Some(dec.get_string_array()?).filter(|topics| !topics.is_empty())
        };
        let allow_auto_topic_creation = if ALLOW_AUTO_TOPIC_CREATION.present(version) {
            dec.get_bool()?
        } else {
            true
        };
        Ok(Self {
            version,
            topics,
            allow_auto_topic_creation,
        })
    }
}

api_message!(MetadataRequest, API_KEY_METADATA, 0..=7);
api_request!(MetadataRequest => MetadataResponse);

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MetadataBroker {
    pub node_id: i32,
    pub host: String,
    pub port: i32,
    pub rack: Option<String>,
}

impl MetadataBroker {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MetadataPartition {
    pub error_code: i16,
    pub partition_index: i32,
    pub leader_id: i32,
    pub leader_epoch: i32,
    pub replica_nodes: Vec<i32>,
    pub isr_nodes: Vec<i32>,
    pub offline_replicas: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MetadataTopic {
    pub error_code: i16,
    pub name: String,
    pub is_internal: bool,
    pub partitions: Vec<MetadataPartition>,
}

impl MetadataTopic {
    pub fn error(&self) -> KafkaErrorCode {
        KafkaErrorCode::from_i16(self.error_code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MetadataResponse {
    pub version: i16,
    pub throttle_time_ms: i32,
    pub brokers: Vec<MetadataBroker>,
    pub cluster_id: Option<String>,
    pub controller_id: i32,
    pub topics: Vec<MetadataTopic>,
}

impl MetadataResponse {
    pub const GATES: VersionGates = VersionGates::new(&[
        THROTTLE_TIME_MS,
        BROKER_RACK,
        CLUSTER_ID,
        CONTROLLER_ID,
        IS_INTERNAL,
        LEADER_EPOCH,
        OFFLINE_REPLICAS,
    ]);

    pub fn new(version: i16) -> Self {
        Self {
            version,
            controller_id: -1,
            ..Self::default()
        }
    }

    pub fn broker(&self, node_id: i32) -> Option<&MetadataBroker> {
        self.brokers.iter().find(|b| b.node_id == node_id)
    }

    pub fn topic(&self, name: &str) -> Option<&MetadataTopic> {
        self.topics.iter().find(|t| t.name == name)
    }
}

impl Encodable for MetadataResponse {
    fn encode(&self, enc: &mut PacketEncoder, version: i16) -> Result<()> {
        <Self as super::ApiMessage>::check_version(version)?;
        if THROTTLE_TIME_MS.present(version) {
            enc.put_i32(self.throttle_time_ms);
        }
        enc.put_array(&self.brokers, |enc, b| {
            enc.put_i32(b.node_id);
            enc.put_string(&b.host)?;
            enc.put_i32(b.port);
            if BROKER_RACK.present(version) {
                enc.put_nullable_string(b.rack.as_deref())?;
            }
            Ok(())
        })?;
        if CLUSTER_ID.present(version) {
            enc.put_nullable_string(self.cluster_id.as_deref())?;
        }
        if CONTROLLER_ID.present(version) {
            enc.put_i32(self.controller_id);
        }
        enc.put_array(&self.topics, |enc, t| {
            enc.put_i16(t.error_code);
            enc.put_string(&t.name)?;
            if IS_INTERNAL.present(version) {
                enc.put_bool(t.is_internal);
            }
            enc.put_array(&t.partitions, |enc, p| {
                enc.put_i16(p.error_code);
                enc.put_i32(p.partition_index);
                enc.put_i32(p.leader_id);
                if LEADER_EPOCH.present(version) {
                    enc.put_i32(p.leader_epoch);
                }
                enc.put_i32_array(&p.replica_nodes)?;
                enc.put_i32_array(&p.isr_nodes)?;
                if OFFLINE_REPLICAS.present(version) {
                    enc.put_i32_array(&p.offline_replicas)?;
                }
                Ok(())
            })
        })
    }
}

impl Decodable for MetadataResponse {
    fn decode(dec: &mut PacketDecoder<'_>, version: i16) -> Result<Self> {
        <Self as super::ApiMessage>::check_version(version)?;
        let throttle_time_ms = if THROTTLE_TIME_MS.present(version) {
            dec.get_i32()?
        } else {
            0
        };
        let brokers = dec.get_array(|dec| {
            Ok(MetadataBroker {
                node_id: dec.get_i32()?,
                host: dec.get_string()?,
                port: dec.get_i32()?,
                rack: if BROKER_RACK.present(version) {
                    dec.get_nullable_string()?
                } else {
                    None
                },
            })
        })?;
        let cluster_id = if CLUSTER_ID.present(version) {
            dec.get_nullable_string()?
        } else {
            None
        };
        let controller_id = if CONTROLLER_ID.present(version) {
            dec.get_i32()?
        } else {
            -1
        };
        let topics = dec.get_array(|dec| {
            let error_code = dec.get_i16()?;
            let name = dec.get_string()?;
            let is_internal = if IS_INTERNAL.present(version) {
                dec.get_bool()?
            } else {
                false
            };
            let partitions = dec.get_array(|dec| {
                let error_code = dec.get_i16()?;
                let partition_index = dec.get_i32()?;
                let leader_id = dec.get_i32()?;
                let leader_epoch = if LEADER_EPOCH.present(version) {
                    dec.get_i32()?
                } else {
                    0
                };
                let replica_nodes = dec.get_i32_array()?;
                let isr_nodes = dec.get_i32_array()?;
                let offline_replicas = if OFFLINE_REPLICAS.present(version) {
                    dec.get_i32_array()?
                } else {
                    Vec::new()
                };
                Ok(MetadataPartition {
                    error_code,
                    partition_index,
                    leader_id,
                    leader_epoch,
                    replica_nodes,
                    isr_nodes,
                    offline_replicas,
                })
            })?;
            Ok(MetadataTopic {
                error_code,
                name,
                is_internal,
                partitions,
            })
        })?;
        Ok(Self {
            version,
            throttle_time_ms,
            brokers,
            cluster_id,
            controller_id,
            topics,
        })
    }
}

api_message!(MetadataResponse, API_KEY_METADATA, 0..=7);
