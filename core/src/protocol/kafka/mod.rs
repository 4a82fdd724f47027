//! Kafka Wire Protocol Implementation
//!
//! Client-side encoding and decoding of the Kafka binary protocol.
//!
//! ## Protocol Structure
//!
//! Every request and response travels in a length-prefixed frame:
//! ```text
//! RequestMessage  => MessageSize RequestHeader RequestBody
//! ResponseMessage => MessageSize ResponseHeader ResponseBody
//! MessageSize     => int32
//! RequestHeader   => api_key api_version correlation_id client_id
//! ResponseHeader  => correlation_id
//! api_key         => int16
//! api_version     => int16
//! correlation_id  => int32
//! client_id       => nullable_string
//! ```
//!
//! ## Supported APIs
//!
//! ### Core Messaging
//! - **ApiKey 0**: Produce v0-v7
//! - **ApiKey 1**: Fetch v0-v7
//! - **ApiKey 3**: Metadata v0-v7
//!
//! ### Consumer Groups
//! - **ApiKey 8**: OffsetCommit v0-v7
//! - **ApiKey 9**: OffsetFetch v0-v5
//! - **ApiKey 10**: FindCoordinator v0-v2
//! - **ApiKey 11**: JoinGroup v0-v5
//! - **ApiKey 12**: Heartbeat v0-v3
//! - **ApiKey 13**: LeaveGroup v0-v3
//! - **ApiKey 14**: SyncGroup v0-v3
//!
//! ### Negotiation
//! - **ApiKey 18**: ApiVersions v0-v2

pub mod api_versions;
pub mod codec;
pub mod errors;
pub mod frame;
pub mod messages;
pub mod records;

pub use api_versions::{ApiVersionInfo, ApiVersionRegistry};
pub use codec::{CodecError, PacketDecoder, PacketEncoder, Result};
pub use errors::{GroupErrorClass, KafkaErrorCode};
pub use frame::{KafkaFrameCodec, DEFAULT_MAX_FRAME_SIZE};

/// Kafka API Keys - Core messaging APIs
pub const API_KEY_PRODUCE: i16 = 0;
pub const API_KEY_FETCH: i16 = 1;
pub const API_KEY_METADATA: i16 = 3;

/// Kafka API Keys - Consumer group APIs
pub const API_KEY_OFFSET_COMMIT: i16 = 8;
pub const API_KEY_OFFSET_FETCH: i16 = 9;
pub const API_KEY_FIND_COORDINATOR: i16 = 10;
pub const API_KEY_JOIN_GROUP: i16 = 11;
pub const API_KEY_HEARTBEAT: i16 = 12;
pub const API_KEY_LEAVE_GROUP: i16 = 13;
pub const API_KEY_SYNC_GROUP: i16 = 14;

/// Kafka API Keys - Version negotiation
pub const API_KEY_API_VERSIONS: i16 = 18;

/// Human-readable API name, for logs.
pub fn api_key_name(api_key: i16) -> &'static str {
    match api_key {
        API_KEY_PRODUCE => "Produce",
        API_KEY_FETCH => "Fetch",
        API_KEY_METADATA => "Metadata",
        API_KEY_OFFSET_COMMIT => "OffsetCommit",
        API_KEY_OFFSET_FETCH => "OffsetFetch",
        API_KEY_FIND_COORDINATOR => "FindCoordinator",
        API_KEY_JOIN_GROUP => "JoinGroup",
        API_KEY_HEARTBEAT => "Heartbeat",
        API_KEY_LEAVE_GROUP => "LeaveGroup",
        API_KEY_SYNC_GROUP => "SyncGroup",
        API_KEY_API_VERSIONS => "ApiVersions",
        _ => "Unknown",
    }
}
