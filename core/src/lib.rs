//! # kafwire
//!
//! kafwire is a version-aware codec for the Kafka binary wire protocol. It has no
//! I/O of its own: the companion `kafwire-client` crate drives it over broker
//! connections.
//!
//! ## Layers
//!
//! - [`protocol::kafka::codec`] - primitive encoder/decoder (`PacketEncoder`, `PacketDecoder`)
//!   with nullable strings and bytes, arrays, zig-zag varints, compact forms and
//!   CRC-32C / length spans
//! - [`protocol::kafka::messages`] - request and response types whose wire layout
//!   changes across protocol versions, each with a table of version-gated fields
//! - [`protocol::kafka::records`] - uncompressed magic v2 record batches
//! - [`protocol::kafka::frame`] - length-prefixed framing for `tokio_util::codec`
//! - [`protocol::kafka::errors`] - broker error codes
//!
//! ## Example
//!
//! ```rust
//! use kafwire::protocol::kafka::messages::{ApiMessage, JoinGroupRequest};
//!
//! let mut request = JoinGroupRequest::new(5);
//! request.group_id = "orders".to_string();
//! request.session_timeout_ms = 10_000;
//! request.rebalance_timeout_ms = 60_000;
//! request.protocol_type = "consumer".to_string();
//! request.add_group_protocol("range", b"meta".to_vec());
//!
//! let bytes = request.to_bytes().unwrap();
//! let decoded = JoinGroupRequest::from_bytes(&bytes, 5).unwrap();
//! assert_eq!(decoded.protocols, request.protocols);
//! ```

pub mod protocol;

pub use protocol::kafka::{
    ApiVersionRegistry, CodecError, GroupErrorClass, KafkaErrorCode, KafkaFrameCodec,
    PacketDecoder, PacketEncoder, DEFAULT_MAX_FRAME_SIZE,
};

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, CodecError>;

/// kafwire version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
