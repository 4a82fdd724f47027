//! Error types for the kafwire client library

use kafwire::{CodecError, KafkaErrorCode};

/// Main error type for client operations
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Encoding or decoding failed
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection ended before the request completed
    #[error("Connection to {broker} closed")]
    ConnectionClosed { broker: String },

    /// No response arrived within the request deadline
    #[error("Request {correlation_id} to {broker} timed out after {timeout_ms}ms")]
    RequestTimeout {
        broker: String,
        correlation_id: i32,
        timeout_ms: u64,
    },

    /// The broker announced a frame above the configured maximum
    #[error("Frame of {size} bytes from {broker} exceeds maximum {max}")]
    FrameTooLarge {
        broker: String,
        size: usize,
        max: usize,
    },

    /// The broker sent something the protocol does not allow
    #[error("Protocol violation from {broker}: {message}")]
    ProtocolViolation { broker: String, message: String },

    /// The broker answered with an error code
    #[error("Broker error {code} ({context})")]
    Broker {
        code: KafkaErrorCode,
        context: String,
    },

    /// Join/sync did not reach a stable generation within the retry budget
    #[error("Rebalance did not complete after {attempts} attempts in {elapsed_ms}ms")]
    RebalanceTimeout { attempts: u32, elapsed_ms: u64 },

    /// The group rejected this member for good
    #[error("Group '{group_id}' failed: {code}")]
    GroupFatal {
        group_id: String,
        code: KafkaErrorCode,
    },

    /// Operation needs an active group membership
    #[error("Not a member of the group")]
    NotMember,

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Broker not available
    #[error("No available brokers")]
    NoBrokersAvailable,

    /// Operation-level timeout
    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Message too large
    #[error("Message size {size} exceeds maximum {max_size}")]
    MessageTooLarge { size: usize, max_size: usize },

    /// Topic does not exist
    #[error("Topic '{topic}' does not exist")]
    TopicNotFound { topic: String },
}

impl ClientError {
    /// Create a connection-closed error
    pub fn connection_closed<S: Into<String>>(broker: S) -> Self {
        Self::ConnectionClosed {
            broker: broker.into(),
        }
    }

    /// Create a protocol violation error
    pub fn protocol_violation<B: Into<String>, M: Into<String>>(broker: B, message: M) -> Self {
        Self::ProtocolViolation {
            broker: broker.into(),
            message: message.into(),
        }
    }

    /// Create a broker error from a response code
    pub fn broker<C: Into<KafkaErrorCode>, S: Into<String>>(code: C, context: S) -> Self {
        Self::Broker {
            code: code.into(),
            context: context.into(),
        }
    }

    /// Create a new invalid config error
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    /// Broker error code carried by this error, if any
    pub fn broker_code(&self) -> Option<KafkaErrorCode> {
        match self {
            Self::Broker { code, .. } | Self::GroupFatal { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConnectionClosed { .. }
            | Self::RequestTimeout { .. }
            | Self::Timeout { .. }
            | Self::NoBrokersAvailable
            | Self::Io(_) => true,
            Self::Broker { code, .. } => code.is_retriable(),
            _ => false,
        }
    }

    /// Check if this error is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionClosed { .. }
                | Self::Io(_)
                | Self::ProtocolViolation { .. }
                | Self::FrameTooLarge { .. }
        )
    }

    /// Check if this error is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::RequestTimeout { .. })
    }
}
