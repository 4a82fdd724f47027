//! Kafka Error Codes
//!
//! Broker error codes as they appear in response bodies, plus the
//! classification the group coordinator uses to decide what a code means for
//! membership.

macro_rules! kafka_error_codes {
    ($($name:ident = $code:literal => $message:literal,)+) => {
        /// Kafka protocol error codes
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        #[repr(i16)]
        pub enum KafkaErrorCode {
            #[default]
            NoError = 0,
            Unknown = -1,
            $($name = $code,)+
        }

        impl KafkaErrorCode {
            /// Create error code from i16 value. Codes this crate does not
            /// know map to [`KafkaErrorCode::Unknown`].
            pub fn from_i16(code: i16) -> Self {
                match code {
                    0 => KafkaErrorCode::NoError,
                    $($code => KafkaErrorCode::$name,)+
                    _ => KafkaErrorCode::Unknown,
                }
            }

            /// Get human-readable error message
            pub fn message(self) -> &'static str {
                match self {
                    KafkaErrorCode::NoError => "Success",
                    KafkaErrorCode::Unknown => "The server experienced an unexpected error when processing the request",
                    $(KafkaErrorCode::$name => $message,)+
                }
            }
        }
    };
}

kafka_error_codes! {
    OffsetOutOfRange = 1 => "The requested offset is outside the range kept by the server",
    CorruptMessage = 2 => "The message failed its CRC check or is otherwise corrupt",
    UnknownTopicOrPartition = 3 => "The topic or partition does not exist on this broker",
    InvalidFetchSize = 4 => "The requested fetch size is invalid",
    LeaderNotAvailable = 5 => "No leader for this topic-partition while an election is in progress",
    NotLeaderForPartition = 6 => "This broker is not the leader for that topic-partition",
    RequestTimedOut = 7 => "The request timed out",
    BrokerNotAvailable = 8 => "The broker is not available",
    ReplicaNotAvailable = 9 => "The replica is not available for the requested topic-partition",
    MessageTooLarge = 10 => "The message is larger than the broker will accept",
    StaleControllerEpoch = 11 => "The controller moved to another broker",
    OffsetMetadataTooLarge = 12 => "The offset commit metadata is too large",
    NetworkException = 13 => "The server disconnected before a response was received",
    CoordinatorLoadInProgress = 14 => "The coordinator is still loading group metadata",
    CoordinatorNotAvailable = 15 => "The coordinator is not available",
    NotCoordinator = 16 => "This broker is not the coordinator for the group",
    InvalidTopicException = 17 => "The request referenced an invalid topic",
    RecordListTooLarge = 18 => "The record batch is larger than the segment size",
    NotEnoughReplicas = 19 => "Fewer in-sync replicas than required",
    NotEnoughReplicasAfterAppend = 20 => "Written to fewer in-sync replicas than required",
    InvalidRequiredAcks = 21 => "The produce request has an invalid acks value",
    IllegalGeneration = 22 => "The group generation id is not valid",
    InconsistentGroupProtocol = 23 => "The member's protocols are incompatible with the rest of the group",
    InvalidGroupId = 24 => "The group id is invalid",
    UnknownMemberId = 25 => "The coordinator does not know this member",
    InvalidSessionTimeout = 26 => "The session timeout is outside the range the broker allows",
    RebalanceInProgress = 27 => "The group is rebalancing, so a rejoin is needed",
    InvalidCommitOffsetSize = 28 => "The committed offset data size is not valid",
    TopicAuthorizationFailed = 29 => "Topic authorization failed",
    GroupAuthorizationFailed = 30 => "Group authorization failed",
    ClusterAuthorizationFailed = 31 => "Cluster authorization failed",
    InvalidTimestamp = 32 => "The record timestamp is out of the accepted range",
    UnsupportedSaslMechanism = 33 => "The broker does not support the requested SASL mechanism",
    IllegalSaslState = 34 => "The request is not valid in the current SASL state",
    UnsupportedVersion = 35 => "The API version is not supported",
    TopicAlreadyExists = 36 => "A topic with this name already exists",
    InvalidPartitions = 37 => "The number of partitions is invalid",
    InvalidReplicationFactor = 38 => "The replication factor is invalid",
    InvalidReplicaAssignment = 39 => "The replica assignment is invalid",
    InvalidConfig = 40 => "The configuration is invalid",
    NotController = 41 => "This broker is not the controller",
    InvalidRequest = 42 => "The request was malformed or sent to an incompatible broker",
    UnsupportedForMessageFormat = 43 => "The message format version does not support the request",
    PolicyViolation = 44 => "The request violates a configured policy",
    OutOfOrderSequenceNumber = 45 => "Out of order sequence number",
    DuplicateSequenceNumber = 46 => "Duplicate sequence number",
    InvalidProducerEpoch = 47 => "The producer epoch is stale",
    InvalidTxnState = 48 => "Transactional operation in an invalid state",
    InvalidProducerIdMapping = 49 => "The producer id is not assigned to this transactional id",
    InvalidTransactionTimeout = 50 => "The transaction timeout is larger than the broker allows",
    ConcurrentTransactions = 51 => "Another operation on the same transaction is in progress",
    TransactionCoordinatorFenced = 52 => "The transaction coordinator has been fenced",
    TransactionalIdAuthorizationFailed = 53 => "Transactional id authorization failed",
    SecurityDisabled = 54 => "Security features are disabled",
    OperationNotAttempted = 55 => "The broker did not attempt this operation",
    KafkaStorageError = 56 => "Disk error while accessing the log",
    LogDirNotFound = 57 => "The log directory was not found",
    SaslAuthenticationFailed = 58 => "SASL authentication failed",
    UnknownProducerId = 59 => "The broker has no metadata for this producer id",
    ReassignmentInProgress = 60 => "A partition reassignment is in progress",
    DelegationTokenAuthDisabled = 61 => "Delegation tokens are disabled",
    DelegationTokenNotFound = 62 => "Delegation token not found",
    DelegationTokenOwnerMismatch = 63 => "Principal is not the owner or renewer of the token",
    DelegationTokenRequestNotAllowed = 64 => "Delegation token requests are not allowed on this channel",
    DelegationTokenAuthorizationFailed = 65 => "Delegation token authorization failed",
    DelegationTokenExpired = 66 => "Delegation token expired",
    InvalidPrincipalType = 67 => "Principal type is not supported",
    NonEmptyGroup = 68 => "The group is not empty",
    GroupIdNotFound = 69 => "The group id does not exist",
    FetchSessionIdNotFound = 70 => "The fetch session id was not found",
    InvalidFetchSessionEpoch = 71 => "The fetch session epoch is invalid",
    ListenerNotFound = 72 => "No matching listener on the leader broker",
    TopicDeletionDisabled = 73 => "Topic deletion is disabled",
    FencedLeaderEpoch = 74 => "The leader epoch is older than the broker's",
    UnknownLeaderEpoch = 75 => "The leader epoch is newer than the broker's",
    UnsupportedCompressionType = 76 => "The client does not support the partition's compression type",
    StaleBrokerEpoch = 77 => "Broker epoch has changed",
    OffsetNotAvailable = 78 => "The leader high watermark has not caught up after an election",
    MemberIdRequired = 79 => "The member must rejoin with the member id the broker assigned",
    PreferredLeaderNotAvailable = 80 => "The preferred leader was not available",
    GroupMaxSizeReached = 81 => "The group has reached its maximum size",
    FencedInstanceId = 82 => "Another member registered with the same group instance id",
}

/// What a broker error means for group membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupErrorClass {
    /// Transient: retry the same request after backoff, possibly against a
    /// freshly resolved coordinator.
    Retry,
    /// The group wants this member to (re)join.
    Rejoin,
    /// Membership identity is stale: reset generation (and member id for
    /// unknown members) and rejoin.
    ResetMember,
    /// Configuration or authorization problem. The member leaves the group.
    Fatal,
    /// Not a group-level condition.
    Other,
}

impl KafkaErrorCode {
    /// Convert error code to i16 for wire protocol
    pub fn as_i16(self) -> i16 {
        self as i16
    }

    pub fn is_ok(self) -> bool {
        self == KafkaErrorCode::NoError
    }

    /// Check if this error code indicates a retriable error
    pub fn is_retriable(self) -> bool {
        matches!(
            self,
            KafkaErrorCode::UnknownTopicOrPartition
                | KafkaErrorCode::LeaderNotAvailable
                | KafkaErrorCode::NotLeaderForPartition
                | KafkaErrorCode::RequestTimedOut
                | KafkaErrorCode::BrokerNotAvailable
                | KafkaErrorCode::ReplicaNotAvailable
                | KafkaErrorCode::NetworkException
                | KafkaErrorCode::CoordinatorLoadInProgress
                | KafkaErrorCode::CoordinatorNotAvailable
                | KafkaErrorCode::NotCoordinator
                | KafkaErrorCode::NotEnoughReplicas
                | KafkaErrorCode::NotEnoughReplicasAfterAppend
                | KafkaErrorCode::RebalanceInProgress
                | KafkaErrorCode::NotController
                | KafkaErrorCode::FencedLeaderEpoch
                | KafkaErrorCode::UnknownLeaderEpoch
                | KafkaErrorCode::OffsetNotAvailable
                | KafkaErrorCode::PreferredLeaderNotAvailable
        )
    }

    /// Codes after which the cached coordinator must be looked up again.
    pub fn is_coordinator_error(self) -> bool {
        matches!(
            self,
            KafkaErrorCode::NotCoordinator
                | KafkaErrorCode::CoordinatorNotAvailable
                | KafkaErrorCode::CoordinatorLoadInProgress
        )
    }

    /// Codes after which partition leadership metadata is stale.
    pub fn is_stale_metadata(self) -> bool {
        matches!(
            self,
            KafkaErrorCode::NotLeaderForPartition
                | KafkaErrorCode::LeaderNotAvailable
                | KafkaErrorCode::UnknownTopicOrPartition
                | KafkaErrorCode::FencedLeaderEpoch
                | KafkaErrorCode::UnknownLeaderEpoch
        )
    }

    /// Classification used by the group coordinator. `None` for success.
    pub fn group_error_class(self) -> Option<GroupErrorClass> {
        let class = match self {
            KafkaErrorCode::NoError => return None,
            KafkaErrorCode::CoordinatorLoadInProgress
            | KafkaErrorCode::CoordinatorNotAvailable
            | KafkaErrorCode::NotCoordinator
            | KafkaErrorCode::RequestTimedOut
            | KafkaErrorCode::NetworkException => GroupErrorClass::Retry,
            KafkaErrorCode::RebalanceInProgress
            | KafkaErrorCode::MemberIdRequired
            | KafkaErrorCode::FencedInstanceId => GroupErrorClass::Rejoin,
            KafkaErrorCode::UnknownMemberId | KafkaErrorCode::IllegalGeneration => {
                GroupErrorClass::ResetMember
            }
            KafkaErrorCode::GroupAuthorizationFailed
            | KafkaErrorCode::InvalidGroupId
            | KafkaErrorCode::InconsistentGroupProtocol
            | KafkaErrorCode::InvalidSessionTimeout
            | KafkaErrorCode::GroupMaxSizeReached => GroupErrorClass::Fatal,
            _ => GroupErrorClass::Other,
        };
        Some(class)
    }
}

impl From<i16> for KafkaErrorCode {
    fn from(code: i16) -> Self {
        KafkaErrorCode::from_i16(code)
    }
}

impl std::fmt::Display for KafkaErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:?}): {}", *self as i16, self, self.message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_conversion() {
        assert_eq!(KafkaErrorCode::NoError.as_i16(), 0);
        assert_eq!(KafkaErrorCode::Unknown.as_i16(), -1);
        assert_eq!(KafkaErrorCode::MemberIdRequired.as_i16(), 79);

        assert_eq!(KafkaErrorCode::from_i16(0), KafkaErrorCode::NoError);
        assert_eq!(KafkaErrorCode::from_i16(-1), KafkaErrorCode::Unknown);
        assert_eq!(
            KafkaErrorCode::from_i16(30),
            KafkaErrorCode::GroupAuthorizationFailed
        );
        assert_eq!(KafkaErrorCode::from_i16(999), KafkaErrorCode::Unknown);
    }

    #[test]
    fn test_every_code_round_trips() {
        for code in 1..=82i16 {
            assert_eq!(KafkaErrorCode::from_i16(code).as_i16(), code);
        }
    }

    #[test]
    fn test_retriable_errors() {
        assert!(!KafkaErrorCode::NoError.is_retriable());
        assert!(!KafkaErrorCode::Unknown.is_retriable());
        assert!(KafkaErrorCode::NotCoordinator.is_retriable());
        assert!(KafkaErrorCode::LeaderNotAvailable.is_retriable());
        assert!(!KafkaErrorCode::MessageTooLarge.is_retriable());
    }

    #[test]
    fn test_group_error_class() {
        assert_eq!(KafkaErrorCode::NoError.group_error_class(), None);
        assert_eq!(
            KafkaErrorCode::NotCoordinator.group_error_class(),
            Some(GroupErrorClass::Retry)
        );
        assert_eq!(
            KafkaErrorCode::RebalanceInProgress.group_error_class(),
            Some(GroupErrorClass::Rejoin)
        );
        // a fenced static member rejoins under the same instance id
        assert_eq!(
            KafkaErrorCode::FencedInstanceId.group_error_class(),
            Some(GroupErrorClass::Rejoin)
        );
        assert_eq!(
            KafkaErrorCode::IllegalGeneration.group_error_class(),
            Some(GroupErrorClass::ResetMember)
        );
        assert_eq!(
            KafkaErrorCode::GroupAuthorizationFailed.group_error_class(),
            Some(GroupErrorClass::Fatal)
        );
        assert_eq!(
            KafkaErrorCode::InvalidGroupId.group_error_class(),
            Some(GroupErrorClass::Fatal)
        );
        assert_eq!(
            KafkaErrorCode::OffsetOutOfRange.group_error_class(),
            Some(GroupErrorClass::Other)
        );
    }

    #[test]
    fn test_error_display() {
        let display = KafkaErrorCode::UnknownTopicOrPartition.to_string();
        assert!(display.contains('3'));
        assert!(display.contains("UnknownTopicOrPartition"));
        assert!(display.contains("topic or partition"));
    }
}
