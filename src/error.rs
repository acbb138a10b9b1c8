//! Crate & protocol level errors.
//!
//! # Error Taxonomy
//!
//! - **API misuse** ([`Error::IllegalState`]): conflicting subscription modes,
//!   seeking an unassigned partition. Propagated immediately.
//! - **Wire data** ([`Error::ProtocolDecode`], [`Error::UnsupportedVersion`]):
//!   scoped to the single in-flight request whose bytes failed to decode.
//! - **Metadata refresh** ([`Error::MetadataRefresh`]): transient. The refresh
//!   driver retries with a fixed backoff and the stale snapshot is kept.
//! - **Offset reset policy** ([`Error::OffsetResetPolicy`]): fatal for the
//!   affected partition when `auto.offset.reset` is `none`.
//! - **Authorization** ([`Error::UnauthorizedTopic`]): per topic, never fails
//!   a whole metadata refresh.
//!
//! Broker-reported error codes live in [`KafkaCode`].

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use std::{io, result, time::Duration};
use thiserror::Error as ThisError;

use crate::protocol::ApiKey;
use crate::types::TopicPartition;

pub type Result<T> = result::Result<T, Error>;

/// Client core errors.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum Error {
    /// An error in the network.
    #[error("IO error: {0:?}")]
    IoError(io::ErrorKind),

    /// The connection went away before a response arrived.
    #[error("Disconnected from node {0}")]
    Disconnected(i32),

    /// Malformed or truncated wire data.
    #[error("Protocol decode error: {0}")]
    ProtocolDecode(String),

    /// Encoding a request failed its schema check.
    #[error("Protocol encode error: {0}")]
    ProtocolEncode(String),

    /// No schema exists for this (api key, version) pair.
    #[error("Unsupported version {version} for {}", .api_key.as_str())]
    UnsupportedVersion { api_key: ApiKey, version: i16 },

    /// API misuse.
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// A metadata refresh failed. The previous snapshot is retained.
    #[error("Metadata refresh failed: {0}")]
    MetadataRefresh(String),

    /// The partition needs an offset reset but the policy is `none`.
    #[error("Offset out of range for {0} and no reset policy is defined")]
    OffsetResetPolicy(TopicPartition),

    /// The broker reported the topic as unauthorized.
    #[error("Not authorized to access topic '{0}'")]
    UnauthorizedTopic(String),

    /// A rebalance listener callback failed.
    #[error("Rebalance listener failed: {0}")]
    Listener(String),

    /// The broker answered with an error code.
    #[error("Broker error: {0:?}")]
    Broker(KafkaCode),

    /// No buffer space freed up before the deadline.
    #[error("Failed to allocate {requested} bytes within {max_block:?}")]
    BufferExhausted {
        requested: usize,
        max_block: Duration,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the operation that produced this error may be retried after a backoff.
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::IoError(_) | Error::Disconnected(_) | Error::MetadataRefresh(_) => true,
            Error::Broker(code) => code.is_retriable(),
            _ => false,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::IoError(e.kind())
    }
}

/// Various errors reported by a remote Kafka server.
/// See also [Kafka Errors](http://kafka.apache.org/protocol.html)
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, FromPrimitive, Default)]
pub enum KafkaCode {
    /// An unexpected server error
    Unknown = -1,
    #[default]
    None = 0,
    /// The requested offset is outside the range of offsets
    /// maintained by the server for the given topic/partition
    OffsetOutOfRange = 1,
    /// This indicates that a message contents does not match its CRC
    CorruptMessage = 2,
    /// This request is for a topic or partition that does not exist
    /// on this broker.
    UnknownTopicOrPartition = 3,
    /// The message has a negative size
    InvalidMessageSize = 4,
    /// There is currently no leader for this partition and hence it
    /// is unavailable for writes.
    LeaderNotAvailable = 5,
    /// The client's metadata is out of date: the broker is not the
    /// leader for the partition.
    NotLeaderForPartition = 6,
    /// The request exceeded the user-specified time limit.
    RequestTimedOut = 7,
    /// Used mostly by tools when a broker is not alive.
    BrokerNotAvailable = 8,
    /// A replica is expected on a broker, but is not.
    ReplicaNotAvailable = 9,
    /// The produced message exceeds the broker maximum.
    MessageSizeTooLarge = 10,
    /// Internal error code for broker-to-broker communication.
    StaleControllerEpoch = 11,
    /// Offset metadata string exceeds the configured maximum.
    OffsetMetadataTooLarge = 12,
    /// The server disconnected before a response was received.
    NetworkException = 13,
    /// The coordinator is still loading group metadata.
    GroupLoadInProgress = 14,
    /// The offsets topic has not yet been created, or the group
    /// coordinator is not active.
    GroupCoordinatorNotAvailable = 15,
    /// The broker is not the coordinator for this group.
    NotCoordinatorForGroup = 16,
    /// Access to an invalid topic (illegal name, or a write to an
    /// internal topic).
    InvalidTopic = 17,
    /// A message batch exceeds the maximum configured segment size.
    RecordListTooLarge = 18,
    /// Fewer in-sync replicas than the configured minimum.
    NotEnoughReplicas = 19,
    /// Written to the log, but with fewer in-sync replicas than required.
    NotEnoughReplicasAfterAppend = 20,
    /// requiredAcks is anything other than -1, 1, or 0.
    InvalidRequiredAcks = 21,
    /// The generation id provided in the request is not the current generation.
    IllegalGeneration = 22,
    /// The protocol type or set of protocols is incompatible with the group.
    InconsistentGroupProtocol = 23,
    /// The groupId is empty or null.
    InvalidGroupId = 24,
    /// The memberId is not in the current generation.
    UnknownMemberId = 25,
    /// The requested session timeout is outside the broker's allowed range.
    InvalidSessionTimeout = 26,
    /// The coordinator has begun rebalancing the group.
    RebalanceInProgress = 27,
    /// Offset commit rejected because of oversize metadata.
    InvalidCommitOffsetSize = 28,
    /// The client is not authorized to access the requested topic.
    TopicAuthorizationFailed = 29,
    /// The client is not authorized to access a particular groupId.
    GroupAuthorizationFailed = 30,
    /// The client is not authorized to use an inter-broker or administrative API.
    ClusterAuthorizationFailed = 31,
    /// The timestamp of the message is out of acceptable range.
    InvalidTimestamp = 32,
    /// The broker does not support the requested SASL mechanism.
    UnsupportedSaslMechanism = 33,
    /// Request is not valid given the current SASL state.
    IllegalSaslState = 34,
    /// The version of API is not supported.
    UnsupportedVersion = 35,
    /// Topic with this name already exists.
    TopicAlreadyExists = 36,
    /// This is not the correct controller for this cluster.
    NotController = 41,
    /// The message format version on the broker does not support the request.
    UnsupportedForMessageFormat = 43,
    /// The producer attempted to use a sequence number outside the valid range.
    OutOfOrderSequenceNumber = 45,
    /// The producer attempted to assign a sequence number that was already used.
    DuplicateSequenceNumber = 46,
    /// SASL Authentication failed.
    SaslAuthenticationFailed = 58,
}

impl KafkaCode {
    /// Map a wire error code, treating codes outside this table as [`KafkaCode::Unknown`].
    pub fn from_wire(code: i16) -> Self {
        KafkaCode::from_i16(code).unwrap_or(KafkaCode::Unknown)
    }

    /// Whether the failed operation can be retried after refreshing metadata
    /// or backing off.
    pub fn is_retriable(self) -> bool {
        matches!(
            self,
            KafkaCode::CorruptMessage
                | KafkaCode::UnknownTopicOrPartition
                | KafkaCode::LeaderNotAvailable
                | KafkaCode::NotLeaderForPartition
                | KafkaCode::RequestTimedOut
                | KafkaCode::NetworkException
                | KafkaCode::GroupLoadInProgress
                | KafkaCode::GroupCoordinatorNotAvailable
                | KafkaCode::NotCoordinatorForGroup
                | KafkaCode::NotEnoughReplicas
                | KafkaCode::NotEnoughReplicasAfterAppend
                | KafkaCode::NotController
        )
    }

    /// Whether this code means cached metadata is stale and must be refreshed.
    pub fn invalidates_metadata(self) -> bool {
        matches!(
            self,
            KafkaCode::UnknownTopicOrPartition
                | KafkaCode::LeaderNotAvailable
                | KafkaCode::NotLeaderForPartition
        )
    }

    /// `Ok(())` for [`KafkaCode::None`], otherwise [`Error::Broker`].
    pub fn into_result(self) -> Result<()> {
        match self {
            KafkaCode::None => Ok(()),
            code => Err(Error::Broker(code)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_io_error() {
        let err = Error::from(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert_eq!(err, Error::IoError(io::ErrorKind::ConnectionRefused));
        assert!(err.is_retriable());
    }

    #[test]
    fn test_error_display() {
        let err = Error::ProtocolDecode("truncated".to_string());
        let display = format!("{}", err);
        assert!(display.contains("Protocol decode error"));
        assert!(display.contains("truncated"));
    }

    #[test]
    fn test_unsupported_version_display() {
        let err = Error::UnsupportedVersion {
            api_key: ApiKey::Metadata,
            version: 42,
        };
        assert_eq!(err.to_string(), "Unsupported version 42 for Metadata");
    }

    #[test]
    fn test_offset_reset_policy_display() {
        let err = Error::OffsetResetPolicy(TopicPartition::new("orders", 3));
        assert!(err.to_string().contains("orders-3"));
        assert!(!err.is_retriable());
    }

    #[test]
    fn test_error_is_std_error() {
        let err: Box<dyn std::error::Error> = Box::new(Error::IllegalState("test".to_string()));
        assert!(err.to_string().contains("Illegal state"));
    }

    #[test]
    fn test_retriable_classification() {
        assert!(Error::MetadataRefresh("timeout".into()).is_retriable());
        assert!(Error::Broker(KafkaCode::NotLeaderForPartition).is_retriable());
        assert!(!Error::Broker(KafkaCode::TopicAuthorizationFailed).is_retriable());
        assert!(!Error::IllegalState("x".into()).is_retriable());
        assert!(!Error::ProtocolDecode("x".into()).is_retriable());
    }

    #[test]
    fn test_kafka_code_from_primitive() {
        assert_eq!(KafkaCode::from_i16(-1), Some(KafkaCode::Unknown));
        assert_eq!(KafkaCode::from_i16(0), Some(KafkaCode::None));
        assert_eq!(KafkaCode::from_i16(1), Some(KafkaCode::OffsetOutOfRange));
        assert_eq!(
            KafkaCode::from_i16(3),
            Some(KafkaCode::UnknownTopicOrPartition)
        );
        assert_eq!(KafkaCode::from_i16(25), Some(KafkaCode::UnknownMemberId));
        assert_eq!(
            KafkaCode::from_i16(29),
            Some(KafkaCode::TopicAuthorizationFailed)
        );
        assert_eq!(KafkaCode::from_i16(35), Some(KafkaCode::UnsupportedVersion));
    }

    #[test]
    fn test_kafka_code_from_wire_unknown_value() {
        assert_eq!(KafkaCode::from_i16(999), None);
        assert_eq!(KafkaCode::from_wire(999), KafkaCode::Unknown);
        assert_eq!(KafkaCode::from_wire(-100), KafkaCode::Unknown);
    }

    #[test]
    fn test_kafka_code_into_result() {
        assert!(KafkaCode::None.into_result().is_ok());
        assert_eq!(
            KafkaCode::RebalanceInProgress.into_result(),
            Err(Error::Broker(KafkaCode::RebalanceInProgress))
        );
    }

    #[test]
    fn test_kafka_code_invalidates_metadata() {
        assert!(KafkaCode::NotLeaderForPartition.invalidates_metadata());
        assert!(KafkaCode::LeaderNotAvailable.invalidates_metadata());
        assert!(!KafkaCode::OffsetOutOfRange.invalidates_metadata());
    }
}
