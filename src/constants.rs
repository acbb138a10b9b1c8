//! Centralized protocol and configuration constants.
//!
//! # Categories
//!
//! - **Protocol Constants**: Kafka wire protocol sizes and limits
//! - **Client Defaults**: default values for [`ClientConfig`](crate::config::ClientConfig)
//! - **Cluster Constants**: well-known topic names and node id conventions

// =============================================================================
// Protocol Constants (Kafka Wire Protocol)
// =============================================================================

/// Size of the length prefix in front of every request and response frame.
pub const FRAME_SIZE_PREFIX: usize = 4;

/// Maximum frame size accepted from a broker (100 MB).
///
/// A size prefix above this is treated as corrupt framing rather than an
/// allocation request.
pub const MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

/// Maximum number of elements in a protocol array.
///
/// Bounds allocation when a corrupt length prefix is decoded.
pub const MAX_PROTOCOL_ARRAY_SIZE: i32 = 1_000_000;

/// Version of the embedded consumer protocol (member metadata and assignment).
pub const CONSUMER_PROTOCOL_VERSION: i16 = 0;

/// Protocol type advertised by consumers in JoinGroup.
pub const CONSUMER_PROTOCOL_TYPE: &str = "consumer";

/// Replica id sent by clients in ListOffsets (brokers send their own id).
pub const CONSUMER_REPLICA_ID: i32 = -1;

/// ListOffsets timestamp asking for the log end offset.
pub const LATEST_TIMESTAMP: i64 = -1;

/// ListOffsets timestamp asking for the log start offset.
pub const EARLIEST_TIMESTAMP: i64 = -2;

// =============================================================================
// Client Defaults
// =============================================================================

/// Default bootstrap servers.
pub const DEFAULT_BOOTSTRAP_SERVERS: &str = "localhost:9092";

/// Default client id sent in every request header.
pub const DEFAULT_CLIENT_ID: &str = "kafkaesque-client";

/// Default Kafka port used when a bootstrap entry omits one.
pub const DEFAULT_KAFKA_PORT: i32 = 9092;

/// Default `metadata.max.age.ms`: force a refresh after 5 minutes even
/// without observed leadership changes.
pub const DEFAULT_METADATA_MAX_AGE_MS: u64 = 300_000;

/// Default `retry.backoff.ms` between failed metadata refreshes.
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 100;

/// Default `request.timeout.ms`.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 40_000;

// =============================================================================
// Cluster Constants
// =============================================================================

/// Internal topic holding committed consumer offsets.
pub const GROUP_METADATA_TOPIC: &str = "__consumer_offsets";
