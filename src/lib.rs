//! # Kafkaesque Client
//! Client-side core of a Kafka protocol library.
//!
//! This crate covers the parts of a Kafka client that sit between the
//! socket and the user-facing producer or consumer:
//!
//! - [`protocol`]: a versioned schema codec for the request and response
//!   messages a client sends, with frame splitting and correlation of
//!   in-flight requests.
//! - [`cluster`]: an eventually consistent view of brokers, topics, partition
//!   leaders and group coordinators, refreshed with staleness and backoff control.
//! - [`consumer`]: subscription state and partition ownership across rebalances.
//!
//! Network I/O is abstracted behind the [`Transport`](transport::Transport)
//! trait. [`MockTransport`](mock_transport::MockTransport) answers requests
//! in memory through the real codec.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use kafkaesque_client::prelude::*;
//!
//! # async fn run<T: Transport>(transport: Arc<T>) -> kafkaesque_client::Result<()> {
//! let config = ClientConfig::from_env()?;
//! let metadata = Arc::new(ClusterMetadata::new(&config)?);
//! let client = KafkaClient::new(transport, config.client_id.clone(), config.request_timeout);
//! let refresher = MetadataRefresher::new(metadata.clone(), client);
//!
//! let partitions = refresher.wait_on_metadata("orders", Duration::from_secs(10)).await?;
//!
//! let subscriptions = SubscriptionState::from_config(&config, metadata.clone()).into_shared();
//! subscriptions.lock().subscribe(Subscription::pattern("orders-.*"), None)?;
//! # let _ = partitions;
//! # Ok(())
//! # }
//! ```
//!
//! ## Resources
//! - [Kafka Protocol Spec](https://kafka.apache.org/protocol.html)
//! - [Confluence Docs](https://cwiki.apache.org/confluence/display/KAFKA/A+Guide+To+The+Kafka+Protocol)

#![forbid(unsafe_code)]

mod encode;
pub mod error;
mod parser;
pub mod protocol;
pub mod types;

pub mod buffer_pool;
pub mod cluster;
pub mod config;
pub mod constants;
pub mod consumer;
pub mod mock_transport;
pub mod telemetry;
pub mod transport;

pub use error::{Error, KafkaCode, Result};

pub mod prelude {
    //! Common imports for working with the client core.
    pub use crate::buffer_pool::{BufferPool, PooledBuffer};
    pub use crate::cluster::{
        BrokerMetadata, ClusterListener, ClusterMetadata, ClusterSnapshot, DefaultPartitioner,
        MetadataRefresher, PartitionMetadata,
    };
    pub use crate::config::ClientConfig;
    pub use crate::consumer::{
        ConsumerRebalanceListener, OffsetResetStrategy, Subscription, SubscriptionState,
        TopicPartitionState,
    };
    pub use crate::error::{Error, KafkaCode, Result};
    pub use crate::transport::{KafkaClient, Transport};
    pub use crate::types::{NodeId, OffsetAndMetadata, TopicPartition};

    pub use bytes;
}
