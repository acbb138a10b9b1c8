//! Cluster topology tracking.
//!
//! # Architecture
//!
//! ```text
//!   SubscriptionState ──set_topics / need_all──► ClusterMetadata ◄── MetadataRefresher ──► Transport
//!          ▲                                         │   (Arc<ClusterSnapshot>, swapped per update)
//!          └──────── on_metadata_update (Weak) ──────┘
//! ```
//!
//! - [`ClusterMetadata`]: the shared per-client context. Readers take an
//!   `Arc<ClusterSnapshot>`; only `update_metadata` publishes a new one.
//! - [`MetadataRefresher`]: sends Metadata requests through a transport,
//!   deduplicating concurrent refreshes onto one shared future.
//! - [`DefaultPartitioner`]: murmur2 record routing over a snapshot.

mod coordinators;
mod metadata;
mod partitioner;
mod refresh;
pub mod retry;
mod snapshot;

pub use metadata::{ClusterListener, ClusterMetadata, UpdateStatus};
pub use partitioner::DefaultPartitioner;
pub use refresh::MetadataRefresher;
pub use snapshot::{BrokerMetadata, ClusterSnapshot, PartitionMetadata};
