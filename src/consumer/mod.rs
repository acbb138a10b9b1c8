//! Consumer-side partition ownership.
//!
//! [`SubscriptionState`] records what a consumer subscribed to, which
//! partitions it currently owns and, per partition, a [`TopicPartitionState`]
//! with the fetch position, committed offset and reset policy. Rebalances
//! are announced through a [`ConsumerRebalanceListener`].

mod listener;
mod partition_state;
mod subscription;

pub use listener::ConsumerRebalanceListener;
pub use partition_state::{OffsetResetStrategy, TopicPartitionState};
pub use subscription::{Subscription, SubscriptionState};
