//! Rebalance callbacks.

use std::collections::HashSet;

use crate::error::Result;
use crate::types::TopicPartition;

/// User hooks run around a group rebalance.
///
/// Both callbacks run synchronously on the task driving the consumer. Every
/// `on_partitions_revoked` call for the old assignment completes before any
/// `on_partitions_assigned` call for the new one. An error aborts the
/// rebalance step and is returned to the caller; revoked partitions are
/// removed from the assignment regardless.
///
/// [`SubscriptionState::assign_from_subscribed`] calls these while the state
/// is mutably borrowed. A listener that reaches back into a state shared
/// through [`SubscriptionState::into_shared`] (to seek on assignment, say)
/// must be driven by [`SubscriptionState::assign_shared`] instead, which
/// releases the lock around each callback; otherwise it deadlocks.
///
/// [`SubscriptionState::assign_from_subscribed`]: super::SubscriptionState::assign_from_subscribed
/// [`SubscriptionState::into_shared`]: super::SubscriptionState::into_shared
/// [`SubscriptionState::assign_shared`]: super::SubscriptionState::assign_shared
pub trait ConsumerRebalanceListener: Send + Sync {
    /// Called with the partitions leaving this consumer, before the new assignment applies.
    fn on_partitions_revoked(&self, revoked: &HashSet<TopicPartition>) -> Result<()>;

    /// Called with the partitions newly given to this consumer.
    fn on_partitions_assigned(&self, assigned: &HashSet<TopicPartition>) -> Result<()>;
}
