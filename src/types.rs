//! Shared value types used across the codec, cluster and consumer modules.

use std::fmt;
use std::sync::Arc;

/// A Kafka broker identifier.
///
/// Brokers discovered through metadata have non-negative ids; bootstrap
/// entries get synthetic negative ids (`-1`, `-2`, ...) until the first
/// successful refresh replaces them.
pub type NodeId = i32;

/// A topic name paired with a partition index.
///
/// The topic is stored as `Arc<str>` so keys can be cloned freely between
/// the metadata snapshot, subscription state and in-flight request bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TopicPartition {
    pub topic: Arc<str>,
    pub partition: i32,
}

impl TopicPartition {
    /// Create a new topic-partition key.
    pub fn new(topic: impl Into<Arc<str>>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }

    /// The topic name.
    #[inline]
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

impl<T: Into<Arc<str>>> From<(T, i32)> for TopicPartition {
    fn from((topic, partition): (T, i32)) -> Self {
        TopicPartition::new(topic, partition)
    }
}

/// A committed offset and the metadata string stored alongside it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OffsetAndMetadata {
    pub offset: i64,
    pub metadata: String,
}

impl OffsetAndMetadata {
    pub fn new(offset: i64, metadata: impl Into<String>) -> Self {
        Self {
            offset,
            metadata: metadata.into(),
        }
    }
}
