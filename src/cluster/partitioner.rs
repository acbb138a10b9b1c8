//! Record to partition routing.
//!
//! Keyed records hash with murmur2 (Kafka seed, sign bit masked) over *all*
//! partitions of the topic, so a key keeps its partition while leaders move.
//! Unkeyed records go to a random partition with a known leader.

use murmur2::{KAFKA_SEED, murmur2};
use rand::seq::SliceRandom;

use super::snapshot::ClusterSnapshot;
use crate::error::{Error, KafkaCode, Result};

/// Kafka's default partitioner.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPartitioner;

impl DefaultPartitioner {
    /// Pick a partition from sorted `all_partitions`, preferring `available`
    /// ones for unkeyed records. Returns `None` when the topic has no partitions.
    pub fn partition(
        &self,
        key: Option<&[u8]>,
        all_partitions: &[i32],
        available: &[i32],
    ) -> Option<i32> {
        if all_partitions.is_empty() {
            return None;
        }
        match key {
            Some(k) => {
                let hash = murmur2(k, KAFKA_SEED) & 0x7fffffff;
                Some(all_partitions[hash as usize % all_partitions.len()])
            }
            None => {
                let mut rng = rand::thread_rng();
                let candidates = if available.is_empty() { all_partitions } else { available };
                candidates.choose(&mut rng).copied()
            }
        }
    }

    /// Route a record for `topic` using `snapshot`.
    ///
    /// An explicit partition must exist in the snapshot.
    pub fn partition_for(
        &self,
        snapshot: &ClusterSnapshot,
        topic: &str,
        key: Option<&[u8]>,
        explicit: Option<i32>,
    ) -> Result<i32> {
        let mut all: Vec<i32> = snapshot.partitions_for_topic(topic).into_iter().collect();
        if all.is_empty() {
            return Err(Error::Broker(KafkaCode::UnknownTopicOrPartition));
        }
        all.sort_unstable();

        if let Some(partition) = explicit {
            return if all.binary_search(&partition).is_ok() {
                Ok(partition)
            } else {
                Err(Error::IllegalState(format!(
                    "partition {} is not a partition of topic '{}'",
                    partition, topic
                )))
            };
        }

        let mut available: Vec<i32> = snapshot
            .available_partitions_for_topic(topic)
            .into_iter()
            .collect();
        available.sort_unstable();

        self.partition(key, &all, &available)
            .ok_or(Error::Broker(KafkaCode::UnknownTopicOrPartition))
    }
}
