//! Immutable cluster topology published by [`ClusterMetadata`](super::ClusterMetadata).
//!
//! A snapshot is built in full from one metadata response and never mutated
//! afterwards. Readers hold an `Arc<ClusterSnapshot>` and every projection
//! below is a pure read: nothing here can trigger a refresh.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::{Error, KafkaCode, Result};
use crate::protocol::MetadataResponse;
use crate::types::{NodeId, TopicPartition};

/// A broker as reported by metadata (or parsed from `bootstrap.servers`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BrokerMetadata {
    pub node_id: NodeId,
    pub host: String,
    pub port: i32,
    pub rack: Option<String>,
}

impl BrokerMetadata {
    pub fn new(node_id: NodeId, host: impl Into<String>, port: i32) -> Self {
        Self {
            node_id,
            host: host.into(),
            port,
            rack: None,
        }
    }

    /// `host:port`, ready to hand to a connector.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// One partition's leadership and replica placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionMetadata {
    pub topic: Arc<str>,
    pub partition: i32,
    /// `None` while a leader election is pending.
    pub leader: Option<NodeId>,
    pub replicas: Vec<NodeId>,
    pub isr: Vec<NodeId>,
    pub offline_replicas: Vec<NodeId>,
    pub error_code: KafkaCode,
}

impl PartitionMetadata {
    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }
}

/// A consistent view of brokers, partitions and topic authorization.
#[derive(Debug, Clone, Default)]
pub struct ClusterSnapshot {
    brokers: HashMap<NodeId, BrokerMetadata>,
    partitions: HashMap<Arc<str>, HashMap<i32, PartitionMetadata>>,
    broker_partitions: HashMap<NodeId, HashSet<TopicPartition>>,
    unauthorized_topics: HashSet<String>,
    internal_topics: HashSet<String>,
    controller: Option<NodeId>,
    cluster_id: Option<String>,
    /// Topics whose leaders are still being elected; the next refresh should come soon.
    leader_pending: bool,
}

impl ClusterSnapshot {
    /// Build a snapshot from a metadata response.
    ///
    /// Fails without producing a partial snapshot when the response has no
    /// brokers or a partition names a leader that is not in the broker list.
    /// Per-topic errors do not fail the build: unauthorized topics are
    /// recorded, other errors are logged and the topic is skipped.
    pub fn from_response(response: &MetadataResponse) -> Result<Self> {
        if response.brokers.is_empty() {
            return Err(Error::MetadataRefresh(
                "no brokers in metadata response".to_string(),
            ));
        }

        let brokers: HashMap<NodeId, BrokerMetadata> = response
            .brokers
            .iter()
            .map(|b| {
                (
                    b.node_id,
                    BrokerMetadata {
                        node_id: b.node_id,
                        host: b.host.clone(),
                        port: b.port,
                        rack: b.rack.clone(),
                    },
                )
            })
            .collect();

        let mut snapshot = ClusterSnapshot {
            brokers,
            controller: (response.controller_id >= 0).then_some(response.controller_id),
            cluster_id: response.cluster_id.clone(),
            ..Default::default()
        };

        for topic in &response.topics {
            if topic.is_internal {
                snapshot.internal_topics.insert(topic.name.clone());
            }
            match topic.error_code {
                KafkaCode::None => {
                    let name: Arc<str> = topic.name.as_str().into();
                    let mut partitions = HashMap::with_capacity(topic.partitions.len());
                    for p in &topic.partitions {
                        let leader = (p.leader >= 0).then_some(p.leader);
                        if let Some(leader) = leader
                            && !snapshot.brokers.contains_key(&leader)
                        {
                            return Err(Error::MetadataRefresh(format!(
                                "partition {}-{} led by unknown broker {}",
                                topic.name, p.partition, leader
                            )));
                        }
                        if leader.is_none() {
                            snapshot.leader_pending = true;
                        }
                        partitions.insert(
                            p.partition,
                            PartitionMetadata {
                                topic: name.clone(),
                                partition: p.partition,
                                leader,
                                replicas: p.replicas.clone(),
                                isr: p.isr.clone(),
                                offline_replicas: p.offline_replicas.clone(),
                                error_code: p.error_code,
                            },
                        );
                    }
                    snapshot.partitions.insert(name, partitions);
                }
                KafkaCode::TopicAuthorizationFailed => {
                    snapshot.unauthorized_topics.insert(topic.name.clone());
                }
                KafkaCode::LeaderNotAvailable => {
                    tracing::warn!(topic = %topic.name, "Topic leader not available yet");
                    snapshot.leader_pending = true;
                }
                code => {
                    tracing::warn!(topic = %topic.name, error = ?code, "Topic metadata error");
                }
            }
        }

        snapshot.index_broker_partitions();
        Ok(snapshot)
    }

    fn index_broker_partitions(&mut self) {
        self.broker_partitions.clear();
        for partitions in self.partitions.values() {
            for p in partitions.values() {
                if let Some(leader) = p.leader {
                    self.broker_partitions
                        .entry(leader)
                        .or_default()
                        .insert(p.topic_partition());
                }
            }
        }
    }

    /// A copy of this snapshot with `new_partitions` replacing (or adding)
    /// the matching entries. The receiver is left untouched.
    pub fn with_partitions(&self, new_partitions: impl IntoIterator<Item = PartitionMetadata>) -> Self {
        let mut derived = self.clone();
        for p in new_partitions {
            derived
                .partitions
                .entry(p.topic.clone())
                .or_default()
                .insert(p.partition, p);
        }
        derived.index_broker_partitions();
        derived
    }

    /// Known brokers.
    pub fn brokers(&self) -> HashSet<BrokerMetadata> {
        self.brokers.values().cloned().collect()
    }

    pub fn broker(&self, node_id: NodeId) -> Option<&BrokerMetadata> {
        self.brokers.get(&node_id)
    }

    pub fn has_brokers(&self) -> bool {
        !self.brokers.is_empty()
    }

    /// Partition ids of a topic; empty for unknown or unauthorized topics.
    pub fn partitions_for_topic(&self, topic: &str) -> HashSet<i32> {
        self.partitions
            .get(topic)
            .map(|partitions| partitions.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Partition ids of a topic whose leader is currently known.
    pub fn available_partitions_for_topic(&self, topic: &str) -> HashSet<i32> {
        self.partitions
            .get(topic)
            .map(|partitions| {
                partitions
                    .values()
                    .filter(|p| p.leader.is_some())
                    .map(|p| p.partition)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Leader of a partition. `None` for unknown partitions or pending elections.
    pub fn leader_for_partition(&self, tp: &TopicPartition) -> Option<NodeId> {
        self.partition_metadata(tp).and_then(|p| p.leader)
    }

    pub fn partition_metadata(&self, tp: &TopicPartition) -> Option<&PartitionMetadata> {
        self.partitions.get(tp.topic())?.get(&tp.partition)
    }

    /// Partitions led by `node_id`.
    pub fn partitions_for_broker(&self, node_id: NodeId) -> HashSet<TopicPartition> {
        self.broker_partitions
            .get(&node_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Authorized topics with partition metadata, optionally without internal topics.
    pub fn topics(&self, exclude_internal_topics: bool) -> HashSet<String> {
        self.partitions
            .keys()
            .filter(|t| !(exclude_internal_topics && self.internal_topics.contains(t.as_ref())))
            .map(|t| t.to_string())
            .collect()
    }

    pub fn unauthorized_topics(&self) -> &HashSet<String> {
        &self.unauthorized_topics
    }

    pub fn internal_topics(&self) -> &HashSet<String> {
        &self.internal_topics
    }

    pub fn controller(&self) -> Option<&BrokerMetadata> {
        self.controller.and_then(|id| self.brokers.get(&id))
    }

    pub fn cluster_id(&self) -> Option<&str> {
        self.cluster_id.as_deref()
    }

    pub(crate) fn leader_pending(&self) -> bool {
        self.leader_pending
    }
}
