//! The per-client cluster metadata context.
//!
//! [`ClusterMetadata`] owns the current [`ClusterSnapshot`] and all refresh
//! bookkeeping. A successful update builds a complete new snapshot and swaps
//! the `Arc`, so a reader either sees the previous topology or the new one,
//! never a mix.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared, WeakShared};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{Notify, watch};

use super::coordinators::GroupCoordinators;
use super::snapshot::{BrokerMetadata, ClusterSnapshot, PartitionMetadata};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::protocol::{FindCoordinatorResponse, MetadataRequest, MetadataResponse};
use crate::types::{NodeId, TopicPartition};

/// Observer of successful metadata updates.
///
/// Registered as a `Weak` reference: the metadata never keeps a listener alive.
pub trait ClusterListener: Send + Sync {
    fn on_metadata_update(&self, snapshot: &ClusterSnapshot);
}

/// A refresh that concurrent callers await together.
pub(crate) type SharedRefresh = Shared<BoxFuture<'static, Result<()>>>;

/// Outcome of the latest refresh attempt, published on a watch channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateStatus {
    /// Number of successfully applied updates.
    pub version: u64,
    /// Number of failed refresh attempts.
    pub failures: u64,
    /// Error of the most recent attempt, cleared by the next success.
    pub last_error: Option<Error>,
}

#[derive(Debug, Default)]
struct RefreshState {
    need_update: bool,
    need_all_topic_metadata: bool,
    topics: HashSet<String>,
    last_refresh: Option<Instant>,
    last_successful_refresh: Option<Instant>,
}

/// Authoritative, periodically refreshed view of the cluster.
pub struct ClusterMetadata {
    max_age: Duration,
    retry_backoff: Duration,
    full_catalog_for_group_leader: bool,
    bootstrap_brokers: HashMap<NodeId, BrokerMetadata>,
    snapshot: RwLock<Arc<ClusterSnapshot>>,
    state: Mutex<RefreshState>,
    listeners: Mutex<Vec<Weak<dyn ClusterListener>>>,
    coordinators: Mutex<GroupCoordinators>,
    status: watch::Sender<UpdateStatus>,
    wakeup: Notify,
    // Weak so an abandoned refresh is dropped with its last waiter.
    inflight_refresh: Mutex<Option<WeakShared<BoxFuture<'static, Result<()>>>>>,
}

impl std::fmt::Debug for ClusterMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterMetadata")
            .field("max_age", &self.max_age)
            .field("retry_backoff", &self.retry_backoff)
            .field("version", &self.update_version())
            .finish_non_exhaustive()
    }
}

impl ClusterMetadata {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let bootstrap_brokers = config
            .bootstrap_brokers()?
            .into_iter()
            .map(|b| (b.node_id, b))
            .collect();
        let (status, _) = watch::channel(UpdateStatus::default());

        Ok(Self {
            max_age: config.metadata_max_age,
            retry_backoff: config.retry_backoff,
            full_catalog_for_group_leader: config.metadata_full_catalog_for_group_leader,
            bootstrap_brokers,
            snapshot: RwLock::new(Arc::new(ClusterSnapshot::default())),
            state: Mutex::new(RefreshState {
                // Nothing is known before the first refresh.
                need_update: true,
                ..Default::default()
            }),
            listeners: Mutex::new(Vec::new()),
            coordinators: Mutex::new(GroupCoordinators::new(config.metadata_max_age)),
            status,
            wakeup: Notify::new(),
            inflight_refresh: Mutex::new(None),
        })
    }

    // =========================================================================
    // Snapshot reads
    // =========================================================================

    /// The current topology. Holding the `Arc` pins one consistent snapshot.
    pub fn snapshot(&self) -> Arc<ClusterSnapshot> {
        self.snapshot.read().clone()
    }

    /// Known brokers, or the bootstrap brokers until the first successful update.
    pub fn brokers(&self) -> HashSet<BrokerMetadata> {
        let snapshot = self.snapshot();
        if snapshot.has_brokers() {
            snapshot.brokers()
        } else {
            self.bootstrap_brokers.values().cloned().collect()
        }
    }

    /// Look up a broker among metadata brokers, group coordinators and bootstrap entries.
    pub fn broker_metadata(&self, node_id: NodeId) -> Option<BrokerMetadata> {
        if let Some(broker) = self.snapshot().broker(node_id) {
            return Some(broker.clone());
        }
        if let Some(broker) = self.coordinators.lock().broker(node_id) {
            return Some(broker.clone());
        }
        self.bootstrap_brokers.get(&node_id).cloned()
    }

    pub fn bootstrap_brokers(&self) -> Vec<BrokerMetadata> {
        let mut brokers: Vec<_> = self.bootstrap_brokers.values().cloned().collect();
        brokers.sort_by_key(|b| std::cmp::Reverse(b.node_id));
        brokers
    }

    pub fn partitions_for_topic(&self, topic: &str) -> HashSet<i32> {
        self.snapshot().partitions_for_topic(topic)
    }

    pub fn available_partitions_for_topic(&self, topic: &str) -> HashSet<i32> {
        self.snapshot().available_partitions_for_topic(topic)
    }

    pub fn leader_for_partition(&self, tp: &TopicPartition) -> Option<NodeId> {
        self.snapshot().leader_for_partition(tp)
    }

    pub fn partition_metadata(&self, tp: &TopicPartition) -> Option<PartitionMetadata> {
        self.snapshot().partition_metadata(tp).cloned()
    }

    pub fn partitions_for_broker(&self, node_id: NodeId) -> HashSet<TopicPartition> {
        self.snapshot().partitions_for_broker(node_id)
    }

    pub fn topics(&self, exclude_internal_topics: bool) -> HashSet<String> {
        self.snapshot().topics(exclude_internal_topics)
    }

    pub fn unauthorized_topics(&self) -> HashSet<String> {
        self.snapshot().unauthorized_topics().clone()
    }

    pub fn internal_topics(&self) -> HashSet<String> {
        self.snapshot().internal_topics().clone()
    }

    pub fn controller(&self) -> Option<BrokerMetadata> {
        self.snapshot().controller().cloned()
    }

    pub fn cluster_id(&self) -> Option<String> {
        self.snapshot().cluster_id().map(str::to_string)
    }

    /// A derived snapshot with `new_partitions` applied. The shared snapshot is unchanged.
    pub fn with_partitions(
        &self,
        new_partitions: impl IntoIterator<Item = PartitionMetadata>,
    ) -> ClusterSnapshot {
        self.snapshot().with_partitions(new_partitions)
    }

    // =========================================================================
    // Staleness and backoff
    // =========================================================================

    /// Time until the snapshot should be refreshed. Zero means refresh now.
    pub fn ttl(&self) -> Duration {
        self.ttl_at(Instant::now())
    }

    /// [`ttl`](Self::ttl) evaluated at `now`.
    ///
    /// The result is never shorter than what remains of the retry backoff
    /// since the last attempt, successful or not.
    pub fn ttl_at(&self, now: Instant) -> Duration {
        let state = self.state.lock();

        let ttl = match state.last_successful_refresh {
            _ if state.need_update => Duration::ZERO,
            None => Duration::ZERO,
            Some(at) => self.max_age.saturating_sub(now.saturating_duration_since(at)),
        };
        let backoff = state
            .last_refresh
            .map(|at| self.retry_backoff.saturating_sub(now.saturating_duration_since(at)))
            .unwrap_or(Duration::ZERO);

        ttl.max(backoff)
    }

    /// Fixed delay between refresh attempts after a failure.
    pub fn refresh_backoff(&self) -> Duration {
        self.retry_backoff
    }

    pub fn metadata_max_age(&self) -> Duration {
        self.max_age
    }

    pub fn last_successful_refresh(&self) -> Option<Instant> {
        self.state.lock().last_successful_refresh
    }

    // =========================================================================
    // Update control
    // =========================================================================

    /// Flag that the snapshot is stale. Returns the current update version;
    /// the refresh is done once [`update_version`](Self::update_version) exceeds it.
    pub fn request_update(&self) -> u64 {
        self.state.lock().need_update = true;
        self.wakeup.notify_one();
        self.update_version()
    }

    /// Resolves after the next update request (immediately if one is pending
    /// since the last wait).
    pub async fn update_requested(&self) {
        self.wakeup.notified().await
    }

    pub fn need_update(&self) -> bool {
        self.state.lock().need_update
    }

    pub fn need_all_topic_metadata(&self) -> bool {
        self.state.lock().need_all_topic_metadata
    }

    /// Switch between refreshing only topics of interest and the full catalog.
    pub fn set_need_all_topic_metadata(&self, need_all: bool) {
        let mut state = self.state.lock();
        if state.need_all_topic_metadata != need_all {
            tracing::debug!(need_all, "Full topic catalog refresh toggled");
            state.need_all_topic_metadata = need_all;
            if need_all {
                state.need_update = true;
                self.wakeup.notify_one();
            }
        }
    }

    /// Whether a group leader should refresh the full catalog.
    pub fn full_catalog_for_group_leader(&self) -> bool {
        self.full_catalog_for_group_leader
    }

    /// Replace the topics of interest. Requests an update when the set changes.
    pub fn set_topics(&self, topics: impl IntoIterator<Item = impl Into<String>>) -> u64 {
        let topics: HashSet<String> = topics.into_iter().map(Into::into).collect();
        let known = self.snapshot();
        let mut state = self.state.lock();
        if state.topics != topics {
            if topics.iter().any(|t| known.partitions_for_topic(t).is_empty()) {
                state.need_update = true;
                self.wakeup.notify_one();
            }
            state.topics = topics;
        }
        drop(state);
        self.update_version()
    }

    /// Add one topic of interest. Requests an update when it has no known partitions.
    pub fn add_topic(&self, topic: impl Into<String>) -> u64 {
        let topic = topic.into();
        let known = self.snapshot().partitions_for_topic(&topic);
        let mut state = self.state.lock();
        if known.is_empty() {
            state.need_update = true;
            self.wakeup.notify_one();
        }
        state.topics.insert(topic);
        drop(state);
        self.update_version()
    }

    pub fn topics_of_interest(&self) -> HashSet<String> {
        self.state.lock().topics.clone()
    }

    /// The request the next refresh should send.
    pub fn metadata_request(&self, version: i16) -> MetadataRequest {
        let state = self.state.lock();
        if state.need_all_topic_metadata {
            MetadataRequest::all_topics(version)
        } else {
            let mut topics: Vec<_> = state.topics.iter().cloned().collect();
            topics.sort();
            MetadataRequest::for_topics(version, topics)
        }
    }

    /// Apply a metadata response.
    ///
    /// Either the whole response is published as a new snapshot or, when it
    /// is malformed, the previous snapshot stays and the attempt counts as a
    /// failure. Listeners run after the swap, outside every internal lock.
    pub fn update_metadata(&self, response: &MetadataResponse) -> Result<()> {
        let snapshot = match ClusterSnapshot::from_response(response) {
            Ok(snapshot) => Arc::new(snapshot),
            Err(e) => {
                self.failed_update(e.clone());
                return Err(e);
            }
        };

        let now = Instant::now();
        *self.snapshot.write() = snapshot.clone();
        {
            let mut state = self.state.lock();
            // A pending leader election warrants another refresh soon.
            state.need_update = snapshot.leader_pending();
            state.last_refresh = Some(now);
            state.last_successful_refresh = Some(now);
        }
        let mut version = 0;
        self.status.send_modify(|status| {
            status.version += 1;
            status.last_error = None;
            version = status.version;
        });

        tracing::debug!(
            version,
            brokers = response.brokers.len(),
            topics = snapshot.topics(false).len(),
            unauthorized = snapshot.unauthorized_topics().len(),
            "Cluster metadata updated"
        );

        self.notify_listeners(&snapshot);
        Ok(())
    }

    /// The refresh in flight for this metadata, or a new one built by `start`.
    ///
    /// Every caller over the same `ClusterMetadata` joins one future, so at
    /// most one Metadata request is outstanding whichever refresher sent it.
    pub(crate) fn join_refresh(
        &self,
        start: impl FnOnce() -> BoxFuture<'static, Result<()>>,
    ) -> SharedRefresh {
        let mut inflight = self.inflight_refresh.lock();
        if let Some(refresh) = inflight.as_ref().and_then(WeakShared::upgrade) {
            return refresh;
        }
        let refresh = start().shared();
        *inflight = refresh.downgrade();
        refresh
    }

    /// Called by a refresh future when it completes.
    pub(crate) fn refresh_settled(&self) {
        *self.inflight_refresh.lock() = None;
    }

    /// Record a failed refresh attempt. The current snapshot is kept.
    pub fn failed_update(&self, error: Error) {
        self.state.lock().last_refresh = Some(Instant::now());
        tracing::warn!(error = %error, "Metadata refresh failed");
        self.status.send_modify(|status| {
            status.failures += 1;
            status.last_error = Some(error);
        });
    }

    /// Number of successfully applied updates.
    pub fn update_version(&self) -> u64 {
        self.status.borrow().version
    }

    /// Watch refresh outcomes.
    pub fn subscribe_updates(&self) -> watch::Receiver<UpdateStatus> {
        self.status.subscribe()
    }

    // =========================================================================
    // Listeners
    // =========================================================================

    pub fn add_listener(&self, listener: Weak<dyn ClusterListener>) {
        self.listeners.lock().push(listener);
    }

    /// Unregister a listener. Returns whether it was registered.
    pub fn remove_listener(&self, listener: &Weak<dyn ClusterListener>) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|l| !Weak::ptr_eq(l, listener));
        listeners.len() != before
    }

    fn notify_listeners(&self, snapshot: &ClusterSnapshot) {
        let live: Vec<Arc<dyn ClusterListener>> = {
            let mut listeners = self.listeners.lock();
            listeners.retain(|l| l.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in live {
            listener.on_metadata_update(snapshot);
        }
    }

    // =========================================================================
    // Group coordinators
    // =========================================================================

    /// Register the coordinator from a FindCoordinator response.
    pub fn add_group_coordinator(
        &self,
        group: &str,
        response: &FindCoordinatorResponse,
    ) -> Result<NodeId> {
        self.coordinators.lock().add(group, response, Instant::now())
    }

    /// Coordinator for `group`, unless unknown, expired or marked dead.
    pub fn coordinator_for_group(&self, group: &str) -> Option<NodeId> {
        self.coordinators.lock().get(group, Instant::now())
    }

    /// Forget the coordinator of `group`, e.g. after `NotCoordinatorForGroup`.
    pub fn mark_coordinator_dead(&self, group: &str) {
        if self.coordinators.lock().remove(group) {
            tracing::debug!(group, "Group coordinator marked dead");
        }
    }
}
