//! Consumer subscription and partition ownership.
//!
//! # State machine
//!
//! ```text
//!   Unsubscribed ──subscribe(Topics|Pattern)──► AutoTopics / AutoPattern ──assign_from_subscribed──► assigned
//!        │                                                                                              │
//!        └──────────────assign_from_user─────────────► UserAssigned                   pause / resume ◄─┘
//! ```
//!
//! Group-managed subscription and manual assignment are mutually exclusive:
//! switching between them requires [`SubscriptionState::unsubscribe`]. Topic
//! and pattern subscriptions replace each other freely.
//!
//! # Rebalance callbacks
//!
//! [`SubscriptionState::assign_from_subscribed`] computes the revoked and newly
//! assigned partitions, calls `on_partitions_revoked` first, drops the
//! revoked partitions whatever the callback returned, and only then adds and
//! announces the new ones. Partitions kept across the rebalance keep their
//! [`TopicPartitionState`] untouched.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use regex::Regex;

use super::listener::ConsumerRebalanceListener;
use super::partition_state::{OffsetResetStrategy, TopicPartitionState};
use crate::cluster::{ClusterListener, ClusterMetadata, ClusterSnapshot};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::types::{OffsetAndMetadata, TopicPartition};

/// What a consumer subscribes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subscription {
    /// A fixed set of topic names.
    Topics(HashSet<String>),
    /// A regular expression that must match a whole topic name.
    Pattern(String),
}

impl Subscription {
    pub fn topics(topics: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Subscription::Topics(topics.into_iter().map(Into::into).collect())
    }

    pub fn pattern(pattern: impl Into<String>) -> Self {
        Subscription::Pattern(pattern.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubscriptionType {
    None,
    AutoTopics,
    AutoPattern,
    UserAssigned,
}

/// Subscribed topics or pattern, assigned partitions and their consumption state.
pub struct SubscriptionState {
    default_reset: OffsetResetStrategy,
    exclude_internal_topics: bool,
    metadata: Arc<ClusterMetadata>,
    subscription_type: SubscriptionType,
    subscription: Option<HashSet<String>>,
    subscribed_pattern: Option<Regex>,
    group_subscription: HashSet<String>,
    group_leader: bool,
    assignment: HashMap<TopicPartition, TopicPartitionState>,
    listener: Option<Arc<dyn ConsumerRebalanceListener>>,
    partition_counts: HashMap<String, usize>,
    needs_rejoin: bool,
}

impl std::fmt::Debug for SubscriptionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionState")
            .field("subscription_type", &self.subscription_type)
            .field("subscription", &self.subscription)
            .field("subscribed_pattern", &self.subscribed_pattern().map(str::to_string))
            .field("assignment", &self.assignment)
            .field("needs_rejoin", &self.needs_rejoin)
            .finish_non_exhaustive()
    }
}

impl SubscriptionState {
    pub fn new(default_reset: OffsetResetStrategy, metadata: Arc<ClusterMetadata>) -> Self {
        Self {
            default_reset,
            exclude_internal_topics: true,
            metadata,
            subscription_type: SubscriptionType::None,
            subscription: None,
            subscribed_pattern: None,
            group_subscription: HashSet::new(),
            group_leader: false,
            assignment: HashMap::new(),
            listener: None,
            partition_counts: HashMap::new(),
            needs_rejoin: false,
        }
    }

    /// Build from `auto.offset.reset` and `exclude.internal.topics`.
    pub fn from_config(config: &ClientConfig, metadata: Arc<ClusterMetadata>) -> Self {
        let mut state = Self::new(config.auto_offset_reset, metadata);
        state.exclude_internal_topics = config.exclude_internal_topics;
        state
    }

    /// Wrap in a mutex and register it for metadata updates, so pattern
    /// subscriptions follow the topics appearing in the cluster.
    pub fn into_shared(self) -> Arc<Mutex<SubscriptionState>> {
        let metadata = self.metadata.clone();
        let shared = Arc::new(Mutex::new(self));
        let listener: Arc<dyn ClusterListener> = shared.clone();
        metadata.add_listener(Arc::downgrade(&listener));
        shared
    }

    // =========================================================================
    // Subscription
    // =========================================================================

    /// Subscribe to topics or a pattern, replacing the other mode.
    ///
    /// Fails with [`Error::IllegalState`] while partitions are manually assigned.
    pub fn subscribe(
        &mut self,
        subscription: Subscription,
        listener: Option<Arc<dyn ConsumerRebalanceListener>>,
    ) -> Result<()> {
        if self.subscription_type == SubscriptionType::UserAssigned {
            return Err(Error::IllegalState(
                "subscription to topics or a pattern is exclusive with manual assignment".to_string(),
            ));
        }

        match subscription {
            Subscription::Topics(topics) => {
                if topics.is_empty() {
                    self.unsubscribe();
                    return Ok(());
                }
                if let Some(topic) = topics.iter().find(|t| t.trim().is_empty()) {
                    return Err(Error::IllegalState(format!("invalid topic name '{}'", topic)));
                }
                tracing::debug!(topics = ?topics, "Subscribed to topics");
                self.subscription_type = SubscriptionType::AutoTopics;
                self.subscribed_pattern = None;
                self.listener = listener;
                self.change_subscription(topics)?;
                self.metadata.request_update();
            }
            Subscription::Pattern(pattern) => {
                let regex = Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| {
                    Error::IllegalState(format!("invalid subscription pattern '{}': {}", pattern, e))
                })?;
                tracing::debug!(pattern = %pattern, "Subscribed to pattern");
                self.subscription_type = SubscriptionType::AutoPattern;
                self.subscription = None;
                self.subscribed_pattern = Some(regex);
                self.listener = listener;
                self.needs_rejoin = true;
                self.sync_metadata_interest();
                self.metadata.request_update();
            }
        }
        Ok(())
    }

    /// Replace the subscribed topics, keeping the listener and group state.
    pub fn change_subscription(&mut self, topics: HashSet<String>) -> Result<()> {
        if !self.partitions_auto_assigned() {
            return Err(Error::IllegalState(
                "subscription can only change for group-managed consumers".to_string(),
            ));
        }
        self.replace_subscription(topics);
        Ok(())
    }

    fn replace_subscription(&mut self, topics: HashSet<String>) {
        if self.subscription.as_ref() != Some(&topics) {
            self.group_subscription.extend(topics.iter().cloned());
            self.subscription = Some(topics);
            self.needs_rejoin = true;
        }
        self.sync_metadata_interest();
    }

    /// Add topics other members subscribed to. Called by the group leader.
    pub fn group_subscribe(&mut self, topics: impl IntoIterator<Item = impl Into<String>>) -> Result<()> {
        if !self.partitions_auto_assigned() {
            return Err(Error::IllegalState(
                "group subscription requires a group-managed consumer".to_string(),
            ));
        }
        self.group_subscription.extend(topics.into_iter().map(Into::into));
        self.group_leader = true;
        self.sync_metadata_interest();
        Ok(())
    }

    /// Shrink the group subscription back to this member's own subscription.
    pub fn reset_group_subscription(&mut self) {
        match &self.subscription {
            Some(own) => self.group_subscription.retain(|t| own.contains(t)),
            None => self.group_subscription.clear(),
        }
        self.group_leader = false;
        self.sync_metadata_interest();
    }

    /// Drop every subscription, assignment and listener. Idempotent.
    pub fn unsubscribe(&mut self) {
        if self.subscription_type != SubscriptionType::None {
            tracing::debug!(assigned = self.assignment.len(), "Unsubscribed");
        }
        self.subscription_type = SubscriptionType::None;
        self.subscription = None;
        self.subscribed_pattern = None;
        self.group_subscription.clear();
        self.group_leader = false;
        self.assignment.clear();
        self.listener = None;
        self.partition_counts.clear();
        self.needs_rejoin = false;
        self.sync_metadata_interest();
    }

    fn sync_metadata_interest(&self) {
        let mut topics: HashSet<String> = self.group_subscription.clone();
        if let Some(subscription) = &self.subscription {
            topics.extend(subscription.iter().cloned());
        }
        if self.subscription_type == SubscriptionType::UserAssigned {
            topics.extend(self.assignment.keys().map(|tp| tp.topic().to_string()));
        }
        self.metadata.set_topics(topics);

        let need_all = self.subscribed_pattern.is_some()
            || (self.group_leader && self.metadata.full_catalog_for_group_leader());
        self.metadata.set_need_all_topic_metadata(need_all);
    }

    // =========================================================================
    // Assignment
    // =========================================================================

    /// Manually assign partitions, without group coordination.
    ///
    /// Partitions already assigned keep their state; others start unpositioned.
    pub fn assign_from_user(&mut self, partitions: impl IntoIterator<Item = TopicPartition>) -> Result<()> {
        if matches!(
            self.subscription_type,
            SubscriptionType::AutoTopics | SubscriptionType::AutoPattern
        ) {
            return Err(Error::IllegalState(
                "manual assignment is exclusive with subscription to topics or a pattern".to_string(),
            ));
        }

        let partitions: HashSet<TopicPartition> = partitions.into_iter().collect();
        if partitions.is_empty() {
            self.unsubscribe();
            return Ok(());
        }

        self.subscription_type = SubscriptionType::UserAssigned;
        self.replace_assignment(&partitions);
        tracing::debug!(partitions = partitions.len(), "Partitions assigned by user");
        self.sync_metadata_interest();
        Ok(())
    }

    /// Apply the assignment received at the end of a rebalance.
    ///
    /// Revoked partitions are announced and dropped before new ones are added
    /// and announced. A listener error is returned after that bookkeeping; when
    /// the revoke callback fails the new partitions are not added and the
    /// member must rejoin.
    ///
    /// Callbacks run while `self` is borrowed. For a state shared through
    /// [`into_shared`](Self::into_shared) use
    /// [`assign_shared`](Self::assign_shared), which releases the lock around them.
    pub fn assign_from_subscribed(&mut self, assignments: impl IntoIterator<Item = TopicPartition>) -> Result<()> {
        let plan = self.plan_assignment(assignments)?;
        let listener = self.listener.clone();
        let revoke_result = notify_revoked(listener.as_deref(), &plan.revoked);
        self.apply_assignment(&plan, revoke_result)?;
        notify_assigned(listener.as_deref(), &plan.added)
    }

    /// [`assign_from_subscribed`](Self::assign_from_subscribed) on a shared
    /// state, invoking the rebalance callbacks with the lock released so they
    /// may seek or pause through the same handle.
    pub fn assign_shared(
        shared: &Mutex<SubscriptionState>,
        assignments: impl IntoIterator<Item = TopicPartition>,
    ) -> Result<()> {
        let (plan, listener) = {
            let state = shared.lock();
            (state.plan_assignment(assignments)?, state.listener.clone())
        };
        let revoke_result = notify_revoked(listener.as_deref(), &plan.revoked);
        shared.lock().apply_assignment(&plan, revoke_result)?;
        notify_assigned(listener.as_deref(), &plan.added)
    }

    fn plan_assignment(&self, assignments: impl IntoIterator<Item = TopicPartition>) -> Result<AssignmentPlan> {
        if !self.partitions_auto_assigned() {
            return Err(Error::IllegalState(
                "assignment from the group requires a topic or pattern subscription".to_string(),
            ));
        }

        let assignments: HashSet<TopicPartition> = assignments.into_iter().collect();
        if let Some(tp) = assignments.iter().find(|tp| !self.in_subscription_scope(tp.topic())) {
            return Err(Error::IllegalState(format!(
                "assigned partition {} is outside the subscription",
                tp
            )));
        }

        let revoked = self
            .assignment
            .keys()
            .filter(|tp| !assignments.contains(*tp))
            .cloned()
            .collect();
        let added = assignments
            .iter()
            .filter(|tp| !self.assignment.contains_key(*tp))
            .cloned()
            .collect();
        Ok(AssignmentPlan { revoked, added })
    }

    fn apply_assignment(&mut self, plan: &AssignmentPlan, revoke_result: Result<()>) -> Result<()> {
        // Ownership of revoked partitions has moved regardless of the callback.
        for tp in &plan.revoked {
            self.assignment.remove(tp);
        }
        if let Err(e) = revoke_result {
            tracing::error!(revoked = plan.revoked.len(), error = %e, "on_partitions_revoked failed");
            self.needs_rejoin = true;
            return Err(listener_error(e));
        }

        for tp in &plan.added {
            self.assignment.entry(tp.clone()).or_insert_with(TopicPartitionState::new);
        }
        self.needs_rejoin = false;
        tracing::debug!(
            revoked = plan.revoked.len(),
            added = plan.added.len(),
            assigned = self.assignment.len(),
            "Group assignment applied"
        );
        Ok(())
    }

    fn in_subscription_scope(&self, topic: &str) -> bool {
        self.subscription.as_ref().is_some_and(|s| s.contains(topic))
            || self.group_subscription.contains(topic)
            || self.subscribed_pattern.as_ref().is_some_and(|p| p.is_match(topic))
    }

    fn replace_assignment(&mut self, partitions: &HashSet<TopicPartition>) {
        self.assignment.retain(|tp, _| partitions.contains(tp));
        for tp in partitions {
            self.assignment.entry(tp.clone()).or_default();
        }
    }

    // =========================================================================
    // Per-partition state
    // =========================================================================

    fn state(&self, tp: &TopicPartition) -> Result<&TopicPartitionState> {
        self.assignment
            .get(tp)
            .ok_or_else(|| Error::IllegalState(format!("partition {} is not assigned", tp)))
    }

    fn state_mut(&mut self, tp: &TopicPartition) -> Result<&mut TopicPartitionState> {
        self.assignment
            .get_mut(tp)
            .ok_or_else(|| Error::IllegalState(format!("partition {} is not assigned", tp)))
    }

    /// Set the next offset to fetch, clearing any pending reset.
    pub fn seek(&mut self, tp: &TopicPartition, offset: i64) -> Result<()> {
        self.state_mut(tp)?.seek(offset);
        tracing::debug!(partition = %tp, offset, "Seek");
        Ok(())
    }

    pub fn pause(&mut self, tp: &TopicPartition) -> Result<()> {
        self.state_mut(tp)?.pause();
        Ok(())
    }

    pub fn resume(&mut self, tp: &TopicPartition) -> Result<()> {
        self.state_mut(tp)?.resume();
        Ok(())
    }

    /// Assigned, not paused and positioned.
    pub fn is_fetchable(&self, tp: &TopicPartition) -> bool {
        self.assignment.get(tp).is_some_and(TopicPartitionState::is_fetchable)
    }

    pub fn is_assigned(&self, tp: &TopicPartition) -> bool {
        self.assignment.contains_key(tp)
    }

    pub fn is_paused(&self, tp: &TopicPartition) -> bool {
        self.assignment.get(tp).is_some_and(TopicPartitionState::is_paused)
    }

    /// Mark `tp` for an offset reset with `strategy`, or the default policy.
    ///
    /// With policy `None` the partition is left unchanged and
    /// [`Error::OffsetResetPolicy`] is returned for the caller to surface.
    pub fn need_offset_reset(
        &mut self,
        tp: &TopicPartition,
        strategy: Option<OffsetResetStrategy>,
    ) -> Result<()> {
        let strategy = strategy.unwrap_or(self.default_reset);
        let state = self.state_mut(tp)?;
        if strategy == OffsetResetStrategy::None {
            return Err(Error::OffsetResetPolicy(tp.clone()));
        }
        state.await_reset(strategy);
        tracing::debug!(partition = %tp, strategy = %strategy, "Offset reset requested");
        Ok(())
    }

    pub fn has_default_offset_reset_policy(&self) -> bool {
        self.default_reset != OffsetResetStrategy::None
    }

    pub fn default_reset_strategy(&self) -> OffsetResetStrategy {
        self.default_reset
    }

    pub fn reset_strategy(&self, tp: &TopicPartition) -> Option<OffsetResetStrategy> {
        self.assignment.get(tp).and_then(TopicPartitionState::reset_strategy)
    }

    /// Whether every assigned partition has a valid position.
    pub fn has_all_fetch_positions(&self) -> bool {
        self.assignment.values().all(TopicPartitionState::has_valid_position)
    }

    /// Assigned partitions without a valid position.
    pub fn missing_fetch_positions(&self) -> HashSet<TopicPartition> {
        self.collect_partitions(|state| !state.has_valid_position())
    }

    /// Assigned partitions waiting for an offset lookup.
    pub fn partitions_needing_reset(&self) -> HashSet<TopicPartition> {
        self.collect_partitions(TopicPartitionState::awaiting_reset)
    }

    pub fn position(&self, tp: &TopicPartition) -> Result<Option<i64>> {
        Ok(self.state(tp)?.position())
    }

    /// Advance the position of a positioned partition after consuming records.
    pub fn set_position(&mut self, tp: &TopicPartition, offset: i64) -> Result<()> {
        self.state_mut(tp)?.set_position(offset)
    }

    /// Record the committed offset of `tp`.
    pub fn committed(&mut self, tp: &TopicPartition, committed: OffsetAndMetadata) -> Result<()> {
        self.state_mut(tp)?.set_committed(committed);
        Ok(())
    }

    pub fn committed_offset(&self, tp: &TopicPartition) -> Option<&OffsetAndMetadata> {
        self.assignment.get(tp).and_then(TopicPartitionState::committed)
    }

    pub fn update_highwater(&mut self, tp: &TopicPartition, highwater: i64) -> Result<()> {
        self.state_mut(tp)?.set_highwater(highwater);
        Ok(())
    }

    pub fn highwater(&self, tp: &TopicPartition) -> Option<i64> {
        self.assignment.get(tp).and_then(TopicPartitionState::highwater)
    }

    pub fn partition_state(&self, tp: &TopicPartition) -> Option<&TopicPartitionState> {
        self.assignment.get(tp)
    }

    fn collect_partitions(&self, predicate: impl Fn(&TopicPartitionState) -> bool) -> HashSet<TopicPartition> {
        self.assignment
            .iter()
            .filter(|(_, state)| predicate(state))
            .map(|(tp, _)| tp.clone())
            .collect()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn subscription(&self) -> Option<&HashSet<String>> {
        self.subscription.as_ref()
    }

    /// The pattern as given to [`subscribe`](Self::subscribe).
    pub fn subscribed_pattern(&self) -> Option<&str> {
        self.subscribed_pattern.as_ref().map(|p| {
            let anchored = p.as_str();
            anchored
                .strip_prefix("^(?:")
                .and_then(|s| s.strip_suffix(")$"))
                .unwrap_or(anchored)
        })
    }

    pub fn group_subscription(&self) -> &HashSet<String> {
        &self.group_subscription
    }

    pub fn assigned_partitions(&self) -> HashSet<TopicPartition> {
        self.assignment.keys().cloned().collect()
    }

    pub fn paused_partitions(&self) -> HashSet<TopicPartition> {
        self.collect_partitions(TopicPartitionState::is_paused)
    }

    pub fn fetchable_partitions(&self) -> HashSet<TopicPartition> {
        self.collect_partitions(TopicPartitionState::is_fetchable)
    }

    /// Whether partitions come from the group coordinator.
    pub fn partitions_auto_assigned(&self) -> bool {
        matches!(
            self.subscription_type,
            SubscriptionType::AutoTopics | SubscriptionType::AutoPattern
        )
    }

    /// Whether the subscription or topic layout changed since the last group assignment.
    pub fn needs_rejoin(&self) -> bool {
        self.needs_rejoin
    }

    pub fn listener(&self) -> Option<&Arc<dyn ConsumerRebalanceListener>> {
        self.listener.as_ref()
    }

    // =========================================================================
    // Metadata updates
    // =========================================================================

    /// Reconcile with a new cluster snapshot.
    ///
    /// A pattern subscription becomes the matching authorized topics. A
    /// change in the partition count of a subscribed topic flags a rejoin.
    pub fn on_metadata_update(&mut self, snapshot: &ClusterSnapshot) {
        if !self.partitions_auto_assigned() {
            return;
        }

        if let Some(pattern) = &self.subscribed_pattern {
            let matched: HashSet<String> = snapshot
                .topics(self.exclude_internal_topics)
                .into_iter()
                .filter(|t| pattern.is_match(t))
                .collect();
            if self.subscription.as_ref() != Some(&matched) {
                tracing::debug!(pattern = %pattern, topics = ?matched, "Pattern subscription updated");
                self.replace_subscription(matched);
            }
        }

        let mut counts = HashMap::new();
        let scope = self.subscription.iter().flatten().chain(self.group_subscription.iter());
        for topic in scope {
            let partitions = snapshot.partitions_for_topic(topic).len();
            if partitions > 0 {
                counts.insert(topic.clone(), partitions);
            }
        }
        if counts != self.partition_counts {
            tracing::debug!(topics = counts.len(), "Subscribed topic layout changed");
            self.partition_counts = counts;
            self.needs_rejoin = true;
        }
    }
}

/// Partitions leaving and joining this consumer in one rebalance.
struct AssignmentPlan {
    revoked: HashSet<TopicPartition>,
    added: HashSet<TopicPartition>,
}

fn notify_revoked(
    listener: Option<&dyn ConsumerRebalanceListener>,
    revoked: &HashSet<TopicPartition>,
) -> Result<()> {
    match listener {
        Some(listener) if !revoked.is_empty() => listener.on_partitions_revoked(revoked),
        _ => Ok(()),
    }
}

fn notify_assigned(
    listener: Option<&dyn ConsumerRebalanceListener>,
    added: &HashSet<TopicPartition>,
) -> Result<()> {
    if let Some(listener) = listener
        && !added.is_empty()
        && let Err(e) = listener.on_partitions_assigned(added)
    {
        tracing::error!(assigned = added.len(), error = %e, "on_partitions_assigned failed");
        return Err(listener_error(e));
    }
    Ok(())
}

fn listener_error(e: Error) -> Error {
    match e {
        Error::Listener(_) => e,
        other => Error::Listener(other.to_string()),
    }
}

impl ClusterListener for Mutex<SubscriptionState> {
    fn on_metadata_update(&self, snapshot: &ClusterSnapshot) {
        self.lock().on_metadata_update(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> Arc<ClusterMetadata> {
        Arc::new(ClusterMetadata::new(&ClientConfig::default()).unwrap())
    }

    fn state() -> SubscriptionState {
        SubscriptionState::new(OffsetResetStrategy::Latest, metadata())
    }

    fn tp(topic: &str, partition: i32) -> TopicPartition {
        TopicPartition::new(topic, partition)
    }

    #[derive(Default)]
    struct RecordingListener {
        events: Mutex<Vec<(&'static str, HashSet<TopicPartition>)>>,
        fail_revoke: bool,
        fail_assign: bool,
    }

    impl ConsumerRebalanceListener for RecordingListener {
        fn on_partitions_revoked(&self, revoked: &HashSet<TopicPartition>) -> Result<()> {
            self.events.lock().push(("revoked", revoked.clone()));
            if self.fail_revoke {
                return Err(Error::Listener("revoke failed".to_string()));
            }
            Ok(())
        }

        fn on_partitions_assigned(&self, assigned: &HashSet<TopicPartition>) -> Result<()> {
            self.events.lock().push(("assigned", assigned.clone()));
            if self.fail_assign {
                return Err(Error::Listener("assign failed".to_string()));
            }
            Ok(())
        }
    }

    /// Seeks every newly assigned partition to 42 through the shared handle.
    #[derive(Default)]
    struct SeekingListener {
        state: Mutex<Option<std::sync::Weak<Mutex<SubscriptionState>>>>,
    }

    impl ConsumerRebalanceListener for SeekingListener {
        fn on_partitions_revoked(&self, _revoked: &HashSet<TopicPartition>) -> Result<()> {
            Ok(())
        }

        fn on_partitions_assigned(&self, assigned: &HashSet<TopicPartition>) -> Result<()> {
            let Some(state) = self.state.lock().as_ref().and_then(std::sync::Weak::upgrade) else {
                return Ok(());
            };
            let mut state = state.lock();
            for tp in assigned {
                state.seek(tp, 42)?;
            }
            Ok(())
        }
    }

    #[test]
    fn test_subscribe_topics_registers_interest() {
        let metadata = metadata();
        let mut state = SubscriptionState::new(OffsetResetStrategy::Latest, metadata.clone());
        state.subscribe(Subscription::topics(["a", "b"]), None).unwrap();

        assert!(state.partitions_auto_assigned());
        assert_eq!(state.subscription().map(|s| s.len()), Some(2));
        assert_eq!(metadata.topics_of_interest().len(), 2);
        assert!(!metadata.need_all_topic_metadata());
        assert!(metadata.need_update());
    }

    #[test]
    fn test_pattern_replaces_topics() {
        let metadata = metadata();
        let mut state = SubscriptionState::new(OffsetResetStrategy::Latest, metadata.clone());
        state.subscribe(Subscription::topics(["a"]), None).unwrap();
        state.subscribe(Subscription::pattern("logs-.*"), None).unwrap();

        assert_eq!(state.subscription(), None);
        assert_eq!(state.subscribed_pattern(), Some("logs-.*"));
        assert!(metadata.need_all_topic_metadata());

        state.subscribe(Subscription::topics(["b"]), None).unwrap();
        assert_eq!(state.subscribed_pattern(), None);
        assert!(!metadata.need_all_topic_metadata());
    }

    #[test]
    fn test_invalid_pattern() {
        let mut state = state();
        let err = state.subscribe(Subscription::pattern("("), None).unwrap_err();
        assert!(matches!(err, Error::IllegalState(_)));
    }

    #[test]
    fn test_manual_and_group_assignment_are_exclusive() {
        let mut state = state();
        state.assign_from_user([tp("t", 0)]).unwrap();
        assert!(matches!(
            state.subscribe(Subscription::topics(["t"]), None),
            Err(Error::IllegalState(_))
        ));

        state.unsubscribe();
        state.subscribe(Subscription::topics(["t"]), None).unwrap();
        assert!(matches!(
            state.assign_from_user([tp("t", 0)]),
            Err(Error::IllegalState(_))
        ));
    }

    #[test]
    fn test_assign_from_user_keeps_existing_state() {
        let mut state = state();
        state.assign_from_user([tp("t", 0), tp("t", 1)]).unwrap();
        state.seek(&tp("t", 0), 42).unwrap();

        state.assign_from_user([tp("t", 0), tp("t", 2)]).unwrap();
        assert_eq!(state.position(&tp("t", 0)).unwrap(), Some(42));
        assert_eq!(state.position(&tp("t", 2)).unwrap(), None);
        assert!(!state.is_assigned(&tp("t", 1)));
    }

    #[test]
    fn test_assign_from_subscribed_requires_subscription() {
        let mut state = state();
        assert!(matches!(
            state.assign_from_subscribed([tp("t", 0)]),
            Err(Error::IllegalState(_))
        ));

        state.subscribe(Subscription::topics(["t"]), None).unwrap();
        assert!(matches!(
            state.assign_from_subscribed([tp("other", 0)]),
            Err(Error::IllegalState(_))
        ));
        state.assign_from_subscribed([tp("t", 0)]).unwrap();
        assert!(!state.needs_rejoin());
    }

    #[test]
    fn test_revoke_before_assign_and_kept_state_untouched() {
        let listener = Arc::new(RecordingListener::default());
        let mut state = state();
        state
            .subscribe(Subscription::topics(["t"]), Some(listener.clone()))
            .unwrap();
        state.assign_from_subscribed([tp("t", 1), tp("t", 2)]).unwrap();
        state.seek(&tp("t", 2), 7).unwrap();
        state.committed(&tp("t", 2), OffsetAndMetadata::new(6, "m")).unwrap();
        listener.events.lock().clear();

        state.assign_from_subscribed([tp("t", 2), tp("t", 3)]).unwrap();

        let events = listener.events.lock().clone();
        assert_eq!(
            events,
            vec![
                ("revoked", HashSet::from([tp("t", 1)])),
                ("assigned", HashSet::from([tp("t", 3)])),
            ]
        );
        assert_eq!(state.position(&tp("t", 2)).unwrap(), Some(7));
        assert_eq!(state.committed_offset(&tp("t", 2)).map(|c| c.offset), Some(6));
    }

    #[test]
    fn test_revoke_failure_still_removes_partitions() {
        let listener = Arc::new(RecordingListener {
            fail_revoke: true,
            ..Default::default()
        });
        let mut state = state();
        state
            .subscribe(Subscription::topics(["t"]), Some(listener.clone()))
            .unwrap();
        state.assign_from_subscribed([tp("t", 0), tp("t", 1)]).unwrap();

        let err = state.assign_from_subscribed([tp("t", 1), tp("t", 2)]).unwrap_err();
        assert_eq!(err, Error::Listener("revoke failed".to_string()));
        assert!(!state.is_assigned(&tp("t", 0)));
        assert!(state.is_assigned(&tp("t", 1)));
        assert!(!state.is_assigned(&tp("t", 2)));
        assert!(state.needs_rejoin());
    }

    #[test]
    fn test_assign_failure_keeps_new_partitions() {
        let listener = Arc::new(RecordingListener {
            fail_assign: true,
            ..Default::default()
        });
        let mut state = state();
        state
            .subscribe(Subscription::topics(["t"]), Some(listener.clone()))
            .unwrap();
        assert!(state.needs_rejoin());

        let err = state.assign_from_subscribed([tp("t", 0), tp("t", 1)]).unwrap_err();
        assert_eq!(err, Error::Listener("assign failed".to_string()));
        assert!(state.is_assigned(&tp("t", 0)));
        assert!(state.is_assigned(&tp("t", 1)));
        assert!(!state.needs_rejoin());
        assert_eq!(
            listener.events.lock().clone(),
            vec![("assigned", HashSet::from([tp("t", 0), tp("t", 1)]))]
        );
    }

    #[test]
    fn test_assign_shared_lets_listener_seek() {
        let listener = Arc::new(SeekingListener::default());
        let mut state = state();
        state
            .subscribe(Subscription::topics(["t"]), Some(listener.clone()))
            .unwrap();
        let shared = state.into_shared();
        *listener.state.lock() = Some(Arc::downgrade(&shared));

        SubscriptionState::assign_shared(&shared, [tp("t", 0)]).unwrap();
        assert_eq!(shared.lock().position(&tp("t", 0)).unwrap(), Some(42));
    }

    #[test]
    fn test_seek_unassigned_fails() {
        let mut state = state();
        assert!(matches!(state.seek(&tp("t", 0), 1), Err(Error::IllegalState(_))));
        assert!(matches!(state.pause(&tp("t", 0)), Err(Error::IllegalState(_))));
    }

    #[test]
    fn test_pause_resume_fetchable() {
        let mut state = state();
        state.assign_from_user([tp("t", 0)]).unwrap();
        state.seek(&tp("t", 0), 0).unwrap();
        assert!(state.is_fetchable(&tp("t", 0)));

        state.pause(&tp("t", 0)).unwrap();
        assert!(!state.is_fetchable(&tp("t", 0)));
        assert_eq!(state.paused_partitions(), HashSet::from([tp("t", 0)]));
        assert!(state.fetchable_partitions().is_empty());

        state.resume(&tp("t", 0)).unwrap();
        assert!(state.is_fetchable(&tp("t", 0)));
    }

    #[test]
    fn test_need_offset_reset_uses_default() {
        let mut state = SubscriptionState::new(OffsetResetStrategy::Earliest, metadata());
        state.assign_from_user([tp("t", 0)]).unwrap();
        state.need_offset_reset(&tp("t", 0), None).unwrap();
        assert_eq!(state.reset_strategy(&tp("t", 0)), Some(OffsetResetStrategy::Earliest));
        assert_eq!(state.partitions_needing_reset(), HashSet::from([tp("t", 0)]));

        state.need_offset_reset(&tp("t", 0), Some(OffsetResetStrategy::Latest)).unwrap();
        assert_eq!(state.reset_strategy(&tp("t", 0)), Some(OffsetResetStrategy::Latest));
    }

    #[test]
    fn test_need_offset_reset_policy_none() {
        let mut state = SubscriptionState::new(OffsetResetStrategy::None, metadata());
        state.assign_from_user([tp("t", 0)]).unwrap();
        state.seek(&tp("t", 0), 10).unwrap();

        let err = state.need_offset_reset(&tp("t", 0), None).unwrap_err();
        assert_eq!(err, Error::OffsetResetPolicy(tp("t", 0)));
        assert_eq!(state.position(&tp("t", 0)).unwrap(), Some(10));
        assert!(!state.has_default_offset_reset_policy());
    }

    #[test]
    fn test_fetch_positions() {
        let mut state = state();
        state.assign_from_user([tp("t", 0), tp("t", 1)]).unwrap();
        assert!(!state.has_all_fetch_positions());
        assert_eq!(state.missing_fetch_positions().len(), 2);

        state.seek(&tp("t", 0), 0).unwrap();
        state.seek(&tp("t", 1), 5).unwrap();
        assert!(state.has_all_fetch_positions());
        assert!(state.missing_fetch_positions().is_empty());
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let metadata = metadata();
        let mut state = SubscriptionState::new(OffsetResetStrategy::Latest, metadata.clone());
        state.subscribe(Subscription::pattern("t.*"), None).unwrap();
        state.unsubscribe();
        state.unsubscribe();
        assert_eq!(state.subscription(), None);
        assert_eq!(state.subscribed_pattern(), None);
        assert!(state.assigned_partitions().is_empty());
        assert!(!metadata.need_all_topic_metadata());
        assert!(metadata.topics_of_interest().is_empty());
    }

    #[test]
    fn test_group_subscription() {
        let metadata = metadata();
        let mut state = SubscriptionState::new(OffsetResetStrategy::Latest, metadata.clone());
        assert!(state.group_subscribe(["x"]).is_err());

        state.subscribe(Subscription::topics(["a"]), None).unwrap();
        state.group_subscribe(["b", "c"]).unwrap();
        assert_eq!(state.group_subscription().len(), 3);
        assert!(metadata.topics_of_interest().contains("c"));
        // Full catalog refresh for leaders is off by default.
        assert!(!metadata.need_all_topic_metadata());

        state.assign_from_subscribed([tp("b", 0)]).unwrap();

        state.reset_group_subscription();
        assert_eq!(state.group_subscription(), &HashSet::from(["a".to_string()]));
        assert!(!metadata.topics_of_interest().contains("c"));
    }

    #[test]
    fn test_group_leader_full_catalog_when_configured() {
        let config = ClientConfig {
            metadata_full_catalog_for_group_leader: true,
            ..Default::default()
        };
        let metadata = Arc::new(ClusterMetadata::new(&config).unwrap());
        let mut state = SubscriptionState::from_config(&config, metadata.clone());
        state.subscribe(Subscription::topics(["a"]), None).unwrap();
        state.group_subscribe(["b"]).unwrap();
        assert!(metadata.need_all_topic_metadata());

        state.reset_group_subscription();
        assert!(!metadata.need_all_topic_metadata());
    }
}
