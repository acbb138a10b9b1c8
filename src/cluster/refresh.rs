//! Drives metadata refresh through a [`Transport`].
//!
//! At most one refresh is outstanding per [`ClusterMetadata`]: concurrent
//! [`MetadataRefresher::refresh`] callers await the same shared future
//! instead of issuing duplicate Metadata requests.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use backon::Retryable;
use futures::FutureExt;
use tokio::sync::watch;

use super::metadata::ClusterMetadata;
use super::retry;
use crate::error::{Error, Result};
use crate::protocol::{FindCoordinatorRequest, MetadataRequest};
use crate::transport::{KafkaClient, Transport};
use crate::types::NodeId;

/// Sends Metadata and FindCoordinator requests on behalf of a [`ClusterMetadata`].
pub struct MetadataRefresher<T: Transport> {
    metadata: Arc<ClusterMetadata>,
    client: KafkaClient<T>,
}

impl<T: Transport> Clone for MetadataRefresher<T> {
    fn clone(&self) -> Self {
        Self {
            metadata: self.metadata.clone(),
            client: self.client.clone(),
        }
    }
}

impl<T: Transport> MetadataRefresher<T> {
    pub fn new(metadata: Arc<ClusterMetadata>, client: KafkaClient<T>) -> Self {
        Self { metadata, client }
    }

    pub fn metadata(&self) -> &Arc<ClusterMetadata> {
        &self.metadata
    }

    pub fn client(&self) -> &KafkaClient<T> {
        &self.client
    }

    /// Refresh metadata once, joining a refresh that is already in flight
    /// for the same [`ClusterMetadata`], from this refresher or another.
    pub async fn refresh(&self) -> Result<()> {
        let refresh = self.metadata.join_refresh(|| {
            let metadata = self.metadata.clone();
            let client = self.client.clone();
            async move {
                let result = refresh_once(&metadata, &client).await;
                metadata.refresh_settled();
                result
            }
            .boxed()
        });
        refresh.await
    }

    /// Refresh, retrying retriable failures with the fixed `retry.backoff.ms` delay.
    pub async fn refresh_with_retry(&self, max_times: usize) -> Result<()> {
        retry::with_metadata_policy(|| self.refresh(), self.metadata.refresh_backoff(), max_times)
            .await
    }

    /// Refresh if the snapshot is stale.
    pub async fn maybe_refresh(&self) -> Result<()> {
        if self.metadata.ttl().is_zero() {
            self.refresh().await
        } else {
            Ok(())
        }
    }

    /// Wait until partitions of `topic` are known.
    ///
    /// Adds `topic` to the topics of interest and keeps refreshing, honouring
    /// the retry backoff between attempts.
    pub async fn wait_on_metadata(&self, topic: &str, timeout: Duration) -> Result<HashSet<i32>> {
        let partitions = self.metadata.partitions_for_topic(topic);
        if !partitions.is_empty() {
            return Ok(partitions);
        }
        self.metadata.add_topic(topic);

        let wait = async {
            loop {
                let snapshot = self.metadata.snapshot();
                if snapshot.unauthorized_topics().contains(topic) {
                    return Err(Error::UnauthorizedTopic(topic.to_string()));
                }
                let partitions = snapshot.partitions_for_topic(topic);
                if !partitions.is_empty() {
                    return Ok(partitions);
                }

                self.metadata.request_update();
                let ttl = self.metadata.ttl();
                if !ttl.is_zero() {
                    tokio::time::sleep(ttl).await;
                }
                if let Err(e) = self.refresh().await
                    && !e.is_retriable()
                {
                    return Err(e);
                }
            }
        };

        tokio::time::timeout(timeout, wait).await.map_err(|_| {
            Error::MetadataRefresh(format!(
                "topic '{}' not present in metadata after {:?}",
                topic, timeout
            ))
        })?
    }

    /// The coordinator of `group`, looking it up with FindCoordinator when
    /// unknown or expired.
    pub async fn ensure_coordinator_known(&self, group: &str) -> Result<NodeId> {
        if let Some(node_id) = self.metadata.coordinator_for_group(group) {
            return Ok(node_id);
        }

        (|| async {
            let node_id = least_loaded_node(&self.metadata, &self.client)?;
            let version = self.client.negotiate::<FindCoordinatorRequest>(node_id).await?;
            let response = self
                .client
                .call(node_id, &FindCoordinatorRequest::group(version, group))
                .await?;
            self.metadata.add_group_coordinator(group, &response)
        })
        .retry(retry::coordinator_policy(self.metadata.refresh_backoff()))
        .when(Error::is_retriable)
        .await
    }

    /// Refresh whenever the snapshot goes stale or an update is requested,
    /// until `shutdown` turns `true` or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::debug!("Metadata refresh loop started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let ttl = self.metadata.ttl();
            if ttl.is_zero() {
                // Failures are recorded on the metadata and delay the next attempt.
                let _ = self.refresh().await;
                continue;
            }
            tokio::select! {
                _ = tokio::time::sleep(ttl) => {}
                _ = self.metadata.update_requested() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("Metadata refresh loop stopped");
    }
}

/// The ready node with the fewest requests in flight, preferring brokers
/// from metadata over bootstrap entries.
fn least_loaded_node<T: Transport>(
    metadata: &ClusterMetadata,
    client: &KafkaClient<T>,
) -> Result<NodeId> {
    let mut known: Vec<NodeId> = metadata
        .snapshot()
        .brokers()
        .into_iter()
        .map(|b| b.node_id)
        .collect();
    known.sort_unstable();
    let bootstrap: Vec<NodeId> = metadata
        .bootstrap_brokers()
        .into_iter()
        .map(|b| b.node_id)
        .collect();

    [known, bootstrap]
        .into_iter()
        .find_map(|candidates| {
            candidates
                .into_iter()
                .filter(|&id| client.ready(id))
                .min_by_key(|&id| client.in_flight(id))
        })
        .ok_or_else(|| Error::MetadataRefresh("no broker is ready".to_string()))
}

async fn refresh_once<T: Transport>(metadata: &ClusterMetadata, client: &KafkaClient<T>) -> Result<()> {
    let node_id = match least_loaded_node(metadata, client) {
        Ok(node_id) => node_id,
        Err(e) => {
            metadata.failed_update(e.clone());
            return Err(e);
        }
    };

    let response = async {
        let version = client.negotiate::<MetadataRequest>(node_id).await?;
        let request = metadata.metadata_request(version);
        tracing::debug!(
            node_id,
            version,
            all_topics = request.topics.is_none(),
            "Sending metadata request"
        );
        client.call(node_id, &request).await
    }
    .await;

    match response {
        Ok(response) => metadata.update_metadata(&response),
        Err(e) => {
            let e = Error::MetadataRefresh(format!("node {}: {}", node_id, e));
            metadata.failed_update(e.clone());
            Err(e)
        }
    }
}
