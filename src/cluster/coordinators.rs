//! Consumer group to coordinator broker mapping.
//!
//! Coordinators move independently of topic leadership, so this map has its
//! own expiry and is never touched by a topic metadata update.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::snapshot::BrokerMetadata;
use crate::error::{Error, Result};
use crate::protocol::FindCoordinatorResponse;
use crate::types::NodeId;

#[derive(Debug, Clone)]
struct CoordinatorEntry {
    broker: BrokerMetadata,
    registered_at: Instant,
}

#[derive(Debug)]
pub(crate) struct GroupCoordinators {
    max_age: Duration,
    entries: HashMap<String, CoordinatorEntry>,
}

impl GroupCoordinators {
    pub(crate) fn new(max_age: Duration) -> Self {
        Self {
            max_age,
            entries: HashMap::new(),
        }
    }

    pub(crate) fn add(
        &mut self,
        group: &str,
        response: &FindCoordinatorResponse,
        now: Instant,
    ) -> Result<NodeId> {
        if let Err(e) = response.error_code.into_result() {
            tracing::warn!(
                group,
                error = ?response.error_code,
                message = response.error_message.as_deref().unwrap_or(""),
                "FindCoordinator failed"
            );
            return Err(e);
        }
        if response.coordinator_id < 0 {
            return Err(Error::ProtocolDecode(format!(
                "invalid coordinator id {} for group {}",
                response.coordinator_id, group
            )));
        }

        let broker = BrokerMetadata::new(
            response.coordinator_id,
            response.host.clone(),
            response.port,
        );
        tracing::debug!(
            group,
            node_id = broker.node_id,
            address = %broker.address(),
            "Group coordinator registered"
        );
        self.entries.insert(
            group.to_string(),
            CoordinatorEntry {
                broker,
                registered_at: now,
            },
        );
        Ok(response.coordinator_id)
    }

    pub(crate) fn get(&self, group: &str, now: Instant) -> Option<NodeId> {
        self.entries
            .get(group)
            .filter(|e| now.saturating_duration_since(e.registered_at) < self.max_age)
            .map(|e| e.broker.node_id)
    }

    pub(crate) fn broker(&self, node_id: NodeId) -> Option<&BrokerMetadata> {
        self.entries
            .values()
            .map(|e| &e.broker)
            .find(|b| b.node_id == node_id)
    }

    pub(crate) fn remove(&mut self, group: &str) -> bool {
        self.entries.remove(group).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KafkaCode;

    fn found(node_id: NodeId) -> FindCoordinatorResponse {
        FindCoordinatorResponse {
            coordinator_id: node_id,
            host: "coord".to_string(),
            port: 9092,
            ..Default::default()
        }
    }

    #[test]
    fn test_add_and_get() {
        let now = Instant::now();
        let mut coordinators = GroupCoordinators::new(Duration::from_secs(60));
        assert_eq!(coordinators.add("g", &found(3), now).unwrap(), 3);
        assert_eq!(coordinators.get("g", now), Some(3));
        assert_eq!(coordinators.broker(3).map(|b| b.host.as_str()), Some("coord"));
        assert_eq!(coordinators.get("other", now), None);
    }

    #[test]
    fn test_entry_expires() {
        let now = Instant::now();
        let mut coordinators = GroupCoordinators::new(Duration::from_secs(60));
        coordinators.add("g", &found(3), now).unwrap();
        assert_eq!(coordinators.get("g", now + Duration::from_secs(59)), Some(3));
        assert_eq!(coordinators.get("g", now + Duration::from_secs(60)), None);
    }

    #[test]
    fn test_error_code_rejected() {
        let mut coordinators = GroupCoordinators::new(Duration::from_secs(60));
        let response = FindCoordinatorResponse {
            error_code: KafkaCode::GroupCoordinatorNotAvailable,
            ..found(3)
        };
        let err = coordinators.add("g", &response, Instant::now()).unwrap_err();
        assert_eq!(err, Error::Broker(KafkaCode::GroupCoordinatorNotAvailable));
        assert_eq!(coordinators.get("g", Instant::now()), None);
    }

    #[test]
    fn test_remove() {
        let now = Instant::now();
        let mut coordinators = GroupCoordinators::new(Duration::from_secs(60));
        coordinators.add("g", &found(1), now).unwrap();
        assert!(coordinators.remove("g"));
        assert!(!coordinators.remove("g"));
        assert_eq!(coordinators.get("g", now), None);
    }
}
