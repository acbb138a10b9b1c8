//! Every message type encoded and decoded at every version the client speaks.
//!
//! At each version the decoded message must re-encode to the same bytes,
//! which shows every field that version carries survived the trip. At the
//! newest version every field exists, so the decoded message equals the
//! original outright.

use std::fmt::Debug;

use bytes::Bytes;
use kafkaesque_client::error::KafkaCode;
use kafkaesque_client::protocol::*;

// ============================================================================
// Test Helpers
// ============================================================================

fn assert_round_trips_all_versions<M: Message + PartialEq + Debug>(message: &M) {
    for version in 0..=M::max_version() {
        let encoded = message
            .encode(version)
            .unwrap_or_else(|e| panic!("{:?} v{} encode: {}", M::API_KEY, version, e));
        let decoded = M::decode(version, encoded.clone())
            .unwrap_or_else(|e| panic!("{:?} v{} decode: {}", M::API_KEY, version, e));

        let reencoded = decoded.encode(version).unwrap();
        assert_eq!(reencoded, encoded, "{:?} v{} re-encode differs", M::API_KEY, version);
        assert_eq!(
            M::decode(version, reencoded).unwrap(),
            decoded,
            "{:?} v{} decode is not stable",
            M::API_KEY,
            version
        );

        if version == M::max_version() {
            assert_eq!(&decoded, message, "{:?} v{} lost a field", M::API_KEY, version);
        }
    }
}

// ============================================================================
// Produce
// ============================================================================

#[test]
fn test_produce_request_all_versions() {
    assert_round_trips_all_versions(&ProduceRequest {
        version: ProduceRequest::max_version(),
        transactional_id: Some("txn-1".to_string()),
        acks: -1,
        timeout_ms: 30_000,
        topics: vec![ProduceTopicData {
            topic: "orders".to_string(),
            partitions: vec![
                ProducePartitionData {
                    partition: 0,
                    records: Some(Bytes::from_static(b"batch-0")),
                },
                ProducePartitionData {
                    partition: 3,
                    records: None,
                },
            ],
        }],
    });
}

#[test]
fn test_produce_response_all_versions() {
    assert_round_trips_all_versions(&ProduceResponse {
        topics: vec![ProduceTopicResponse {
            topic: "orders".to_string(),
            partitions: vec![ProducePartitionResponse {
                partition: 1,
                error_code: KafkaCode::NotLeaderForPartition,
                base_offset: 1_000,
                log_append_time: 1_700_000_000_000,
                log_start_offset: 12,
            }],
        }],
        throttle_time_ms: 5,
    });
}

// ============================================================================
// Offsets
// ============================================================================

#[test]
fn test_list_offsets_request_all_versions() {
    assert_round_trips_all_versions(&ListOffsetsRequest {
        version: ListOffsetsRequest::max_version(),
        replica_id: -1,
        isolation_level: 1,
        topics: vec![ListOffsetsTopic {
            topic: "orders".to_string(),
            partitions: vec![ListOffsetsPartition {
                partition: 2,
                timestamp: -2,
            }],
        }],
    });
}

#[test]
fn test_list_offsets_response_all_versions() {
    assert_round_trips_all_versions(&ListOffsetsResponse {
        throttle_time_ms: 7,
        topics: vec![ListOffsetsTopicResponse {
            topic: "orders".to_string(),
            partitions: vec![
                ListOffsetsPartitionResponse {
                    partition: 2,
                    error_code: KafkaCode::None,
                    timestamp: 1_700_000_000_000,
                    offset: 88,
                },
                ListOffsetsPartitionResponse {
                    partition: 3,
                    error_code: KafkaCode::UnknownTopicOrPartition,
                    timestamp: -1,
                    offset: -1,
                },
            ],
        }],
    });
}

#[test]
fn test_offset_commit_request_all_versions() {
    assert_round_trips_all_versions(&OffsetCommitRequest {
        version: OffsetCommitRequest::max_version(),
        group_id: "group".to_string(),
        generation_id: 4,
        member_id: "member-1".to_string(),
        retention_time_ms: 86_400_000,
        topics: vec![OffsetCommitTopic {
            topic: "orders".to_string(),
            partitions: vec![OffsetCommitPartition {
                partition: 0,
                offset: 42,
                // Only v1 carries a commit timestamp.
                timestamp: -1,
                metadata: Some("checkpoint".to_string()),
            }],
        }],
    });
}

#[test]
fn test_offset_commit_response_all_versions() {
    assert_round_trips_all_versions(&OffsetCommitResponse {
        topics: vec![TopicPartitionErrors {
            topic: "orders".to_string(),
            partitions: vec![(0, KafkaCode::None), (1, KafkaCode::IllegalGeneration)],
        }],
    });
}

#[test]
fn test_offset_fetch_request_all_versions() {
    assert_round_trips_all_versions(&OffsetFetchRequest {
        version: OffsetFetchRequest::max_version(),
        group_id: "group".to_string(),
        topics: Some(vec![("orders".to_string(), vec![0, 1, 2])]),
    });
}

#[test]
fn test_offset_fetch_response_all_versions() {
    assert_round_trips_all_versions(&OffsetFetchResponse {
        topics: vec![OffsetFetchTopicResponse {
            topic: "orders".to_string(),
            partitions: vec![OffsetFetchPartitionResponse {
                partition: 0,
                offset: 42,
                metadata: Some("checkpoint".to_string()),
                error_code: KafkaCode::None,
            }],
        }],
        error_code: KafkaCode::NotCoordinatorForGroup,
    });
}

// ============================================================================
// Metadata and Coordinators
// ============================================================================

#[test]
fn test_metadata_request_all_versions() {
    assert_round_trips_all_versions(&MetadataRequest {
        version: MetadataRequest::max_version(),
        topics: Some(vec!["orders".to_string(), "payments".to_string()]),
        allow_auto_topic_creation: false,
    });
}

#[test]
fn test_metadata_response_all_versions() {
    assert_round_trips_all_versions(&MetadataResponse {
        throttle_time_ms: 3,
        brokers: vec![
            MetadataBroker {
                node_id: 0,
                host: "broker-0".to_string(),
                port: 9092,
                rack: Some("rack-a".to_string()),
            },
            MetadataBroker {
                node_id: 1,
                host: "broker-1".to_string(),
                port: 9093,
                rack: None,
            },
        ],
        cluster_id: Some("cluster".to_string()),
        controller_id: 1,
        topics: vec![MetadataTopic {
            error_code: KafkaCode::None,
            name: "orders".to_string(),
            is_internal: false,
            partitions: vec![MetadataPartition {
                error_code: KafkaCode::None,
                partition: 0,
                leader: 1,
                replicas: vec![1, 0],
                isr: vec![1],
                offline_replicas: vec![0],
            }],
        }],
    });
}

#[test]
fn test_find_coordinator_all_versions() {
    assert_round_trips_all_versions(&FindCoordinatorRequest {
        version: FindCoordinatorRequest::max_version(),
        key: "group".to_string(),
        coordinator_type: CoordinatorType::Group,
    });
    assert_round_trips_all_versions(&FindCoordinatorResponse {
        throttle_time_ms: 2,
        error_code: KafkaCode::None,
        error_message: Some("ok".to_string()),
        coordinator_id: 5,
        host: "coordinator".to_string(),
        port: 9094,
    });
}

#[test]
fn test_api_versions_all_versions() {
    assert_round_trips_all_versions(&ApiVersionsRequest {
        version: ApiVersionsRequest::max_version(),
    });
    assert_round_trips_all_versions(&ApiVersionsResponse {
        error_code: KafkaCode::None,
        api_versions: vec![
            ApiVersionRange {
                api_key: 3,
                min_version: 0,
                max_version: 5,
            },
            ApiVersionRange {
                api_key: 10,
                min_version: 0,
                max_version: 1,
            },
        ],
        throttle_time_ms: 1,
    });
}

// ============================================================================
// Group Membership
// ============================================================================

#[test]
fn test_join_group_all_versions() {
    assert_round_trips_all_versions(&JoinGroupRequest {
        version: JoinGroupRequest::max_version(),
        group_id: "group".to_string(),
        session_timeout_ms: 10_000,
        rebalance_timeout_ms: 60_000,
        member_id: "member-1".to_string(),
        protocol_type: "consumer".to_string(),
        protocols: vec![GroupProtocol {
            name: "range".to_string(),
            metadata: Bytes::from_static(&[0, 0, 0, 0, 0, 1]),
        }],
    });
    assert_round_trips_all_versions(&JoinGroupResponse {
        throttle_time_ms: 4,
        error_code: KafkaCode::None,
        generation_id: 9,
        group_protocol: "range".to_string(),
        leader_id: "member-1".to_string(),
        member_id: "member-2".to_string(),
        members: vec![JoinGroupMember {
            member_id: "member-1".to_string(),
            metadata: Bytes::from_static(b"subscription"),
        }],
    });
}

#[test]
fn test_sync_group_all_versions() {
    assert_round_trips_all_versions(&SyncGroupRequest {
        version: SyncGroupRequest::max_version(),
        group_id: "group".to_string(),
        generation_id: 9,
        member_id: "member-1".to_string(),
        assignments: vec![("member-1".to_string(), Bytes::from_static(b"assignment"))],
    });
    assert_round_trips_all_versions(&SyncGroupResponse {
        throttle_time_ms: 6,
        error_code: KafkaCode::RebalanceInProgress,
        member_assignment: Bytes::from_static(b"assignment"),
    });
}

#[test]
fn test_heartbeat_and_leave_group_all_versions() {
    assert_round_trips_all_versions(&HeartbeatRequest {
        version: HeartbeatRequest::max_version(),
        group_id: "group".to_string(),
        generation_id: 9,
        member_id: "member-1".to_string(),
    });
    assert_round_trips_all_versions(&HeartbeatResponse {
        throttle_time_ms: 8,
        error_code: KafkaCode::RebalanceInProgress,
    });
    assert_round_trips_all_versions(&LeaveGroupRequest {
        version: LeaveGroupRequest::max_version(),
        group_id: "group".to_string(),
        member_id: "member-1".to_string(),
    });
    assert_round_trips_all_versions(&LeaveGroupResponse {
        throttle_time_ms: 8,
        error_code: KafkaCode::None,
    });
}
