//! Group membership APIs: JoinGroup, SyncGroup, Heartbeat, LeaveGroup, plus
//! the consumer protocol embedded in their opaque metadata/assignment bytes.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;

use super::schema::{FieldType, Schema, Struct, decode as decode_struct, schema};
use super::{ApiKey, Message, Request, error_code};
use crate::constants::{CONSUMER_PROTOCOL_TYPE, CONSUMER_PROTOCOL_VERSION};
use crate::error::{KafkaCode, Result};
use crate::types::TopicPartition;

// =============================================================================
// JoinGroup
// =============================================================================

const JOIN_GROUP_PROTOCOL: Schema = schema! {
    "protocol_name" => FieldType::String,
    "protocol_metadata" => FieldType::Bytes,
};

const JOIN_GROUP_REQUEST_V0: Schema = schema! {
    "group_id" => FieldType::String,
    "session_timeout" => FieldType::Int32,
    "member_id" => FieldType::String,
    "protocol_type" => FieldType::String,
    "group_protocols" => FieldType::Array(&FieldType::Struct(&JOIN_GROUP_PROTOCOL)),
};

const JOIN_GROUP_REQUEST_V1: Schema = schema! {
    "group_id" => FieldType::String,
    "session_timeout" => FieldType::Int32,
    "rebalance_timeout" => FieldType::Int32,
    "member_id" => FieldType::String,
    "protocol_type" => FieldType::String,
    "group_protocols" => FieldType::Array(&FieldType::Struct(&JOIN_GROUP_PROTOCOL)),
};

const JOIN_GROUP_REQUEST: &[&Schema] = &[
    &JOIN_GROUP_REQUEST_V0,
    &JOIN_GROUP_REQUEST_V1,
    &JOIN_GROUP_REQUEST_V1,
];

const JOIN_GROUP_MEMBER: Schema = schema! {
    "member_id" => FieldType::String,
    "member_metadata" => FieldType::Bytes,
};

const JOIN_GROUP_RESPONSE_V0: Schema = schema! {
    "error_code" => FieldType::Int16,
    "generation_id" => FieldType::Int32,
    "group_protocol" => FieldType::String,
    "leader_id" => FieldType::String,
    "member_id" => FieldType::String,
    "members" => FieldType::Array(&FieldType::Struct(&JOIN_GROUP_MEMBER)),
};

const JOIN_GROUP_RESPONSE_V2: Schema = schema! {
    "throttle_time_ms" => FieldType::Int32,
    "error_code" => FieldType::Int16,
    "generation_id" => FieldType::Int32,
    "group_protocol" => FieldType::String,
    "leader_id" => FieldType::String,
    "member_id" => FieldType::String,
    "members" => FieldType::Array(&FieldType::Struct(&JOIN_GROUP_MEMBER)),
};

const JOIN_GROUP_RESPONSE: &[&Schema] = &[
    &JOIN_GROUP_RESPONSE_V0,
    &JOIN_GROUP_RESPONSE_V0,
    &JOIN_GROUP_RESPONSE_V2,
];

/// One assignment strategy offered by a joining member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupProtocol {
    pub name: String,
    pub metadata: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinGroupRequest {
    pub version: i16,
    pub group_id: String,
    pub session_timeout_ms: i32,
    /// v1+; v0 brokers use the session timeout for rebalances.
    pub rebalance_timeout_ms: i32,
    /// Empty on the first join.
    pub member_id: String,
    pub protocol_type: String,
    pub protocols: Vec<GroupProtocol>,
}

impl JoinGroupRequest {
    /// Join `group_id` with the consumer protocol type.
    pub fn consumer(
        version: i16,
        group_id: impl Into<String>,
        member_id: impl Into<String>,
        session_timeout_ms: i32,
        rebalance_timeout_ms: i32,
        protocols: Vec<GroupProtocol>,
    ) -> Self {
        Self {
            version,
            group_id: group_id.into(),
            session_timeout_ms,
            rebalance_timeout_ms,
            member_id: member_id.into(),
            protocol_type: CONSUMER_PROTOCOL_TYPE.to_string(),
            protocols,
        }
    }
}

impl Message for JoinGroupRequest {
    const API_KEY: ApiKey = ApiKey::JoinGroup;

    fn schemas() -> &'static [&'static Schema] {
        JOIN_GROUP_REQUEST
    }

    fn to_struct(&self, version: i16) -> Result<Struct> {
        Ok(Struct::new(Self::schema(version)?)
            .with("group_id", self.group_id.as_str())
            .with("session_timeout", self.session_timeout_ms)
            .with("rebalance_timeout", self.rebalance_timeout_ms)
            .with("member_id", self.member_id.as_str())
            .with("protocol_type", self.protocol_type.as_str())
            .with_structs("group_protocols", &self.protocols, |s, p| {
                s.with("protocol_name", p.name.as_str())
                    .with("protocol_metadata", p.metadata.clone())
            }))
    }

    fn from_struct(version: i16, s: &Struct) -> Result<Self> {
        let session_timeout_ms = s.int32("session_timeout")?;
        Ok(Self {
            version,
            group_id: s.string("group_id")?,
            session_timeout_ms,
            rebalance_timeout_ms: s.opt_int32("rebalance_timeout")?.unwrap_or(session_timeout_ms),
            member_id: s.string("member_id")?,
            protocol_type: s.string("protocol_type")?,
            protocols: s
                .structs("group_protocols")?
                .into_iter()
                .map(|p| {
                    Ok(GroupProtocol {
                        name: p.string("protocol_name")?,
                        metadata: p.bytes("protocol_metadata")?,
                    })
                })
                .collect::<Result<_>>()?,
        })
    }
}

impl Request for JoinGroupRequest {
    type Response = JoinGroupResponse;

    fn api_version(&self) -> i16 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinGroupMember {
    pub member_id: String,
    pub metadata: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JoinGroupResponse {
    pub throttle_time_ms: i32,
    pub error_code: KafkaCode,
    pub generation_id: i32,
    pub group_protocol: String,
    pub leader_id: String,
    pub member_id: String,
    /// Populated only in the leader's response.
    pub members: Vec<JoinGroupMember>,
}

impl JoinGroupResponse {
    /// Whether this member was elected leader and must compute the assignment.
    pub fn is_leader(&self) -> bool {
        !self.member_id.is_empty() && self.member_id == self.leader_id
    }
}

impl Message for JoinGroupResponse {
    const API_KEY: ApiKey = ApiKey::JoinGroup;

    fn schemas() -> &'static [&'static Schema] {
        JOIN_GROUP_RESPONSE
    }

    fn to_struct(&self, version: i16) -> Result<Struct> {
        Ok(Struct::new(Self::schema(version)?)
            .with("throttle_time_ms", self.throttle_time_ms)
            .with("error_code", self.error_code)
            .with("generation_id", self.generation_id)
            .with("group_protocol", self.group_protocol.as_str())
            .with("leader_id", self.leader_id.as_str())
            .with("member_id", self.member_id.as_str())
            .with_structs("members", &self.members, |s, m| {
                s.with("member_id", m.member_id.as_str())
                    .with("member_metadata", m.metadata.clone())
            }))
    }

    fn from_struct(_version: i16, s: &Struct) -> Result<Self> {
        Ok(Self {
            throttle_time_ms: s.opt_int32("throttle_time_ms")?.unwrap_or(0),
            error_code: error_code(s, "error_code")?,
            generation_id: s.int32("generation_id")?,
            group_protocol: s.string("group_protocol")?,
            leader_id: s.string("leader_id")?,
            member_id: s.string("member_id")?,
            members: s
                .structs("members")?
                .into_iter()
                .map(|m| {
                    Ok(JoinGroupMember {
                        member_id: m.string("member_id")?,
                        metadata: m.bytes("member_metadata")?,
                    })
                })
                .collect::<Result<_>>()?,
        })
    }
}

// =============================================================================
// SyncGroup
// =============================================================================

const SYNC_GROUP_ASSIGNMENT: Schema = schema! {
    "member_id" => FieldType::String,
    "member_metadata" => FieldType::Bytes,
};

const SYNC_GROUP_REQUEST_V0: Schema = schema! {
    "group_id" => FieldType::String,
    "generation_id" => FieldType::Int32,
    "member_id" => FieldType::String,
    "group_assignment" => FieldType::Array(&FieldType::Struct(&SYNC_GROUP_ASSIGNMENT)),
};

const SYNC_GROUP_REQUEST: &[&Schema] = &[&SYNC_GROUP_REQUEST_V0, &SYNC_GROUP_REQUEST_V0];

const SYNC_GROUP_RESPONSE_V0: Schema = schema! {
    "error_code" => FieldType::Int16,
    "member_assignment" => FieldType::Bytes,
};

const SYNC_GROUP_RESPONSE_V1: Schema = schema! {
    "throttle_time_ms" => FieldType::Int32,
    "error_code" => FieldType::Int16,
    "member_assignment" => FieldType::Bytes,
};

const SYNC_GROUP_RESPONSE: &[&Schema] = &[&SYNC_GROUP_RESPONSE_V0, &SYNC_GROUP_RESPONSE_V1];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncGroupRequest {
    pub version: i16,
    pub group_id: String,
    pub generation_id: i32,
    pub member_id: String,
    /// Member id to encoded assignment. Only the leader sends a non-empty list.
    pub assignments: Vec<(String, Bytes)>,
}

impl Message for SyncGroupRequest {
    const API_KEY: ApiKey = ApiKey::SyncGroup;

    fn schemas() -> &'static [&'static Schema] {
        SYNC_GROUP_REQUEST
    }

    fn to_struct(&self, version: i16) -> Result<Struct> {
        Ok(Struct::new(Self::schema(version)?)
            .with("group_id", self.group_id.as_str())
            .with("generation_id", self.generation_id)
            .with("member_id", self.member_id.as_str())
            .with_structs("group_assignment", &self.assignments, |s, (member, assignment)| {
                s.with("member_id", member.as_str())
                    .with("member_metadata", assignment.clone())
            }))
    }

    fn from_struct(version: i16, s: &Struct) -> Result<Self> {
        Ok(Self {
            version,
            group_id: s.string("group_id")?,
            generation_id: s.int32("generation_id")?,
            member_id: s.string("member_id")?,
            assignments: s
                .structs("group_assignment")?
                .into_iter()
                .map(|a| Ok((a.string("member_id")?, a.bytes("member_metadata")?)))
                .collect::<Result<_>>()?,
        })
    }
}

impl Request for SyncGroupRequest {
    type Response = SyncGroupResponse;

    fn api_version(&self) -> i16 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncGroupResponse {
    pub throttle_time_ms: i32,
    pub error_code: KafkaCode,
    pub member_assignment: Bytes,
}

impl Message for SyncGroupResponse {
    const API_KEY: ApiKey = ApiKey::SyncGroup;

    fn schemas() -> &'static [&'static Schema] {
        SYNC_GROUP_RESPONSE
    }

    fn to_struct(&self, version: i16) -> Result<Struct> {
        Ok(Struct::new(Self::schema(version)?)
            .with("throttle_time_ms", self.throttle_time_ms)
            .with("error_code", self.error_code)
            .with("member_assignment", self.member_assignment.clone()))
    }

    fn from_struct(_version: i16, s: &Struct) -> Result<Self> {
        Ok(Self {
            throttle_time_ms: s.opt_int32("throttle_time_ms")?.unwrap_or(0),
            error_code: error_code(s, "error_code")?,
            member_assignment: s.bytes("member_assignment")?,
        })
    }
}

// =============================================================================
// Heartbeat
// =============================================================================

const HEARTBEAT_REQUEST_V0: Schema = schema! {
    "group_id" => FieldType::String,
    "generation_id" => FieldType::Int32,
    "member_id" => FieldType::String,
};

const HEARTBEAT_REQUEST: &[&Schema] = &[&HEARTBEAT_REQUEST_V0, &HEARTBEAT_REQUEST_V0];

const ERROR_ONLY_RESPONSE_V0: Schema = schema! {
    "error_code" => FieldType::Int16,
};

const ERROR_ONLY_RESPONSE_V1: Schema = schema! {
    "throttle_time_ms" => FieldType::Int32,
    "error_code" => FieldType::Int16,
};

const ERROR_ONLY_RESPONSE: &[&Schema] = &[&ERROR_ONLY_RESPONSE_V0, &ERROR_ONLY_RESPONSE_V1];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatRequest {
    pub version: i16,
    pub group_id: String,
    pub generation_id: i32,
    pub member_id: String,
}

impl HeartbeatRequest {
    pub fn new(
        version: i16,
        group_id: impl Into<String>,
        generation_id: i32,
        member_id: impl Into<String>,
    ) -> Self {
        Self {
            version,
            group_id: group_id.into(),
            generation_id,
            member_id: member_id.into(),
        }
    }
}

impl Message for HeartbeatRequest {
    const API_KEY: ApiKey = ApiKey::Heartbeat;

    fn schemas() -> &'static [&'static Schema] {
        HEARTBEAT_REQUEST
    }

    fn to_struct(&self, version: i16) -> Result<Struct> {
        Ok(Struct::new(Self::schema(version)?)
            .with("group_id", self.group_id.as_str())
            .with("generation_id", self.generation_id)
            .with("member_id", self.member_id.as_str()))
    }

    fn from_struct(version: i16, s: &Struct) -> Result<Self> {
        Ok(Self {
            version,
            group_id: s.string("group_id")?,
            generation_id: s.int32("generation_id")?,
            member_id: s.string("member_id")?,
        })
    }
}

impl Request for HeartbeatRequest {
    type Response = HeartbeatResponse;

    fn api_version(&self) -> i16 {
        self.version
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartbeatResponse {
    pub throttle_time_ms: i32,
    pub error_code: KafkaCode,
}

impl Message for HeartbeatResponse {
    const API_KEY: ApiKey = ApiKey::Heartbeat;

    fn schemas() -> &'static [&'static Schema] {
        ERROR_ONLY_RESPONSE
    }

    fn to_struct(&self, version: i16) -> Result<Struct> {
        Ok(Struct::new(Self::schema(version)?)
            .with("throttle_time_ms", self.throttle_time_ms)
            .with("error_code", self.error_code))
    }

    fn from_struct(_version: i16, s: &Struct) -> Result<Self> {
        Ok(Self {
            throttle_time_ms: s.opt_int32("throttle_time_ms")?.unwrap_or(0),
            error_code: error_code(s, "error_code")?,
        })
    }
}

// =============================================================================
// LeaveGroup
// =============================================================================

const LEAVE_GROUP_REQUEST_V0: Schema = schema! {
    "group_id" => FieldType::String,
    "member_id" => FieldType::String,
};

const LEAVE_GROUP_REQUEST: &[&Schema] = &[&LEAVE_GROUP_REQUEST_V0, &LEAVE_GROUP_REQUEST_V0];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveGroupRequest {
    pub version: i16,
    pub group_id: String,
    pub member_id: String,
}

impl Message for LeaveGroupRequest {
    const API_KEY: ApiKey = ApiKey::LeaveGroup;

    fn schemas() -> &'static [&'static Schema] {
        LEAVE_GROUP_REQUEST
    }

    fn to_struct(&self, version: i16) -> Result<Struct> {
        Ok(Struct::new(Self::schema(version)?)
            .with("group_id", self.group_id.as_str())
            .with("member_id", self.member_id.as_str()))
    }

    fn from_struct(version: i16, s: &Struct) -> Result<Self> {
        Ok(Self {
            version,
            group_id: s.string("group_id")?,
            member_id: s.string("member_id")?,
        })
    }
}

impl Request for LeaveGroupRequest {
    type Response = LeaveGroupResponse;

    fn api_version(&self) -> i16 {
        self.version
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LeaveGroupResponse {
    pub throttle_time_ms: i32,
    pub error_code: KafkaCode,
}

impl Message for LeaveGroupResponse {
    const API_KEY: ApiKey = ApiKey::LeaveGroup;

    fn schemas() -> &'static [&'static Schema] {
        ERROR_ONLY_RESPONSE
    }

    fn to_struct(&self, version: i16) -> Result<Struct> {
        Ok(Struct::new(Self::schema(version)?)
            .with("throttle_time_ms", self.throttle_time_ms)
            .with("error_code", self.error_code))
    }

    fn from_struct(_version: i16, s: &Struct) -> Result<Self> {
        Ok(Self {
            throttle_time_ms: s.opt_int32("throttle_time_ms")?.unwrap_or(0),
            error_code: error_code(s, "error_code")?,
        })
    }
}

// =============================================================================
// Consumer protocol (JoinGroup metadata / SyncGroup assignment payloads)
// =============================================================================

const CONSUMER_MEMBER_METADATA: Schema = schema! {
    "version" => FieldType::Int16,
    "subscription" => FieldType::Array(&FieldType::String),
    "user_data" => FieldType::NullableBytes,
};

const CONSUMER_TOPIC_ASSIGNMENT: Schema = schema! {
    "topic" => FieldType::String,
    "partitions" => FieldType::Array(&FieldType::Int32),
};

const CONSUMER_MEMBER_ASSIGNMENT: Schema = schema! {
    "version" => FieldType::Int16,
    "assignment" => FieldType::Array(&FieldType::Struct(&CONSUMER_TOPIC_ASSIGNMENT)),
    "user_data" => FieldType::NullableBytes,
};

/// A consumer's subscription, carried in JoinGroup `protocol_metadata`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerProtocolMemberMetadata {
    pub version: i16,
    pub subscription: Vec<String>,
    pub user_data: Option<Bytes>,
}

impl ConsumerProtocolMemberMetadata {
    pub fn new(subscription: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let mut subscription: Vec<String> = subscription.into_iter().map(Into::into).collect();
        subscription.sort();
        Self {
            version: CONSUMER_PROTOCOL_VERSION,
            subscription,
            user_data: None,
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        Struct::new(&CONSUMER_MEMBER_METADATA)
            .with("version", self.version)
            .with("subscription", self.subscription.clone())
            .with("user_data", self.user_data.clone())
            .to_bytes()
    }

    pub fn decode(bytes: Bytes) -> Result<Self> {
        let s = decode_struct(&CONSUMER_MEMBER_METADATA, bytes)?;
        Ok(Self {
            version: s.int16("version")?,
            subscription: s.string_array("subscription")?,
            user_data: s.nullable_bytes("user_data")?,
        })
    }
}

/// A member's partitions, carried in SyncGroup `member_assignment`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConsumerProtocolMemberAssignment {
    pub version: i16,
    pub assignment: BTreeMap<String, Vec<i32>>,
    pub user_data: Option<Bytes>,
}

impl ConsumerProtocolMemberAssignment {
    pub fn new(assignment: BTreeMap<String, Vec<i32>>) -> Self {
        Self {
            version: CONSUMER_PROTOCOL_VERSION,
            assignment,
            user_data: None,
        }
    }

    /// Flatten into topic-partition pairs.
    pub fn partitions(&self) -> Vec<TopicPartition> {
        self.assignment
            .iter()
            .flat_map(|(topic, partitions)| {
                let topic: Arc<str> = topic.as_str().into();
                partitions
                    .iter()
                    .map(move |p| TopicPartition::new(topic.clone(), *p))
            })
            .collect()
    }

    pub fn encode(&self) -> Result<Bytes> {
        Struct::new(&CONSUMER_MEMBER_ASSIGNMENT)
            .with("version", self.version)
            .with_structs("assignment", &self.assignment, |s, (topic, partitions)| {
                s.with("topic", topic.as_str())
                    .with("partitions", partitions.clone())
            })
            .with("user_data", self.user_data.clone())
            .to_bytes()
    }

    /// An empty buffer means the member was assigned nothing.
    pub fn decode(bytes: Bytes) -> Result<Self> {
        if bytes.is_empty() {
            return Ok(Self::default());
        }
        let s = decode_struct(&CONSUMER_MEMBER_ASSIGNMENT, bytes)?;
        let mut assignment = BTreeMap::new();
        for topic in s.structs("assignment")? {
            assignment
                .entry(topic.string("topic")?)
                .or_insert_with(Vec::new)
                .extend(topic.int32_array("partitions")?);
        }
        Ok(Self {
            version: s.int16("version")?,
            assignment,
            user_data: s.nullable_bytes("user_data")?,
        })
    }
}
