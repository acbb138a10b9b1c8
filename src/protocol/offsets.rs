//! Offset APIs: ListOffsets (key 2), OffsetCommit (key 8), OffsetFetch (key 9).

use super::schema::{FieldType, Schema, Struct, Value, schema};
use super::{ApiKey, Message, Request, error_code};
use crate::constants::CONSUMER_REPLICA_ID;
use crate::error::{KafkaCode, Result};

// =============================================================================
// ListOffsets
// =============================================================================

const LIST_OFFSETS_PARTITION_V0: Schema = schema! {
    "partition" => FieldType::Int32,
    "timestamp" => FieldType::Int64,
    "max_num_offsets" => FieldType::Int32,
};

const LIST_OFFSETS_PARTITION_V1: Schema = schema! {
    "partition" => FieldType::Int32,
    "timestamp" => FieldType::Int64,
};

const LIST_OFFSETS_TOPIC_V0: Schema = schema! {
    "topic" => FieldType::String,
    "partitions" => FieldType::Array(&FieldType::Struct(&LIST_OFFSETS_PARTITION_V0)),
};

const LIST_OFFSETS_TOPIC_V1: Schema = schema! {
    "topic" => FieldType::String,
    "partitions" => FieldType::Array(&FieldType::Struct(&LIST_OFFSETS_PARTITION_V1)),
};

const LIST_OFFSETS_REQUEST_V0: Schema = schema! {
    "replica_id" => FieldType::Int32,
    "topics" => FieldType::Array(&FieldType::Struct(&LIST_OFFSETS_TOPIC_V0)),
};

const LIST_OFFSETS_REQUEST_V1: Schema = schema! {
    "replica_id" => FieldType::Int32,
    "topics" => FieldType::Array(&FieldType::Struct(&LIST_OFFSETS_TOPIC_V1)),
};

const LIST_OFFSETS_REQUEST_V2: Schema = schema! {
    "replica_id" => FieldType::Int32,
    "isolation_level" => FieldType::Int8,
    "topics" => FieldType::Array(&FieldType::Struct(&LIST_OFFSETS_TOPIC_V1)),
};

const LIST_OFFSETS_REQUEST: &[&Schema] = &[
    &LIST_OFFSETS_REQUEST_V0,
    &LIST_OFFSETS_REQUEST_V1,
    &LIST_OFFSETS_REQUEST_V2,
];

const LIST_OFFSETS_PARTITION_RESPONSE_V0: Schema = schema! {
    "partition" => FieldType::Int32,
    "error_code" => FieldType::Int16,
    "offsets" => FieldType::Array(&FieldType::Int64),
};

const LIST_OFFSETS_PARTITION_RESPONSE_V1: Schema = schema! {
    "partition" => FieldType::Int32,
    "error_code" => FieldType::Int16,
    "timestamp" => FieldType::Int64,
    "offset" => FieldType::Int64,
};

const LIST_OFFSETS_TOPIC_RESPONSE_V0: Schema = schema! {
    "topic" => FieldType::String,
    "partitions" => FieldType::Array(&FieldType::Struct(&LIST_OFFSETS_PARTITION_RESPONSE_V0)),
};

const LIST_OFFSETS_TOPIC_RESPONSE_V1: Schema = schema! {
    "topic" => FieldType::String,
    "partitions" => FieldType::Array(&FieldType::Struct(&LIST_OFFSETS_PARTITION_RESPONSE_V1)),
};

const LIST_OFFSETS_RESPONSE_V0: Schema = schema! {
    "topics" => FieldType::Array(&FieldType::Struct(&LIST_OFFSETS_TOPIC_RESPONSE_V0)),
};

const LIST_OFFSETS_RESPONSE_V1: Schema = schema! {
    "topics" => FieldType::Array(&FieldType::Struct(&LIST_OFFSETS_TOPIC_RESPONSE_V1)),
};

const LIST_OFFSETS_RESPONSE_V2: Schema = schema! {
    "throttle_time_ms" => FieldType::Int32,
    "topics" => FieldType::Array(&FieldType::Struct(&LIST_OFFSETS_TOPIC_RESPONSE_V1)),
};

const LIST_OFFSETS_RESPONSE: &[&Schema] = &[
    &LIST_OFFSETS_RESPONSE_V0,
    &LIST_OFFSETS_RESPONSE_V1,
    &LIST_OFFSETS_RESPONSE_V2,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOffsetsPartition {
    pub partition: i32,
    /// A timestamp, or `LATEST_TIMESTAMP` / `EARLIEST_TIMESTAMP`.
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOffsetsTopic {
    pub topic: String,
    pub partitions: Vec<ListOffsetsPartition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOffsetsRequest {
    pub version: i16,
    pub replica_id: i32,
    /// v2+; `0` = read uncommitted, `1` = read committed.
    pub isolation_level: i8,
    pub topics: Vec<ListOffsetsTopic>,
}

impl ListOffsetsRequest {
    pub fn new(version: i16, topics: Vec<ListOffsetsTopic>) -> Self {
        Self {
            version,
            replica_id: CONSUMER_REPLICA_ID,
            isolation_level: 0,
            topics,
        }
    }
}

impl Message for ListOffsetsRequest {
    const API_KEY: ApiKey = ApiKey::ListOffsets;

    fn schemas() -> &'static [&'static Schema] {
        LIST_OFFSETS_REQUEST
    }

    fn to_struct(&self, version: i16) -> Result<Struct> {
        Ok(Struct::new(Self::schema(version)?)
            .with("replica_id", self.replica_id)
            .with("isolation_level", self.isolation_level)
            .with_structs("topics", &self.topics, |s, t| {
                s.with("topic", t.topic.as_str())
                    .with_structs("partitions", &t.partitions, |s, p| {
                        // v0 asks for a list of offsets; one is all a client needs.
                        s.with("partition", p.partition)
                            .with("timestamp", p.timestamp)
                            .with("max_num_offsets", 1i32)
                    })
            }))
    }

    fn from_struct(version: i16, s: &Struct) -> Result<Self> {
        Ok(Self {
            version,
            replica_id: s.int32("replica_id")?,
            isolation_level: match s.get("isolation_level") {
                Some(_) => s.int8("isolation_level")?,
                None => 0,
            },
            topics: s
                .structs("topics")?
                .into_iter()
                .map(|t| {
                    Ok(ListOffsetsTopic {
                        topic: t.string("topic")?,
                        partitions: t
                            .structs("partitions")?
                            .into_iter()
                            .map(|p| {
                                Ok(ListOffsetsPartition {
                                    partition: p.int32("partition")?,
                                    timestamp: p.int64("timestamp")?,
                                })
                            })
                            .collect::<Result<_>>()?,
                    })
                })
                .collect::<Result<_>>()?,
        })
    }
}

impl Request for ListOffsetsRequest {
    type Response = ListOffsetsResponse;

    fn api_version(&self) -> i16 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOffsetsPartitionResponse {
    pub partition: i32,
    pub error_code: KafkaCode,
    /// v1+; `-1` when unknown.
    pub timestamp: i64,
    /// `-1` when the broker returned no offset.
    pub offset: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOffsetsTopicResponse {
    pub topic: String,
    pub partitions: Vec<ListOffsetsPartitionResponse>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListOffsetsResponse {
    pub throttle_time_ms: i32,
    pub topics: Vec<ListOffsetsTopicResponse>,
}

impl Message for ListOffsetsResponse {
    const API_KEY: ApiKey = ApiKey::ListOffsets;

    fn schemas() -> &'static [&'static Schema] {
        LIST_OFFSETS_RESPONSE
    }

    fn to_struct(&self, version: i16) -> Result<Struct> {
        Ok(Struct::new(Self::schema(version)?)
            .with("throttle_time_ms", self.throttle_time_ms)
            .with_structs("topics", &self.topics, |s, t| {
                s.with("topic", t.topic.as_str())
                    .with_structs("partitions", &t.partitions, |s, p| {
                        let offsets = if p.offset >= 0 { vec![p.offset] } else { Vec::new() };
                        s.with("partition", p.partition)
                            .with("error_code", p.error_code)
                            .with("timestamp", p.timestamp)
                            .with("offset", p.offset)
                            .with("offsets", offsets)
                    })
            }))
    }

    fn from_struct(_version: i16, s: &Struct) -> Result<Self> {
        Ok(Self {
            throttle_time_ms: s.opt_int32("throttle_time_ms")?.unwrap_or(0),
            topics: s
                .structs("topics")?
                .into_iter()
                .map(|t| {
                    Ok(ListOffsetsTopicResponse {
                        topic: t.string("topic")?,
                        partitions: t
                            .structs("partitions")?
                            .into_iter()
                            .map(|p| {
                                let offset = match p.opt_int64("offset")? {
                                    Some(offset) => offset,
                                    None => p.int64_array("offsets")?.first().copied().unwrap_or(-1),
                                };
                                Ok(ListOffsetsPartitionResponse {
                                    partition: p.int32("partition")?,
                                    error_code: error_code(p, "error_code")?,
                                    timestamp: p.opt_int64("timestamp")?.unwrap_or(-1),
                                    offset,
                                })
                            })
                            .collect::<Result<_>>()?,
                    })
                })
                .collect::<Result<_>>()?,
        })
    }
}

// =============================================================================
// OffsetCommit
// =============================================================================

const OFFSET_COMMIT_PARTITION_V0: Schema = schema! {
    "partition" => FieldType::Int32,
    "offset" => FieldType::Int64,
    "metadata" => FieldType::NullableString,
};

const OFFSET_COMMIT_PARTITION_V1: Schema = schema! {
    "partition" => FieldType::Int32,
    "offset" => FieldType::Int64,
    "timestamp" => FieldType::Int64,
    "metadata" => FieldType::NullableString,
};

const OFFSET_COMMIT_TOPIC_V0: Schema = schema! {
    "topic" => FieldType::String,
    "partitions" => FieldType::Array(&FieldType::Struct(&OFFSET_COMMIT_PARTITION_V0)),
};

const OFFSET_COMMIT_TOPIC_V1: Schema = schema! {
    "topic" => FieldType::String,
    "partitions" => FieldType::Array(&FieldType::Struct(&OFFSET_COMMIT_PARTITION_V1)),
};

const OFFSET_COMMIT_REQUEST_V0: Schema = schema! {
    "group_id" => FieldType::String,
    "topics" => FieldType::Array(&FieldType::Struct(&OFFSET_COMMIT_TOPIC_V0)),
};

const OFFSET_COMMIT_REQUEST_V1: Schema = schema! {
    "group_id" => FieldType::String,
    "generation_id" => FieldType::Int32,
    "member_id" => FieldType::String,
    "topics" => FieldType::Array(&FieldType::Struct(&OFFSET_COMMIT_TOPIC_V1)),
};

const OFFSET_COMMIT_REQUEST_V2: Schema = schema! {
    "group_id" => FieldType::String,
    "generation_id" => FieldType::Int32,
    "member_id" => FieldType::String,
    "retention_time" => FieldType::Int64,
    "topics" => FieldType::Array(&FieldType::Struct(&OFFSET_COMMIT_TOPIC_V0)),
};

const OFFSET_COMMIT_REQUEST: &[&Schema] = &[
    &OFFSET_COMMIT_REQUEST_V0,
    &OFFSET_COMMIT_REQUEST_V1,
    &OFFSET_COMMIT_REQUEST_V2,
];

const PARTITION_ERROR: Schema = schema! {
    "partition" => FieldType::Int32,
    "error_code" => FieldType::Int16,
};

const TOPIC_PARTITION_ERRORS: Schema = schema! {
    "topic" => FieldType::String,
    "partitions" => FieldType::Array(&FieldType::Struct(&PARTITION_ERROR)),
};

const OFFSET_COMMIT_RESPONSE_V0: Schema = schema! {
    "topics" => FieldType::Array(&FieldType::Struct(&TOPIC_PARTITION_ERRORS)),
};

const OFFSET_COMMIT_RESPONSE: &[&Schema] = &[
    &OFFSET_COMMIT_RESPONSE_V0,
    &OFFSET_COMMIT_RESPONSE_V0,
    &OFFSET_COMMIT_RESPONSE_V0,
];

/// Retention sentinel asking the broker to apply its configured default.
pub const DEFAULT_RETENTION_TIME: i64 = -1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetCommitPartition {
    pub partition: i32,
    pub offset: i64,
    /// v1 only; `-1` lets the broker use the receive time.
    pub timestamp: i64,
    pub metadata: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetCommitTopic {
    pub topic: String,
    pub partitions: Vec<OffsetCommitPartition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetCommitRequest {
    pub version: i16,
    pub group_id: String,
    /// v1+.
    pub generation_id: i32,
    /// v1+.
    pub member_id: String,
    /// v2+.
    pub retention_time_ms: i64,
    pub topics: Vec<OffsetCommitTopic>,
}

impl Message for OffsetCommitRequest {
    const API_KEY: ApiKey = ApiKey::OffsetCommit;

    fn schemas() -> &'static [&'static Schema] {
        OFFSET_COMMIT_REQUEST
    }

    fn to_struct(&self, version: i16) -> Result<Struct> {
        Ok(Struct::new(Self::schema(version)?)
            .with("group_id", self.group_id.as_str())
            .with("generation_id", self.generation_id)
            .with("member_id", self.member_id.as_str())
            .with("retention_time", self.retention_time_ms)
            .with_structs("topics", &self.topics, |s, t| {
                s.with("topic", t.topic.as_str())
                    .with_structs("partitions", &t.partitions, |s, p| {
                        s.with("partition", p.partition)
                            .with("offset", p.offset)
                            .with("timestamp", p.timestamp)
                            .with("metadata", p.metadata.as_deref())
                    })
            }))
    }

    fn from_struct(version: i16, s: &Struct) -> Result<Self> {
        Ok(Self {
            version,
            group_id: s.string("group_id")?,
            generation_id: s.opt_int32("generation_id")?.unwrap_or(-1),
            member_id: match s.get("member_id") {
                Some(_) => s.string("member_id")?,
                None => String::new(),
            },
            retention_time_ms: s.opt_int64("retention_time")?.unwrap_or(DEFAULT_RETENTION_TIME),
            topics: s
                .structs("topics")?
                .into_iter()
                .map(|t| {
                    Ok(OffsetCommitTopic {
                        topic: t.string("topic")?,
                        partitions: t
                            .structs("partitions")?
                            .into_iter()
                            .map(|p| {
                                Ok(OffsetCommitPartition {
                                    partition: p.int32("partition")?,
                                    offset: p.int64("offset")?,
                                    timestamp: p.opt_int64("timestamp")?.unwrap_or(-1),
                                    metadata: p.nullable_string("metadata")?,
                                })
                            })
                            .collect::<Result<_>>()?,
                    })
                })
                .collect::<Result<_>>()?,
        })
    }
}

impl Request for OffsetCommitRequest {
    type Response = OffsetCommitResponse;

    fn api_version(&self) -> i16 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPartitionErrors {
    pub topic: String,
    pub partitions: Vec<(i32, KafkaCode)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OffsetCommitResponse {
    pub topics: Vec<TopicPartitionErrors>,
}

impl Message for OffsetCommitResponse {
    const API_KEY: ApiKey = ApiKey::OffsetCommit;

    fn schemas() -> &'static [&'static Schema] {
        OFFSET_COMMIT_RESPONSE
    }

    fn to_struct(&self, version: i16) -> Result<Struct> {
        Ok(Struct::new(Self::schema(version)?).with_structs("topics", &self.topics, |s, t| {
            s.with("topic", t.topic.as_str())
                .with_structs("partitions", &t.partitions, |s, (partition, code)| {
                    s.with("partition", *partition).with("error_code", *code)
                })
        }))
    }

    fn from_struct(_version: i16, s: &Struct) -> Result<Self> {
        Ok(Self {
            topics: s
                .structs("topics")?
                .into_iter()
                .map(|t| {
                    Ok(TopicPartitionErrors {
                        topic: t.string("topic")?,
                        partitions: t
                            .structs("partitions")?
                            .into_iter()
                            .map(|p| Ok((p.int32("partition")?, error_code(p, "error_code")?)))
                            .collect::<Result<_>>()?,
                    })
                })
                .collect::<Result<_>>()?,
        })
    }
}

// =============================================================================
// OffsetFetch
// =============================================================================

const OFFSET_FETCH_TOPIC: Schema = schema! {
    "topic" => FieldType::String,
    "partitions" => FieldType::Array(&FieldType::Int32),
};

const OFFSET_FETCH_REQUEST_V0: Schema = schema! {
    "group_id" => FieldType::String,
    "topics" => FieldType::Array(&FieldType::Struct(&OFFSET_FETCH_TOPIC)),
};

const OFFSET_FETCH_REQUEST_V2: Schema = schema! {
    "group_id" => FieldType::String,
    "topics" => FieldType::NullableArray(&FieldType::Struct(&OFFSET_FETCH_TOPIC)),
};

const OFFSET_FETCH_REQUEST: &[&Schema] = &[
    &OFFSET_FETCH_REQUEST_V0,
    &OFFSET_FETCH_REQUEST_V0,
    &OFFSET_FETCH_REQUEST_V2,
];

const OFFSET_FETCH_PARTITION_RESPONSE: Schema = schema! {
    "partition" => FieldType::Int32,
    "offset" => FieldType::Int64,
    "metadata" => FieldType::NullableString,
    "error_code" => FieldType::Int16,
};

const OFFSET_FETCH_TOPIC_RESPONSE: Schema = schema! {
    "topic" => FieldType::String,
    "partitions" => FieldType::Array(&FieldType::Struct(&OFFSET_FETCH_PARTITION_RESPONSE)),
};

const OFFSET_FETCH_RESPONSE_V0: Schema = schema! {
    "topics" => FieldType::Array(&FieldType::Struct(&OFFSET_FETCH_TOPIC_RESPONSE)),
};

const OFFSET_FETCH_RESPONSE_V2: Schema = schema! {
    "topics" => FieldType::Array(&FieldType::Struct(&OFFSET_FETCH_TOPIC_RESPONSE)),
    "error_code" => FieldType::Int16,
}
.with_optional_tail(1);

const OFFSET_FETCH_RESPONSE: &[&Schema] = &[
    &OFFSET_FETCH_RESPONSE_V0,
    &OFFSET_FETCH_RESPONSE_V0,
    &OFFSET_FETCH_RESPONSE_V2,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetFetchRequest {
    pub version: i16,
    pub group_id: String,
    /// `None` (v2+) fetches every committed offset of the group.
    pub topics: Option<Vec<(String, Vec<i32>)>>,
}

impl Message for OffsetFetchRequest {
    const API_KEY: ApiKey = ApiKey::OffsetFetch;

    fn schemas() -> &'static [&'static Schema] {
        OFFSET_FETCH_REQUEST
    }

    fn to_struct(&self, version: i16) -> Result<Struct> {
        let s = Struct::new(Self::schema(version)?).with("group_id", self.group_id.as_str());
        Ok(match &self.topics {
            Some(topics) => s.with_structs("topics", topics, |s, (topic, partitions)| {
                s.with("topic", topic.as_str())
                    .with("partitions", partitions.clone())
            }),
            None if version >= 2 => s,
            None => s.with("topics", Value::Array(Vec::new())),
        })
    }

    fn from_struct(version: i16, s: &Struct) -> Result<Self> {
        let topics = s
            .opt_structs("topics")?
            .map(|topics| {
                topics
                    .into_iter()
                    .map(|t| Ok((t.string("topic")?, t.int32_array("partitions")?)))
                    .collect::<Result<Vec<_>>>()
            })
            .transpose()?;
        Ok(Self {
            version,
            group_id: s.string("group_id")?,
            topics,
        })
    }
}

impl Request for OffsetFetchRequest {
    type Response = OffsetFetchResponse;

    fn api_version(&self) -> i16 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetFetchPartitionResponse {
    pub partition: i32,
    /// `-1` when the group has no committed offset for the partition.
    pub offset: i64,
    pub metadata: Option<String>,
    pub error_code: KafkaCode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetFetchTopicResponse {
    pub topic: String,
    pub partitions: Vec<OffsetFetchPartitionResponse>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OffsetFetchResponse {
    pub topics: Vec<OffsetFetchTopicResponse>,
    /// v2+ group-level error.
    pub error_code: KafkaCode,
}

impl Message for OffsetFetchResponse {
    const API_KEY: ApiKey = ApiKey::OffsetFetch;

    fn schemas() -> &'static [&'static Schema] {
        OFFSET_FETCH_RESPONSE
    }

    fn to_struct(&self, version: i16) -> Result<Struct> {
        Ok(Struct::new(Self::schema(version)?)
            .with_structs("topics", &self.topics, |s, t| {
                s.with("topic", t.topic.as_str())
                    .with_structs("partitions", &t.partitions, |s, p| {
                        s.with("partition", p.partition)
                            .with("offset", p.offset)
                            .with("metadata", p.metadata.as_deref())
                            .with("error_code", p.error_code)
                    })
            })
            .with("error_code", self.error_code))
    }

    fn from_struct(_version: i16, s: &Struct) -> Result<Self> {
        Ok(Self {
            topics: s
                .structs("topics")?
                .into_iter()
                .map(|t| {
                    Ok(OffsetFetchTopicResponse {
                        topic: t.string("topic")?,
                        partitions: t
                            .structs("partitions")?
                            .into_iter()
                            .map(|p| {
                                Ok(OffsetFetchPartitionResponse {
                                    partition: p.int32("partition")?,
                                    offset: p.int64("offset")?,
                                    metadata: p.nullable_string("metadata")?,
                                    error_code: error_code(p, "error_code")?,
                                })
                            })
                            .collect::<Result<_>>()?,
                    })
                })
                .collect::<Result<_>>()?,
            error_code: s
                .opt_int16("error_code")?
                .map(KafkaCode::from_wire)
                .unwrap_or_default(),
        })
    }
}
