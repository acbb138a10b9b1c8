//! Produce API (key 0), versions 0 through 5.
//!
//! Record batches travel as opaque bytes; building them is the producer's job.
//! Every response version after v0 ends with `throttle_time_ms`, which is
//! decoded as absent when a broker stops after the partition list.

use bytes::Bytes;

use super::schema::{FieldType, Schema, Struct, schema};
use super::{ApiKey, Message, Request, error_code};
use crate::error::{KafkaCode, Result};

const PARTITION_DATA: Schema = schema! {
    "partition" => FieldType::Int32,
    "record_set" => FieldType::NullableBytes,
};

const TOPIC_DATA: Schema = schema! {
    "topic" => FieldType::String,
    "data" => FieldType::Array(&FieldType::Struct(&PARTITION_DATA)),
};

const PRODUCE_REQUEST_V0: Schema = schema! {
    "acks" => FieldType::Int16,
    "timeout" => FieldType::Int32,
    "topic_data" => FieldType::Array(&FieldType::Struct(&TOPIC_DATA)),
};

const PRODUCE_REQUEST_V3: Schema = schema! {
    "transactional_id" => FieldType::NullableString,
    "acks" => FieldType::Int16,
    "timeout" => FieldType::Int32,
    "topic_data" => FieldType::Array(&FieldType::Struct(&TOPIC_DATA)),
};

const PRODUCE_REQUEST: &[&Schema] = &[
    &PRODUCE_REQUEST_V0,
    &PRODUCE_REQUEST_V0,
    &PRODUCE_REQUEST_V0,
    &PRODUCE_REQUEST_V3,
    &PRODUCE_REQUEST_V3,
    &PRODUCE_REQUEST_V3,
];

const PARTITION_RESPONSE_V0: Schema = schema! {
    "partition" => FieldType::Int32,
    "error_code" => FieldType::Int16,
    "base_offset" => FieldType::Int64,
};

const PARTITION_RESPONSE_V2: Schema = schema! {
    "partition" => FieldType::Int32,
    "error_code" => FieldType::Int16,
    "base_offset" => FieldType::Int64,
    "log_append_time" => FieldType::Int64,
};

const PARTITION_RESPONSE_V5: Schema = schema! {
    "partition" => FieldType::Int32,
    "error_code" => FieldType::Int16,
    "base_offset" => FieldType::Int64,
    "log_append_time" => FieldType::Int64,
    "log_start_offset" => FieldType::Int64,
};

const TOPIC_RESPONSE_V0: Schema = schema! {
    "topic" => FieldType::String,
    "partitions" => FieldType::Array(&FieldType::Struct(&PARTITION_RESPONSE_V0)),
};

const TOPIC_RESPONSE_V2: Schema = schema! {
    "topic" => FieldType::String,
    "partitions" => FieldType::Array(&FieldType::Struct(&PARTITION_RESPONSE_V2)),
};

const TOPIC_RESPONSE_V5: Schema = schema! {
    "topic" => FieldType::String,
    "partitions" => FieldType::Array(&FieldType::Struct(&PARTITION_RESPONSE_V5)),
};

const PRODUCE_RESPONSE_V0: Schema = schema! {
    "topics" => FieldType::Array(&FieldType::Struct(&TOPIC_RESPONSE_V0)),
};

const PRODUCE_RESPONSE_V1: Schema = schema! {
    "topics" => FieldType::Array(&FieldType::Struct(&TOPIC_RESPONSE_V0)),
    "throttle_time_ms" => FieldType::Int32,
}
.with_optional_tail(1);

const PRODUCE_RESPONSE_V2: Schema = schema! {
    "topics" => FieldType::Array(&FieldType::Struct(&TOPIC_RESPONSE_V2)),
    "throttle_time_ms" => FieldType::Int32,
}
.with_optional_tail(1);

const PRODUCE_RESPONSE_V5: Schema = schema! {
    "topics" => FieldType::Array(&FieldType::Struct(&TOPIC_RESPONSE_V5)),
    "throttle_time_ms" => FieldType::Int32,
}
.with_optional_tail(1);

const PRODUCE_RESPONSE: &[&Schema] = &[
    &PRODUCE_RESPONSE_V0,
    &PRODUCE_RESPONSE_V1,
    &PRODUCE_RESPONSE_V2,
    &PRODUCE_RESPONSE_V2,
    &PRODUCE_RESPONSE_V2,
    &PRODUCE_RESPONSE_V5,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducePartitionData {
    pub partition: i32,
    pub records: Option<Bytes>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProduceTopicData {
    pub topic: String,
    pub partitions: Vec<ProducePartitionData>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProduceRequest {
    pub version: i16,
    /// v3+.
    pub transactional_id: Option<String>,
    /// `0` = no response, `1` = leader only, `-1` = all in-sync replicas.
    pub acks: i16,
    pub timeout_ms: i32,
    pub topics: Vec<ProduceTopicData>,
}

impl Message for ProduceRequest {
    const API_KEY: ApiKey = ApiKey::Produce;

    fn schemas() -> &'static [&'static Schema] {
        PRODUCE_REQUEST
    }

    fn to_struct(&self, version: i16) -> Result<Struct> {
        Ok(Struct::new(Self::schema(version)?)
            .with("transactional_id", self.transactional_id.as_deref())
            .with("acks", self.acks)
            .with("timeout", self.timeout_ms)
            .with_structs("topic_data", &self.topics, |s, t| {
                s.with("topic", t.topic.as_str())
                    .with_structs("data", &t.partitions, |s, p| {
                        s.with("partition", p.partition)
                            .with("record_set", p.records.clone())
                    })
            }))
    }

    fn from_struct(version: i16, s: &Struct) -> Result<Self> {
        Ok(Self {
            version,
            transactional_id: s.nullable_string("transactional_id")?,
            acks: s.int16("acks")?,
            timeout_ms: s.int32("timeout")?,
            topics: s
                .structs("topic_data")?
                .into_iter()
                .map(|t| {
                    Ok(ProduceTopicData {
                        topic: t.string("topic")?,
                        partitions: t
                            .structs("data")?
                            .into_iter()
                            .map(|p| {
                                Ok(ProducePartitionData {
                                    partition: p.int32("partition")?,
                                    records: p.nullable_bytes("record_set")?,
                                })
                            })
                            .collect::<Result<_>>()?,
                    })
                })
                .collect::<Result<_>>()?,
        })
    }
}

impl Request for ProduceRequest {
    type Response = ProduceResponse;

    fn api_version(&self) -> i16 {
        self.version
    }

    fn expect_response(&self) -> bool {
        self.acks != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducePartitionResponse {
    pub partition: i32,
    pub error_code: KafkaCode,
    pub base_offset: i64,
    /// v2+; `-1` unless the topic uses log append time.
    pub log_append_time: i64,
    /// v5+.
    pub log_start_offset: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProduceTopicResponse {
    pub topic: String,
    pub partitions: Vec<ProducePartitionResponse>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProduceResponse {
    pub topics: Vec<ProduceTopicResponse>,
    pub throttle_time_ms: i32,
}

impl Message for ProduceResponse {
    const API_KEY: ApiKey = ApiKey::Produce;

    fn schemas() -> &'static [&'static Schema] {
        PRODUCE_RESPONSE
    }

    fn to_struct(&self, version: i16) -> Result<Struct> {
        Ok(Struct::new(Self::schema(version)?)
            .with_structs("topics", &self.topics, |s, t| {
                s.with("topic", t.topic.as_str())
                    .with_structs("partitions", &t.partitions, |s, p| {
                        s.with("partition", p.partition)
                            .with("error_code", p.error_code)
                            .with("base_offset", p.base_offset)
                            .with("log_append_time", p.log_append_time)
                            .with("log_start_offset", p.log_start_offset)
                    })
            })
            .with("throttle_time_ms", self.throttle_time_ms))
    }

    fn from_struct(_version: i16, s: &Struct) -> Result<Self> {
        Ok(Self {
            topics: s
                .structs("topics")?
                .into_iter()
                .map(|t| {
                    Ok(ProduceTopicResponse {
                        topic: t.string("topic")?,
                        partitions: t
                            .structs("partitions")?
                            .into_iter()
                            .map(|p| {
                                Ok(ProducePartitionResponse {
                                    partition: p.int32("partition")?,
                                    error_code: error_code(p, "error_code")?,
                                    base_offset: p.int64("base_offset")?,
                                    log_append_time: p.opt_int64("log_append_time")?.unwrap_or(-1),
                                    log_start_offset: p
                                        .opt_int64("log_start_offset")?
                                        .unwrap_or(-1),
                                })
                            })
                            .collect::<Result<_>>()?,
                    })
                })
                .collect::<Result<_>>()?,
            throttle_time_ms: s.opt_int32("throttle_time_ms")?.unwrap_or(0),
        })
    }
}
