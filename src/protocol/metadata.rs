//! Metadata API (key 3), versions 0 through 5.
//!
//! | Version | Request | Response |
//! |---------|---------|----------|
//! | v0 | empty topic list means all topics | brokers, topics |
//! | v1 | null topic list means all topics | + rack, controller_id, is_internal |
//! | v2 | | + cluster_id |
//! | v3 | | + leading throttle_time_ms |
//! | v4 | + allow_auto_topic_creation | |
//! | v5 | | + per-partition offline_replicas |

use super::schema::{FieldType, Schema, Struct, schema};
use super::{ApiKey, Message, Request, error_code};
use crate::constants::GROUP_METADATA_TOPIC;
use crate::error::{KafkaCode, Result};
use crate::types::NodeId;

const METADATA_REQUEST_V0: Schema = schema! {
    "topics" => FieldType::Array(&FieldType::String),
};

const METADATA_REQUEST_V1: Schema = schema! {
    "topics" => FieldType::NullableArray(&FieldType::String),
};

const METADATA_REQUEST_V4: Schema = schema! {
    "topics" => FieldType::NullableArray(&FieldType::String),
    "allow_auto_topic_creation" => FieldType::Boolean,
};

const METADATA_REQUEST: &[&Schema] = &[
    &METADATA_REQUEST_V0,
    &METADATA_REQUEST_V1,
    &METADATA_REQUEST_V1,
    &METADATA_REQUEST_V1,
    &METADATA_REQUEST_V4,
    &METADATA_REQUEST_V4,
];

const BROKER_V0: Schema = schema! {
    "node_id" => FieldType::Int32,
    "host" => FieldType::String,
    "port" => FieldType::Int32,
};

const BROKER_V1: Schema = schema! {
    "node_id" => FieldType::Int32,
    "host" => FieldType::String,
    "port" => FieldType::Int32,
    "rack" => FieldType::NullableString,
};

const PARTITION_V0: Schema = schema! {
    "error_code" => FieldType::Int16,
    "partition" => FieldType::Int32,
    "leader" => FieldType::Int32,
    "replicas" => FieldType::Array(&FieldType::Int32),
    "isr" => FieldType::Array(&FieldType::Int32),
};

const PARTITION_V5: Schema = schema! {
    "error_code" => FieldType::Int16,
    "partition" => FieldType::Int32,
    "leader" => FieldType::Int32,
    "replicas" => FieldType::Array(&FieldType::Int32),
    "isr" => FieldType::Array(&FieldType::Int32),
    "offline_replicas" => FieldType::Array(&FieldType::Int32),
};

const TOPIC_V0: Schema = schema! {
    "error_code" => FieldType::Int16,
    "topic" => FieldType::String,
    "partitions" => FieldType::Array(&FieldType::Struct(&PARTITION_V0)),
};

const TOPIC_V1: Schema = schema! {
    "error_code" => FieldType::Int16,
    "topic" => FieldType::String,
    "is_internal" => FieldType::Boolean,
    "partitions" => FieldType::Array(&FieldType::Struct(&PARTITION_V0)),
};

const TOPIC_V5: Schema = schema! {
    "error_code" => FieldType::Int16,
    "topic" => FieldType::String,
    "is_internal" => FieldType::Boolean,
    "partitions" => FieldType::Array(&FieldType::Struct(&PARTITION_V5)),
};

const METADATA_RESPONSE_V0: Schema = schema! {
    "brokers" => FieldType::Array(&FieldType::Struct(&BROKER_V0)),
    "topics" => FieldType::Array(&FieldType::Struct(&TOPIC_V0)),
};

const METADATA_RESPONSE_V1: Schema = schema! {
    "brokers" => FieldType::Array(&FieldType::Struct(&BROKER_V1)),
    "controller_id" => FieldType::Int32,
    "topics" => FieldType::Array(&FieldType::Struct(&TOPIC_V1)),
};

const METADATA_RESPONSE_V2: Schema = schema! {
    "brokers" => FieldType::Array(&FieldType::Struct(&BROKER_V1)),
    "cluster_id" => FieldType::NullableString,
    "controller_id" => FieldType::Int32,
    "topics" => FieldType::Array(&FieldType::Struct(&TOPIC_V1)),
};

const METADATA_RESPONSE_V3: Schema = schema! {
    "throttle_time_ms" => FieldType::Int32,
    "brokers" => FieldType::Array(&FieldType::Struct(&BROKER_V1)),
    "cluster_id" => FieldType::NullableString,
    "controller_id" => FieldType::Int32,
    "topics" => FieldType::Array(&FieldType::Struct(&TOPIC_V1)),
};

const METADATA_RESPONSE_V5: Schema = schema! {
    "throttle_time_ms" => FieldType::Int32,
    "brokers" => FieldType::Array(&FieldType::Struct(&BROKER_V1)),
    "cluster_id" => FieldType::NullableString,
    "controller_id" => FieldType::Int32,
    "topics" => FieldType::Array(&FieldType::Struct(&TOPIC_V5)),
};

const METADATA_RESPONSE: &[&Schema] = &[
    &METADATA_RESPONSE_V0,
    &METADATA_RESPONSE_V1,
    &METADATA_RESPONSE_V2,
    &METADATA_RESPONSE_V3,
    &METADATA_RESPONSE_V3,
    &METADATA_RESPONSE_V5,
];

/// Request topic metadata for some topics, or for every topic in the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataRequest {
    pub version: i16,
    /// `None` asks for the full topic catalog.
    pub topics: Option<Vec<String>>,
    /// v4+; older brokers decide from their own config.
    pub allow_auto_topic_creation: bool,
}

impl MetadataRequest {
    pub fn for_topics(version: i16, topics: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            version,
            topics: Some(topics.into_iter().map(Into::into).collect()),
            allow_auto_topic_creation: true,
        }
    }

    pub fn all_topics(version: i16) -> Self {
        Self {
            version,
            topics: None,
            allow_auto_topic_creation: true,
        }
    }
}

impl Message for MetadataRequest {
    const API_KEY: ApiKey = ApiKey::Metadata;

    fn schemas() -> &'static [&'static Schema] {
        METADATA_REQUEST
    }

    fn to_struct(&self, version: i16) -> Result<Struct> {
        // v0 has no null array: the empty list is what means "all topics".
        let topics = match (&self.topics, version) {
            (None, 0) => Some(Vec::new()),
            (topics, _) => topics.clone(),
        };
        Ok(Struct::new(Self::schema(version)?)
            .with("topics", topics)
            .with("allow_auto_topic_creation", self.allow_auto_topic_creation))
    }

    fn from_struct(version: i16, s: &Struct) -> Result<Self> {
        let topics = match s.opt_string_array("topics")? {
            Some(topics) if version == 0 && topics.is_empty() => None,
            topics => topics,
        };
        Ok(Self {
            version,
            topics,
            allow_auto_topic_creation: s.opt_boolean("allow_auto_topic_creation")?.unwrap_or(true),
        })
    }
}

impl Request for MetadataRequest {
    type Response = MetadataResponse;

    fn api_version(&self) -> i16 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataBroker {
    pub node_id: NodeId,
    pub host: String,
    pub port: i32,
    pub rack: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataPartition {
    pub error_code: KafkaCode,
    pub partition: i32,
    /// `-1` while a leader election is pending.
    pub leader: NodeId,
    pub replicas: Vec<NodeId>,
    pub isr: Vec<NodeId>,
    pub offline_replicas: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataTopic {
    pub error_code: KafkaCode,
    pub name: String,
    pub is_internal: bool,
    pub partitions: Vec<MetadataPartition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MetadataResponse {
    pub throttle_time_ms: i32,
    pub brokers: Vec<MetadataBroker>,
    pub cluster_id: Option<String>,
    /// `-1` when the broker did not report a controller (v0).
    pub controller_id: NodeId,
    pub topics: Vec<MetadataTopic>,
}

impl Message for MetadataResponse {
    const API_KEY: ApiKey = ApiKey::Metadata;

    fn schemas() -> &'static [&'static Schema] {
        METADATA_RESPONSE
    }

    fn to_struct(&self, version: i16) -> Result<Struct> {
        Ok(Struct::new(Self::schema(version)?)
            .with("throttle_time_ms", self.throttle_time_ms)
            .with_structs("brokers", &self.brokers, |s, b| {
                s.with("node_id", b.node_id)
                    .with("host", b.host.as_str())
                    .with("port", b.port)
                    .with("rack", b.rack.as_deref())
            })
            .with("cluster_id", self.cluster_id.as_deref())
            .with("controller_id", self.controller_id)
            .with_structs("topics", &self.topics, |s, t| {
                s.with("error_code", t.error_code)
                    .with("topic", t.name.as_str())
                    .with("is_internal", t.is_internal)
                    .with_structs("partitions", &t.partitions, |s, p| {
                        s.with("error_code", p.error_code)
                            .with("partition", p.partition)
                            .with("leader", p.leader)
                            .with("replicas", p.replicas.clone())
                            .with("isr", p.isr.clone())
                            .with("offline_replicas", p.offline_replicas.clone())
                    })
            }))
    }

    fn from_struct(_version: i16, s: &Struct) -> Result<Self> {
        let brokers = s
            .structs("brokers")?
            .into_iter()
            .map(|b| {
                Ok(MetadataBroker {
                    node_id: b.int32("node_id")?,
                    host: b.string("host")?,
                    port: b.int32("port")?,
                    rack: b.nullable_string("rack")?,
                })
            })
            .collect::<Result<_>>()?;

        let topics = s
            .structs("topics")?
            .into_iter()
            .map(|t| {
                let name = t.string("topic")?;
                let is_internal = t
                    .opt_boolean("is_internal")?
                    .unwrap_or(name == GROUP_METADATA_TOPIC);
                let partitions = t
                    .structs("partitions")?
                    .into_iter()
                    .map(|p| {
                        Ok(MetadataPartition {
                            error_code: error_code(p, "error_code")?,
                            partition: p.int32("partition")?,
                            leader: p.int32("leader")?,
                            replicas: p.int32_array("replicas")?,
                            isr: p.int32_array("isr")?,
                            offline_replicas: if p.schema().has_field("offline_replicas") {
                                p.int32_array("offline_replicas")?
                            } else {
                                Vec::new()
                            },
                        })
                    })
                    .collect::<Result<_>>()?;
                Ok(MetadataTopic {
                    error_code: error_code(t, "error_code")?,
                    name,
                    is_internal,
                    partitions,
                })
            })
            .collect::<Result<_>>()?;

        Ok(Self {
            throttle_time_ms: s.opt_int32("throttle_time_ms")?.unwrap_or(0),
            brokers,
            cluster_id: s.nullable_string("cluster_id")?,
            controller_id: s.opt_int32("controller_id")?.unwrap_or(-1),
            topics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use bytes::Bytes;

    fn sample_response() -> MetadataResponse {
        MetadataResponse {
            throttle_time_ms: 7,
            brokers: vec![
                MetadataBroker {
                    node_id: 1,
                    host: "b1".to_string(),
                    port: 9092,
                    rack: Some("r1".to_string()),
                },
                MetadataBroker {
                    node_id: 2,
                    host: "b2".to_string(),
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
                    leader: 2,
                    replicas: vec![1, 2],
                    isr: vec![2],
                    offline_replicas: vec![1],
                }],
            }],
        }
    }

    #[test]
    fn test_request_v0_all_topics_is_empty_array() {
        let bytes = MetadataRequest::all_topics(0).encode(0).unwrap();
        assert_eq!(&bytes[..], &[0, 0, 0, 0]);
        let decoded = MetadataRequest::decode(0, bytes).unwrap();
        assert_eq!(decoded.topics, None);
    }

    #[test]
    fn test_request_v1_all_topics_is_null_array() {
        let bytes = MetadataRequest::all_topics(1).encode(1).unwrap();
        assert_eq!(&bytes[..], &[0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn test_request_v4_auto_create_flag() {
        let mut req = MetadataRequest::for_topics(4, ["a"]);
        req.allow_auto_topic_creation = false;
        let decoded = MetadataRequest::decode(4, req.encode(4).unwrap()).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn test_response_v5_round_trip() {
        let resp = sample_response();
        let decoded = MetadataResponse::decode(5, resp.encode(5).unwrap()).unwrap();
        assert_eq!(decoded, resp);
    }

    #[test]
    fn test_response_v0_drops_newer_fields() {
        let decoded = MetadataResponse::decode(0, sample_response().encode(0).unwrap()).unwrap();
        assert_eq!(decoded.throttle_time_ms, 0);
        assert_eq!(decoded.controller_id, -1);
        assert_eq!(decoded.cluster_id, None);
        assert_eq!(decoded.brokers[0].rack, None);
        assert!(decoded.topics[0].partitions[0].offline_replicas.is_empty());
        assert_eq!(decoded.topics[0].partitions[0].isr, vec![2]);
    }

    #[test]
    fn test_response_v1_has_controller_but_no_cluster_id() {
        let decoded = MetadataResponse::decode(1, sample_response().encode(1).unwrap()).unwrap();
        assert_eq!(decoded.controller_id, 1);
        assert_eq!(decoded.cluster_id, None);
        assert_eq!(decoded.brokers[0].rack.as_deref(), Some("r1"));
    }

    #[test]
    fn test_v0_internal_topic_by_name() {
        let mut resp = sample_response();
        resp.topics[0].name = GROUP_METADATA_TOPIC.to_string();
        let decoded = MetadataResponse::decode(0, resp.encode(0).unwrap()).unwrap();
        assert!(decoded.topics[0].is_internal);
    }

    #[test]
    fn test_truncated_response_is_decode_error() {
        let bytes = sample_response().encode(3).unwrap();
        let truncated = bytes.slice(..bytes.len() - 3);
        assert!(matches!(
            MetadataResponse::decode(3, truncated),
            Err(Error::ProtocolDecode(_))
        ));
    }

    #[test]
    fn test_unsupported_version() {
        assert!(matches!(
            MetadataResponse::decode(6, Bytes::new()),
            Err(Error::UnsupportedVersion {
                api_key: ApiKey::Metadata,
                version: 6
            })
        ));
        assert_eq!(MetadataRequest::max_version(), 5);
    }
}
