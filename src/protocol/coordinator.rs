//! FindCoordinator API (key 10), versions 0 and 1.

use super::schema::{FieldType, Schema, Struct, schema};
use super::{ApiKey, Message, Request, error_code};
use crate::error::{KafkaCode, Result};
use crate::types::NodeId;

const FIND_COORDINATOR_REQUEST_V0: Schema = schema! {
    "group_id" => FieldType::String,
};

const FIND_COORDINATOR_REQUEST_V1: Schema = schema! {
    "coordinator_key" => FieldType::String,
    "coordinator_type" => FieldType::Int8,
};

const FIND_COORDINATOR_REQUEST: &[&Schema] =
    &[&FIND_COORDINATOR_REQUEST_V0, &FIND_COORDINATOR_REQUEST_V1];

const FIND_COORDINATOR_RESPONSE_V0: Schema = schema! {
    "error_code" => FieldType::Int16,
    "coordinator_id" => FieldType::Int32,
    "host" => FieldType::String,
    "port" => FieldType::Int32,
};

const FIND_COORDINATOR_RESPONSE_V1: Schema = schema! {
    "throttle_time_ms" => FieldType::Int32,
    "error_code" => FieldType::Int16,
    "error_message" => FieldType::NullableString,
    "coordinator_id" => FieldType::Int32,
    "host" => FieldType::String,
    "port" => FieldType::Int32,
};

const FIND_COORDINATOR_RESPONSE: &[&Schema] =
    &[&FIND_COORDINATOR_RESPONSE_V0, &FIND_COORDINATOR_RESPONSE_V1];

/// What kind of coordinator to look up (v1+).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoordinatorType {
    #[default]
    Group,
    Transaction,
}

impl CoordinatorType {
    fn as_i8(self) -> i8 {
        match self {
            CoordinatorType::Group => 0,
            CoordinatorType::Transaction => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindCoordinatorRequest {
    pub version: i16,
    /// Group id, or transactional id for transaction coordinators.
    pub key: String,
    pub coordinator_type: CoordinatorType,
}

impl FindCoordinatorRequest {
    pub fn group(version: i16, group_id: impl Into<String>) -> Self {
        Self {
            version,
            key: group_id.into(),
            coordinator_type: CoordinatorType::Group,
        }
    }
}

impl Message for FindCoordinatorRequest {
    const API_KEY: ApiKey = ApiKey::FindCoordinator;

    fn schemas() -> &'static [&'static Schema] {
        FIND_COORDINATOR_REQUEST
    }

    fn to_struct(&self, version: i16) -> Result<Struct> {
        Ok(Struct::new(Self::schema(version)?)
            .with("group_id", self.key.as_str())
            .with("coordinator_key", self.key.as_str())
            .with("coordinator_type", self.coordinator_type.as_i8()))
    }

    fn from_struct(version: i16, s: &Struct) -> Result<Self> {
        let key = if version == 0 {
            s.string("group_id")?
        } else {
            s.string("coordinator_key")?
        };
        let coordinator_type = match s.get("coordinator_type") {
            Some(_) if s.int8("coordinator_type")? == 1 => CoordinatorType::Transaction,
            _ => CoordinatorType::Group,
        };
        Ok(Self {
            version,
            key,
            coordinator_type,
        })
    }
}

impl Request for FindCoordinatorRequest {
    type Response = FindCoordinatorResponse;

    fn api_version(&self) -> i16 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FindCoordinatorResponse {
    pub throttle_time_ms: i32,
    pub error_code: KafkaCode,
    pub error_message: Option<String>,
    pub coordinator_id: NodeId,
    pub host: String,
    pub port: i32,
}

impl Message for FindCoordinatorResponse {
    const API_KEY: ApiKey = ApiKey::FindCoordinator;

    fn schemas() -> &'static [&'static Schema] {
        FIND_COORDINATOR_RESPONSE
    }

    fn to_struct(&self, version: i16) -> Result<Struct> {
        Ok(Struct::new(Self::schema(version)?)
            .with("throttle_time_ms", self.throttle_time_ms)
            .with("error_code", self.error_code)
            .with("error_message", self.error_message.as_deref())
            .with("coordinator_id", self.coordinator_id)
            .with("host", self.host.as_str())
            .with("port", self.port))
    }

    fn from_struct(_version: i16, s: &Struct) -> Result<Self> {
        Ok(Self {
            throttle_time_ms: s.opt_int32("throttle_time_ms")?.unwrap_or(0),
            error_code: error_code(s, "error_code")?,
            error_message: s.nullable_string("error_message")?,
            coordinator_id: s.int32("coordinator_id")?,
            host: s.string("host")?,
            port: s.int32("port")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_v0_and_v1_share_key() {
        let req = FindCoordinatorRequest::group(0, "payments");
        let v0 = FindCoordinatorRequest::decode(0, req.encode(0).unwrap()).unwrap();
        assert_eq!(v0.key, "payments");

        let mut req = FindCoordinatorRequest::group(1, "txn-1");
        req.coordinator_type = CoordinatorType::Transaction;
        let v1 = FindCoordinatorRequest::decode(1, req.encode(1).unwrap()).unwrap();
        assert_eq!(v1, req);
    }

    #[test]
    fn test_response_versions() {
        let resp = FindCoordinatorResponse {
            throttle_time_ms: 4,
            error_code: KafkaCode::None,
            error_message: Some("ok".to_string()),
            coordinator_id: 3,
            host: "broker-3".to_string(),
            port: 9092,
        };
        assert_eq!(FindCoordinatorResponse::decode(1, resp.encode(1).unwrap()).unwrap(), resp);

        let v0 = FindCoordinatorResponse::decode(0, resp.encode(0).unwrap()).unwrap();
        assert_eq!(v0.throttle_time_ms, 0);
        assert_eq!(v0.error_message, None);
        assert_eq!(v0.coordinator_id, 3);
        assert_eq!(v0.host, "broker-3");
    }
}
