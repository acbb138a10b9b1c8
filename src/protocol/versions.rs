//! ApiVersions API (key 18) and client/broker version negotiation.

use super::schema::{FieldType, Schema, Struct, schema};
use super::{ApiKey, Message, Request, error_code};
use crate::error::{KafkaCode, Result};

const API_VERSIONS_REQUEST_V0: Schema = schema! {};

const API_VERSIONS_REQUEST: &[&Schema] = &[&API_VERSIONS_REQUEST_V0, &API_VERSIONS_REQUEST_V0];

const API_VERSION_RANGE: Schema = schema! {
    "api_key" => FieldType::Int16,
    "min_version" => FieldType::Int16,
    "max_version" => FieldType::Int16,
};

const API_VERSIONS_RESPONSE_V0: Schema = schema! {
    "error_code" => FieldType::Int16,
    "api_versions" => FieldType::Array(&FieldType::Struct(&API_VERSION_RANGE)),
};

const API_VERSIONS_RESPONSE_V1: Schema = schema! {
    "error_code" => FieldType::Int16,
    "api_versions" => FieldType::Array(&FieldType::Struct(&API_VERSION_RANGE)),
    "throttle_time_ms" => FieldType::Int32,
}
.with_optional_tail(1);

const API_VERSIONS_RESPONSE: &[&Schema] = &[&API_VERSIONS_RESPONSE_V0, &API_VERSIONS_RESPONSE_V1];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiVersionsRequest {
    pub version: i16,
}

impl Message for ApiVersionsRequest {
    const API_KEY: ApiKey = ApiKey::ApiVersions;

    fn schemas() -> &'static [&'static Schema] {
        API_VERSIONS_REQUEST
    }

    fn to_struct(&self, version: i16) -> Result<Struct> {
        Ok(Struct::new(Self::schema(version)?))
    }

    fn from_struct(version: i16, _s: &Struct) -> Result<Self> {
        Ok(Self { version })
    }
}

impl Request for ApiVersionsRequest {
    type Response = ApiVersionsResponse;

    fn api_version(&self) -> i16 {
        self.version
    }
}

/// Versions a broker supports for one API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiVersionRange {
    pub api_key: i16,
    pub min_version: i16,
    pub max_version: i16,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ApiVersionsResponse {
    pub error_code: KafkaCode,
    pub api_versions: Vec<ApiVersionRange>,
    pub throttle_time_ms: i32,
}

impl ApiVersionsResponse {
    /// Highest version both this client (`0..=client_max`) and the broker
    /// support, or `None` when the ranges do not overlap or the broker does
    /// not know the API.
    pub fn negotiate(&self, api_key: ApiKey, client_max: i16) -> Option<i16> {
        let key = i16::from(api_key);
        let range = self.api_versions.iter().find(|r| r.api_key == key)?;
        let version = range.max_version.min(client_max);
        (version >= range.min_version && version >= 0).then_some(version)
    }
}

impl Message for ApiVersionsResponse {
    const API_KEY: ApiKey = ApiKey::ApiVersions;

    fn schemas() -> &'static [&'static Schema] {
        API_VERSIONS_RESPONSE
    }

    fn to_struct(&self, version: i16) -> Result<Struct> {
        Ok(Struct::new(Self::schema(version)?)
            .with("error_code", self.error_code)
            .with_structs("api_versions", &self.api_versions, |s, r| {
                s.with("api_key", r.api_key)
                    .with("min_version", r.min_version)
                    .with("max_version", r.max_version)
            })
            .with("throttle_time_ms", self.throttle_time_ms))
    }

    fn from_struct(_version: i16, s: &Struct) -> Result<Self> {
        Ok(Self {
            error_code: error_code(s, "error_code")?,
            api_versions: s
                .structs("api_versions")?
                .into_iter()
                .map(|r| {
                    Ok(ApiVersionRange {
                        api_key: r.int16("api_key")?,
                        min_version: r.int16("min_version")?,
                        max_version: r.int16("max_version")?,
                    })
                })
                .collect::<Result<_>>()?,
            throttle_time_ms: s.opt_int32("throttle_time_ms")?.unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker_versions() -> ApiVersionsResponse {
        ApiVersionsResponse {
            error_code: KafkaCode::None,
            api_versions: vec![
                ApiVersionRange {
                    api_key: 3,
                    min_version: 0,
                    max_version: 9,
                },
                ApiVersionRange {
                    api_key: 0,
                    min_version: 3,
                    max_version: 3,
                },
                ApiVersionRange {
                    api_key: 12,
                    min_version: 2,
                    max_version: 4,
                },
            ],
            throttle_time_ms: 0,
        }
    }

    #[test]
    fn test_negotiate_picks_highest_common_version() {
        let resp = broker_versions();
        assert_eq!(resp.negotiate(ApiKey::Metadata, 5), Some(5));
        assert_eq!(resp.negotiate(ApiKey::Produce, 5), Some(3));
        // Broker requires v2+, client speaks at most v1.
        assert_eq!(resp.negotiate(ApiKey::Heartbeat, 1), None);
        assert_eq!(resp.negotiate(ApiKey::SyncGroup, 1), None);
    }

    #[test]
    fn test_empty_request_body() {
        assert!(ApiVersionsRequest { version: 1 }.encode(1).unwrap().is_empty());
    }

    #[test]
    fn test_v1_response_without_throttle() {
        let resp = broker_versions();
        let decoded = ApiVersionsResponse::decode(1, resp.encode(0).unwrap()).unwrap();
        assert_eq!(decoded, resp);
    }
}
