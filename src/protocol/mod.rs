//! Versioned Kafka wire protocol, client side.
//!
//! Requests are encoded and responses decoded through the schema engine in
//! [`schema`]: every (API key, version) pair has its own [`Schema`], and a
//! typed message converts itself to and from a [`Struct`] for a given version.
//! Dispatch happens on the version number at encode/decode time.
//!
//! # Framing
//!
//! ```text
//! request:  [size:i32][api_key:i16][api_version:i16][correlation_id:i32][client_id:string][payload]
//! response: [size:i32][correlation_id:i32][payload]
//! ```
//!
//! [`ClientCodec`] owns correlation ids for one connection and remembers which
//! (api key, version) each in-flight request was sent with, so the matching
//! response can be decoded with the right schema. A frame that fails to decode
//! only fails its own request.

pub mod schema;

mod coordinator;
mod groups;
mod metadata;
mod offsets;
mod produce;
mod versions;

use std::collections::HashMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use nom::{
    IResult,
    number::complete::{be_i16, be_i32},
};
use nombytes::NomBytes;

use crate::constants::{FRAME_SIZE_PREFIX, MAX_FRAME_SIZE};
use crate::encode::ToByte;
use crate::error::{Error, KafkaCode, Result};
use crate::parser::parse_nullable_string;
pub use schema::{Field, FieldType, Schema, Struct, Value};

pub use coordinator::*;
pub use groups::*;
pub use metadata::*;
pub use offsets::*;
pub use produce::*;
pub use versions::*;

/// API keys used by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiKey {
    Produce,
    ListOffsets,
    Metadata,
    OffsetCommit,
    OffsetFetch,
    FindCoordinator,
    JoinGroup,
    Heartbeat,
    LeaveGroup,
    SyncGroup,
    ApiVersions,
    Unknown(i16),
}

impl From<i16> for ApiKey {
    fn from(value: i16) -> Self {
        match value {
            0 => ApiKey::Produce,
            2 => ApiKey::ListOffsets,
            3 => ApiKey::Metadata,
            8 => ApiKey::OffsetCommit,
            9 => ApiKey::OffsetFetch,
            10 => ApiKey::FindCoordinator,
            11 => ApiKey::JoinGroup,
            12 => ApiKey::Heartbeat,
            13 => ApiKey::LeaveGroup,
            14 => ApiKey::SyncGroup,
            18 => ApiKey::ApiVersions,
            n => ApiKey::Unknown(n),
        }
    }
}

impl From<ApiKey> for i16 {
    fn from(key: ApiKey) -> Self {
        match key {
            ApiKey::Produce => 0,
            ApiKey::ListOffsets => 2,
            ApiKey::Metadata => 3,
            ApiKey::OffsetCommit => 8,
            ApiKey::OffsetFetch => 9,
            ApiKey::FindCoordinator => 10,
            ApiKey::JoinGroup => 11,
            ApiKey::Heartbeat => 12,
            ApiKey::LeaveGroup => 13,
            ApiKey::SyncGroup => 14,
            ApiKey::ApiVersions => 18,
            ApiKey::Unknown(n) => n,
        }
    }
}

impl ApiKey {
    /// Returns a static string name for this API key.
    ///
    /// For Unknown variants, returns "unknown" (not the numeric value).
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiKey::Produce => "Produce",
            ApiKey::ListOffsets => "ListOffsets",
            ApiKey::Metadata => "Metadata",
            ApiKey::OffsetCommit => "OffsetCommit",
            ApiKey::OffsetFetch => "OffsetFetch",
            ApiKey::FindCoordinator => "FindCoordinator",
            ApiKey::JoinGroup => "JoinGroup",
            ApiKey::Heartbeat => "Heartbeat",
            ApiKey::LeaveGroup => "LeaveGroup",
            ApiKey::SyncGroup => "SyncGroup",
            ApiKey::ApiVersions => "ApiVersions",
            ApiKey::Unknown(_) => "unknown",
        }
    }
}

impl From<KafkaCode> for Value {
    fn from(code: KafkaCode) -> Self {
        Value::Int16(code as i16)
    }
}

/// Read a broker error code field.
pub(crate) fn error_code(s: &Struct, name: &str) -> Result<KafkaCode> {
    Ok(KafkaCode::from_wire(s.int16(name)?))
}

/// Look up the schema for `version` in a table indexed by version.
pub fn versioned_schema(
    api_key: ApiKey,
    schemas: &'static [&'static Schema],
    version: i16,
) -> Result<&'static Schema> {
    usize::try_from(version)
        .ok()
        .and_then(|v| schemas.get(v))
        .copied()
        .ok_or(Error::UnsupportedVersion { api_key, version })
}

/// A request or response body with one schema per supported version.
///
/// Typed messages hold version-independent data. [`Message::to_struct`]
/// writes the fields that exist in the requested version and
/// [`Message::from_struct`] defaults the ones that don't.
pub trait Message: Sized {
    const API_KEY: ApiKey;

    /// Schemas indexed by version, starting at v0.
    fn schemas() -> &'static [&'static Schema];

    fn schema(version: i16) -> Result<&'static Schema> {
        versioned_schema(Self::API_KEY, Self::schemas(), version)
    }

    /// Highest version this client can encode and decode.
    fn max_version() -> i16 {
        Self::schemas().len().saturating_sub(1) as i16
    }

    fn to_struct(&self, version: i16) -> Result<Struct>;

    fn from_struct(version: i16, s: &Struct) -> Result<Self>;

    fn encode(&self, version: i16) -> Result<Bytes> {
        self.to_struct(version)?.to_bytes()
    }

    fn decode(version: i16, bytes: Bytes) -> Result<Self> {
        let decoded = schema::decode(Self::schema(version)?, bytes)?;
        Self::from_struct(version, &decoded)
    }
}

/// A request: a message that carries its own version and names its response.
pub trait Request: Message {
    type Response: Message;

    fn api_version(&self) -> i16;

    /// Whether the broker answers this request. `false` only for
    /// fire-and-forget variants such as produce with `acks = 0`.
    fn expect_response(&self) -> bool {
        true
    }
}

/// Request envelope fields that precede the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeader {
    pub api_key: ApiKey,
    pub api_version: i16,
    pub correlation_id: i32,
    pub client_id: Option<String>,
}

impl ToByte for RequestHeader {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        i16::from(self.api_key).encode(buffer)?;
        self.api_version.encode(buffer)?;
        self.correlation_id.encode(buffer)?;
        self.client_id.as_deref().encode(buffer)
    }
}

/// Encode a complete size-prefixed request frame.
pub fn encode_request_frame<R: Request>(header: &RequestHeader, request: &R) -> Result<Bytes> {
    let body = request.encode(header.api_version)?;
    let mut frame = BytesMut::with_capacity(FRAME_SIZE_PREFIX + 32 + body.len());
    frame.put_i32(0);
    header.encode(&mut frame)?;
    frame.put_slice(&body);

    let size = frame.len() - FRAME_SIZE_PREFIX;
    let size = i32::try_from(size)
        .ok()
        .filter(|_| size <= MAX_FRAME_SIZE)
        .ok_or_else(|| Error::ProtocolEncode(format!("request frame of {} bytes", size)))?;
    frame[..FRAME_SIZE_PREFIX].copy_from_slice(&size.to_be_bytes());
    Ok(frame.freeze())
}

/// Parse a request envelope (size prefix already removed).
pub fn parse_request_header(s: NomBytes) -> IResult<NomBytes, RequestHeader> {
    let (s, api_key) = be_i16(s)?;
    let (s, api_version) = be_i16(s)?;
    let (s, correlation_id) = be_i32(s)?;
    let (s, client_id) = parse_nullable_string(s)?;
    Ok((
        s,
        RequestHeader {
            api_key: ApiKey::from(api_key),
            api_version,
            correlation_id,
            client_id,
        },
    ))
}

/// Response envelope: only the correlation id precedes the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    pub correlation_id: i32,
}

pub fn parse_response_header(s: NomBytes) -> IResult<NomBytes, ResponseHeader> {
    let (s, correlation_id) = be_i32(s)?;
    Ok((s, ResponseHeader { correlation_id }))
}

/// Split one complete frame off the front of `buf`.
///
/// Returns `Ok(None)` until the whole frame has arrived. The returned bytes
/// exclude the size prefix. Negative or oversized sizes are a decode error.
pub fn split_frame(buf: &mut BytesMut) -> Result<Option<Bytes>> {
    if buf.len() < FRAME_SIZE_PREFIX {
        return Ok(None);
    }
    let size = i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let size = usize::try_from(size)
        .ok()
        .filter(|size| *size <= MAX_FRAME_SIZE)
        .ok_or_else(|| Error::ProtocolDecode(format!("invalid frame size {}", size)))?;
    if buf.len() < FRAME_SIZE_PREFIX + size {
        return Ok(None);
    }
    buf.advance(FRAME_SIZE_PREFIX);
    Ok(Some(buf.split_to(size).freeze()))
}

/// What was sent under a correlation id that is still waiting for a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InFlight {
    pub api_key: ApiKey,
    pub api_version: i16,
}

/// A response frame matched to the request it answers.
#[derive(Debug, Clone)]
pub struct ResponseFrame {
    pub correlation_id: i32,
    pub api_key: ApiKey,
    pub api_version: i16,
    pub body: Bytes,
}

impl ResponseFrame {
    /// Decode the body with the schema of the version the request was sent at.
    pub fn decode<M: Message>(self) -> Result<M> {
        if M::API_KEY != self.api_key {
            return Err(Error::ProtocolDecode(format!(
                "correlation id {} belongs to {}, not {}",
                self.correlation_id,
                self.api_key.as_str(),
                M::API_KEY.as_str()
            )));
        }
        M::decode(self.api_version, self.body)
    }
}

/// Per-connection correlation id and in-flight bookkeeping.
#[derive(Debug)]
pub struct ClientCodec {
    client_id: Option<String>,
    next_correlation_id: i32,
    in_flight: HashMap<i32, InFlight>,
}

impl ClientCodec {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: Some(client_id.into()),
            next_correlation_id: 0,
            in_flight: HashMap::new(),
        }
    }

    fn next_correlation_id(&mut self) -> i32 {
        let id = self.next_correlation_id;
        self.next_correlation_id = if id == i32::MAX { 0 } else { id + 1 };
        id
    }

    /// Encode `request` into a frame and register it as in flight when a
    /// response is expected.
    pub fn encode_request<R: Request>(&mut self, request: &R) -> Result<(i32, Bytes)> {
        let header = RequestHeader {
            api_key: R::API_KEY,
            api_version: request.api_version(),
            correlation_id: self.next_correlation_id(),
            client_id: self.client_id.clone(),
        };
        let frame = encode_request_frame(&header, request)?;
        if request.expect_response() {
            self.in_flight.insert(
                header.correlation_id,
                InFlight {
                    api_key: header.api_key,
                    api_version: header.api_version,
                },
            );
        }
        tracing::trace!(
            api_key = header.api_key.as_str(),
            api_version = header.api_version,
            correlation_id = header.correlation_id,
            "Encoded request"
        );
        Ok((header.correlation_id, frame))
    }

    /// Match a response frame (size prefix already removed) to its request.
    ///
    /// The pending entry is consumed whether or not the body later decodes.
    pub fn resolve(&mut self, frame: Bytes) -> Result<ResponseFrame> {
        let (rest, header) = parse_response_header(NomBytes::new(frame))
            .map_err(|_| Error::ProtocolDecode("response shorter than its header".to_string()))?;
        let pending = self.in_flight.remove(&header.correlation_id).ok_or_else(|| {
            Error::ProtocolDecode(format!(
                "no request in flight for correlation id {}",
                header.correlation_id
            ))
        })?;
        Ok(ResponseFrame {
            correlation_id: header.correlation_id,
            api_key: pending.api_key,
            api_version: pending.api_version,
            body: rest.into_bytes(),
        })
    }

    /// Forget a request whose response will never be read (timeout, cancellation).
    pub fn abandon(&mut self, correlation_id: i32) -> Option<InFlight> {
        self.in_flight.remove(&correlation_id)
    }

    /// Drop every pending entry, e.g. after the connection closed.
    pub fn fail_all(&mut self) -> Vec<i32> {
        self.in_flight.drain().map(|(id, _)| id).collect()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_pending(&self, correlation_id: i32) -> bool {
        self.in_flight.contains_key(&correlation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_frame(correlation_id: i32, body: &[u8]) -> Bytes {
        let mut frame = BytesMut::new();
        frame.put_i32(correlation_id);
        frame.put_slice(body);
        frame.freeze()
    }

    #[test]
    fn test_api_key_round_trip() {
        for key in [0i16, 2, 3, 8, 9, 10, 11, 12, 13, 14, 18] {
            assert_eq!(i16::from(ApiKey::from(key)), key);
        }
        assert_eq!(ApiKey::from(1), ApiKey::Unknown(1));
        assert_eq!(ApiKey::Unknown(1).as_str(), "unknown");
    }

    #[test]
    fn test_request_frame_layout() {
        let mut codec = ClientCodec::new("client");
        let (id, frame) = codec.encode_request(&HeartbeatRequest::new(0, "g", 3, "m")).unwrap();
        assert_eq!(id, 0);

        let mut buf = frame.clone();
        let size = buf.get_i32() as usize;
        assert_eq!(size, frame.len() - 4);
        assert_eq!(buf.get_i16(), 12);
        assert_eq!(buf.get_i16(), 0);
        assert_eq!(buf.get_i32(), 0);
        assert_eq!(buf.get_i16(), 6);
        assert_eq!(&buf[..6], b"client");
    }

    #[test]
    fn test_parse_request_header() {
        let mut codec = ClientCodec::new("client");
        codec.encode_request(&HeartbeatRequest::new(0, "g", 3, "m")).unwrap();
        let (_, frame) = codec.encode_request(&HeartbeatRequest::new(1, "g", 3, "m")).unwrap();

        let (body, header) = parse_request_header(NomBytes::new(frame.slice(4..))).unwrap();
        assert_eq!(header.api_key, ApiKey::Heartbeat);
        assert_eq!(header.api_version, 1);
        assert_eq!(header.correlation_id, 1);
        assert_eq!(header.client_id.as_deref(), Some("client"));
        let request = HeartbeatRequest::decode(1, body.into_bytes()).unwrap();
        assert_eq!(request.member_id, "m");
    }

    #[test]
    fn test_correlation_ids_increase() {
        let mut codec = ClientCodec::new("c");
        let req = HeartbeatRequest::new(0, "g", 1, "m");
        let ids: Vec<i32> = (0..3).map(|_| codec.encode_request(&req).unwrap().0).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(codec.in_flight(), 3);
    }

    #[test]
    fn test_correlation_id_wraps() {
        let mut codec = ClientCodec::new("c");
        codec.next_correlation_id = i32::MAX;
        assert_eq!(codec.next_correlation_id(), i32::MAX);
        assert_eq!(codec.next_correlation_id(), 0);
    }

    #[test]
    fn test_unsupported_version_not_registered() {
        let mut codec = ClientCodec::new("c");
        let err = codec
            .encode_request(&HeartbeatRequest::new(9, "g", 1, "m"))
            .unwrap_err();
        assert_eq!(
            err,
            Error::UnsupportedVersion {
                api_key: ApiKey::Heartbeat,
                version: 9
            }
        );
        assert_eq!(codec.in_flight(), 0);
    }

    #[test]
    fn test_resolve_and_decode() {
        let mut codec = ClientCodec::new("c");
        let (id, _) = codec.encode_request(&HeartbeatRequest::new(1, "g", 1, "m")).unwrap();

        let body = HeartbeatResponse {
            throttle_time_ms: 5,
            error_code: KafkaCode::None,
        }
        .encode(1)
        .unwrap();
        let resolved = codec.resolve(response_frame(id, &body)).unwrap();
        assert_eq!(resolved.api_version, 1);

        let response: HeartbeatResponse = resolved.decode().unwrap();
        assert_eq!(response.throttle_time_ms, 5);
        assert_eq!(codec.in_flight(), 0);
    }

    #[test]
    fn test_bad_frame_only_fails_its_request() {
        let mut codec = ClientCodec::new("c");
        let req = HeartbeatRequest::new(0, "g", 1, "m");
        let (first, _) = codec.encode_request(&req).unwrap();
        let (second, _) = codec.encode_request(&req).unwrap();

        // Truncated body for the first request.
        let resolved = codec.resolve(response_frame(first, &[0])).unwrap();
        assert!(matches!(
            resolved.decode::<HeartbeatResponse>(),
            Err(Error::ProtocolDecode(_))
        ));

        assert!(codec.is_pending(second));
        let body = HeartbeatResponse::default().encode(0).unwrap();
        let response: HeartbeatResponse = codec
            .resolve(response_frame(second, &body))
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(response.error_code, KafkaCode::None);
    }

    #[test]
    fn test_unknown_correlation_id() {
        let mut codec = ClientCodec::new("c");
        let (id, _) = codec
            .encode_request(&HeartbeatRequest::new(0, "g", 1, "m"))
            .unwrap();
        let err = codec.resolve(response_frame(id + 7, &[0, 0])).unwrap_err();
        assert!(matches!(err, Error::ProtocolDecode(_)));
        assert!(codec.is_pending(id));
    }

    #[test]
    fn test_decode_with_wrong_message_type() {
        let mut codec = ClientCodec::new("c");
        let (id, _) = codec
            .encode_request(&HeartbeatRequest::new(0, "g", 1, "m"))
            .unwrap();
        let resolved = codec.resolve(response_frame(id, &[0, 0])).unwrap();
        assert!(resolved.decode::<LeaveGroupResponse>().is_err());
    }

    #[test]
    fn test_abandon_and_fail_all() {
        let mut codec = ClientCodec::new("c");
        let req = HeartbeatRequest::new(0, "g", 1, "m");
        let (a, _) = codec.encode_request(&req).unwrap();
        let (b, _) = codec.encode_request(&req).unwrap();
        assert!(codec.abandon(a).is_some());
        assert_eq!(codec.fail_all(), vec![b]);
        assert_eq!(codec.in_flight(), 0);
    }

    #[test]
    fn test_split_frame() {
        let mut buf = BytesMut::new();
        buf.put_i32(3);
        buf.put_slice(&[1, 2]);
        assert_eq!(split_frame(&mut buf).unwrap(), None);

        buf.put_slice(&[3, 9]);
        let frame = split_frame(&mut buf).unwrap().unwrap();
        assert_eq!(&frame[..], &[1, 2, 3]);
        assert_eq!(&buf[..], &[9]);
    }

    #[test]
    fn test_split_frame_rejects_bad_size() {
        let mut buf = BytesMut::new();
        buf.put_i32(-5);
        assert!(split_frame(&mut buf).is_err());

        let mut buf = BytesMut::new();
        buf.put_i32(i32::MAX);
        assert!(split_frame(&mut buf).is_err());
    }
}
