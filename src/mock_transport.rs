//! In-memory scripted broker for testing.
//!
//! [`MockTransport`] implements [`Transport`] without sockets. Each request
//! frame is parsed with the real codec, recorded, and answered by the
//! handler registered for its API key. Responses are encoded at the version
//! the request was sent with, so tests exercise the same wire path as
//! production code.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use kafkaesque_client::mock_transport::MockTransport;
//! use kafkaesque_client::protocol::MetadataResponse;
//!
//! let transport = Arc::new(MockTransport::new());
//! transport.respond_with(|_request| Ok(MetadataResponse::default()));
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use nombytes::NomBytes;
use parking_lot::Mutex;

use crate::constants::FRAME_SIZE_PREFIX;
use crate::error::{Error, Result};
use crate::protocol::{
    ApiKey, ApiVersionRange, ApiVersionsResponse, FindCoordinatorResponse,
    HeartbeatResponse, JoinGroupResponse, LeaveGroupResponse, ListOffsetsResponse, Message,
    MetadataResponse, OffsetCommitResponse, OffsetFetchResponse, ProduceResponse, RequestHeader,
    SyncGroupResponse, parse_request_header,
};
use crate::transport::Transport;
use crate::types::NodeId;

/// A request as received by the mock broker.
#[derive(Debug, Clone)]
pub struct MockRequest {
    pub node_id: NodeId,
    pub header: RequestHeader,
    pub body: Bytes,
}

impl MockRequest {
    /// Decode the body as `M` at the version the client sent.
    pub fn decode<M: Message>(&self) -> Result<M> {
        M::decode(self.header.api_version, self.body.clone())
    }
}

type Handler = dyn Fn(&MockRequest) -> Result<Bytes> + Send + Sync;

/// Scripted broker cluster behind the [`Transport`] trait.
pub struct MockTransport {
    handlers: Mutex<HashMap<ApiKey, Arc<Handler>>>,
    down: Mutex<HashSet<NodeId>>,
    requests: Mutex<Vec<MockRequest>>,
    latency: Mutex<Duration>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// A mock that answers ApiVersions with every version this client speaks.
    pub fn new() -> Self {
        let transport = Self {
            handlers: Mutex::new(HashMap::new()),
            down: Mutex::new(HashSet::new()),
            requests: Mutex::new(Vec::new()),
            latency: Mutex::new(Duration::ZERO),
        };
        transport.respond_with(|_| Ok(Self::supported_versions()));
        transport
    }

    /// ApiVersions response covering `0..=max_version` of every API the client implements.
    pub fn supported_versions() -> ApiVersionsResponse {
        fn range<M: Message>() -> ApiVersionRange {
            ApiVersionRange {
                api_key: i16::from(M::API_KEY),
                min_version: 0,
                max_version: M::max_version(),
            }
        }

        ApiVersionsResponse {
            api_versions: vec![
                range::<ProduceResponse>(),
                range::<ListOffsetsResponse>(),
                range::<MetadataResponse>(),
                range::<OffsetCommitResponse>(),
                range::<OffsetFetchResponse>(),
                range::<FindCoordinatorResponse>(),
                range::<JoinGroupResponse>(),
                range::<HeartbeatResponse>(),
                range::<LeaveGroupResponse>(),
                range::<SyncGroupResponse>(),
                range::<ApiVersionsResponse>(),
            ],
            ..Default::default()
        }
    }

    /// Answer every request for `M`'s API key with the result of `handler`.
    ///
    /// An `Err` from the handler is returned to the client as a transport error.
    pub fn respond_with<M, F>(&self, handler: F)
    where
        M: Message + 'static,
        F: Fn(&MockRequest) -> Result<M> + Send + Sync + 'static,
    {
        let handler: Arc<Handler> =
            Arc::new(move |request: &MockRequest| handler(request)?.encode(request.header.api_version));
        self.handlers.lock().insert(M::API_KEY, handler);
    }

    /// Answer `M`'s API key with raw body bytes, e.g. a truncated response.
    pub fn respond_raw<F>(&self, api_key: ApiKey, handler: F)
    where
        F: Fn(&MockRequest) -> Result<Bytes> + Send + Sync + 'static,
    {
        self.handlers.lock().insert(api_key, Arc::new(handler));
    }

    /// Point FindCoordinator at `node_id` for every group.
    pub fn with_coordinator(&self, node_id: NodeId, host: &str, port: i32) {
        let host = host.to_string();
        self.respond_with(move |_| {
            Ok(FindCoordinatorResponse {
                coordinator_id: node_id,
                host: host.clone(),
                port,
                ..Default::default()
            })
        });
    }

    /// Mark `node_id` as unreachable (or reachable again).
    pub fn set_down(&self, node_id: NodeId, down: bool) {
        let mut nodes = self.down.lock();
        if down {
            nodes.insert(node_id);
        } else {
            nodes.remove(&node_id);
        }
    }

    /// Delay every response by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<MockRequest> {
        self.requests.lock().clone()
    }

    /// Number of requests received for `api_key`.
    pub fn request_count(&self, api_key: ApiKey) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.header.api_key == api_key)
            .count()
    }

    fn receive(&self, node_id: NodeId, frame: Bytes) -> Result<(MockRequest, Option<Arc<Handler>>)> {
        if self.down.lock().contains(&node_id) {
            return Err(Error::Disconnected(node_id));
        }
        if frame.len() < FRAME_SIZE_PREFIX {
            return Err(Error::ProtocolDecode("request frame without size".to_string()));
        }
        let (body, header) = parse_request_header(NomBytes::new(frame.slice(FRAME_SIZE_PREFIX..)))
            .map_err(|_| Error::ProtocolDecode("malformed request header".to_string()))?;
        let request = MockRequest {
            node_id,
            header,
            body: body.into_bytes(),
        };
        self.requests.lock().push(request.clone());
        let handler = self.handlers.lock().get(&request.header.api_key).cloned();
        Ok((request, handler))
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, node_id: NodeId, frame: Bytes) -> Result<Bytes> {
        let (request, handler) = self.receive(node_id, frame)?;
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let handler = handler.ok_or_else(|| {
            Error::ProtocolDecode(format!(
                "mock has no handler for {}",
                request.header.api_key.as_str()
            ))
        })?;
        let body = handler(&request)?;

        let mut response = BytesMut::with_capacity(4 + body.len());
        response.put_i32(request.header.correlation_id);
        response.put_slice(&body);
        Ok(response.freeze())
    }

    async fn send_oneway(&self, node_id: NodeId, frame: Bytes) -> Result<()> {
        self.receive(node_id, frame).map(|_| ())
    }

    fn is_connected(&self, node_id: NodeId) -> bool {
        !self.down.lock().contains(&node_id)
    }

    fn ready(&self, node_id: NodeId) -> bool {
        self.is_connected(node_id)
    }
}
