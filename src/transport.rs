//! The network collaborator and the request glue on top of it.
//!
//! Connection management (sockets, TLS, reconnect backoff) lives behind the
//! [`Transport`] trait. [`KafkaClient`] owns everything protocol-specific:
//! one [`ClientCodec`] per node for correlation ids, per-node API version
//! negotiation, and request timeouts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{Error, KafkaCode, Result};
use crate::protocol::{ApiVersionsRequest, ApiVersionsResponse, ClientCodec, Message, Request};
use crate::types::NodeId;

/// Moves frames to and from brokers.
///
/// Frames handed to the transport are complete, size-prefixed requests.
/// Returned frames have their size prefix stripped and start with the
/// correlation id.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send a request frame to `node_id` and wait for its response frame.
    async fn send(&self, node_id: NodeId, frame: Bytes) -> Result<Bytes>;

    /// Send a request frame that the broker will not answer.
    async fn send_oneway(&self, node_id: NodeId, frame: Bytes) -> Result<()>;

    /// Whether a connection to `node_id` is currently open.
    fn is_connected(&self, node_id: NodeId) -> bool;

    /// Whether a request can be sent to `node_id` now, possibly after
    /// initiating a connection.
    fn ready(&self, node_id: NodeId) -> bool;
}

/// Typed request/response exchange over a [`Transport`].
pub struct KafkaClient<T: Transport> {
    transport: Arc<T>,
    client_id: String,
    request_timeout: Duration,
    codecs: Arc<Mutex<HashMap<NodeId, ClientCodec>>>,
    api_versions: Arc<Mutex<HashMap<NodeId, Arc<ApiVersionsResponse>>>>,
}

impl<T: Transport> Clone for KafkaClient<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            client_id: self.client_id.clone(),
            request_timeout: self.request_timeout,
            codecs: self.codecs.clone(),
            api_versions: self.api_versions.clone(),
        }
    }
}

impl<T: Transport> KafkaClient<T> {
    pub fn new(transport: Arc<T>, client_id: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            transport,
            client_id: client_id.into(),
            request_timeout,
            codecs: Arc::new(Mutex::new(HashMap::new())),
            api_versions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Send `request` to `node_id`. Returns `None` for requests that expect no response.
    ///
    /// A transport error, timeout or undecodable response fails only this
    /// request; other requests in flight to the same node are unaffected.
    pub async fn send<R: Request>(&self, node_id: NodeId, request: &R) -> Result<Option<R::Response>> {
        let (correlation_id, frame) = self
            .codecs
            .lock()
            .entry(node_id)
            .or_insert_with(|| ClientCodec::new(self.client_id.clone()))
            .encode_request(request)?;

        if !request.expect_response() {
            self.transport.send_oneway(node_id, frame).await?;
            return Ok(None);
        }

        let response = match tokio::time::timeout(
            self.request_timeout,
            self.transport.send(node_id, frame),
        )
        .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                self.abandon(node_id, correlation_id);
                tracing::debug!(node_id, correlation_id, error = %e, "Request failed");
                return Err(e);
            }
            Err(_) => {
                self.abandon(node_id, correlation_id);
                tracing::debug!(node_id, correlation_id, "Request timed out");
                return Err(Error::Broker(KafkaCode::RequestTimedOut));
            }
        };

        let frame = self
            .codecs
            .lock()
            .get_mut(&node_id)
            .ok_or(Error::Disconnected(node_id))?
            .resolve(response)?;
        frame.decode::<R::Response>().map(Some)
    }

    /// Like [`send`](Self::send) for requests that always expect a response.
    pub async fn call<R: Request>(&self, node_id: NodeId, request: &R) -> Result<R::Response> {
        self.send(node_id, request).await?.ok_or_else(|| {
            Error::IllegalState(format!(
                "{} request at v{} expects no response",
                R::API_KEY.as_str(),
                request.api_version()
            ))
        })
    }

    fn abandon(&self, node_id: NodeId, correlation_id: i32) {
        if let Some(codec) = self.codecs.lock().get_mut(&node_id) {
            codec.abandon(correlation_id);
        }
    }

    /// Forget all per-node state after its connection closed.
    pub fn close(&self, node_id: NodeId) -> Vec<i32> {
        self.api_versions.lock().remove(&node_id);
        self.codecs
            .lock()
            .remove(&node_id)
            .map(|mut codec| codec.fail_all())
            .unwrap_or_default()
    }

    /// Versions supported by `node_id`, fetched once per connection.
    pub async fn api_versions(&self, node_id: NodeId) -> Result<Arc<ApiVersionsResponse>> {
        let cached = self.api_versions.lock().get(&node_id).cloned();
        if let Some(versions) = cached {
            return Ok(versions);
        }
        let response = self.call(node_id, &ApiVersionsRequest { version: 0 }).await?;
        response.error_code.into_result()?;

        let response = Arc::new(response);
        self.api_versions.lock().insert(node_id, response.clone());
        Ok(response)
    }

    /// Highest version of `M`'s API both sides support.
    pub async fn negotiate<M: Message>(&self, node_id: NodeId) -> Result<i16> {
        let client_max = M::max_version();
        self.api_versions(node_id)
            .await?
            .negotiate(M::API_KEY, client_max)
            .ok_or(Error::UnsupportedVersion {
                api_key: M::API_KEY,
                version: client_max,
            })
    }

    pub fn is_connected(&self, node_id: NodeId) -> bool {
        self.transport.is_connected(node_id)
    }

    pub fn ready(&self, node_id: NodeId) -> bool {
        self.transport.ready(node_id)
    }

    /// Number of requests awaiting a response from `node_id`.
    pub fn in_flight(&self, node_id: NodeId) -> usize {
        self.codecs.lock().get(&node_id).map_or(0, ClientCodec::in_flight)
    }
}

