//! # Dynamic Invoker
//!
//! Executes one unary call against a target server, routed by transport:
//!
//! * **Connect**: HTTP POST with a JSON body (see [`connect`]).
//! * **gRPC**: HTTP/2 binary framing through a descriptor-driven
//!   [`JsonCodec`], over a pooled channel (see [`grpc`] and [`pool`]).
//! * **gRPC-Web**: aliased to Connect; a warning is logged on first use.
//!
//! Every failure an invocation can produce is reported inside the
//! [`InvokeResponse`], never as an error from [`Invoker::invoke_unary`]:
//! a call that was attempted and rejected still executed correctly from
//! the engine's point of view.

mod codec;
mod connect;
mod grpc;
mod pool;

use std::collections::HashMap;
use std::sync::Once;
use std::time::Duration;

use prost_reflect::MethodDescriptor;

pub use codec::JsonCodec;
pub use pool::{
    DEFAULT_CONNECTION_TTL, DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_CONNECTIONS, DialError, PoolConfig,
};

use pool::ChannelPool;

/// Default per-call timeout applied when the caller passes a non-positive
/// value.
pub const DEFAULT_INVOKE_TIMEOUT_SECS: i32 = 30;

/// Wire protocol used for an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transport {
    #[default]
    Connect,
    Grpc,
    GrpcWeb,
}

/// Parameters for one dynamic unary invocation.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    /// Target in `host:port` form.
    pub endpoint: String,
    /// Fully-qualified service name.
    pub service: String,
    /// Simple method name.
    pub method: String,
    /// Raw JSON request body.
    pub request_json: Vec<u8>,
    pub use_tls: bool,
    /// SNI override for TLS verification. Ignored when empty.
    pub server_name: String,
    /// Non-positive values fall back to [`DEFAULT_INVOKE_TIMEOUT_SECS`].
    pub timeout_seconds: i32,
    /// Outgoing metadata, sent as headers on every transport.
    pub metadata: HashMap<String, String>,
    /// Resolved descriptor of the method being invoked.
    pub method_descriptor: MethodDescriptor,
    pub transport: Transport,
}

/// Outcome of one invocation.
#[derive(Debug, Clone, Default)]
pub struct InvokeResponse {
    pub success: bool,
    pub response_json: Vec<u8>,
    pub error: String,
    /// Response headers, plus trailers under a `trailer-` prefix.
    pub metadata: HashMap<String, String>,
    pub status_code: i32,
    pub status_message: String,
}

impl InvokeResponse {
    fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            ..Default::default()
        }
    }
}

/// Inspection snapshot of the connection pool.
#[derive(Debug, Clone, Default)]
pub struct ConnectionStats {
    pub total_connections: usize,
    /// `endpoint|tls|server_name` keys currently pooled.
    pub endpoints: Vec<String>,
}

/// Dynamic unary invoker with per-endpoint channel pooling.
///
/// Safe for concurrent use; a pooled channel multiplexes HTTP/2 streams,
/// so concurrent invocations against the same endpoint share it.
pub struct Invoker {
    pool: ChannelPool,
    grpc_web_notice: Once,
}

impl Invoker {
    pub fn new() -> Self {
        Self::with_pool_config(PoolConfig::default())
    }

    pub fn with_pool_config(config: PoolConfig) -> Self {
        Self {
            pool: ChannelPool::new(config),
            grpc_web_notice: Once::new(),
        }
    }

    /// Performs a unary call using the transport selected in the request.
    pub async fn invoke_unary(&self, req: &InvokeRequest) -> InvokeResponse {
        if let Err(message) = validate(req) {
            return InvokeResponse::failure(message);
        }

        match req.transport {
            Transport::Grpc => grpc::invoke(&self.pool, req).await,
            Transport::GrpcWeb => {
                self.grpc_web_notice.call_once(|| {
                    tracing::warn!(
                        "gRPC-Web transport is not implemented; falling back to Connect"
                    );
                });
                connect::invoke(req).await
            }
            Transport::Connect => connect::invoke(req).await,
        }
    }

    pub fn connection_stats(&self) -> ConnectionStats {
        let keys = self.pool.keys();
        ConnectionStats {
            total_connections: keys.len(),
            endpoints: keys
                .into_iter()
                .map(|k| format!("{}|{}|{}", k.endpoint, k.use_tls, k.server_name))
                .collect(),
        }
    }

    /// Drops every pooled channel. Underlying connections close once the
    /// last clone of each channel is gone.
    pub fn close(&self) {
        self.pool.clear();
    }
}

impl Default for Invoker {
    fn default() -> Self {
        Self::new()
    }
}

fn effective_timeout(timeout_seconds: i32) -> Duration {
    if timeout_seconds > 0 {
        Duration::from_secs(timeout_seconds as u64)
    } else {
        Duration::from_secs(DEFAULT_INVOKE_TIMEOUT_SECS as u64)
    }
}

/// Pre-transport validation. Failures are reported in the response, not as
/// transport errors; the caller-side contract checks live in the façade.
fn validate(req: &InvokeRequest) -> Result<(), String> {
    if req.endpoint.is_empty() {
        return Err("endpoint is required".to_string());
    }
    if req.service.is_empty() {
        return Err("service name is required".to_string());
    }
    if req.method.is_empty() {
        return Err("method name is required".to_string());
    }
    if req.request_json.is_empty() {
        return Err("request JSON is required".to_string());
    }
    if let Err(err) = serde_json::from_slice::<serde_json::Value>(&req.request_json) {
        return Err(format!("invalid request JSON: {err}"));
    }
    if req.method_descriptor.is_client_streaming() || req.method_descriptor.is_server_streaming() {
        return Err("streaming methods are not supported (unary only)".to_string());
    }
    Ok(())
}
