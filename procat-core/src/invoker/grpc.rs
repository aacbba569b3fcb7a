//! gRPC transport.
//!
//! Builds a dynamic request message from the caller's JSON, invokes the
//! method over a pooled HTTP/2 channel through the [`JsonCodec`], and maps
//! the wire status back onto the invoke response. Response headers become
//! metadata entries; trailers (carried on the `Status` for failed calls)
//! are merged under a `trailer-` prefix.

use std::collections::HashMap;
use std::str::FromStr;

use prost_reflect::DynamicMessage;
use tonic::metadata::{KeyAndValueRef, MetadataKey, MetadataMap, MetadataValue};

use super::codec::JsonCodec;
use super::pool::{ChannelPool, PoolKey};
use super::{InvokeRequest, InvokeResponse, effective_timeout};

pub(super) async fn invoke(pool: &ChannelPool, req: &InvokeRequest) -> InvokeResponse {
    let method = &req.method_descriptor;

    // Parse and check the JSON against the input schema before dialing;
    // a request that cannot be a valid message should not cost a
    // connection.
    let payload: serde_json::Value = match serde_json::from_slice(&req.request_json) {
        Ok(payload) => payload,
        Err(err) => return InvokeResponse::failure(format!("invalid request JSON: {err}")),
    };
    if let Err(err) = DynamicMessage::deserialize(method.input(), payload.clone()) {
        return InvokeResponse::failure(format!("invalid request JSON: {err}"));
    }

    let key = PoolKey {
        endpoint: req.endpoint.clone(),
        use_tls: req.use_tls,
        server_name: req.server_name.clone(),
    };
    let channel = match pool.get_or_dial(key).await {
        Ok(channel) => channel,
        Err(err) => return InvokeResponse::failure(format!("connection failed: {err}")),
    };

    let mut grpc = tonic::client::Grpc::new(channel);
    if let Err(err) = grpc.ready().await {
        return InvokeResponse::failure(format!("connection failed: {err}"));
    }

    let codec = JsonCodec::new(method.input(), method.output());
    let path = format!("/{}/{}", method.parent_service().full_name(), method.name());
    let path = match http::uri::PathAndQuery::from_str(&path) {
        Ok(path) => path,
        Err(err) => return InvokeResponse::failure(format!("invalid method path '{path}': {err}")),
    };

    let timeout = effective_timeout(req.timeout_seconds);
    let mut request = tonic::Request::new(payload);
    request.set_timeout(timeout);
    for (key, value) in &req.metadata {
        let name = match MetadataKey::from_str(key) {
            Ok(name) => name,
            Err(err) => {
                return InvokeResponse::failure(format!(
                    "invalid metadata (header) key '{key}': {err}"
                ));
            }
        };
        let value = match MetadataValue::from_str(value) {
            Ok(value) => value,
            Err(err) => {
                return InvokeResponse::failure(format!(
                    "invalid metadata (header) value for key '{key}': {err}"
                ));
            }
        };
        request.metadata_mut().insert(name, value);
    }

    match tokio::time::timeout(timeout, grpc.unary(request, path, codec)).await {
        Ok(Ok(response)) => {
            let (headers, value, _extensions) = response.into_parts();
            let response_json = match serde_json::to_vec(&value) {
                Ok(bytes) => bytes,
                Err(err) => {
                    return InvokeResponse::failure(format!(
                        "failed to serialize response: {err}"
                    ));
                }
            };
            InvokeResponse {
                success: true,
                response_json,
                status_code: 0,
                status_message: "OK".to_string(),
                metadata: merge_metadata(&headers, &MetadataMap::new()),
                ..Default::default()
            }
        }
        Ok(Err(status)) => {
            // Trailers ride on the status for failed calls.
            let (code, message) = status_parts(&status);
            InvokeResponse {
                success: false,
                error: status.to_string(),
                status_code: code,
                status_message: message,
                metadata: merge_metadata(&MetadataMap::new(), status.metadata()),
                ..Default::default()
            }
        }
        Err(_elapsed) => InvokeResponse {
            success: false,
            error: format!("request timed out after {}s", timeout.as_secs()),
            status_code: tonic::Code::DeadlineExceeded as i32,
            status_message: "deadline exceeded".to_string(),
            ..Default::default()
        },
    }
}

/// Extracts `(code, message)` from a wire status. A non-status failure is
/// reported elsewhere as code 2 (unknown).
fn status_parts(status: &tonic::Status) -> (i32, String) {
    (status.code() as i32, status.message().to_string())
}

/// Combines headers and trailers into one map: headers keep their names,
/// trailer keys gain a `trailer-` prefix, and only the first value of a
/// multi-valued key survives.
pub(crate) fn merge_metadata(
    headers: &MetadataMap,
    trailers: &MetadataMap,
) -> HashMap<String, String> {
    let mut result = HashMap::new();

    for entry in headers.iter() {
        if let KeyAndValueRef::Ascii(key, value) = entry
            && !result.contains_key(key.as_str())
            && let Ok(value) = value.to_str()
        {
            result.insert(key.as_str().to_string(), value.to_string());
        }
    }

    for entry in trailers.iter() {
        if let KeyAndValueRef::Ascii(key, value) = entry {
            let prefixed = format!("trailer-{}", key.as_str());
            if !result.contains_key(&prefixed)
                && let Ok(value) = value.to_str()
            {
                result.insert(prefixed, value.to_string());
            }
        }
    }

    result
}
