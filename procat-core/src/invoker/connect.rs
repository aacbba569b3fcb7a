//! Connect-protocol transport.
//!
//! A unary Connect call is a plain HTTP POST of the JSON request body to
//! `scheme://endpoint/<service>/<method>` with `Content-Type:
//! application/json` and `Connect-Protocol-Version: 1`. A 200 response
//! body is the JSON payload; any other status carries a Connect error
//! object `{code, message}`.

use std::collections::HashMap;

use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde::Deserialize;

use super::{InvokeRequest, InvokeResponse, effective_timeout};

const CONNECT_PROTOCOL_VERSION: &str = "1";

/// Wire shape of a Connect error body.
#[derive(Debug, Default, Deserialize)]
struct ConnectError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

pub(super) async fn invoke(req: &InvokeRequest) -> InvokeResponse {
    let timeout = effective_timeout(req.timeout_seconds);

    let mut builder = reqwest::Client::builder().timeout(timeout);

    // With TLS and an SNI override, the URL is built against the server
    // name and pinned to the endpoint's resolved address so certificate
    // verification sees the overridden name.
    let url;
    let endpoint_host = req.endpoint.rsplit_once(':').map_or(req.endpoint.as_str(), |(h, _)| h);
    if req.use_tls && !req.server_name.is_empty() && req.server_name != endpoint_host {
        let addr = match tokio::net::lookup_host(&req.endpoint).await {
            Ok(mut addrs) => match addrs.next() {
                Some(addr) => addr,
                None => {
                    return InvokeResponse::failure(format!(
                        "failed to resolve endpoint '{}'",
                        req.endpoint
                    ));
                }
            },
            Err(err) => {
                return InvokeResponse::failure(format!(
                    "failed to resolve endpoint '{}': {err}",
                    req.endpoint
                ));
            }
        };
        builder = builder.resolve(&req.server_name, addr);
        url = format!(
            "https://{}:{}/{}/{}",
            req.server_name,
            addr.port(),
            req.service,
            req.method
        );
    } else {
        let scheme = if req.use_tls { "https" } else { "http" };
        url = format!("{scheme}://{}/{}/{}", req.endpoint, req.service, req.method);
    }

    let client = match builder.build() {
        Ok(client) => client,
        Err(err) => {
            return InvokeResponse::failure(format!("failed to build HTTP client: {err}"));
        }
    };

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(
        HeaderName::from_static("connect-protocol-version"),
        HeaderValue::from_static(CONNECT_PROTOCOL_VERSION),
    );
    for (key, value) in &req.metadata {
        let name = match HeaderName::from_bytes(key.as_bytes()) {
            Ok(name) => name,
            Err(err) => {
                return InvokeResponse::failure(format!(
                    "invalid metadata (header) key '{key}': {err}"
                ));
            }
        };
        let value = match HeaderValue::from_str(value) {
            Ok(value) => value,
            Err(err) => {
                return InvokeResponse::failure(format!(
                    "invalid metadata (header) value for key '{key}': {err}"
                ));
            }
        };
        headers.insert(name, value);
    }

    let response = match client
        .post(url)
        .headers(headers)
        .body(req.request_json.clone())
        .send()
        .await
    {
        Ok(response) => response,
        Err(err) => return InvokeResponse::failure(format!("request failed: {err}")),
    };

    let status = response.status();

    // Mirror response headers into the metadata map, first value per name.
    let mut metadata = HashMap::new();
    for (name, value) in response.headers() {
        if metadata.contains_key(name.as_str()) {
            continue;
        }
        if let Ok(value) = value.to_str() {
            metadata.insert(name.as_str().to_string(), value.to_string());
        }
    }

    let body = match response.bytes().await {
        Ok(body) => body,
        Err(err) => return InvokeResponse::failure(format!("failed to read response: {err}")),
    };

    if status != http::StatusCode::OK {
        if let Ok(connect_err) = serde_json::from_slice::<ConnectError>(&body)
            && !connect_err.message.is_empty()
        {
            return InvokeResponse {
                success: false,
                error: connect_err.message,
                status_code: i32::from(status.as_u16()),
                status_message: connect_err.code,
                metadata,
                ..Default::default()
            };
        }
        return InvokeResponse {
            success: false,
            error: format!(
                "HTTP {}: {}",
                status.as_u16(),
                String::from_utf8_lossy(&body)
            ),
            status_code: i32::from(status.as_u16()),
            status_message: status.to_string(),
            metadata,
            ..Default::default()
        };
    }

    InvokeResponse {
        success: true,
        response_json: body.to_vec(),
        status_code: 0,
        status_message: "OK".to_string(),
        metadata,
        ..Default::default()
    }
}
