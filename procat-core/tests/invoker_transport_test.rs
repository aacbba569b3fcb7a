//! Transport-level invoker tests against local upstreams.
//!
//! The upstream speaks both protocols on one router, the same way a
//! connect-style server does: JSON POST bodies on the Connect side and
//! length-prefixed frames through the dynamic codec on the gRPC side.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::OnceLock;

use axum::Router;
use axum::extract::Request;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use http::header::CONTENT_TYPE;
use prost_reflect::{DescriptorPool, MethodDescriptor};
use prost_types::{
    DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet,
    MethodDescriptorProto, ServiceDescriptorProto, field_descriptor_proto,
};

use procat_core::invoker::{InvokeRequest, Invoker, JsonCodec, Transport};

fn echo_fds() -> FileDescriptorSet {
    let message = DescriptorProto {
        name: Some("EchoMessage".to_string()),
        field: vec![FieldDescriptorProto {
            name: Some("sentence".to_string()),
            number: Some(1),
            r#type: Some(field_descriptor_proto::Type::String as i32),
            label: Some(field_descriptor_proto::Label::Optional as i32),
            ..Default::default()
        }],
        ..Default::default()
    };

    let method = |name: &str| MethodDescriptorProto {
        name: Some(name.to_string()),
        input_type: Some(".echo.v1.EchoMessage".to_string()),
        output_type: Some(".echo.v1.EchoMessage".to_string()),
        ..Default::default()
    };

    FileDescriptorSet {
        file: vec![FileDescriptorProto {
            name: Some("echo.proto".to_string()),
            package: Some("echo.v1".to_string()),
            syntax: Some("proto3".to_string()),
            message_type: vec![message],
            service: vec![ServiceDescriptorProto {
                name: Some("EchoService".to_string()),
                method: vec![method("Echo"), method("Fail")],
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
}

fn descriptor_pool() -> &'static DescriptorPool {
    static POOL: OnceLock<DescriptorPool> = OnceLock::new();
    POOL.get_or_init(|| DescriptorPool::from_file_descriptor_set(echo_fds()).unwrap())
}

fn echo_method(name: &str) -> MethodDescriptor {
    descriptor_pool()
        .get_service_by_name("echo.v1.EchoService")
        .unwrap()
        .methods()
        .find(|m| m.name() == name)
        .unwrap()
}

type UnaryFuture =
    Pin<Box<dyn Future<Output = Result<tonic::Response<serde_json::Value>, tonic::Status>> + Send>>;

/// Echoes the decoded request message back, tagging a response header.
struct EchoUnary;

impl tonic::server::UnaryService<serde_json::Value> for EchoUnary {
    type Response = serde_json::Value;
    type Future = UnaryFuture;

    fn call(&mut self, request: tonic::Request<serde_json::Value>) -> Self::Future {
        let value = request.into_inner();
        Box::pin(async move {
            let mut response = tonic::Response::new(value);
            response
                .metadata_mut()
                .insert("x-echo-proto", "grpc".parse().unwrap());
            Ok(response)
        })
    }
}

/// Always fails with INVALID_ARGUMENT.
struct FailUnary;

impl tonic::server::UnaryService<serde_json::Value> for FailUnary {
    type Response = serde_json::Value;
    type Future = UnaryFuture;

    fn call(&mut self, _request: tonic::Request<serde_json::Value>) -> Self::Future {
        Box::pin(async move { Err(tonic::Status::invalid_argument("boom")) })
    }
}

fn is_grpc(req: &Request) -> bool {
    req.headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/grpc"))
}

/// Server-side codec: encodes the method's output, decodes its input.
fn server_codec(method: &MethodDescriptor) -> JsonCodec {
    JsonCodec::new(method.output(), method.input())
}

async fn echo_entry(req: Request) -> Response {
    if is_grpc(&req) {
        let mut grpc = tonic::server::Grpc::new(server_codec(&echo_method("Echo")));
        return grpc.unary(EchoUnary, req).await.map(axum::body::Body::new);
    }

    let body = match axum::body::to_bytes(req.into_body(), 1 << 20).await {
        Ok(body) => body,
        Err(err) => return (http::StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    };
    (
        [
            ("content-type", "application/json"),
            ("x-echo-proto", "connect"),
        ],
        body,
    )
        .into_response()
}

async fn fail_entry(req: Request) -> Response {
    if is_grpc(&req) {
        let mut grpc = tonic::server::Grpc::new(server_codec(&echo_method("Fail")));
        return grpc.unary(FailUnary, req).await.map(axum::body::Body::new);
    }

    (
        http::StatusCode::UNAUTHORIZED,
        [("content-type", "application/json")],
        r#"{"code":"unauthenticated","message":"token expired"}"#,
    )
        .into_response()
}

async fn spawn_upstream() -> SocketAddr {
    let app = Router::new()
        .route("/echo.v1.EchoService/Echo", post(echo_entry))
        .route("/echo.v1.EchoService/Fail", post(fail_entry));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn invoke_request(addr: SocketAddr, method: &str, transport: Transport) -> InvokeRequest {
    InvokeRequest {
        endpoint: addr.to_string(),
        service: "echo.v1.EchoService".to_string(),
        method: method.to_string(),
        request_json: br#"{"sentence":"hi"}"#.to_vec(),
        use_tls: false,
        server_name: String::new(),
        timeout_seconds: 10,
        metadata: HashMap::new(),
        method_descriptor: echo_method(method),
        transport,
    }
}

#[tokio::test]
async fn connect_transport_round_trips_json() {
    let addr = spawn_upstream().await;
    let invoker = Invoker::new();

    let resp = invoker
        .invoke_unary(&invoke_request(addr, "Echo", Transport::Connect))
        .await;

    assert!(resp.success, "error: {}", resp.error);
    assert_eq!(resp.status_code, 0);
    assert_eq!(resp.status_message, "OK");
    let value: serde_json::Value = serde_json::from_slice(&resp.response_json).unwrap();
    assert_eq!(value["sentence"], "hi");
    assert_eq!(resp.metadata.get("x-echo-proto").map(String::as_str), Some("connect"));
}

#[tokio::test]
async fn connect_transport_parses_error_bodies() {
    let addr = spawn_upstream().await;
    let invoker = Invoker::new();

    let resp = invoker
        .invoke_unary(&invoke_request(addr, "Fail", Transport::Connect))
        .await;

    assert!(!resp.success);
    assert_eq!(resp.error, "token expired");
    assert_eq!(resp.status_message, "unauthenticated");
    assert_eq!(resp.status_code, 401);
}

#[tokio::test]
async fn connect_transport_reports_unreachable_endpoints() {
    let invoker = Invoker::new();

    let mut req = invoke_request("127.0.0.1:1".parse().unwrap(), "Echo", Transport::Connect);
    req.timeout_seconds = 2;
    let resp = invoker.invoke_unary(&req).await;

    assert!(!resp.success);
    assert!(resp.error.contains("request failed"), "error: {}", resp.error);
}

#[tokio::test]
async fn grpc_transport_round_trips_json() {
    let addr = spawn_upstream().await;
    let invoker = Invoker::new();

    let resp = invoker
        .invoke_unary(&invoke_request(addr, "Echo", Transport::Grpc))
        .await;

    assert!(resp.success, "error: {}", resp.error);
    assert_eq!(resp.status_code, 0);
    assert_eq!(resp.status_message, "OK");
    let value: serde_json::Value = serde_json::from_slice(&resp.response_json).unwrap();
    assert_eq!(value["sentence"], "hi");
    assert_eq!(resp.metadata.get("x-echo-proto").map(String::as_str), Some("grpc"));
}

#[tokio::test]
async fn grpc_transport_surfaces_wire_status() {
    let addr = spawn_upstream().await;
    let invoker = Invoker::new();

    let resp = invoker
        .invoke_unary(&invoke_request(addr, "Fail", Transport::Grpc))
        .await;

    assert!(!resp.success);
    assert_eq!(resp.status_code, tonic::Code::InvalidArgument as i32);
    assert_eq!(resp.status_message, "boom");
    assert!(resp.error.contains("boom"));
}

#[tokio::test]
async fn grpc_transport_rejects_unmappable_request_json() {
    let addr = spawn_upstream().await;
    let invoker = Invoker::new();

    let mut req = invoke_request(addr, "Echo", Transport::Grpc);
    req.request_json = br#"{"sentence":{"nested":"object"}}"#.to_vec();
    let resp = invoker.invoke_unary(&req).await;

    assert!(!resp.success);
    assert!(
        resp.error.contains("invalid request JSON"),
        "error: {}",
        resp.error
    );
}

#[tokio::test]
async fn grpc_transport_reuses_pooled_channels() {
    let addr = spawn_upstream().await;
    let invoker = Invoker::new();

    for _ in 0..3 {
        let resp = invoker
            .invoke_unary(&invoke_request(addr, "Echo", Transport::Grpc))
            .await;
        assert!(resp.success, "error: {}", resp.error);
    }

    assert_eq!(invoker.connection_stats().total_connections, 1);
}

#[tokio::test]
async fn grpc_transport_fails_fast_on_unreachable_endpoints() {
    let invoker = Invoker::new();

    let mut req = invoke_request("127.0.0.1:1".parse().unwrap(), "Echo", Transport::Grpc);
    req.timeout_seconds = 30;
    let resp = invoker.invoke_unary(&req).await;

    assert!(!resp.success);
    assert!(
        resp.error.contains("connection failed"),
        "error: {}",
        resp.error
    );
    // Failed dials are not cached.
    assert_eq!(invoker.connection_stats().total_connections, 0);
}

#[tokio::test]
async fn grpc_web_transport_falls_back_to_connect() {
    let addr = spawn_upstream().await;
    let invoker = Invoker::new();

    let resp = invoker
        .invoke_unary(&invoke_request(addr, "Echo", Transport::GrpcWeb))
        .await;

    assert!(resp.success, "error: {}", resp.error);
    assert_eq!(resp.metadata.get("x-echo-proto").map(String::as_str), Some("connect"));
}

#[tokio::test]
async fn both_transports_yield_identical_payloads() {
    let addr = spawn_upstream().await;
    let invoker = Invoker::new();

    let connect = invoker
        .invoke_unary(&invoke_request(addr, "Echo", Transport::Connect))
        .await;
    let grpc = invoker
        .invoke_unary(&invoke_request(addr, "Echo", Transport::Grpc))
        .await;

    assert!(connect.success && grpc.success);
    let connect_value: serde_json::Value = serde_json::from_slice(&connect.response_json).unwrap();
    let grpc_value: serde_json::Value = serde_json::from_slice(&grpc.response_json).unwrap();
    assert_eq!(connect_value, grpc_value);
}
