//! Message types for `procat.v1.CatalogService`.
//!
//! Hand-maintained prost bindings (explicit tags, wire-compatible with the
//! service's proto definition) carrying serde derives as well, so the same
//! structs serve both the gRPC surface and the Connect-JSON surface.
//!
//! `LoadProtosRequest.source` is a oneof on the wire; it is modeled here as
//! four optional fields sharing the oneof's tags, which encodes
//! identically, and [`LoadProtosRequest::source`] enforces the
//! exactly-one-arm rule.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use procat_core::loader::{ProtoSource, ReflectionOptions as LoaderReflectionOptions};

/// Fully-qualified name of the catalog service.
pub const SERVICE_NAME: &str = "procat.v1.CatalogService";

/// Wire protocol selector for invocations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Transport {
    Connect = 0,
    Grpc = 1,
    GrpcWeb = 2,
}

/// Maps a raw enum value onto a [`Transport`], defaulting unknown values
/// to Connect the way an unset oneof defaults.
pub fn transport_from_value(value: i32) -> Transport {
    match value {
        1 => Transport::Grpc,
        2 => Transport::GrpcWeb,
        _ => Transport::Connect,
    }
}

impl From<Transport> for procat_core::invoker::Transport {
    fn from(value: Transport) -> Self {
        match value {
            Transport::Connect => procat_core::invoker::Transport::Connect,
            Transport::Grpc => procat_core::invoker::Transport::Grpc,
            Transport::GrpcWeb => procat_core::invoker::Transport::GrpcWeb,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SourceSelectError {
    #[error("no source specified in request")]
    Missing,
    #[error("multiple sources specified in request")]
    Multiple,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadProtosRequest {
    /// Local directory containing a compilable proto module.
    #[prost(string, optional, tag = "1")]
    pub proto_path: Option<String>,
    /// Git repository in `host/owner/repo[/subdir]` form.
    #[prost(string, optional, tag = "2")]
    pub proto_repo: Option<String>,
    /// Schema-registry module in `registry/owner/module` form.
    #[prost(string, optional, tag = "3")]
    pub buf_module: Option<String>,
    /// Reflection-enabled endpoint in `host:port` form.
    #[prost(string, optional, tag = "4")]
    pub reflection_endpoint: Option<String>,
    /// Only meaningful together with `reflection_endpoint`.
    #[prost(message, optional, tag = "5")]
    pub reflection_options: Option<ReflectionOptions>,
}

impl LoadProtosRequest {
    /// Resolves the oneof-style source fields to a [`ProtoSource`],
    /// rejecting requests where no arm or more than one arm is set.
    pub fn source(&self) -> Result<ProtoSource, SourceSelectError> {
        let mut sources = Vec::new();
        if let Some(path) = &self.proto_path {
            sources.push(ProtoSource::Path(path.clone()));
        }
        if let Some(repo) = &self.proto_repo {
            sources.push(ProtoSource::GitRepo(repo.clone()));
        }
        if let Some(module) = &self.buf_module {
            sources.push(ProtoSource::RegistryModule(module.clone()));
        }
        if let Some(endpoint) = &self.reflection_endpoint {
            let options = self.reflection_options.clone().unwrap_or_default();
            sources.push(ProtoSource::Reflection {
                endpoint: endpoint.clone(),
                options: LoaderReflectionOptions {
                    use_tls: options.use_tls,
                    server_name: options.server_name,
                    timeout_seconds: options.timeout_seconds,
                },
            });
        }

        if sources.len() > 1 {
            return Err(SourceSelectError::Multiple);
        }
        sources.into_iter().next().ok_or(SourceSelectError::Missing)
    }
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflectionOptions {
    #[prost(bool, tag = "1")]
    pub use_tls: bool,
    #[prost(string, tag = "2")]
    pub server_name: String,
    #[prost(int32, tag = "3")]
    pub timeout_seconds: i32,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadProtosResponse {
    #[prost(bool, tag = "1")]
    pub success: bool,
    #[prost(string, tag = "2")]
    pub error: String,
    #[prost(int32, tag = "3")]
    pub service_count: i32,
    #[prost(int32, tag = "4")]
    pub file_count: i32,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct ListServicesRequest {}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct ListServicesResponse {
    #[prost(message, repeated, tag = "1")]
    pub services: Vec<ServiceInfo>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceInfo {
    /// Fully-qualified service name.
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub package: String,
    #[prost(message, repeated, tag = "3")]
    pub methods: Vec<MethodInfo>,
    #[prost(string, tag = "4")]
    pub documentation: String,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct MethodInfo {
    #[prost(string, tag = "1")]
    pub name: String,
    /// Fully-qualified input message name.
    #[prost(string, tag = "2")]
    pub input_type: String,
    /// Fully-qualified output message name.
    #[prost(string, tag = "3")]
    pub output_type: String,
    #[prost(string, tag = "4")]
    pub documentation: String,
    #[prost(bool, tag = "5")]
    pub client_streaming: bool,
    #[prost(bool, tag = "6")]
    pub server_streaming: bool,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct GetServiceSchemaRequest {
    #[prost(string, tag = "1")]
    pub service_name: String,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct GetServiceSchemaResponse {
    #[prost(message, optional, tag = "1")]
    pub service: Option<ServiceInfo>,
    /// JSON-schema documents keyed by message FQN.
    #[prost(btree_map = "string, string", tag = "2")]
    pub message_schemas: BTreeMap<String, String>,
    #[prost(string, tag = "3")]
    pub error: String,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct InvokeGrpcRequest {
    /// Target in `host:port` form.
    #[prost(string, tag = "1")]
    pub endpoint: String,
    /// Fully-qualified service name.
    #[prost(string, tag = "2")]
    pub service: String,
    /// Simple method name.
    #[prost(string, tag = "3")]
    pub method: String,
    #[prost(string, tag = "4")]
    pub request_json: String,
    #[prost(bool, tag = "5")]
    pub use_tls: bool,
    #[prost(string, tag = "6")]
    pub server_name: String,
    #[prost(int32, tag = "7")]
    pub timeout_seconds: i32,
    #[prost(map = "string, string", tag = "8")]
    pub metadata: HashMap<String, String>,
    #[prost(enumeration = "Transport", tag = "9")]
    #[serde(deserialize_with = "transport_from_json")]
    pub transport: i32,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct InvokeGrpcResponse {
    #[prost(bool, tag = "1")]
    pub success: bool,
    #[prost(string, tag = "2")]
    pub response_json: String,
    #[prost(string, tag = "3")]
    pub error: String,
    /// Response headers, plus trailers under a `trailer-` prefix.
    #[prost(map = "string, string", tag = "4")]
    pub metadata: HashMap<String, String>,
    #[prost(int32, tag = "5")]
    pub status_code: i32,
    #[prost(string, tag = "6")]
    pub status_message: String,
}

/// Accepts the transport as either an enum number or an enum-name string
/// (with or without the `TRANSPORT_` prefix), matching what JSON clients
/// send in practice.
fn transport_from_json<'de, D>(deserializer: D) -> Result<i32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct TransportVisitor;

    impl serde::de::Visitor<'_> for TransportVisitor {
        type Value = i32;

        fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("a transport enum number or name")
        }

        fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Self::Value, E> {
            Ok(v as i32)
        }

        fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(v as i32)
        }

        fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
            match v {
                "CONNECT" | "TRANSPORT_CONNECT" => Ok(Transport::Connect as i32),
                "GRPC" | "TRANSPORT_GRPC" => Ok(Transport::Grpc as i32),
                "GRPC_WEB" | "TRANSPORT_GRPC_WEB" => Ok(Transport::GrpcWeb as i32),
                other => Err(E::unknown_variant(
                    other,
                    &["TRANSPORT_CONNECT", "TRANSPORT_GRPC", "TRANSPORT_GRPC_WEB"],
                )),
            }
        }
    }

    deserializer.deserialize_any(TransportVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_requires_exactly_one_arm() {
        let empty = LoadProtosRequest::default();
        assert!(matches!(empty.source(), Err(SourceSelectError::Missing)));

        let single = LoadProtosRequest {
            proto_path: Some("./proto".to_string()),
            ..Default::default()
        };
        assert!(matches!(single.source(), Ok(ProtoSource::Path(p)) if p == "./proto"));

        let double = LoadProtosRequest {
            proto_path: Some("./proto".to_string()),
            buf_module: Some("buf.build/acme/petstore".to_string()),
            ..Default::default()
        };
        assert!(matches!(double.source(), Err(SourceSelectError::Multiple)));
    }

    #[test]
    fn reflection_source_carries_options() {
        let req = LoadProtosRequest {
            reflection_endpoint: Some("localhost:50051".to_string()),
            reflection_options: Some(ReflectionOptions {
                use_tls: true,
                server_name: "api.internal".to_string(),
                timeout_seconds: 5,
            }),
            ..Default::default()
        };

        match req.source().unwrap() {
            ProtoSource::Reflection { endpoint, options } => {
                assert_eq!(endpoint, "localhost:50051");
                assert!(options.use_tls);
                assert_eq!(options.server_name, "api.internal");
                assert_eq!(options.timeout_seconds, 5);
            }
            other => panic!("expected reflection source, got {other:?}"),
        }
    }

    #[test]
    fn transport_deserializes_from_numbers_and_names() {
        let by_number: InvokeGrpcRequest =
            serde_json::from_str(r#"{"endpoint":"e","transport":1}"#).unwrap();
        assert_eq!(by_number.transport, Transport::Grpc as i32);

        let by_name: InvokeGrpcRequest =
            serde_json::from_str(r#"{"endpoint":"e","transport":"TRANSPORT_GRPC_WEB"}"#).unwrap();
        assert_eq!(by_name.transport, Transport::GrpcWeb as i32);

        let omitted: InvokeGrpcRequest = serde_json::from_str(r#"{"endpoint":"e"}"#).unwrap();
        assert_eq!(omitted.transport, Transport::Connect as i32);
    }

    #[test]
    fn unknown_transport_values_default_to_connect() {
        assert_eq!(transport_from_value(0), Transport::Connect);
        assert_eq!(transport_from_value(1), Transport::Grpc);
        assert_eq!(transport_from_value(2), Transport::GrpcWeb);
        assert_eq!(transport_from_value(42), Transport::Connect);
    }
}
