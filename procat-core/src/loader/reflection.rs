//! # Reflection Loader
//!
//! Fetches descriptors from a live gRPC server speaking the Server
//! Reflection Protocol (`grpc.reflection.v1alpha`).
//!
//! The loader lists the server's services, filters out the reflection
//! service itself, and asks for the file containing each remaining symbol.
//! File descriptors arrive one batch per request; any import that has not
//! been seen yet is fetched with a follow-up `FileByFilename` request on
//! the same stream. The traversal is cycle-safe: a seen-set keyed by file
//! name guards both collection and request de-duplication.
//!
//! ## References
//!
//! * [gRPC Server Reflection Protocol](https://github.com/grpc/grpc/blob/master/doc/server-reflection.md)

pub mod v1alpha;

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use prost::Message;
use prost_types::{FileDescriptorProto, FileDescriptorSet};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::Streaming;
use tonic::transport::{ClientTlsConfig, Endpoint};

use futures_util::stream::once;
use v1alpha::server_reflection_client::ServerReflectionClient;
use v1alpha::server_reflection_request::MessageRequest;
use v1alpha::server_reflection_response::MessageResponse;
use v1alpha::{ServerReflectionRequest, ServerReflectionResponse};

use super::{DEFAULT_REFLECTION_TIMEOUT_SECS, LoadError, ReflectionOptions};

/// Errors that can occur during reflection resolution.
#[derive(Debug, thiserror::Error)]
pub enum ReflectionLoadError {
    #[error(
        "failed to start a stream with the reflection server, reflection might not be supported: '{0}'"
    )]
    StreamInitFailed(#[source] tonic::Status),

    #[error("the reflection stream returned an error status: '{0}'")]
    StreamFailure(#[source] tonic::Status),

    #[error("reflection stream closed unexpectedly")]
    StreamClosed,

    #[error("internal error: failed to send request to reflection stream")]
    SendFailed,

    #[error("unexpected reflection response type: {0}")]
    UnexpectedResponseType(String),

    #[error("failed to decode FileDescriptorProto: {0}")]
    Decode(#[from] prost::DecodeError),
}

// The host field of reflection requests is undocumented and servers ignore
// it in practice, so it is left empty.
const EMPTY_HOST: &str = "";

/// Service names excluded from discovery: the reflection service itself, in
/// both protocol revisions.
const REFLECTION_SERVICE_NAMES: [&str; 2] = [
    "grpc.reflection.v1alpha.ServerReflection",
    "grpc.reflection.v1.ServerReflection",
];

/// Discovers every non-reflection service exposed by `endpoint` and returns
/// a self-contained [`FileDescriptorSet`] covering all of them.
pub(crate) async fn load(
    endpoint: &str,
    options: &ReflectionOptions,
) -> Result<FileDescriptorSet, LoadError> {
    let timeout = if options.timeout_seconds > 0 {
        Duration::from_secs(options.timeout_seconds as u64)
    } else {
        Duration::from_secs(DEFAULT_REFLECTION_TIMEOUT_SECS)
    };

    let channel = dial(endpoint, options, timeout).await?;
    let mut client = ServerReflectionClient::new(channel);

    let services = list_services(&mut client)
        .await
        .map_err(LoadError::ReflectionUnsupported)?;

    let symbols: Vec<String> = services
        .into_iter()
        .filter(|name| !REFLECTION_SERVICE_NAMES.contains(&name.as_str()))
        .collect();
    if symbols.is_empty() {
        return Err(LoadError::EmptyResult);
    }

    let file_map = collect_descriptors(&mut client, &symbols)
        .await
        .map_err(LoadError::ReflectionUnsupported)?;
    if file_map.is_empty() {
        return Err(LoadError::EmptyResult);
    }

    Ok(FileDescriptorSet {
        file: file_map.into_values().collect(),
    })
}

async fn dial(
    endpoint: &str,
    options: &ReflectionOptions,
    timeout: Duration,
) -> Result<tonic::transport::Channel, LoadError> {
    let scheme = if options.use_tls { "https" } else { "http" };
    let mut builder = Endpoint::from_shared(format!("{scheme}://{endpoint}"))
        .map_err(|err| LoadError::SourceInvalid(format!("invalid endpoint '{endpoint}': {err}")))?
        .connect_timeout(timeout);

    if options.use_tls {
        let mut tls = ClientTlsConfig::new().with_native_roots();
        if !options.server_name.is_empty() {
            tls = tls.domain_name(options.server_name.clone());
        }
        builder = builder.tls_config(tls).map_err(|err| {
            LoadError::SourceInvalid(format!("invalid TLS configuration: {err}"))
        })?;
    }

    builder
        .connect()
        .await
        .map_err(|source| LoadError::SourceUnreachable {
            endpoint: endpoint.to_string(),
            source,
        })
}

/// Lists all services exposed by the server via a one-shot request stream.
async fn list_services(
    client: &mut ServerReflectionClient,
) -> Result<Vec<String>, ReflectionLoadError> {
    let req = ServerReflectionRequest {
        host: EMPTY_HOST.to_string(),
        message_request: Some(MessageRequest::ListServices(String::new())),
    };

    let mut response_stream = client
        .server_reflection_info(once(async { req }))
        .await
        .map_err(ReflectionLoadError::StreamInitFailed)?
        .into_inner();

    let response = response_stream
        .message()
        .await
        .map_err(ReflectionLoadError::StreamFailure)?
        .ok_or(ReflectionLoadError::StreamClosed)?;

    match response.message_response {
        Some(MessageResponse::ListServicesResponse(resp)) => {
            Ok(resp.service.into_iter().map(|s| s.name).collect())
        }
        Some(MessageResponse::ErrorResponse(e)) => {
            Err(ReflectionLoadError::StreamFailure(tonic::Status::new(
                tonic::Code::from(e.error_code),
                e.error_message,
            )))
        }
        Some(other) => Err(ReflectionLoadError::UnexpectedResponseType(format!(
            "{other:?}"
        ))),
        None => Err(ReflectionLoadError::UnexpectedResponseType(
            "empty message".into(),
        )),
    }
}

/// Fetches the file containing each symbol plus every transitive dependency
/// over a single bidirectional stream.
async fn collect_descriptors(
    client: &mut ServerReflectionClient,
    symbols: &[String],
) -> Result<HashMap<String, FileDescriptorProto>, ReflectionLoadError> {
    let (tx, rx) = mpsc::channel(symbols.len().max(16));

    let mut response_stream = client
        .server_reflection_info(ReceiverStream::new(rx))
        .await
        .map_err(ReflectionLoadError::StreamInitFailed)?
        .into_inner();

    let mut inflight = 0usize;
    for symbol in symbols {
        let req = ServerReflectionRequest {
            host: EMPTY_HOST.to_string(),
            message_request: Some(MessageRequest::FileContainingSymbol(symbol.clone())),
        };
        tx.send(req)
            .await
            .map_err(|_| ReflectionLoadError::SendFailed)?;
        inflight += 1;
    }

    drain_stream(&mut response_stream, tx, inflight).await
}

async fn drain_stream(
    response_stream: &mut Streaming<ServerReflectionResponse>,
    request_channel: mpsc::Sender<ServerReflectionRequest>,
    mut inflight: usize,
) -> Result<HashMap<String, FileDescriptorProto>, ReflectionLoadError> {
    let mut collected_files = HashMap::new();
    let mut requested = HashSet::new();

    while inflight > 0 {
        let response = response_stream
            .message()
            .await
            .map_err(ReflectionLoadError::StreamFailure)?
            .ok_or(ReflectionLoadError::StreamClosed)?;

        inflight -= 1;

        match response.message_response {
            Some(MessageResponse::FileDescriptorResponse(res)) => {
                let sent_count = process_descriptor_batch(
                    res.file_descriptor_proto,
                    &mut collected_files,
                    &mut requested,
                    &request_channel,
                )
                .await?;

                inflight += sent_count;
            }
            Some(MessageResponse::ErrorResponse(e)) => {
                // One lookup failing (e.g. a symbol the server refuses to
                // describe) should not abort discovery of the rest.
                tracing::warn!(
                    code = e.error_code,
                    message = %e.error_message,
                    "reflection lookup failed, skipping symbol"
                );
            }
            Some(other) => {
                return Err(ReflectionLoadError::UnexpectedResponseType(format!(
                    "{other:?}"
                )));
            }
            None => {
                return Err(ReflectionLoadError::UnexpectedResponseType(
                    "empty message".into(),
                ));
            }
        }
    }

    Ok(collected_files)
}

async fn process_descriptor_batch(
    raw_protos: Vec<Vec<u8>>,
    collected_files: &mut HashMap<String, FileDescriptorProto>,
    requested: &mut HashSet<String>,
    tx: &mpsc::Sender<ServerReflectionRequest>,
) -> Result<usize, ReflectionLoadError> {
    let mut sent_count = 0;

    for raw in raw_protos {
        let fd = FileDescriptorProto::decode(raw.as_ref())?;

        if let Some(name) = &fd.name
            && !collected_files.contains_key(name)
        {
            sent_count += queue_dependencies(&fd, collected_files, requested, tx).await?;

            collected_files.insert(name.clone(), fd);
        }
    }

    Ok(sent_count)
}

async fn queue_dependencies(
    fd: &FileDescriptorProto,
    collected_files: &HashMap<String, FileDescriptorProto>,
    requested: &mut HashSet<String>,
    tx: &mpsc::Sender<ServerReflectionRequest>,
) -> Result<usize, ReflectionLoadError> {
    let mut count = 0;

    for dep in &fd.dependency {
        if !collected_files.contains_key(dep) && requested.insert(dep.clone()) {
            let req = ServerReflectionRequest {
                host: EMPTY_HOST.to_string(),
                message_request: Some(MessageRequest::FileByFilename(dep.clone())),
            };

            tx.send(req)
                .await
                .map_err(|_| ReflectionLoadError::SendFailed)?;
            count += 1;
        }
    }

    Ok(count)
}
