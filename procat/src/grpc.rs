//! # gRPC Surface
//!
//! Hand-maintained server glue for `procat.v1.CatalogService`, mirroring
//! what tonic's codegen emits: one `UnaryService` per method driven
//! through `tonic::server::Grpc` with a prost codec. This is what lets
//! plain gRPC clients talk to the catalog over the h2c listener.
//!
//! The session id travels in request/response metadata under the same
//! `x-session-id` key the Connect surface uses.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::extract::Request;
use axum::response::Response;
use procat_core::loader::CommandRunner;
use tonic::metadata::MetadataMap;
use tonic::server::{Grpc, UnaryService};
use tonic_prost::ProstCodec;

use crate::api::types::{
    GetServiceSchemaRequest, GetServiceSchemaResponse, InvokeGrpcRequest, InvokeGrpcResponse,
    ListServicesRequest, ListServicesResponse, LoadProtosRequest, LoadProtosResponse,
};
use crate::service::{ApiError, CatalogService, SESSION_HEADER};

type BoxFuture<T> =
    Pin<Box<dyn Future<Output = Result<tonic::Response<T>, tonic::Status>> + Send + 'static>>;

fn session_id_from(metadata: &MetadataMap) -> Option<String> {
    metadata
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn with_session_id<T>(message: T, session_id: &str) -> tonic::Response<T> {
    let mut response = tonic::Response::new(message);
    if let Ok(value) = session_id.parse() {
        response.metadata_mut().insert(SESSION_HEADER, value);
    }
    response
}

fn status_from(err: ApiError) -> tonic::Status {
    match err {
        ApiError::InvalidArgument(message) => tonic::Status::invalid_argument(message),
        ApiError::Internal(message) => tonic::Status::internal(message),
    }
}

struct LoadProtosSvc<R>(Arc<CatalogService<R>>);

impl<R: CommandRunner + 'static> UnaryService<LoadProtosRequest> for LoadProtosSvc<R> {
    type Response = LoadProtosResponse;
    type Future = BoxFuture<LoadProtosResponse>;

    fn call(&mut self, request: tonic::Request<LoadProtosRequest>) -> Self::Future {
        let svc = Arc::clone(&self.0);
        Box::pin(async move {
            let session_id = session_id_from(request.metadata());
            let (message, sid) = svc
                .load_protos(session_id.as_deref(), request.into_inner())
                .await
                .map_err(status_from)?;
            Ok(with_session_id(message, &sid))
        })
    }
}

struct ListServicesSvc<R>(Arc<CatalogService<R>>);

impl<R: CommandRunner + 'static> UnaryService<ListServicesRequest> for ListServicesSvc<R> {
    type Response = ListServicesResponse;
    type Future = BoxFuture<ListServicesResponse>;

    fn call(&mut self, request: tonic::Request<ListServicesRequest>) -> Self::Future {
        let svc = Arc::clone(&self.0);
        Box::pin(async move {
            let session_id = session_id_from(request.metadata());
            let (message, sid) = svc
                .list_services(session_id.as_deref())
                .map_err(status_from)?;
            Ok(with_session_id(message, &sid))
        })
    }
}

struct GetServiceSchemaSvc<R>(Arc<CatalogService<R>>);

impl<R: CommandRunner + 'static> UnaryService<GetServiceSchemaRequest> for GetServiceSchemaSvc<R> {
    type Response = GetServiceSchemaResponse;
    type Future = BoxFuture<GetServiceSchemaResponse>;

    fn call(&mut self, request: tonic::Request<GetServiceSchemaRequest>) -> Self::Future {
        let svc = Arc::clone(&self.0);
        Box::pin(async move {
            let session_id = session_id_from(request.metadata());
            let (message, sid) = svc
                .get_service_schema(session_id.as_deref(), request.into_inner())
                .map_err(status_from)?;
            Ok(with_session_id(message, &sid))
        })
    }
}

struct InvokeGrpcSvc<R>(Arc<CatalogService<R>>);

impl<R: CommandRunner + 'static> UnaryService<InvokeGrpcRequest> for InvokeGrpcSvc<R> {
    type Response = InvokeGrpcResponse;
    type Future = BoxFuture<InvokeGrpcResponse>;

    fn call(&mut self, request: tonic::Request<InvokeGrpcRequest>) -> Self::Future {
        let svc = Arc::clone(&self.0);
        Box::pin(async move {
            let session_id = session_id_from(request.metadata());
            let (message, sid) = svc
                .invoke(session_id.as_deref(), request.into_inner())
                .await
                .map_err(status_from)?;
            Ok(with_session_id(message, &sid))
        })
    }
}

pub(crate) async fn load_protos<R: CommandRunner + 'static>(
    svc: Arc<CatalogService<R>>,
    req: Request,
) -> Response {
    let mut grpc = Grpc::new(ProstCodec::default());
    grpc.unary(LoadProtosSvc(svc), req)
        .await
        .map(axum::body::Body::new)
}

pub(crate) async fn list_services<R: CommandRunner + 'static>(
    svc: Arc<CatalogService<R>>,
    req: Request,
) -> Response {
    let mut grpc = Grpc::new(ProstCodec::default());
    grpc.unary(ListServicesSvc(svc), req)
        .await
        .map(axum::body::Body::new)
}

pub(crate) async fn get_service_schema<R: CommandRunner + 'static>(
    svc: Arc<CatalogService<R>>,
    req: Request,
) -> Response {
    let mut grpc = Grpc::new(ProstCodec::default());
    grpc.unary(GetServiceSchemaSvc(svc), req)
        .await
        .map(axum::body::Body::new)
}

pub(crate) async fn invoke_grpc<R: CommandRunner + 'static>(
    svc: Arc<CatalogService<R>>,
    req: Request,
) -> Response {
    let mut grpc = Grpc::new(ProstCodec::default());
    grpc.unary(InvokeGrpcSvc(svc), req)
        .await
        .map(axum::body::Body::new)
}
