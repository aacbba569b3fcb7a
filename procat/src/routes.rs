//! # HTTP Surface
//!
//! One POST route per catalog RPC at `/<service FQN>/<method>`. Each
//! handler branches on the request's content type: `application/grpc*`
//! goes to the gRPC glue in [`crate::grpc`], everything else is treated as
//! a Connect-protocol unary call with a JSON body.
//!
//! Connect-side errors render the Connect error shape `{"code",
//! "message"}` with the matching HTTP status. Successful responses carry
//! the effective session id in the `x-session-id` header.

use std::sync::Arc;

use axum::Router;
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use http::StatusCode;
use http::header::CONTENT_TYPE;
use serde::Serialize;
use serde::de::DeserializeOwned;

use procat_core::loader::CommandRunner;

use crate::api::types::{
    GetServiceSchemaRequest, InvokeGrpcRequest, ListServicesRequest, LoadProtosRequest,
    SERVICE_NAME,
};
use crate::grpc;
use crate::service::{ApiError, ApiResult, CatalogService, SESSION_HEADER};


/// Request bodies over this size are rejected.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

pub fn router<R>(service: Arc<CatalogService<R>>) -> Router
where
    R: CommandRunner + 'static,
{
    Router::new()
        .route(&rpc_path("LoadProtos"), post(load_protos::<R>))
        .route(&rpc_path("ListServices"), post(list_services::<R>))
        .route(&rpc_path("GetServiceSchema"), post(get_service_schema::<R>))
        .route(&rpc_path("InvokeGRPC"), post(invoke_grpc::<R>))
        .with_state(service)
}

fn rpc_path(method: &str) -> String {
    format!("/{SERVICE_NAME}/{method}")
}

async fn load_protos<R: CommandRunner + 'static>(
    State(svc): State<Arc<CatalogService<R>>>,
    req: Request,
) -> Response {
    if is_grpc(&req) {
        return grpc::load_protos(svc, req).await;
    }
    let (session_id, body) = match split_request(req).await {
        Ok(parts) => parts,
        Err(response) => return response,
    };
    let msg: LoadProtosRequest = match parse_body(&body) {
        Ok(msg) => msg,
        Err(response) => return response,
    };
    connect_response(svc.load_protos(session_id.as_deref(), msg).await)
}

async fn list_services<R: CommandRunner + 'static>(
    State(svc): State<Arc<CatalogService<R>>>,
    req: Request,
) -> Response {
    if is_grpc(&req) {
        return grpc::list_services(svc, req).await;
    }
    let (session_id, body) = match split_request(req).await {
        Ok(parts) => parts,
        Err(response) => return response,
    };
    // The request message is empty, but an unparseable body is still a
    // malformed request.
    if let Err(response) = parse_body::<ListServicesRequest>(&body) {
        return response;
    }
    connect_response(svc.list_services(session_id.as_deref()))
}

async fn get_service_schema<R: CommandRunner + 'static>(
    State(svc): State<Arc<CatalogService<R>>>,
    req: Request,
) -> Response {
    if is_grpc(&req) {
        return grpc::get_service_schema(svc, req).await;
    }
    let (session_id, body) = match split_request(req).await {
        Ok(parts) => parts,
        Err(response) => return response,
    };
    let msg: GetServiceSchemaRequest = match parse_body(&body) {
        Ok(msg) => msg,
        Err(response) => return response,
    };
    connect_response(svc.get_service_schema(session_id.as_deref(), msg))
}

async fn invoke_grpc<R: CommandRunner + 'static>(
    State(svc): State<Arc<CatalogService<R>>>,
    req: Request,
) -> Response {
    if is_grpc(&req) {
        return grpc::invoke_grpc(svc, req).await;
    }
    let (session_id, body) = match split_request(req).await {
        Ok(parts) => parts,
        Err(response) => return response,
    };
    let msg: InvokeGrpcRequest = match parse_body(&body) {
        Ok(msg) => msg,
        Err(response) => return response,
    };
    connect_response(svc.invoke(session_id.as_deref(), msg).await)
}

fn is_grpc(req: &Request) -> bool {
    req.headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/grpc"))
}

/// Pulls the session header out and collects the body.
async fn split_request(req: Request) -> Result<(Option<String>, axum::body::Bytes), Response> {
    let session_id = req
        .headers()
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let body = axum::body::to_bytes(req.into_body(), MAX_BODY_BYTES)
        .await
        .map_err(|err| {
            connect_error(
                StatusCode::BAD_REQUEST,
                "invalid_argument",
                format!("failed to read request body: {err}"),
            )
        })?;

    Ok((session_id, body))
}

fn parse_body<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, Response> {
    // Connect allows an empty body for messages with no required fields.
    if body.is_empty() {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|err| {
        connect_error(
            StatusCode::BAD_REQUEST,
            "invalid_argument",
            format!("failed to parse request: {err}"),
        )
    })
}

fn connect_response<T: Serialize>(result: ApiResult<T>) -> Response {
    match result {
        Ok((msg, session_id)) => {
            let mut response = axum::Json(msg).into_response();
            if let Ok(value) = session_id.parse() {
                response.headers_mut().insert(SESSION_HEADER, value);
            }
            response
        }
        Err(ApiError::InvalidArgument(message)) => {
            connect_error(StatusCode::BAD_REQUEST, "invalid_argument", message)
        }
        Err(ApiError::Internal(message)) => {
            connect_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
        }
    }
}

fn connect_error(status: StatusCode, code: &str, message: String) -> Response {
    (
        status,
        axum::Json(serde_json::json!({ "code": code, "message": message })),
    )
        .into_response()
}
