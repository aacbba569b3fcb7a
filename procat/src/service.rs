//! # Catalog Façade
//!
//! Glues the four external RPCs to the engine. Every method takes the
//! caller's session id (from the `x-session-id` header) and returns the
//! response together with the effective session id, which both surfaces
//! echo back so the client can pin subsequent calls.
//!
//! Error discipline: caller-side contract violations (missing required
//! field, unknown source arm, empty service name) surface as transport
//! errors via [`ApiError`]; every legitimate attempt whose outcome is "no"
//! (bad source, unreachable server, rejected call) is encoded as
//! `success=false` / `error` inside the response message.

use std::sync::Arc;

use procat_core::invoker::{DEFAULT_INVOKE_TIMEOUT_SECS, InvokeRequest};
use procat_core::loader::{CommandRunner, Loader, SystemRunner, descriptor_info};
use procat_core::registry;
use procat_core::session::{SessionManager, SessionState};

use crate::api::types::{
    GetServiceSchemaRequest, GetServiceSchemaResponse, InvokeGrpcRequest, InvokeGrpcResponse,
    ListServicesResponse, LoadProtosRequest, LoadProtosResponse, MethodInfo, ServiceInfo,
    transport_from_value,
};

/// Header carrying the session id in both directions.
pub const SESSION_HEADER: &str = "x-session-id";

/// Transport-level errors. Everything else is a response-level failure.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidArgument(String),

    #[allow(dead_code)]
    #[error("{0}")]
    Internal(String),
}

/// Result of a façade call: the response message plus the effective
/// session id to echo back.
pub type ApiResult<T> = Result<(T, String), ApiError>;

pub struct CatalogService<R = SystemRunner> {
    sessions: SessionManager,
    loader: Loader<R>,
}

impl<R: CommandRunner> CatalogService<R> {
    pub fn new(sessions: SessionManager, loader: Loader<R>) -> Self {
        Self { sessions, loader }
    }

    pub async fn close(&self) {
        self.sessions.close().await;
    }

    fn session(&self, session_id: Option<&str>) -> (Arc<SessionState>, String) {
        self.sessions.get_or_create(session_id)
    }

    pub async fn load_protos(
        &self,
        session_id: Option<&str>,
        req: LoadProtosRequest,
    ) -> ApiResult<LoadProtosResponse> {
        let source = req
            .source()
            .map_err(|err| ApiError::InvalidArgument(err.to_string()))?;

        let (state, sid) = self.session(session_id);

        let fds = match self.loader.load(&source).await {
            Ok(fds) => fds,
            Err(err) => {
                return Ok((
                    LoadProtosResponse {
                        success: false,
                        error: format!("failed to load protos: {err}"),
                        ..Default::default()
                    },
                    sid,
                ));
            }
        };

        if let Err(err) = state.registry.register(&fds) {
            return Ok((
                LoadProtosResponse {
                    success: false,
                    error: format!("failed to register descriptors: {err}"),
                    ..Default::default()
                },
                sid,
            ));
        }

        let info = descriptor_info(&fds);
        tracing::info!(
            session_id = %sid,
            services = info.services.len(),
            files = info.file_count,
            "registered descriptors"
        );
        Ok((
            LoadProtosResponse {
                success: true,
                error: String::new(),
                service_count: info.services.len() as i32,
                file_count: info.file_count as i32,
            },
            sid,
        ))
    }

    pub fn list_services(&self, session_id: Option<&str>) -> ApiResult<ListServicesResponse> {
        let (state, sid) = self.session(session_id);
        let services = state
            .registry
            .list_services()
            .into_iter()
            .map(service_info)
            .collect();
        Ok((ListServicesResponse { services }, sid))
    }

    pub fn get_service_schema(
        &self,
        session_id: Option<&str>,
        req: GetServiceSchemaRequest,
    ) -> ApiResult<GetServiceSchemaResponse> {
        if req.service_name.is_empty() {
            return Err(ApiError::InvalidArgument(
                "service_name is required".to_string(),
            ));
        }

        let (state, sid) = self.session(session_id);
        match state.registry.get_service_schema(&req.service_name) {
            Ok((info, schemas)) => Ok((
                GetServiceSchemaResponse {
                    service: Some(service_info(info)),
                    message_schemas: schemas,
                    error: String::new(),
                },
                sid,
            )),
            Err(err) => Ok((
                GetServiceSchemaResponse {
                    error: format!("failed to get service schema: {err}"),
                    ..Default::default()
                },
                sid,
            )),
        }
    }

    pub async fn invoke(
        &self,
        session_id: Option<&str>,
        req: InvokeGrpcRequest,
    ) -> ApiResult<InvokeGrpcResponse> {
        if req.endpoint.is_empty() {
            return Err(ApiError::InvalidArgument("endpoint is required".to_string()));
        }
        if req.service.is_empty() {
            return Err(ApiError::InvalidArgument("service is required".to_string()));
        }
        if req.method.is_empty() {
            return Err(ApiError::InvalidArgument("method is required".to_string()));
        }

        let (state, sid) = self.session(session_id);

        let method = match state.registry.get_method_descriptor(&req.service, &req.method) {
            Ok(method) => method,
            Err(err) => {
                return Ok((failure(format!("method not found: {err}")), sid));
            }
        };

        if method.is_client_streaming() || method.is_server_streaming() {
            return Ok((
                failure("streaming methods are not supported (unary only)"),
                sid,
            ));
        }

        let request_json = if req.request_json.is_empty() {
            b"{}".to_vec()
        } else {
            req.request_json.clone().into_bytes()
        };
        let timeout_seconds = if req.timeout_seconds > 0 {
            req.timeout_seconds
        } else {
            DEFAULT_INVOKE_TIMEOUT_SECS
        };

        let invoke_req = InvokeRequest {
            endpoint: req.endpoint.clone(),
            service: req.service.clone(),
            method: req.method.clone(),
            request_json,
            use_tls: req.use_tls,
            server_name: req.server_name.clone(),
            timeout_seconds,
            metadata: req.metadata.clone(),
            method_descriptor: method,
            transport: transport_from_value(req.transport).into(),
        };

        let resp = state.invoker.invoke_unary(&invoke_req).await;
        Ok((
            InvokeGrpcResponse {
                success: resp.success,
                response_json: String::from_utf8_lossy(&resp.response_json).into_owned(),
                error: resp.error,
                metadata: resp.metadata,
                status_code: resp.status_code,
                status_message: resp.status_message,
            },
            sid,
        ))
    }
}

fn failure(error: impl Into<String>) -> InvokeGrpcResponse {
    InvokeGrpcResponse {
        success: false,
        error: error.into(),
        ..Default::default()
    }
}

fn service_info(info: registry::ServiceInfo) -> ServiceInfo {
    ServiceInfo {
        name: info.name,
        package: info.package,
        documentation: info.documentation,
        methods: info
            .methods
            .into_iter()
            .map(|method| MethodInfo {
                name: method.name,
                input_type: method.input_type,
                output_type: method.output_type,
                documentation: method.documentation,
                client_streaming: method.client_streaming,
                server_streaming: method.server_streaming,
            })
            .collect(),
    }
}
