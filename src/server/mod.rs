// src/server/mod.rs
//! HTTP trigger server
//!
//! Serves `/{function}` over hyper http1:
//!
//! - `GET /weather?city=Oslo`  → `get({"city":"Oslo"})`
//! - `POST /contact?lang=en`   → `post(<body>, {"lang":"en"})`
//!
//! Identity is taken from `x-user-id`, `x-user-name` and `x-organization-id`,
//! which the upstream auth proxy sets. Each request carries a cancellation
//! token that fires when the connection goes away or the server shuts down.

use crate::functions::service::FunctionService;
use crate::host::{CurrentUser, Identity, Organization};
use crate::runtime::result::{ExecutionResult, ResultKind, StructuredResult};
use crate::utils::errors::{EngineError, Result};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderMap, HeaderValue, CONTENT_TYPE, LOCATION};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::{json, Map, Value as JsonValue};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::form_urlencoded;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_NAME_HEADER: &str = "x-user-name";
pub const ORGANIZATION_ID_HEADER: &str = "x-organization-id";

/// HTTP front-end for tenant functions
pub struct TriggerServer {
    service: Arc<FunctionService>,
}

impl TriggerServer {
    pub fn new(service: Arc<FunctionService>) -> Self {
        Self { service }
    }

    /// Bind the listening socket
    pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
        TcpListener::bind(addr)
            .await
            .map_err(|e| EngineError::ServerError(format!("failed to bind {}: {}", addr, e)))
    }

    /// Accept connections until `shutdown` fires
    pub async fn serve(self: Arc<Self>, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let local = listener.local_addr()?;
        info!("Trigger server listening on {}", local);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Trigger server shutting down");
                    return Ok(());
                }

                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let server = Arc::clone(&self);
                        let shutdown = shutdown.clone();

                        tokio::spawn(async move {
                            debug!("Accepted connection from {}", peer);
                            let io = TokioIo::new(stream);

                            let service = service_fn(move |req| {
                                let server = Arc::clone(&server);
                                let cancellation = shutdown.child_token();
                                async move {
                                    // Dropped with the request future on disconnect
                                    let _cancel_on_drop = cancellation.clone().drop_guard();
                                    Ok::<_, Infallible>(server.handle_request(req, &cancellation).await)
                                }
                            });

                            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                                debug!("Connection error from {}: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                },
            }
        }
    }

    async fn handle_request(
        &self,
        req: Request<Incoming>,
        cancellation: &CancellationToken,
    ) -> Response<Full<Bytes>> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let Some(name) = function_name(&path) else {
            return error_body(StatusCode::NOT_FOUND, "not_found", "no function in path");
        };

        let query_args = parse_query(req.uri().query());
        let identity = identity_from_headers(req.headers());

        debug!(%method, function = name, "Trigger request");

        let outcome = match method {
            Method::GET => self.service.get(name, &query_args, &identity, cancellation).await,
            Method::POST => {
                let body = match req.into_body().collect().await {
                    Ok(collected) => collected.to_bytes(),
                    Err(e) => {
                        return error_body(
                            StatusCode::BAD_REQUEST,
                            "bad_request",
                            &format!("failed to read body: {}", e),
                        )
                    }
                };
                let payload = parse_payload(&body);
                self.service
                    .post(name, &payload, &query_args, &identity, cancellation)
                    .await
            }
            _ => {
                return error_body(
                    StatusCode::METHOD_NOT_ALLOWED,
                    "method_not_allowed",
                    "only GET and POST are supported",
                )
            }
        };

        match outcome {
            Ok(result) => result_response(&result),
            Err(e) => error_response(&e),
        }
    }
}

/// `/name` → `name`; nested paths are not functions
fn function_name(path: &str) -> Option<&str> {
    let name = path.trim_start_matches('/').trim_end_matches('/');
    if name.is_empty() || name.contains('/') {
        None
    } else {
        Some(name)
    }
}

/// Query string as a flat object; repeated keys keep the last value
fn parse_query(query: Option<&str>) -> JsonValue {
    let args: Map<String, JsonValue> = form_urlencoded::parse(query.unwrap_or_default().as_bytes())
        .map(|(key, value)| (key.into_owned(), JsonValue::String(value.into_owned())))
        .collect();

    JsonValue::Object(args)
}

/// Body parsed as JSON, or kept as a string when it is not JSON
fn parse_payload(body: &Bytes) -> JsonValue {
    if body.is_empty() {
        return JsonValue::Null;
    }
    serde_json::from_slice(body)
        .unwrap_or_else(|_| JsonValue::String(String::from_utf8_lossy(body).into_owned()))
}

fn identity_from_headers(headers: &HeaderMap) -> Identity {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    let mut identity = Identity::anonymous();

    if let Some(id) = header(USER_ID_HEADER) {
        let mut user = CurrentUser::new(id);
        user.name = header(USER_NAME_HEADER);
        identity = identity.with_user(user);
    }
    if let Some(id) = header(ORGANIZATION_ID_HEADER) {
        identity = identity.with_organization(Organization::new(id));
    }

    identity
}

fn result_response(result: &ExecutionResult) -> Response<Full<Bytes>> {
    match result {
        ExecutionResult::Empty => respond(StatusCode::NO_CONTENT, None, Bytes::new(), None),
        ExecutionResult::Value(value) => respond(
            StatusCode::OK,
            Some("application/json"),
            Bytes::from(value.to_string()),
            None,
        ),
        ExecutionResult::Structured(structured) => structured_response(structured),
    }
}

fn structured_response(structured: &StructuredResult) -> Response<Full<Bytes>> {
    let status = StatusCode::from_u16(structured.status_code).unwrap_or(StatusCode::OK);
    let body = Bytes::from(structured.body_text());

    match structured.kind {
        ResultKind::Json => respond(status, Some("application/json"), body, None),
        ResultKind::Html => respond(status, Some("text/html; charset=utf-8"), body, None),
        ResultKind::Xml => respond(status, Some("application/xml"), body, None),
        ResultKind::Redirect => respond(status, None, Bytes::new(), structured.redirect_location()),
        ResultKind::StatusCode => {
            let content_type = match &structured.body {
                JsonValue::Null => None,
                JsonValue::String(_) => Some("text/plain; charset=utf-8"),
                _ => Some("application/json"),
            };
            respond(status, content_type, body, None)
        }
    }
}

fn error_response(error: &EngineError) -> Response<Full<Bytes>> {
    let status = match error {
        EngineError::FunctionNotFound(_) => StatusCode::NOT_FOUND,
        EngineError::FunctionDisabled(_) => StatusCode::FORBIDDEN,
        EngineError::GateTimeout(_) | EngineError::GateClosed | EngineError::PoolDisposed => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        EngineError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status == StatusCode::INTERNAL_SERVER_ERROR {
        warn!(error = %error, "Function invocation failed");
    }

    error_body(status, error.kind(), &error.to_string())
}

fn error_body(status: StatusCode, kind: &str, message: &str) -> Response<Full<Bytes>> {
    let body = json!({ "error": kind, "message": message }).to_string();
    respond(status, Some("application/json"), Bytes::from(body), None)
}

fn respond(
    status: StatusCode,
    content_type: Option<&'static str>,
    body: Bytes,
    location: Option<&str>,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;

    if let Some(content_type) = content_type {
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    }

    if let Some(location) = location {
        match HeaderValue::from_str(location) {
            Ok(value) => {
                response.headers_mut().insert(LOCATION, value);
            }
            Err(_) => {
                warn!(location, "Redirect target is not a valid header value");
                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            }
        }
    }

    response
}
