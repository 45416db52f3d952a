// src/host/http_client.rs
//! Outbound HTTP for scripts
//!
//! `http.get/post/put/delete(url, body?, headers?)` arrive here as an
//! `OutboundRequest`. The response handed back to the script is
//! `{ status, headers, body }`, with a JSON body parsed when the server says
//! it is JSON and kept as text otherwise.

use crate::host::HostError;
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_hyper(&self) -> Method {
        match self {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Delete => Method::DELETE,
        }
    }
}

impl FromStr for HttpMethod {
    type Err = HostError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.to_ascii_lowercase().as_str() {
            "get" => Ok(HttpMethod::Get),
            "post" => Ok(HttpMethod::Post),
            "put" => Ok(HttpMethod::Put),
            "delete" => Ok(HttpMethod::Delete),
            other => Err(HostError::InvalidArguments(format!(
                "unsupported http method: {}",
                other
            ))),
        }
    }
}

/// A request issued by a script
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    pub method: HttpMethod,

    pub url: String,

    pub headers: BTreeMap<String, String>,

    /// Request body; non-string values are sent as JSON
    pub body: Option<JsonValue>,
}

impl OutboundRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    /// Build from the script-side argument list `[url, body, headers]`
    pub fn from_script_args(method: HttpMethod, args: Vec<JsonValue>) -> Result<Self, HostError> {
        let mut args = args.into_iter();

        let url = match args.next() {
            Some(JsonValue::String(url)) => url,
            _ => {
                return Err(HostError::InvalidArguments(
                    "http call requires a url string".to_string(),
                ))
            }
        };

        let body = match args.next() {
            None | Some(JsonValue::Null) => None,
            Some(body) => Some(body),
        };

        let headers = match args.next() {
            None | Some(JsonValue::Null) => BTreeMap::new(),
            Some(JsonValue::Object(map)) => map
                .into_iter()
                .map(|(name, value)| {
                    let value = match value {
                        JsonValue::String(s) => s,
                        other => other.to_string(),
                    };
                    (name, value)
                })
                .collect(),
            Some(_) => {
                return Err(HostError::InvalidArguments(
                    "http headers must be an object".to_string(),
                ))
            }
        };

        Ok(Self {
            method,
            url,
            headers,
            body,
        })
    }

    fn body_bytes(&self) -> (Bytes, Option<&'static str>) {
        match &self.body {
            None => (Bytes::new(), None),
            Some(JsonValue::String(text)) => (Bytes::from(text.clone()), Some("text/plain; charset=utf-8")),
            Some(value) => (Bytes::from(value.to_string()), Some("application/json")),
        }
    }
}

/// What the script sees as the return value of `http.*`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundResponse {
    pub status: u16,

    pub headers: BTreeMap<String, String>,

    pub body: JsonValue,
}

impl OutboundResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Outbound HTTP adapter
#[async_trait]
pub trait OutboundHttp: Send + Sync {
    async fn send(&self, request: OutboundRequest) -> Result<OutboundResponse, HostError>;
}

/// Plain-HTTP client on the hyper-util legacy pool
pub struct HyperHttpClient {
    client: Client<HttpConnector, Full<Bytes>>,
    timeout: Duration,
}

impl HyperHttpClient {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        Self { client, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn dispatch(&self, request: OutboundRequest) -> Result<OutboundResponse, HostError> {
        let uri: Uri = request
            .url
            .parse()
            .map_err(|e| HostError::InvalidArguments(format!("invalid url {}: {}", request.url, e)))?;

        if uri.scheme_str() != Some("http") {
            return Err(HostError::InvalidArguments(format!(
                "only http:// urls are supported: {}",
                request.url
            )));
        }

        let (body, default_content_type) = request.body_bytes();

        let mut builder = Request::builder().method(request.method.as_hyper()).uri(uri);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(content_type) = default_content_type {
            if !request.headers.keys().any(|k| k.eq_ignore_ascii_case("content-type")) {
                builder = builder.header(hyper::header::CONTENT_TYPE, content_type);
            }
        }

        let outbound = builder
            .body(Full::new(body))
            .map_err(|e| HostError::InvalidArguments(format!("request build error: {}", e)))?;

        let response = self
            .client
            .request(outbound)
            .await
            .map_err(|e| HostError::Http(e.to_string()))?;

        let (parts, body) = response.into_parts();
        let bytes = body
            .collect()
            .await
            .map_err(|e| HostError::Http(format!("response body error: {}", e)))?
            .to_bytes();

        let headers: BTreeMap<String, String> = parts
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let is_json = headers
            .get("content-type")
            .map(|ct| ct.contains("json"))
            .unwrap_or(false);

        let text = String::from_utf8_lossy(&bytes).into_owned();
        let body = if is_json {
            serde_json::from_str(&text).unwrap_or(JsonValue::String(text))
        } else {
            JsonValue::String(text)
        };

        Ok(OutboundResponse {
            status: parts.status.as_u16(),
            headers,
            body,
        })
    }
}

#[async_trait]
impl OutboundHttp for HyperHttpClient {
    async fn send(&self, request: OutboundRequest) -> Result<OutboundResponse, HostError> {
        debug!(method = ?request.method, url = %request.url, "Outbound request");

        tokio::time::timeout(self.timeout, self.dispatch(request))
            .await
            .map_err(|_| HostError::Http(format!("request timed out after {:?}", self.timeout)))?
    }
}
