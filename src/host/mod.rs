// src/host/mod.rs
//! Host API surface exposed to tenant scripts
//!
//! Adapters scripts call into during an execution:
//!
//! - **HostApi**: platform entry points (content, users, media, navigation...)
//! - **OutboundHttp**: get/post/put/delete with header and body control
//! - **Emailer**: outgoing mail
//! - **Identity**: the current user and organization
//!
//! Every adapter is async on the host side. From the script's point of view
//! each call is synchronous: the binding drives the host future to completion
//! on the execution's blocking worker before returning to the engine.
//!
//! ```text
//! script: api.contentItems.get("home")
//!    │
//!    └─ __hostCall("api", "contentItems.get", "[\"home\"]")   (engine → host)
//!          │
//!          └─ Handle::block_on(HostApi::call(ContentItems, "get", ["home"]))
//! ```

pub mod binding;
pub mod email;
pub mod http_client;

pub use email::{EmailMessage, Emailer, LogEmailer};
pub use http_client::{HttpMethod, HyperHttpClient, OutboundHttp, OutboundRequest, OutboundResponse};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Failures raised by host adapters; thrown into the calling script
#[derive(Debug, Error)]
pub enum HostError {
    #[error("host service unavailable: {0}")]
    Unavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("unknown api area: {0}")]
    UnknownArea(String),

    #[error("unknown host target: {0}")]
    UnknownTarget(String),

    #[error("http request failed: {0}")]
    Http(String),

    #[error("email delivery failed: {0}")]
    Email(String),

    #[error("{0}")]
    Operation(String),
}

/// Areas of the platform API reachable as `api.<area>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiArea {
    ContentItems,
    ContentTypes,
    Users,
    UserGroups,
    Media,
    Navigation,
    Templates,
    SitePages,
}

impl ApiArea {
    pub const ALL: [ApiArea; 8] = [
        ApiArea::ContentItems,
        ApiArea::ContentTypes,
        ApiArea::Users,
        ApiArea::UserGroups,
        ApiArea::Media,
        ApiArea::Navigation,
        ApiArea::Templates,
        ApiArea::SitePages,
    ];

    /// Name used on the script side
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiArea::ContentItems => "contentItems",
            ApiArea::ContentTypes => "contentTypes",
            ApiArea::Users => "users",
            ApiArea::UserGroups => "userGroups",
            ApiArea::Media => "media",
            ApiArea::Navigation => "navigation",
            ApiArea::Templates => "templates",
            ApiArea::SitePages => "sitePages",
        }
    }
}

impl FromStr for ApiArea {
    type Err = HostError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        ApiArea::ALL
            .into_iter()
            .find(|area| area.as_str() == name)
            .ok_or_else(|| HostError::UnknownArea(name.to_string()))
    }
}

impl fmt::Display for ApiArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Platform API entry points
#[async_trait]
pub trait HostApi: Send + Sync {
    /// Invoke `method` on `area` with the script's arguments
    async fn call(
        &self,
        area: ApiArea,
        method: &str,
        args: Vec<JsonValue>,
    ) -> Result<JsonValue, HostError>;
}

/// Host API used when no platform store is wired in
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableHostApi;

#[async_trait]
impl HostApi for UnavailableHostApi {
    async fn call(
        &self,
        area: ApiArea,
        method: &str,
        _args: Vec<JsonValue>,
    ) -> Result<JsonValue, HostError> {
        Err(HostError::Unavailable(format!(
            "api.{}.{} has no backing store configured",
            area, method
        )))
    }
}

/// The authenticated user an execution runs on behalf of
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentUser {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default)]
    pub roles: Vec<String>,
}

impl CurrentUser {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            email: None,
            roles: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// The tenant organization an execution belongs to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Organization {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }
}

/// Request-scoped identity supplied by the calling layer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Identity {
    pub user: Option<CurrentUser>,
    pub organization: Option<Organization>,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user: CurrentUser) -> Self {
        self.user = Some(user);
        self
    }

    pub fn with_organization(mut self, organization: Organization) -> Self {
        self.organization = Some(organization);
        self
    }
}

/// Process-wide adapters shared by all executions
#[derive(Clone)]
pub struct HostServices {
    pub api: Arc<dyn HostApi>,
    pub emailer: Arc<dyn Emailer>,
    pub http: Arc<dyn OutboundHttp>,
}

impl HostServices {
    pub fn new(
        api: Arc<dyn HostApi>,
        emailer: Arc<dyn Emailer>,
        http: Arc<dyn OutboundHttp>,
    ) -> Self {
        Self { api, emailer, http }
    }

    /// Build the binding set for one execution
    pub fn bind(&self, identity: &Identity) -> HostBindingSet {
        HostBindingSet {
            api: Arc::clone(&self.api),
            emailer: Arc::clone(&self.emailer),
            http: Arc::clone(&self.http),
            user: identity.user.clone(),
            organization: identity.organization.clone(),
        }
    }
}

/// Host objects bound into one execution's global scope
///
/// Carries request-scoped identity, so it is built per execution and never
/// cached on an engine.
#[derive(Clone)]
pub struct HostBindingSet {
    pub api: Arc<dyn HostApi>,
    pub emailer: Arc<dyn Emailer>,
    pub http: Arc<dyn OutboundHttp>,
    pub user: Option<CurrentUser>,
    pub organization: Option<Organization>,
}

impl fmt::Debug for HostBindingSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBindingSet")
            .field("user", &self.user)
            .field("organization", &self.organization)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_area_names_round_trip() {
        for area in ApiArea::ALL {
            assert_eq!(area.as_str().parse::<ApiArea>().unwrap(), area);
        }
        assert!(matches!(
            "widgets".parse::<ApiArea>(),
            Err(HostError::UnknownArea(_))
        ));
    }

    #[tokio::test]
    async fn test_unavailable_api() {
        let api = UnavailableHostApi;
        let err = api
            .call(ApiArea::ContentItems, "get", vec![])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("api.contentItems.get"));
    }

    #[test]
    fn test_bind_copies_identity() {
        let services = HostServices::new(
            Arc::new(UnavailableHostApi),
            Arc::new(LogEmailer::new()),
            Arc::new(HyperHttpClient::new(std::time::Duration::from_secs(1))),
        );
        let identity = Identity::anonymous()
            .with_user(CurrentUser::new("u-1").with_name("Ada"))
            .with_organization(Organization::new("org-9"));

        let bindings = services.bind(&identity);
        assert_eq!(bindings.user.as_ref().unwrap().id, "u-1");
        assert_eq!(bindings.organization.as_ref().unwrap().id, "org-9");

        let anonymous = services.bind(&Identity::anonymous());
        assert!(anonymous.user.is_none());
    }
}
