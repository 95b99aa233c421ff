//! Request, context and response envelope types.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::error::{ApiError, ErrorCode, RouteError};
use crate::router::PathParams;

/// Header/query map. Header keys are lowercased by the gateway.
pub type StringMap = BTreeMap<String, String>;

/// HTTP methods the gateway routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A method string outside GET/POST/PUT/PATCH/DELETE.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unsupported HTTP method: {0}")]
pub struct UnsupportedMethod(pub String);

impl FromStr for Method {
    type Err = UnsupportedMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            _ => Err(UnsupportedMethod(s.to_string())),
        }
    }
}

/// An inbound request as handed to [`Gateway::handle_request`](super::Gateway::handle_request).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiRequest {
    /// Method verb, validated by the gateway
    pub method: String,
    /// Request target; may carry a query string
    pub path: String,
    #[serde(default)]
    pub headers: StringMap,
    /// Explicit query parameters; these win over ones parsed from `path`
    #[serde(default)]
    pub query: StringMap,
    #[serde(default)]
    pub body: Value,
}

impl ApiRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }
}

/// The authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    /// Stable identity; used as the rate-limit key
    pub id: String,
    #[serde(default)]
    pub workspace_id: Option<String>,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            workspace_id: None,
            capabilities: BTreeSet::new(),
        }
    }

    pub fn with_workspace(mut self, workspace_id: impl Into<String>) -> Self {
        self.workspace_id = Some(workspace_id.into());
        self
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }
}

/// Route metadata visible to middleware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteMeta {
    pub name: String,
    pub version: String,
    pub requires_auth: bool,
    pub require_workspace: bool,
    pub required_capability: Option<String>,
}

/// The normalized request as seen by middleware and handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestData {
    pub method: Method,
    pub path: String,
    pub headers: StringMap,
    pub query: StringMap,
    pub body: Value,
}

/// Per-request context.
///
/// Everything is read-only once built, except the principal, which can be
/// attached exactly once (normally by the auth middleware).
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: String,
    now_iso: String,
    request: RequestData,
    path_params: PathParams,
    workspace_id: Option<String>,
    principal: Option<Principal>,
    route_meta: RouteMeta,
}

impl RequestContext {
    pub(crate) fn new(
        request_id: String,
        now_iso: String,
        request: RequestData,
        path_params: PathParams,
        workspace_id: Option<String>,
        route_meta: RouteMeta,
    ) -> Self {
        Self {
            request_id,
            now_iso,
            request,
            path_params,
            workspace_id,
            principal: None,
            route_meta,
        }
    }

    pub(crate) fn replace_body(&mut self, body: Value) {
        self.request.body = body;
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn now_iso(&self) -> &str {
        &self.now_iso
    }

    pub fn request(&self) -> &RequestData {
        &self.request
    }

    pub fn method(&self) -> Method {
        self.request.method
    }

    pub fn path(&self) -> &str {
        &self.request.path
    }

    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.request
            .headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn query(&self) -> &StringMap {
        &self.request.query
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.request.query.get(name).map(String::as_str)
    }

    pub fn body(&self) -> &Value {
        &self.request.body
    }

    pub fn path_params(&self) -> &PathParams {
        &self.path_params
    }

    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name).map(String::as_str)
    }

    pub fn workspace_id(&self) -> Option<&str> {
        self.workspace_id.as_deref()
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    pub fn route_meta(&self) -> &RouteMeta {
        &self.route_meta
    }

    /// Attach the authenticated principal. Returns false, leaving the
    /// existing principal in place, if one was already attached.
    pub fn attach_principal(&mut self, principal: Principal) -> bool {
        if self.principal.is_some() {
            return false;
        }
        self.principal = Some(principal);
        true
    }
}

/// What a handler returns on success.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandlerOutput {
    /// Defaults to 200
    pub status: Option<u16>,
    /// Merged over the gateway's default headers
    pub headers: StringMap,
    pub data: Value,
    pub pagination: Option<Value>,
}

impl HandlerOutput {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    /// Serialize `data` into a handler output.
    pub fn from_serializable<T: Serialize>(data: &T) -> Result<Self, ApiError> {
        let data = serde_json::to_value(data).map_err(anyhow::Error::from)?;
        Ok(Self::new(data))
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_pagination(mut self, pagination: Value) -> Self {
        self.pagination = Some(pagination);
        self
    }
}

/// Body of a successful response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessBody {
    pub ok: bool,
    pub request_id: String,
    pub at_iso: String,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Value>,
}

/// Error details inside an [`ErrorBody`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Body of an error response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub ok: bool,
    pub request_id: String,
    pub at_iso: String,
    pub error: ErrorPayload,
}

/// Response body: success or error envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Success(SuccessBody),
    Error(ErrorBody),
}

/// A complete response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: StringMap,
    pub body: ResponseBody,
}

impl ApiResponse {
    /// Success envelope. Handler headers override the defaults.
    pub fn success(request_id: &str, at_iso: &str, version: &str, output: HandlerOutput) -> Self {
        let mut headers = default_headers(version);
        headers.extend(output.headers);

        Self {
            status: output.status.unwrap_or(200),
            headers,
            body: ResponseBody::Success(SuccessBody {
                ok: true,
                request_id: request_id.to_string(),
                at_iso: at_iso.to_string(),
                data: output.data,
                pagination: output.pagination,
            }),
        }
    }

    /// Error envelope.
    pub fn error(request_id: &str, at_iso: &str, version: &str, err: RouteError) -> Self {
        Self {
            status: err.status,
            headers: default_headers(version),
            body: ResponseBody::Error(ErrorBody {
                ok: false,
                request_id: request_id.to_string(),
                at_iso: at_iso.to_string(),
                error: ErrorPayload {
                    code: err.code,
                    message: err.message,
                    details: err.details,
                },
            }),
        }
    }

    /// Success envelope for a request that reached a route.
    pub fn success_for(ctx: &RequestContext, output: HandlerOutput) -> Self {
        Self::success(ctx.request_id(), ctx.now_iso(), &ctx.route_meta().version, output)
    }

    /// Error envelope for a request that reached a route.
    pub fn error_for(ctx: &RequestContext, err: RouteError) -> Self {
        Self::error(ctx.request_id(), ctx.now_iso(), &ctx.route_meta().version, err)
    }

    /// Add or overwrite headers.
    pub fn with_headers(mut self, headers: StringMap) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        matches!(self.body, ResponseBody::Success(_))
    }

    pub fn data(&self) -> Option<&Value> {
        match &self.body {
            ResponseBody::Success(body) => Some(&body.data),
            ResponseBody::Error(_) => None,
        }
    }

    pub fn error_payload(&self) -> Option<&ErrorPayload> {
        match &self.body {
            ResponseBody::Error(body) => Some(&body.error),
            ResponseBody::Success(_) => None,
        }
    }

    pub fn request_id(&self) -> &str {
        match &self.body {
            ResponseBody::Success(body) => &body.request_id,
            ResponseBody::Error(body) => &body.request_id,
        }
    }
}

fn default_headers(version: &str) -> StringMap {
    let mut headers = StringMap::new();
    headers.insert("content-type".to_string(), "application/json".to_string());
    headers.insert("x-api-version".to_string(), version.to_string());
    headers
}
