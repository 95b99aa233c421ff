//! Route definitions and the handler/validator seams business modules plug into.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use super::error::ApiError;
use super::types::{HandlerOutput, Method, RequestContext, RouteMeta};

/// A route handler.
///
/// Implemented for any `Fn(RequestContext) -> impl Future<Output = Result<HandlerOutput, ApiError>>`.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, ctx: RequestContext) -> Result<HandlerOutput, ApiError>;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(RequestContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<HandlerOutput, ApiError>> + Send + 'static,
{
    async fn call(&self, ctx: RequestContext) -> Result<HandlerOutput, ApiError> {
        (self)(ctx).await
    }
}

/// A single body validation problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    /// Location of the problem, e.g. `items[0].name`
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Validates a request body and returns its normalized form.
pub trait BodyValidator: Send + Sync {
    fn validate(&self, body: &Value) -> Result<Value, Vec<ValidationIssue>>;
}

impl<F> BodyValidator for F
where
    F: Fn(&Value) -> Result<Value, Vec<ValidationIssue>> + Send + Sync,
{
    fn validate(&self, body: &Value) -> Result<Value, Vec<ValidationIssue>> {
        (self)(body)
    }
}

/// A route as supplied by a business module, before registration.
///
/// Routes require authentication unless marked [`public`](Self::public).
pub struct RouteDefinition {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) name: Option<String>,
    pub(crate) version: Option<String>,
    pub(crate) requires_auth: bool,
    pub(crate) require_workspace: bool,
    pub(crate) required_capability: Option<String>,
    pub(crate) validator: Option<Arc<dyn BodyValidator>>,
    pub(crate) handler: Arc<dyn Handler>,
}

impl RouteDefinition {
    pub fn new<H: Handler + 'static>(method: Method, path: impl Into<String>, handler: H) -> Self {
        Self {
            method,
            path: path.into(),
            name: None,
            version: None,
            requires_auth: true,
            require_workspace: false,
            required_capability: None,
            validator: None,
            handler: Arc::new(handler),
        }
    }

    pub fn get<H: Handler + 'static>(path: impl Into<String>, handler: H) -> Self {
        Self::new(Method::Get, path, handler)
    }

    pub fn post<H: Handler + 'static>(path: impl Into<String>, handler: H) -> Self {
        Self::new(Method::Post, path, handler)
    }

    pub fn put<H: Handler + 'static>(path: impl Into<String>, handler: H) -> Self {
        Self::new(Method::Put, path, handler)
    }

    pub fn patch<H: Handler + 'static>(path: impl Into<String>, handler: H) -> Self {
        Self::new(Method::Patch, path, handler)
    }

    pub fn delete<H: Handler + 'static>(path: impl Into<String>, handler: H) -> Self {
        Self::new(Method::Delete, path, handler)
    }

    /// Route name for logs; defaults to `"<METHOD> <path>"`.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// API version; defaults to the gateway's.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Skip authentication.
    pub fn public(mut self) -> Self {
        self.requires_auth = false;
        self
    }

    /// Reject requests that do not carry a workspace id.
    pub fn require_workspace(mut self) -> Self {
        self.require_workspace = true;
        self
    }

    pub fn capability(mut self, capability: impl Into<String>) -> Self {
        self.required_capability = Some(capability.into());
        self
    }

    pub fn validate_body<V: BodyValidator + 'static>(mut self, validator: V) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }
}

/// A registered route.
#[derive(Clone)]
pub struct Route {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) meta: RouteMeta,
    pub(crate) validator: Option<Arc<dyn BodyValidator>>,
    pub(crate) handler: Arc<dyn Handler>,
}

impl Route {
    pub fn method(&self) -> Method {
        self.method
    }

    /// Normalized path template.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn meta(&self) -> &RouteMeta {
        &self.meta
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("meta", &self.meta)
            .field("validates_body", &self.validator.is_some())
            .finish()
    }
}
