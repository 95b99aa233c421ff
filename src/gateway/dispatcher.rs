//! The gateway: route table, middleware list and per-request dispatch.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info, instrument, trace, warn};
use uuid::Uuid;

use super::error::{ApiError, RouteError};
use super::health::HealthHandler;
use super::route::{Route, RouteDefinition};
use super::types::{ApiRequest, ApiResponse, Method, RequestContext, RequestData, RouteMeta, StringMap};
use crate::clock::{to_iso, Clock};
use crate::config::GatewayConfig;
use crate::error::{PorticoError, Result};
use crate::middleware::{Endpoint, Middleware, Next};
use crate::router::{match_path, normalize_path, parse_query, split_path_and_query};

const WORKSPACE_HEADER: &str = "x-workspace-id";
const WORKSPACE_QUERY_PARAM: &str = "workspaceId";

/// In-process API gateway.
///
/// Routes and middleware are registered through `&mut self` during startup;
/// [`handle_request`](Gateway::handle_request) only reads them.
pub struct Gateway {
    version: String,
    clock: Arc<dyn Clock>,
    booted_at_ms: i64,
    routes: Vec<Route>,
    middleware: Vec<Arc<dyn Middleware>>,
    /// Shared with the health handler
    route_count: Arc<AtomicUsize>,
}

impl Gateway {
    /// Create a gateway with its built-in health route registered.
    pub fn new(config: &GatewayConfig, clock: Arc<dyn Clock>) -> Self {
        let booted_at_ms = clock.now_ms();
        let route_count = Arc::new(AtomicUsize::new(0));

        let mut gateway = Self {
            version: config.version.clone(),
            clock,
            booted_at_ms,
            routes: Vec::new(),
            middleware: Vec::new(),
            route_count: route_count.clone(),
        };

        let health = RouteDefinition::get(
            format!("/{}/health", gateway.version),
            HealthHandler::new(to_iso(booted_at_ms), route_count),
        )
        .name("health")
        .public();
        gateway.push_route(health);

        info!(
            version = %gateway.version,
            booted_at = %to_iso(booted_at_ms),
            "Gateway initialized"
        );
        gateway
    }

    /// API version routes default to.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn booted_at_ms(&self) -> i64 {
        self.booted_at_ms
    }

    /// Register a route.
    ///
    /// Fails if a route with the same method and normalized path exists, or
    /// if the path template is malformed.
    pub fn register_route(&mut self, definition: RouteDefinition) -> Result<()> {
        validate_template(&definition.path)?;

        let path = normalize_path(&definition.path);
        if self
            .routes
            .iter()
            .any(|route| route.method == definition.method && route.path == path)
        {
            return Err(PorticoError::DuplicateRoute {
                method: definition.method.to_string(),
                path,
            });
        }

        self.push_route(definition);
        Ok(())
    }

    fn push_route(&mut self, definition: RouteDefinition) {
        let path = normalize_path(&definition.path);
        let meta = RouteMeta {
            name: definition
                .name
                .unwrap_or_else(|| format!("{} {}", definition.method, path)),
            version: definition.version.unwrap_or_else(|| self.version.clone()),
            requires_auth: definition.requires_auth,
            require_workspace: definition.require_workspace,
            required_capability: definition.required_capability,
        };

        debug!(
            method = %definition.method,
            path = %path,
            name = %meta.name,
            requires_auth = meta.requires_auth,
            "Registered route"
        );

        self.routes.push(Route {
            method: definition.method,
            path,
            meta,
            validator: definition.validator,
            handler: definition.handler,
        });
        self.route_count.store(self.routes.len(), Ordering::Relaxed);
    }

    /// Append a middleware; earlier registrations wrap later ones.
    pub fn use_middleware<M: Middleware + 'static>(&mut self, middleware: M) {
        self.use_shared_middleware(Arc::new(middleware));
    }

    pub fn use_shared_middleware(&mut self, middleware: Arc<dyn Middleware>) {
        debug!(middleware = middleware.name(), "Installed middleware");
        self.middleware.push(middleware);
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    pub fn middleware_names(&self) -> Vec<&'static str> {
        self.middleware.iter().map(|m| m.name()).collect()
    }

    /// Dispatch one request. Every outcome, including failures, is an
    /// [`ApiResponse`].
    #[instrument(
        skip(self, request),
        fields(method = %request.method, path = %request.path)
    )]
    pub async fn handle_request(&self, request: ApiRequest) -> ApiResponse {
        let request_id = Uuid::new_v4().to_string();
        let now_iso = self.clock.now_iso();

        let method: Method = match request.method.parse() {
            Ok(method) => method,
            Err(err) => {
                warn!(request_id = %request_id, "Rejected unsupported method");
                return self.error(&request_id, &now_iso, RouteError::bad_request(err.to_string()));
            }
        };

        let (raw_path, raw_query) = split_path_and_query(&request.path);
        let path = normalize_path(raw_path);

        let headers: StringMap = request
            .headers
            .into_iter()
            .map(|(name, value)| (name.trim().to_ascii_lowercase(), value))
            .collect();

        let mut query = raw_query.map(parse_query).unwrap_or_default();
        query.extend(request.query);

        let workspace_id = headers
            .get(WORKSPACE_HEADER)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .or_else(|| query.get(WORKSPACE_QUERY_PARAM).map(String::as_str))
            .map(str::to_string);

        let candidates: Vec<_> = self
            .routes
            .iter()
            .filter_map(|route| match_path(&route.path, &path).map(|params| (route, params)))
            .collect();

        if candidates.is_empty() {
            debug!(request_id = %request_id, path = %path, "No route matched");
            return self.error(
                &request_id,
                &now_iso,
                RouteError::not_found(format!("No route for {} {}", method, path)),
            );
        }

        let Some((route, path_params)) = candidates
            .iter()
            .find(|(route, _)| route.method == method)
            .cloned()
        else {
            let mut methods: Vec<Method> = candidates.iter().map(|(r, _)| r.method).collect();
            methods.sort();
            methods.dedup();
            let allowed: Vec<&str> = methods.iter().map(Method::as_str).collect();
            debug!(request_id = %request_id, path = %path, ?allowed, "Method not allowed");
            let err = RouteError::method_not_allowed(format!("Method {} not allowed for {}", method, path))
                .with_details(json!({ "allowed": allowed }));
            return self
                .error(&request_id, &now_iso, err)
                .with_headers(StringMap::from([("allow".to_string(), allowed.join(", "))]));
        };

        trace!(request_id = %request_id, route = %route.meta.name, "Matched route");

        let mut ctx = RequestContext::new(
            request_id,
            now_iso,
            RequestData {
                method,
                path,
                headers,
                query,
                body: request.body,
            },
            path_params,
            workspace_id,
            route.meta.clone(),
        );

        if let Some(validator) = &route.validator {
            match validator.validate(ctx.body()) {
                Ok(normalized) => ctx.replace_body(normalized),
                Err(issues) => {
                    debug!(
                        request_id = %ctx.request_id(),
                        issue_count = issues.len(),
                        "Body validation failed"
                    );
                    return ApiResponse::error_for(&ctx, RouteError::validation_failed(&issues));
                }
            }
        }

        let endpoint = RouteEndpoint { route };
        match Next::new(&self.middleware, &endpoint).run(&mut ctx).await {
            Ok(response) => response,
            Err(err) => {
                let err = err.into_route_error();
                warn!(
                    request_id = %ctx.request_id(),
                    status = err.status,
                    code = %err.code,
                    "Middleware failed"
                );
                ApiResponse::error_for(&ctx, err)
            }
        }
    }

    fn error(&self, request_id: &str, now_iso: &str, err: RouteError) -> ApiResponse {
        ApiResponse::error(request_id, now_iso, &self.version, err)
    }
}

/// Innermost step: runs the handler and maps its result to an envelope.
struct RouteEndpoint<'r> {
    route: &'r Route,
}

#[async_trait]
impl<'r> Endpoint for RouteEndpoint<'r> {
    async fn call(&self, ctx: &mut RequestContext) -> std::result::Result<ApiResponse, ApiError> {
        match self.route.handler.call(ctx.clone()).await {
            Ok(output) => Ok(ApiResponse::success_for(ctx, output)),
            Err(ApiError::Route(err)) => Ok(ApiResponse::error_for(ctx, err)),
            Err(ApiError::Internal(err)) => {
                warn!(
                    request_id = %ctx.request_id(),
                    route = %self.route.meta.name,
                    error = %err,
                    "Handler failed unexpectedly"
                );
                Ok(ApiResponse::error_for(ctx, ApiError::Internal(err).into_route_error()))
            }
        }
    }
}

/// Reject templates with unnamed parameters such as `/items/:`.
fn validate_template(path: &str) -> Result<()> {
    let (path, query) = split_path_and_query(path);
    if query.is_some() {
        return Err(PorticoError::InvalidRoute(format!(
            "route path must not carry a query string: {}",
            path
        )));
    }
    if path.split('/').any(|segment| segment == ":") {
        return Err(PorticoError::InvalidRoute(format!(
            "unnamed path parameter in {}",
            path
        )));
    }
    Ok(())
}
