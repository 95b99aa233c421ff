//! API-key authentication stage and the authenticator seam it calls.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use super::{Middleware, Next};
use crate::config::{ApiKeyConfig, AuthConfig};
use crate::gateway::{ApiError, ApiResponse, ErrorCode, Principal, RequestContext, RouteError};

const API_KEY_HEADER: &str = "x-api-key";
const AUTHORIZATION_HEADER: &str = "authorization";

/// Inputs handed to an [`Authenticator`].
#[derive(Debug, Clone, Copy)]
pub struct AuthAttempt<'a> {
    pub api_key: &'a str,
    pub workspace_id: Option<&'a str>,
    pub required_capability: Option<&'a str>,
    pub now_iso: &'a str,
}

/// Why an authentication attempt was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {reason}")]
pub struct AuthFailure {
    pub code: ErrorCode,
    pub reason: String,
}

impl AuthFailure {
    pub fn new(code: ErrorCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// `workspace_scope_denied` and `forbidden` keep their code and become
    /// 403; everything else is a 401.
    pub fn into_route_error(self) -> RouteError {
        match self.code {
            ErrorCode::WorkspaceScopeDenied | ErrorCode::Forbidden => {
                RouteError::new(403, self.code, self.reason)
            }
            _ => RouteError::unauthorized(self.reason),
        }
    }
}

/// Decides who a request is and whether it may proceed.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, attempt: AuthAttempt<'_>) -> Result<Principal, AuthFailure>;
}

/// Authenticator backed by the keys listed in configuration.
#[derive(Debug, Default)]
pub struct StaticKeyAuthenticator {
    keys: HashMap<String, ApiKeyConfig>,
}

impl StaticKeyAuthenticator {
    pub fn new(keys: impl IntoIterator<Item = ApiKeyConfig>) -> Self {
        Self {
            keys: keys.into_iter().map(|k| (k.key.clone(), k)).collect(),
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(config.api_keys.iter().cloned())
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }
}

#[async_trait]
impl Authenticator for StaticKeyAuthenticator {
    async fn authenticate(&self, attempt: AuthAttempt<'_>) -> Result<Principal, AuthFailure> {
        let entry = self
            .keys
            .get(attempt.api_key)
            .ok_or_else(|| AuthFailure::new(ErrorCode::Unauthorized, "Invalid API key"))?;

        if let (Some(scoped), Some(requested)) = (&entry.workspace_id, attempt.workspace_id) {
            if scoped != requested {
                return Err(AuthFailure::new(
                    ErrorCode::WorkspaceScopeDenied,
                    format!("API key is not valid for workspace '{}'", requested),
                ));
            }
        }

        if let Some(capability) = attempt.required_capability {
            if !entry.capabilities.iter().any(|c| c == capability) {
                return Err(AuthFailure::new(
                    ErrorCode::Forbidden,
                    format!("Missing capability '{}'", capability),
                ));
            }
        }

        let mut principal = Principal::new(entry.principal_id.clone());
        principal.workspace_id = entry
            .workspace_id
            .clone()
            .or_else(|| attempt.workspace_id.map(str::to_string));
        principal.capabilities = entry.capabilities.iter().cloned().collect();
        Ok(principal)
    }
}

/// Authenticates routes that require it and attaches the principal.
pub struct AuthMiddleware {
    authenticator: Arc<dyn Authenticator>,
}

impl AuthMiddleware {
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self { authenticator }
    }
}

#[async_trait]
impl Middleware for AuthMiddleware {
    fn name(&self) -> &'static str {
        "auth"
    }

    async fn handle(
        &self,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Result<ApiResponse, ApiError> {
        if ctx.route_meta().require_workspace && ctx.workspace_id().is_none() {
            debug!(request_id = %ctx.request_id(), "Workspace id missing");
            return Ok(ApiResponse::error_for(
                ctx,
                RouteError::bad_request("A workspace id is required for this route"),
            ));
        }

        if !ctx.route_meta().requires_auth {
            return next.run(ctx).await;
        }

        let Some(api_key) = extract_api_key(ctx) else {
            warn!(request_id = %ctx.request_id(), route = %ctx.route_meta().name, "Missing API key");
            return Ok(ApiResponse::error_for(
                ctx,
                RouteError::unauthorized("Missing API key"),
            ));
        };

        let outcome = self
            .authenticator
            .authenticate(AuthAttempt {
                api_key: &api_key,
                workspace_id: ctx.workspace_id(),
                required_capability: ctx.route_meta().required_capability.as_deref(),
                now_iso: ctx.now_iso(),
            })
            .await;

        match outcome {
            Ok(principal) => {
                debug!(
                    request_id = %ctx.request_id(),
                    principal = %principal.id,
                    "Authenticated"
                );
                ctx.attach_principal(principal);
                next.run(ctx).await
            }
            Err(failure) => {
                warn!(
                    request_id = %ctx.request_id(),
                    route = %ctx.route_meta().name,
                    code = %failure.code,
                    reason = %failure.reason,
                    "Authentication failed"
                );
                Ok(ApiResponse::error_for(ctx, failure.into_route_error()))
            }
        }
    }
}

/// `x-api-key`, or a bearer token in `authorization`.
fn extract_api_key(ctx: &RequestContext) -> Option<String> {
    let direct = ctx
        .header(API_KEY_HEADER)
        .map(str::trim)
        .filter(|key| !key.is_empty());
    if let Some(key) = direct {
        return Some(key.to_string());
    }

    let (scheme, token) = ctx.header(AUTHORIZATION_HEADER)?.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then(|| token.to_string())
}
