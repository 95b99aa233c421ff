use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use super::{Middleware, Next};
use crate::gateway::{ApiError, ApiResponse, RequestContext, RouteError};
use crate::ratelimit::RateLimiter;

/// Per-principal rate limiting for authenticated routes.
///
/// Requests without a principal, or on public routes, pass straight
/// through. Rejections are answered here with a 429 and never reach the
/// handler.
pub struct RateLimitMiddleware {
    limiter: Arc<RateLimiter>,
}

impl RateLimitMiddleware {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

#[async_trait]
impl Middleware for RateLimitMiddleware {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn handle(
        &self,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Result<ApiResponse, ApiError> {
        if !ctx.route_meta().requires_auth {
            return next.run(ctx).await;
        }
        let Some(key) = ctx.principal().map(|p| p.id.clone()) else {
            return next.run(ctx).await;
        };

        let decision = self.limiter.consume(&key);
        let headers = decision.headers();

        if !decision.allowed {
            warn!(
                request_id = %ctx.request_id(),
                principal = %key,
                retry_after_seconds = decision.retry_after_seconds,
                "Rate limit exceeded"
            );
            let err = RouteError::rate_limited("Rate limit exceeded").with_details(json!({
                "limit": decision.limit,
                "retryAfterSeconds": decision.retry_after_seconds,
                "resetAt": decision.reset_at_iso,
            }));
            return Ok(ApiResponse::error_for(ctx, err).with_headers(headers));
        }

        let response = next.run(ctx).await?;
        Ok(response.with_headers(headers))
    }
}
