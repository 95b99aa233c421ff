use std::time::Instant;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{Middleware, Next};
use crate::gateway::{ApiError, ApiResponse, RequestContext};

/// Logs one line per request with its outcome and latency.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestLogMiddleware;

#[async_trait]
impl Middleware for RequestLogMiddleware {
    fn name(&self) -> &'static str {
        "request_log"
    }

    async fn handle(
        &self,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Result<ApiResponse, ApiError> {
        let started = Instant::now();
        let result = next.run(ctx).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        match &result {
            Ok(response) if response.status < 500 => info!(
                request_id = %ctx.request_id(),
                method = %ctx.method(),
                path = %ctx.path(),
                route = %ctx.route_meta().name,
                principal = ctx.principal().map(|p| p.id.as_str()),
                status = response.status,
                elapsed_ms,
                "Request completed"
            ),
            Ok(response) => warn!(
                request_id = %ctx.request_id(),
                route = %ctx.route_meta().name,
                status = response.status,
                elapsed_ms,
                "Request failed"
            ),
            Err(err) => warn!(
                request_id = %ctx.request_id(),
                route = %ctx.route_meta().name,
                error = %err,
                elapsed_ms,
                "Request errored in middleware"
            ),
        }

        result
    }
}
