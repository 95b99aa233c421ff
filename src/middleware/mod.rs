//! Onion-style middleware pipeline.
//!
//! Middleware run in registration order around the matched route: the first
//! registered stage is outermost, so it sees the context before anyone else
//! and the response after everyone else. Each stage gets a [`Next`] that runs
//! the rest of the chain exactly once; dropping it short-circuits.
//!
//! ```ignore
//! struct Timing;
//!
//! #[async_trait]
//! impl Middleware for Timing {
//!     fn name(&self) -> &'static str {
//!         "timing"
//!     }
//!
//!     async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> Result<ApiResponse, ApiError> {
//!         let started = Instant::now();
//!         let response = next.run(ctx).await?;
//!         Ok(response.with_header("x-elapsed-ms", started.elapsed().as_millis().to_string()))
//!     }
//! }
//! ```

mod auth;
mod rate_limit;
mod request_log;

use std::sync::Arc;

use async_trait::async_trait;

use crate::gateway::{ApiError, ApiResponse, RequestContext};

pub use auth::{AuthAttempt, AuthFailure, AuthMiddleware, Authenticator, StaticKeyAuthenticator};
pub use rate_limit::RateLimitMiddleware;
pub use request_log::RequestLogMiddleware;

/// A request interceptor.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Stage name for logs.
    fn name(&self) -> &'static str;

    /// Handle the request, calling `next.run(ctx)` to continue the chain.
    async fn handle(
        &self,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Result<ApiResponse, ApiError>;
}

/// The innermost step of a chain.
#[async_trait]
pub trait Endpoint: Send + Sync {
    async fn call(&self, ctx: &mut RequestContext) -> Result<ApiResponse, ApiError>;
}

/// Continuation for the remainder of a middleware chain.
///
/// Consumed by [`run`](Next::run), so a stage cannot invoke the rest of the
/// chain twice.
pub struct Next<'a> {
    stack: &'a [Arc<dyn Middleware>],
    endpoint: &'a dyn Endpoint,
}

impl<'a> Next<'a> {
    pub(crate) fn new(stack: &'a [Arc<dyn Middleware>], endpoint: &'a dyn Endpoint) -> Self {
        Self { stack, endpoint }
    }

    /// Run the remaining middleware and then the endpoint.
    pub async fn run(self, ctx: &mut RequestContext) -> Result<ApiResponse, ApiError> {
        match self.stack.split_first() {
            Some((current, rest)) => {
                tracing::trace!(middleware = current.name(), "Entering middleware");
                current.handle(ctx, Next::new(rest, self.endpoint)).await
            }
            None => self.endpoint.call(ctx).await,
        }
    }

    /// Number of middleware still to run.
    pub fn remaining(&self) -> usize {
        self.stack.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::test_support::context_for;
    use crate::gateway::{HandlerOutput, RouteError};
    use parking_lot::Mutex;
    use serde_json::json;

    type Journal = Arc<Mutex<Vec<String>>>;

    struct Recording {
        label: &'static str,
        journal: Journal,
    }

    #[async_trait]
    impl Middleware for Recording {
        fn name(&self) -> &'static str {
            self.label
        }

        async fn handle(
            &self,
            ctx: &mut RequestContext,
            next: Next<'_>,
        ) -> Result<ApiResponse, ApiError> {
            self.journal.lock().push(format!("{}:before", self.label));
            let response = next.run(ctx).await?;
            self.journal.lock().push(format!("{}:after", self.label));
            Ok(response.with_headers([(format!("x-{}", self.label), "1".to_string())].into()))
        }
    }

    struct Blocking;

    #[async_trait]
    impl Middleware for Blocking {
        fn name(&self) -> &'static str {
            "blocking"
        }

        async fn handle(
            &self,
            ctx: &mut RequestContext,
            _next: Next<'_>,
        ) -> Result<ApiResponse, ApiError> {
            Ok(ApiResponse::error_for(ctx, RouteError::forbidden("blocked")))
        }
    }

    struct Echo {
        journal: Journal,
    }

    #[async_trait]
    impl Endpoint for Echo {
        async fn call(&self, ctx: &mut RequestContext) -> Result<ApiResponse, ApiError> {
            self.journal.lock().push("endpoint".to_string());
            Ok(ApiResponse::success_for(ctx, HandlerOutput::new(json!({"ok": 1}))))
        }
    }

    fn recording(label: &'static str, journal: &Journal) -> Arc<dyn Middleware> {
        Arc::new(Recording {
            label,
            journal: journal.clone(),
        })
    }

    #[tokio::test]
    async fn test_onion_order() {
        let journal: Journal = Arc::default();
        let stack = vec![recording("outer", &journal), recording("inner", &journal)];
        let endpoint = Echo {
            journal: journal.clone(),
        };
        let mut ctx = context_for("/v1/ping");

        let response = Next::new(&stack, &endpoint).run(&mut ctx).await.unwrap();

        assert_eq!(
            *journal.lock(),
            vec![
                "outer:before",
                "inner:before",
                "endpoint",
                "inner:after",
                "outer:after"
            ]
        );
        assert_eq!(response.header("x-outer"), Some("1"));
        assert_eq!(response.header("x-inner"), Some("1"));
    }

    #[tokio::test]
    async fn test_short_circuit_skips_rest_of_chain() {
        let journal: Journal = Arc::default();
        let stack = vec![
            recording("outer", &journal),
            Arc::new(Blocking) as Arc<dyn Middleware>,
            recording("inner", &journal),
        ];
        let endpoint = Echo {
            journal: journal.clone(),
        };
        let mut ctx = context_for("/v1/ping");

        let response = Next::new(&stack, &endpoint).run(&mut ctx).await.unwrap();

        assert_eq!(response.status, 403);
        assert_eq!(*journal.lock(), vec!["outer:before", "outer:after"]);
    }

    #[tokio::test]
    async fn test_empty_chain_runs_endpoint() {
        let journal: Journal = Arc::default();
        let endpoint = Echo {
            journal: journal.clone(),
        };
        let next = Next::new(&[], &endpoint);
        assert_eq!(next.remaining(), 0);

        let mut ctx = context_for("/v1/ping");
        let response = next.run(&mut ctx).await.unwrap();
        assert!(response.is_success());
        assert_eq!(*journal.lock(), vec!["endpoint"]);
    }
}
