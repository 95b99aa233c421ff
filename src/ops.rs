//! Operational routes over the limiter and breaker.
//!
//! - `GET /{version}/usage`: the caller's own rate-limit usage
//! - `GET /{version}/circuits`: every circuit, `admin` capability required

use std::sync::Arc;

use serde_json::json;

use crate::app::AppContext;
use crate::error::Result;
use crate::gateway::{ApiError, HandlerOutput, RequestContext, RouteDefinition, RouteError};

pub const ADMIN_CAPABILITY: &str = "admin";

/// Register the operational routes on an application context.
pub fn register_ops_routes(app: &mut AppContext) -> Result<()> {
    let version = app.gateway().version().to_string();

    let limiter = Arc::clone(app.rate_limiter());
    app.register_route(
        RouteDefinition::get(format!("/{}/usage", version), move |ctx: RequestContext| {
            let limiter = limiter.clone();
            async move {
                let principal = ctx
                    .principal()
                    .ok_or_else(|| RouteError::unauthorized("Authentication required"))?;
                HandlerOutput::from_serializable(&limiter.inspect(&principal.id))
            }
        })
        .name("ops.usage"),
    )?;

    let breaker = Arc::clone(app.circuit_breaker());
    app.register_route(
        RouteDefinition::get(format!("/{}/circuits", version), move |_ctx: RequestContext| {
            let breaker = breaker.clone();
            async move {
                let circuits = breaker.list_states();
                Ok::<_, ApiError>(HandlerOutput::new(json!({ "circuits": circuits })))
            }
        })
        .name("ops.circuits")
        .capability(ADMIN_CAPABILITY),
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{ApiKeyConfig, PorticoConfig};
    use crate::gateway::ApiRequest;
    use crate::middleware::StaticKeyAuthenticator;

    fn app() -> AppContext {
        let keys = [
            ApiKeyConfig {
                key: "ops-key".to_string(),
                principal_id: "ops".to_string(),
                workspace_id: None,
                capabilities: vec![ADMIN_CAPABILITY.to_string()],
            },
            ApiKeyConfig {
                key: "user-key".to_string(),
                principal_id: "user".to_string(),
                workspace_id: None,
                capabilities: Vec::new(),
            },
        ];
        let mut app = AppContext::new(
            PorticoConfig::default(),
            Arc::new(ManualClock::new(1_714_566_600_000)),
            Arc::new(StaticKeyAuthenticator::new(keys)),
        );
        app.install_default_middleware();
        register_ops_routes(&mut app).unwrap();
        app
    }

    #[tokio::test]
    async fn test_usage_reports_callers_bucket() {
        let app = app();
        let response = app
            .handle_request(ApiRequest::new("GET", "/v1/usage").header("x-api-key", "user-key"))
            .await;

        assert_eq!(response.status, 200);
        let data = response.data().unwrap();
        assert_eq!(data["key"], json!("user"));
        assert_eq!(data["consumedThisMinute"], json!(1));
        assert_eq!(data["history"], json!([{"minuteIso": "2024-05-01T12:30:00.000Z", "count": 1}]));
    }

    #[tokio::test]
    async fn test_circuits_require_admin() {
        let app = app();
        let _ = app
            .circuit_breaker()
            .execute("billing", || async { Ok::<_, std::io::Error>(()) })
            .await;

        let denied = app
            .handle_request(ApiRequest::new("GET", "/v1/circuits").header("x-api-key", "user-key"))
            .await;
        assert_eq!(denied.status, 403);

        let allowed = app
            .handle_request(ApiRequest::new("GET", "/v1/circuits").header("x-api-key", "ops-key"))
            .await;
        assert_eq!(allowed.status, 200);
        assert_eq!(allowed.data().unwrap()["circuits"][0]["key"], json!("billing"));
        assert_eq!(allowed.data().unwrap()["circuits"][0]["status"], json!("closed"));
    }
}
