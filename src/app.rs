//! Application composition root.
//!
//! Builds the gateway, limiter and breaker from one configuration and wires
//! the default middleware. Nothing here is global; tests create as many
//! independent contexts as they like.

use std::sync::Arc;

use tracing::{debug, info};

use crate::breaker::CircuitBreaker;
use crate::clock::{Clock, SystemClock};
use crate::config::PorticoConfig;
use crate::error::Result;
use crate::gateway::{ApiRequest, ApiResponse, Gateway, RouteDefinition};
use crate::middleware::{
    AuthMiddleware, Authenticator, RateLimitMiddleware, RequestLogMiddleware,
    StaticKeyAuthenticator,
};
use crate::ratelimit::RateLimiter;

/// Everything needed to serve requests.
pub struct AppContext {
    config: PorticoConfig,
    clock: Arc<dyn Clock>,
    gateway: Gateway,
    rate_limiter: Arc<RateLimiter>,
    circuit_breaker: Arc<CircuitBreaker>,
    authenticator: Arc<dyn Authenticator>,
    default_middleware_installed: bool,
}

impl AppContext {
    /// Assemble a context around an explicit clock and authenticator.
    pub fn new(
        config: PorticoConfig,
        clock: Arc<dyn Clock>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        let gateway = Gateway::new(&config.gateway, clock.clone());
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limiting, clock.clone()));
        let circuit_breaker = Arc::new(CircuitBreaker::new(config.circuit_breaker, clock.clone()));

        Self {
            config,
            clock,
            gateway,
            rate_limiter,
            circuit_breaker,
            authenticator,
            default_middleware_installed: false,
        }
    }

    /// Wall clock and the configured API keys.
    pub fn from_config(config: PorticoConfig) -> Self {
        let authenticator = Arc::new(StaticKeyAuthenticator::from_config(&config.auth));
        info!(api_keys = authenticator.key_count(), "Static key authenticator loaded");
        Self::new(config, Arc::new(SystemClock), authenticator)
    }

    /// Install request logging, authentication and rate limiting, in that
    /// order. Returns false if they were already installed.
    pub fn install_default_middleware(&mut self) -> bool {
        if self.default_middleware_installed {
            debug!("Default middleware already installed");
            return false;
        }

        self.gateway.use_middleware(RequestLogMiddleware);
        self.gateway
            .use_middleware(AuthMiddleware::new(self.authenticator.clone()));
        self.gateway
            .use_middleware(RateLimitMiddleware::new(self.rate_limiter.clone()));
        self.default_middleware_installed = true;

        info!(
            middleware = ?self.gateway.middleware_names(),
            "Default middleware installed"
        );
        true
    }

    pub fn default_middleware_installed(&self) -> bool {
        self.default_middleware_installed
    }

    pub fn register_route(&mut self, definition: RouteDefinition) -> Result<()> {
        self.gateway.register_route(definition)
    }

    pub async fn handle_request(&self, request: ApiRequest) -> ApiResponse {
        self.gateway.handle_request(request).await
    }

    pub fn config(&self) -> &PorticoConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn gateway_mut(&mut self) -> &mut Gateway {
        &mut self.gateway
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.circuit_breaker
    }
}
