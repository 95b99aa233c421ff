//! Configuration management for Portico.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::error::{PorticoError, Result};

/// Smallest allowed `limit_per_minute`.
pub const MIN_LIMIT_PER_MINUTE: u32 = 1;
/// Smallest allowed `max_tracked_minutes`.
pub const MIN_TRACKED_MINUTES: usize = 30;
/// Smallest allowed breaker cooldown.
pub const MIN_COOLDOWN_MS: u64 = 1_000;

/// Main configuration for a Portico deployment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PorticoConfig {
    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Circuit breaker configuration
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Static API keys for the built-in authenticator
    #[serde(default)]
    pub auth: AuthConfig,

    /// Log output configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// API version; prefixes the health route and fills `x-api-version`
    #[serde(default = "default_version")]
    pub version: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
        }
    }
}

fn default_version() -> String {
    "v1".to_string()
}

/// Token bucket configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Bucket capacity and refill rate per minute
    #[serde(default = "default_limit_per_minute")]
    pub limit_per_minute: u32,

    /// Number of calendar minutes kept in each bucket's usage history
    #[serde(default = "default_max_tracked_minutes")]
    pub max_tracked_minutes: usize,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            limit_per_minute: default_limit_per_minute(),
            max_tracked_minutes: default_max_tracked_minutes(),
        }
    }
}

impl RateLimitingConfig {
    /// Raise out-of-range values to their minimums.
    pub fn clamped(self) -> Self {
        Self {
            limit_per_minute: self.limit_per_minute.max(MIN_LIMIT_PER_MINUTE),
            max_tracked_minutes: self.max_tracked_minutes.max(MIN_TRACKED_MINUTES),
        }
    }
}

fn default_limit_per_minute() -> u32 {
    120
}

fn default_max_tracked_minutes() -> usize {
    720
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in `closed` that open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Successful probes in `half_open` needed to close the circuit
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,

    /// Time an open circuit waits before allowing a probe
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

impl CircuitBreakerConfig {
    /// Raise out-of-range values to their minimums.
    pub fn clamped(self) -> Self {
        Self {
            failure_threshold: self.failure_threshold.max(1),
            success_threshold: self.success_threshold.max(1),
            cooldown_ms: self.cooldown_ms.max(MIN_COOLDOWN_MS),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_success_threshold() -> u32 {
    1
}

fn default_cooldown_ms() -> u64 {
    30_000
}

/// Built-in authenticator configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Known API keys
    #[serde(default)]
    pub api_keys: Vec<ApiKeyConfig>,
}

/// A single API key and the principal it authenticates as.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyConfig {
    /// The secret presented by clients
    pub key: String,
    /// Principal identity; also the rate-limit key
    pub principal_id: String,
    /// Workspace the key is scoped to, if any
    #[serde(default)]
    pub workspace_id: Option<String>,
    /// Capabilities granted to the key
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Log output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl PorticoConfig {
    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PorticoConfig =
            serde_yaml::from_str(yaml).map_err(|e| PorticoError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file, overlaid with `PORTICO__*` environment
    /// variables (e.g. `PORTICO__RATE_LIMITING__LIMIT_PER_MINUTE=60`).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path))
            .add_source(
                ::config::Environment::with_prefix("PORTICO")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: PorticoConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values below their documented minimums.
    pub fn validate(&self) -> Result<()> {
        if self.gateway.version.trim().is_empty() {
            return Err(PorticoError::Config("gateway.version must not be empty".into()));
        }
        if self.rate_limiting.limit_per_minute < MIN_LIMIT_PER_MINUTE {
            return Err(PorticoError::Config(format!(
                "rate_limiting.limit_per_minute must be >= {}",
                MIN_LIMIT_PER_MINUTE
            )));
        }
        if self.rate_limiting.max_tracked_minutes < MIN_TRACKED_MINUTES {
            return Err(PorticoError::Config(format!(
                "rate_limiting.max_tracked_minutes must be >= {}",
                MIN_TRACKED_MINUTES
            )));
        }
        if self.circuit_breaker.failure_threshold < 1 {
            return Err(PorticoError::Config(
                "circuit_breaker.failure_threshold must be >= 1".into(),
            ));
        }
        if self.circuit_breaker.success_threshold < 1 {
            return Err(PorticoError::Config(
                "circuit_breaker.success_threshold must be >= 1".into(),
            ));
        }
        if self.circuit_breaker.cooldown_ms < MIN_COOLDOWN_MS {
            return Err(PorticoError::Config(format!(
                "circuit_breaker.cooldown_ms must be >= {}",
                MIN_COOLDOWN_MS
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PorticoConfig::default();
        assert_eq!(config.gateway.version, "v1");
        assert_eq!(config.rate_limiting.limit_per_minute, 120);
        assert_eq!(config.rate_limiting.max_tracked_minutes, 720);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.circuit_breaker.success_threshold, 1);
        assert_eq!(config.circuit_breaker.cooldown_ms, 30_000);
        assert!(config.auth.api_keys.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
gateway:
  version: v2
rate_limiting:
  limit_per_minute: 10
auth:
  api_keys:
    - key: secret
      principal_id: alice
      capabilities: [admin]
"#;
        let config = PorticoConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.gateway.version, "v2");
        assert_eq!(config.rate_limiting.limit_per_minute, 10);
        assert_eq!(config.rate_limiting.max_tracked_minutes, 720);
        assert_eq!(config.circuit_breaker.cooldown_ms, 30_000);
        assert_eq!(config.auth.api_keys[0].principal_id, "alice");
        assert_eq!(config.auth.api_keys[0].workspace_id, None);
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let yaml = "rate_limiting:\n  max_tracked_minutes: 5\n";
        assert!(matches!(
            PorticoConfig::from_yaml(yaml),
            Err(PorticoError::Config(_))
        ));

        let yaml = "circuit_breaker:\n  cooldown_ms: 10\n";
        assert!(matches!(
            PorticoConfig::from_yaml(yaml),
            Err(PorticoError::Config(_))
        ));
    }

    #[test]
    fn test_clamped_raises_minimums() {
        let limits = RateLimitingConfig {
            limit_per_minute: 0,
            max_tracked_minutes: 1,
        }
        .clamped();
        assert_eq!(limits.limit_per_minute, 1);
        assert_eq!(limits.max_tracked_minutes, 30);

        let breaker = CircuitBreakerConfig {
            failure_threshold: 0,
            success_threshold: 0,
            cooldown_ms: 0,
        }
        .clamped();
        assert_eq!(breaker.failure_threshold, 1);
        assert_eq!(breaker.success_threshold, 1);
        assert_eq!(breaker.cooldown_ms, 1_000);
    }
}
