//! Environment-driven configuration.
//!
//! | Variable | Meaning | Default |
//! |---|---|---|
//! | `APP_ENV` (falls back to `NODE_ENV`) | `production`/`prod` or anything else | development |
//! | `REDIS_URL` | remote store URL; unset or empty means no backend | none |
//! | `RESILIENCE_SERVICE_NAME` | `service.name` in OTLP exports | `resilience-kit` |
//! | `RESILIENCE_OP_TIMEOUT_MS` | per-command deadline | 5000 |
//! | `RATE_LIMIT_KEY_PREFIX` | namespace for counter keys | `ratelimit:` |

use crate::application::local_windows::DEFAULT_CLEANUP_INTERVAL;
use crate::application::metrics::DEFAULT_SERVICE_NAME;
use crate::application::rate_limiter::DEFAULT_KEY_PREFIX;
use crate::domain::circuit::CircuitBreakerOptions;
use crate::domain::rate_limit::Environment;
use std::time::Duration;
use thiserror::Error;

/// Errors from reading configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set but cannot be parsed
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
}

/// Settings shared by every component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResilienceConfig {
    pub environment: Environment,
    /// Remote store URL; `None` disables the backend
    pub redis_url: Option<String>,
    pub service_name: String,
    /// Deadline for each remote command
    pub op_timeout: Duration,
    /// Deadline for connecting to the remote store
    pub connect_timeout: Duration,
    pub rate_limit_key_prefix: String,
    pub cleanup_interval: Duration,
    /// Options used by `CircuitBreakerRegistry::call`
    pub circuit_defaults: CircuitBreakerOptions,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            redis_url: None,
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            op_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            rate_limit_key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            circuit_defaults: CircuitBreakerOptions::default(),
        }
    }
}

impl ResilienceConfig {
    /// Read configuration from the process environment.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidValue` for a set but unparsable number.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through `lookup`, which maps variable names to values.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(env) = var("APP_ENV").or_else(|| var("NODE_ENV")) {
            config.environment = Environment::parse(&env);
        }

        config.redis_url = var("REDIS_URL");

        if let Some(name) = var("RESILIENCE_SERVICE_NAME") {
            config.service_name = name;
        }

        if let Some(raw) = var("RESILIENCE_OP_TIMEOUT_MS") {
            let ms = raw
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidValue {
                    name: "RESILIENCE_OP_TIMEOUT_MS",
                    value: raw.clone(),
                })?;
            config.op_timeout = Duration::from_millis(ms);
        }

        if let Some(prefix) = var("RATE_LIMIT_KEY_PREFIX") {
            config.rate_limit_key_prefix = prefix;
        }

        Ok(config)
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = Some(url.into());
        self
    }

    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }
}
