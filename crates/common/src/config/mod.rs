//! Configuration management for Orderly services
//!
//! Supports loading configuration from:
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Environment variables (prefixed with APP__)
//! - The plain deployment variables (PORT, JWT_SECRET, SERVICE_USERS_URL, ...)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Secret used when none is configured outside production
pub const DEVELOPMENT_JWT_SECRET: &str = "orderly-development-secret-change-me";

const PRODUCTION: &str = "production";

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Deployment mode; "production" hides internal failure detail
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Upstream service targets
    #[serde(default)]
    pub upstreams: UpstreamConfig,

    /// Authentication configuration
    #[serde(default)]
    pub auth: AuthConfig,

    /// CORS configuration
    #[serde(default)]
    pub cors: CorsConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Grace period for in-flight requests on shutdown
    pub shutdown_timeout_secs: u64,

    /// Largest request body forwarded upstream
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Users service base URL
    pub users_url: String,

    /// Orders service base URL
    pub orders_url: String,

    /// Upper bound on a single forwarded exchange
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared HS256 secret the users service signs tokens with
    pub jwt_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Allowed origin, `*` for any
    pub allowed_origin: String,

    /// Preflight cache lifetime
    pub max_age_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Window length shared by both limiter classes
    pub window_secs: u64,

    /// Requests per window per client address
    pub general_max: u32,

    /// Failed login/registration attempts per window per client address
    pub auth_max: u32,

    /// How often expired counters are evicted
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log filter (debug, info, warn, error or a full EnvFilter directive)
    pub log_level: String,

    /// Enable JSON logging
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    pub metrics_port: u16,

    /// Service name attached to log records
    pub service_name: String,
}

// Default value functions
fn default_environment() -> String { "development".to_string() }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            shutdown_timeout_secs: 30,
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            users_url: "http://localhost:3001".to_string(),
            orders_url: "http://localhost:3002".to_string(),
            timeout_secs: 30,
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origin: "*".to_string(),
            max_age_secs: 86_400,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: 15 * 60,
            general_max: 100,
            auth_max: 5,
            sweep_interval_secs: 60,
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logging: true,
            metrics_port: 9090,
            service_name: "orderly-gateway".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the process environment and config files
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Load configuration, resolving the plain deployment variables through
    /// `lookup` instead of the process environment
    pub fn load_with<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = lookup("APP_ENV").unwrap_or_else(default_environment);

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__SERVER__PORT=8081
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
            )

            // Plain variables the services have always been deployed with
            .set_override("environment", env)?
            .set_override_option("server.port", lookup("PORT"))?
            .set_override_option("upstreams.users_url", lookup("SERVICE_USERS_URL"))?
            .set_override_option("upstreams.orders_url", lookup("SERVICE_ORDERS_URL"))?
            .set_override_option("auth.jwt_secret", lookup("JWT_SECRET"))?
            .set_override_option("cors.allowed_origin", lookup("CORS_ORIGIN"))?
            .set_override_option("observability.log_level", lookup("RUST_LOG"))?

            .build()?;

        let config: AppConfig = config.try_deserialize()?;
        config.validate()
    }

    fn validate(mut self) -> Result<Self, ConfigError> {
        for (name, url) in [
            ("upstreams.users_url", &mut self.upstreams.users_url),
            ("upstreams.orders_url", &mut self.upstreams.orders_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Message(format!(
                    "{} must be an http(s) URL, got {:?}",
                    name, url
                )));
            }
            while url.ends_with('/') {
                url.pop();
            }
        }

        if self.rate_limit.window_secs == 0
            || self.rate_limit.general_max == 0
            || self.rate_limit.auth_max == 0
        {
            return Err(ConfigError::Message(
                "rate_limit window and limits must be greater than zero".to_string(),
            ));
        }

        if self.upstreams.timeout_secs == 0 {
            return Err(ConfigError::Message(
                "upstreams.timeout_secs must be greater than zero".to_string(),
            ));
        }

        let has_secret = self
            .auth
            .jwt_secret
            .as_deref()
            .is_some_and(|secret| !secret.is_empty());
        if !has_secret {
            if self.is_production() {
                return Err(ConfigError::Message(
                    "JWT_SECRET must be set in production".to_string(),
                ));
            }
            self.auth.jwt_secret = Some(DEVELOPMENT_JWT_SECRET.to_string());
        }

        Ok(self)
    }

    /// Whether the process runs in production mode
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case(PRODUCTION)
    }

    /// Whether 500 responses may include the underlying failure
    pub fn expose_error_details(&self) -> bool {
        !self.is_production()
    }

    /// The token signing secret. Always present after loading.
    pub fn jwt_secret(&self) -> &str {
        self.auth.jwt_secret.as_deref().unwrap_or(DEVELOPMENT_JWT_SECRET)
    }

    /// Get shutdown grace period as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }

    /// Get upstream timeout as Duration
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstreams.timeout_secs)
    }

    /// Get the rate limit window as Duration
    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit.window_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            server: ServerConfig::default(),
            upstreams: UpstreamConfig::default(),
            auth: AuthConfig {
                jwt_secret: Some(DEVELOPMENT_JWT_SECRET.to_string()),
            },
            cors: CorsConfig::default(),
            rate_limit: RateLimitConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}
