//! Environment-driven server settings.

use std::time::Duration;

/// Server settings, read once at startup.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origins; `["*"]` means any.
    pub cors_origins: Vec<String>,
    /// Per-client-IP request budget, per second.
    pub rate_limit_rps: u32,
    pub max_body_size: usize,
    pub request_timeout: Duration,
    /// "development" or "production"; controls error detail redaction.
    pub environment: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            rate_limit_rps: 10,
            // Payloads are small JSON documents.
            max_body_size: 1024 * 1024,
            request_timeout: Duration::from_secs(30),
            environment: "development".to_string(),
        }
    }
}

fn env_parsed<T: std::str::FromStr>(var: &str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl ApiConfig {
    /// Build the config from the environment, falling back to
    /// [`ApiConfig::default`] field by field.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: env_parsed("API_PORT", defaults.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|o| o.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),
            rate_limit_rps: env_parsed("RATE_LIMIT_RPS", defaults.rate_limit_rps),
            max_body_size: env_parsed("MAX_BODY_SIZE", defaults.max_body_size),
            request_timeout: Duration::from_secs(env_parsed("REQUEST_TIMEOUT", 30)),
            environment: std::env::var("ENVIRONMENT").unwrap_or(defaults.environment),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}
