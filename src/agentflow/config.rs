//! Engine configuration.
//!
//! Configuration is read from the environment once at startup and threaded
//! through the engine as a plain value. There is intentionally no TOML/YAML
//! parsing layer; deployments set environment variables.
//!
//! # Example
//!
//! ```rust
//! use agentflow::config::EngineConfig;
//!
//! std::env::set_var("WEBHOOK_SIGNING_SECRET", "s3cret");
//! let config = EngineConfig::from_env().unwrap();
//! assert!(config.public_base_url.starts_with("http"));
//! ```

use crate::agentflow::error::EngineError;

/// Process exit code for a clean shutdown.
pub const EXIT_OK: i32 = 0;
/// Process exit code when configuration loading fails.
pub const EXIT_CONFIG_FAILURE: i32 = 1;
/// Process exit code when the scheduler or HTTP listener fails to start.
pub const EXIT_SCHEDULER_FAILURE: i32 = 2;

/// Everything the engine core needs from the environment.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Redis connection URL for the durable short-term memory backend.
    pub redis_url: String,
    /// Base URL of this API process (used to build webhook callback paths).
    pub api_base_url: String,
    /// Externally reachable base URL handed to upstream push services.
    pub public_base_url: String,
    /// Model key used when an agent does not pin one.
    pub default_model: String,
    /// Signing secret for generic webhook HMAC verification.
    pub webhook_signing_secret: String,
    /// Listen address for the HTTP server.
    pub listen_addr: String,
}

impl EngineConfig {
    /// Load the configuration from the environment.
    ///
    /// `WEBHOOK_SIGNING_SECRET` is required; everything else has a
    /// development default so a bare `cargo run` comes up locally.
    pub fn from_env() -> Result<Self, EngineError> {
        let webhook_signing_secret = std::env::var("WEBHOOK_SIGNING_SECRET")
            .map_err(|_| EngineError::Config("WEBHOOK_SIGNING_SECRET is not set".into()))?;
        if webhook_signing_secret.is_empty() {
            return Err(EngineError::Config(
                "WEBHOOK_SIGNING_SECRET must not be empty".into(),
            ));
        }

        Ok(Self {
            redis_url: env_or("REDIS_URL", "redis://127.0.0.1:6379/0"),
            api_base_url: env_or("API_BASE_URL", "http://127.0.0.1:8080"),
            public_base_url: env_or("PUBLIC_BASE_URL", "http://127.0.0.1:8080"),
            default_model: env_or("AGENTFLOW_DEFAULT_MODEL", "gpt-4.1-mini"),
            webhook_signing_secret,
            listen_addr: env_or("AGENTFLOW_LISTEN_ADDR", "127.0.0.1:8080"),
        })
    }

    /// Build an absolute webhook URL from a registered path.
    pub fn webhook_url(&self, path: &str) -> String {
        format!("{}{}", self.api_base_url.trim_end_matches('/'), path)
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}
