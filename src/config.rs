// Gateway client configuration

use serde::Deserialize;
use thiserror::Error;

pub const ENV_PREFIX: &str = "ONPOINT";
pub const CONFIG_FILE: &str = "config/onpoint";

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Initialization error: {0}")]
    InitError(String),

    #[error(transparent)]
    Load(#[from] config::ConfigError),
}

// Backoff for idempotent reads. Writes are never retried.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 100,
            max_backoff_ms: 2000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClientConfig {
    // Project URL, e.g. https://xyz.supabase.co
    pub base_url: String,
    // Public anon key; sent as `apikey` on every request
    pub api_key: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub retry_config: RetryConfig,
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout_ms: default_timeout_ms(),
            retry_config: RetryConfig::default(),
        }
    }

    // Optional `config/onpoint.*` file, overridden by `ONPOINT__*` env vars,
    // e.g. `ONPOINT__BASE_URL` or `ONPOINT__RETRY_CONFIG__MAX_RETRIES`
    pub fn load() -> Result<Self, ClientError> {
        Self::load_layered(CONFIG_FILE, None)
    }

    // `env` stands in for the process environment when given
    fn load_layered(
        file: &str,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self, ClientError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(file).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .source(env),
            )
            .build()?;
        let config: ClientConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if self.base_url.trim().is_empty() {
            return Err(ClientError::ConfigError("base_url is empty".to_string()));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ClientError::ConfigError(format!(
                "base_url must be an http(s) URL: {}",
                self.base_url
            )));
        }
        if self.api_key.trim().is_empty() {
            return Err(ClientError::ConfigError("api_key is empty".to_string()));
        }
        if self.timeout_ms == 0 {
            return Err(ClientError::ConfigError("timeout_ms must be positive".to_string()));
        }
        Ok(())
    }
}
