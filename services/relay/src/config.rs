use secrecy::SecretString;
use std::net::SocketAddr;
use tracing::Level;
use url::Url;

pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:3001";
pub const DEFAULT_UPSTREAM_URL: &str = "wss://dashscope.aliyuncs.com/api-ws/v1/realtime";
pub const DEFAULT_MODEL: &str = "qwen3-omni-flash-realtime";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    /// Vendor endpoint; `?model=` is appended per connection.
    pub upstream_url: Url,
    pub default_model: String,
    /// Used when the connecting client does not pass `?key=`.
    pub default_key: Option<SecretString>,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str = std::env::var("RELAY_BIND_ADDRESS")
            .unwrap_or_else(|_| DEFAULT_BIND_ADDRESS.to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("RELAY_BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let upstream_str = std::env::var("RELAY_UPSTREAM_URL")
            .unwrap_or_else(|_| DEFAULT_UPSTREAM_URL.to_string());
        let upstream_url = parse_upstream(&upstream_str)?;

        let default_model = std::env::var("RELAY_DEFAULT_MODEL")
            .ok()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let default_key = std::env::var("DASHSCOPE_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .map(SecretString::from);

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            upstream_url,
            default_model,
            default_key,
            log_level,
        })
    }

    /// Applies command-line values on top of the environment.
    pub fn with_overrides(mut self, bind_address: Option<SocketAddr>, key: Option<String>) -> Self {
        if let Some(bind_address) = bind_address {
            self.bind_address = bind_address;
        }
        if let Some(key) = key.filter(|k| !k.is_empty()) {
            self.default_key = Some(SecretString::from(key));
        }
        self
    }
}

fn parse_upstream(value: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidValue("RELAY_UPSTREAM_URL".to_string(), reason);
    let url = Url::parse(value).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(invalid(format!("'{value}' is not a ws:// or wss:// URL")));
    }
    Ok(url)
}
