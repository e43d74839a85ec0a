use crate::auth::AuthConfig;
use crate::transport::websocket::{ChannelAddress, DEFAULT_RECONNECT_DELAY};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_API_HOST: &str = "http://127.0.0.1:8000";
pub const DEFAULT_WS_HOST: &str = "ws://127.0.0.1:8000";
pub const DEFAULT_REFRESH_BUFFER: Duration = Duration::from_secs(60);
/// Matches the backend's access-token lifetime.
pub const DEFAULT_ACCESS_TOKEN_TTL: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

const API_PREFIX: &str = "api/v1/";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {name} {value:?}: {reason}")]
    InvalidUrl {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP API host, e.g. `https://api.example.com`
    pub api_host: String,
    /// Realtime channel host, e.g. `wss://api.example.com`
    pub ws_host: String,
    pub reconnect_delay: Duration,
    /// Renew the access token when it expires within this window.
    pub refresh_buffer: Duration,
    pub access_token_ttl: Duration,
    pub credentials_path: Option<PathBuf>,
    pub http_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_host: DEFAULT_API_HOST.to_string(),
            ws_host: DEFAULT_WS_HOST.to_string(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            refresh_buffer: DEFAULT_REFRESH_BUFFER,
            access_token_ttl: DEFAULT_ACCESS_TOKEN_TTL,
            credentials_path: None,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }
}

impl Config {
    /// Load and validate configuration from `COURSEGEN_*` environment
    /// variables. Call `dotenvy::dotenv()` first to pick up a local `.env`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self::load_env();
        config.validate()?;
        Ok(config)
    }

    /// Reads the environment without validating, so command-line overrides
    /// can replace a bad value before [`Config::validate`] runs.
    pub fn load_env() -> Self {
        let defaults = Self::default();
        Self {
            api_host: normalize_host(
                &env_string("COURSEGEN_API_HOST").unwrap_or(defaults.api_host),
            ),
            ws_host: normalize_host(&env_string("COURSEGEN_WS_HOST").unwrap_or(defaults.ws_host)),
            reconnect_delay: env_u64("COURSEGEN_RECONNECT_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.reconnect_delay),
            refresh_buffer: env_u64("COURSEGEN_REFRESH_BUFFER_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.refresh_buffer),
            access_token_ttl: env_u64("COURSEGEN_ACCESS_TOKEN_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.access_token_ttl),
            credentials_path: env_string("COURSEGEN_CREDENTIALS_PATH").map(PathBuf::from),
            http_timeout: env_u64("COURSEGEN_HTTP_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.http_timeout),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.api_base()?;
        ChannelAddress::new(self.ws_host.clone())
            .build_url()
            .map_err(|err| ConfigError::InvalidUrl {
                name: "websocket host",
                value: self.ws_host.clone(),
                reason: err.to_string(),
            })?;
        Ok(())
    }

    /// `{api_host}/api/v1/`; the trailing slash makes relative joins land
    /// under the prefix.
    pub fn api_base(&self) -> Result<Url, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidUrl {
            name: "api host",
            value: self.api_host.clone(),
            reason,
        };
        let host = normalize_host(&self.api_host);
        let host = if host.contains("://") {
            host
        } else {
            format!("http://{host}")
        };
        let root = Url::parse(&format!("{host}/")).map_err(|err| invalid(err.to_string()))?;
        if root.cannot_be_a_base() {
            return Err(invalid("not a base url".into()));
        }
        root.join(API_PREFIX).map_err(|err| invalid(err.to_string()))
    }

    pub fn auth_config(&self) -> Result<AuthConfig, ConfigError> {
        Ok(AuthConfig::new(
            self.api_base()?,
            self.access_token_ttl,
            self.http_timeout,
        ))
    }
}

fn env_string(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_u64(name: &str) -> Option<u64> {
    env_string(name).and_then(|value| value.parse().ok())
}

/// Trims trailing slashes and maps `localhost` to IPv4 to avoid `::1`
/// resolution against servers that only bind 127.0.0.1.
fn normalize_host(host: &str) -> String {
    host.trim()
        .trim_end_matches('/')
        .replacen("localhost", "127.0.0.1", 1)
}

/// Serializes tests that read or write `COURSEGEN_*` environment variables.
#[cfg(test)]
pub(crate) fn env_lock() -> std::sync::MutexGuard<'static, ()> {
    static ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
    ENV_MUTEX.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
