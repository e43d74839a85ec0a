use crate::auth::error::AuthError;
use std::time::Duration;
use url::Url;

const REFRESH_PATH: &str = "auth/refresh";

#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// API root, e.g. `http://127.0.0.1:8000/api/v1/`.
    pub api_base: Url,
    /// Lifetime assumed for an access token that carries no expiry at all.
    pub default_token_ttl: Duration,
    pub http_timeout: Duration,
}

impl AuthConfig {
    pub fn new(api_base: Url, default_token_ttl: Duration, http_timeout: Duration) -> Self {
        Self {
            api_base,
            default_token_ttl,
            http_timeout,
        }
    }

    pub fn refresh_url(&self) -> Result<Url, AuthError> {
        self.api_base
            .join(REFRESH_PATH)
            .map_err(|err| AuthError::Config(format!("invalid refresh path: {err}")))
    }
}
