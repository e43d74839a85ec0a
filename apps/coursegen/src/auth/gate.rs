use crate::auth::config::AuthConfig;
use crate::auth::credentials::{Credential, TokenResponse};
use crate::auth::error::AuthError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

/// The renewal call the refresh coordinator drives. One implementation talks
/// HTTP; tests substitute scripted ones.
#[async_trait]
pub trait TokenRenewer: Send + Sync + 'static {
    async fn renew(&self, current: &Credential) -> Result<TokenResponse, AuthError>;
}

#[derive(Debug, Clone)]
pub struct HttpTokenRenewer {
    client: Client,
    config: AuthConfig,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: Option<String>,
}

impl HttpTokenRenewer {
    pub fn new(config: AuthConfig) -> Result<Self, AuthError> {
        // Kept separate from the gateway's client so a renewal never goes
        // through the authenticated retry path.
        let client = Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|err| AuthError::Config(err.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }
}

#[async_trait]
impl TokenRenewer for HttpTokenRenewer {
    async fn renew(&self, current: &Credential) -> Result<TokenResponse, AuthError> {
        #[derive(Serialize)]
        struct RefreshRequest<'a> {
            #[serde(skip_serializing_if = "Option::is_none")]
            refresh_token: Option<&'a str>,
        }

        let url = self.config.refresh_url()?;
        let response = self
            .client
            .post(url)
            .json(&RefreshRequest {
                refresh_token: current.refresh_token.as_deref(),
            })
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(response.json().await?);
        }

        if response.status() == StatusCode::UNAUTHORIZED
            || response.status() == StatusCode::FORBIDDEN
        {
            return Err(AuthError::Rejected);
        }

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<ErrorBody>(&text)
            .ok()
            .and_then(|body| body.detail)
            .unwrap_or(text);

        Err(AuthError::Gateway(format!(
            "token refresh failed ({status}): {detail}"
        )))
    }
}
