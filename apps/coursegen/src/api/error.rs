use crate::auth::RefreshError;
use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("credential refresh failed: {0}")]
    Refresh(#[from] RefreshError),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("request was not authorized")]
    Unauthorized,
    #[error("unexpected status: {status} body={body}")]
    UnexpectedStatus { status: StatusCode, body: String },
    #[error("request body could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("invalid request url: {0}")]
    Url(#[from] url::ParseError),
}

impl GatewayError {
    /// True when the failure means the user has to log in again.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            GatewayError::Unauthorized
                | GatewayError::Refresh(RefreshError::NotLoggedIn)
                | GatewayError::Refresh(RefreshError::RenewalFailed(_))
        )
    }
}
