use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Toml(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("auth server error: {0}")]
    Gateway(String),
    #[error("credential was rejected by the auth server")]
    Rejected,
    #[error("not logged in")]
    NotLoggedIn,
}

impl From<toml::de::Error> for AuthError {
    fn from(value: toml::de::Error) -> Self {
        AuthError::Toml(value.to_string())
    }
}

impl From<toml::ser::Error> for AuthError {
    fn from(value: toml::ser::Error) -> Self {
        AuthError::Toml(value.to_string())
    }
}

/// Outcome shared by every caller parked behind one renewal, hence `Clone`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    #[error("no credential to refresh")]
    NotLoggedIn,
    #[error("credential renewal failed: {0}")]
    RenewalFailed(String),
    #[error("credential renewal ended without reporting an outcome")]
    Abandoned,
}

/// Why the session's credential was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    /// The renewal call itself failed.
    RenewalFailed,
    /// The server kept rejecting the credential after a successful renewal.
    Rejected,
    /// Explicit sign-out.
    SignedOut,
}
