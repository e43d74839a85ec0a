pub mod config;
pub mod credentials;
pub mod error;
pub mod gate;
pub mod refresh;

#[cfg(test)]
pub(crate) mod test_support;

use std::path::PathBuf;
use std::time::Duration;

pub use config::AuthConfig;
pub use credentials::{Credential, CredentialStore, TokenResponse, jwt_expiry};
pub use error::{AuthError, LogoutReason, RefreshError};
pub use gate::{HttpTokenRenewer, TokenRenewer};
pub use refresh::RefreshCoordinator;

/// Opens the credential store at `path_override`, or at the default location
/// under the home directory.
pub fn open_store(path_override: Option<PathBuf>) -> Result<CredentialStore, AuthError> {
    let path = match path_override {
        Some(path) => path,
        None => CredentialStore::default_path()?,
    };
    CredentialStore::persistent(path)
}

/// Builds the credential for a token handed over from an out-of-band login.
pub fn credential_from_login(
    access_token: impl Into<String>,
    refresh_token: Option<String>,
    default_ttl: Duration,
) -> Result<Credential, AuthError> {
    let access_token = access_token.into();
    if access_token.trim().is_empty() {
        return Err(AuthError::Config("access token must not be empty".into()));
    }
    let tokens = TokenResponse {
        access_token,
        refresh_token,
        expires_in: None,
        token_type: None,
    };
    Ok(Credential::from_token_response(tokens, None, default_ttl))
}
