use crate::auth::error::AuthError;
use directories::BaseDirs;
use jsonwebtoken::{DecodingKey, Validation};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// Body returned by the login and `POST /auth/refresh` endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl Credential {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_at: OffsetDateTime,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            expires_at,
        }
    }

    /// Builds the credential for a freshly issued token. Expiry comes from
    /// `expires_in`, then the JWT `exp` claim, then `default_ttl`. A response
    /// without a refresh token keeps the previous one.
    pub fn from_token_response(
        tokens: TokenResponse,
        previous_refresh: Option<String>,
        default_ttl: Duration,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        let expires_at = tokens
            .expires_in
            .map(|secs| now + Duration::from_secs(secs))
            .or_else(|| jwt_expiry(&tokens.access_token))
            .unwrap_or(now + default_ttl);
        Self {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token.or(previous_refresh),
            expires_at,
        }
    }

    pub fn expires_within(&self, buffer: Duration) -> bool {
        self.expires_at < OffsetDateTime::now_utc() + buffer
    }
}

/// Reads the `exp` claim without verifying the signature; the client only
/// needs it to schedule renewal, the server remains the authority.
pub fn jwt_expiry(token: &str) -> Option<OffsetDateTime> {
    #[derive(Deserialize)]
    struct Claims {
        exp: f64,
    }

    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();
    let data =
        jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation).ok()?;
    OffsetDateTime::from_unix_timestamp(data.claims.exp as i64).ok()
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CredentialsFile {
    #[serde(default)]
    credential: Option<Credential>,
}

/// Guarded cell holding the current credential, optionally written through
/// to a TOML file.
#[derive(Debug)]
pub struct CredentialStore {
    current: RwLock<Option<Credential>>,
    file: Option<PathBuf>,
}

impl CredentialStore {
    pub fn in_memory() -> Self {
        Self {
            current: RwLock::new(None),
            file: None,
        }
    }

    pub fn persistent(path: impl Into<PathBuf>) -> Result<Self, AuthError> {
        let path = path.into();
        let current = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            let file: CredentialsFile = toml::from_str(&raw)?;
            file.credential
        } else {
            None
        };
        Ok(Self {
            current: RwLock::new(current),
            file: Some(path),
        })
    }

    pub fn default_path() -> Result<PathBuf, AuthError> {
        let base = BaseDirs::new()
            .ok_or_else(|| AuthError::Config("unable to determine home directory".into()))?;
        Ok(base.home_dir().join(".coursegen").join("credentials"))
    }

    pub fn path(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    pub fn get(&self) -> Option<Credential> {
        self.current.read().clone()
    }

    pub fn set(&self, credential: Credential) {
        let mut guard = self.current.write();
        *guard = Some(credential);
        self.persist(guard.as_ref());
    }

    pub fn clear(&self) {
        let mut guard = self.current.write();
        *guard = None;
        self.persist(None);
    }

    /// False for an empty store: there is nothing to renew.
    pub fn is_near_expiry(&self, buffer: Duration) -> bool {
        self.current
            .read()
            .as_ref()
            .map(|credential| credential.expires_within(buffer))
            .unwrap_or(false)
    }

    fn persist(&self, credential: Option<&Credential>) {
        let Some(path) = self.file.as_deref() else {
            return;
        };
        if let Err(err) = write_credentials_file(path, credential) {
            tracing::warn!(
                target: "coursegen::auth",
                error = %err,
                path = %path.display(),
                "failed to persist credential"
            );
        }
    }
}

fn write_credentials_file(path: &Path, credential: Option<&Credential>) -> Result<(), AuthError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let serialized = toml::to_string_pretty(&CredentialsFile {
        credential: credential.cloned(),
    })?;
    let mut options = OpenOptions::new();
    options.create(true).write(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(serialized.as_bytes())?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let metadata = file.metadata()?;
        let mut perms = metadata.permissions();
        perms.set_mode(0o600);
        fs::set_permissions(path, perms)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};

    fn credential_expiring_in(secs: i64) -> Credential {
        Credential::new(
            "access",
            Some("refresh".into()),
            OffsetDateTime::now_utc() + time::Duration::seconds(secs),
        )
    }

    #[test]
    fn near_expiry_uses_buffer() {
        let store = CredentialStore::in_memory();
        assert!(!store.is_near_expiry(Duration::from_secs(60)));

        store.set(credential_expiring_in(30));
        assert!(store.is_near_expiry(Duration::from_secs(60)));
        assert!(!store.is_near_expiry(Duration::from_secs(10)));

        store.set(credential_expiring_in(3600));
        assert!(!store.is_near_expiry(Duration::from_secs(60)));
    }

    #[test]
    fn clear_empties_store() {
        let store = CredentialStore::in_memory();
        store.set(credential_expiring_in(3600));
        store.clear();
        assert!(store.get().is_none());
    }

    #[test]
    fn expiry_prefers_expires_in() {
        let tokens = TokenResponse {
            access_token: "opaque".into(),
            refresh_token: None,
            expires_in: Some(120),
            token_type: None,
        };
        let credential =
            Credential::from_token_response(tokens, Some("old-refresh".into()), Duration::from_secs(1800));
        assert_eq!(credential.refresh_token.as_deref(), Some("old-refresh"));
        assert!(credential.expires_within(Duration::from_secs(121)));
        assert!(!credential.expires_within(Duration::from_secs(100)));
    }

    #[test]
    fn expiry_falls_back_to_jwt_claim() {
        #[derive(Serialize)]
        struct Claims {
            sub: String,
            exp: i64,
        }
        let exp = OffsetDateTime::now_utc().unix_timestamp() + 600;
        let token = encode(
            &Header::default(),
            &Claims {
                sub: "user@example.com".into(),
                exp,
            },
            &EncodingKey::from_secret(b"server-secret"),
        )
        .expect("encode jwt");

        assert_eq!(
            jwt_expiry(&token).map(OffsetDateTime::unix_timestamp),
            Some(exp)
        );

        let tokens = TokenResponse {
            access_token: token,
            refresh_token: Some("new-refresh".into()),
            expires_in: None,
            token_type: Some("Bearer".into()),
        };
        let credential = Credential::from_token_response(tokens, None, Duration::from_secs(5));
        assert_eq!(credential.expires_at.unix_timestamp(), exp);
        assert_eq!(credential.refresh_token.as_deref(), Some("new-refresh"));
    }

    #[test]
    fn opaque_token_uses_default_ttl() {
        assert!(jwt_expiry("not-a-jwt").is_none());
        let tokens = TokenResponse {
            access_token: "not-a-jwt".into(),
            refresh_token: None,
            expires_in: None,
            token_type: None,
        };
        let credential = Credential::from_token_response(tokens, None, Duration::from_secs(1800));
        assert!(!credential.expires_within(Duration::from_secs(1700)));
        assert!(credential.expires_within(Duration::from_secs(1900)));
    }

    #[test]
    fn persistent_store_round_trips_through_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("credentials");

        let store = CredentialStore::persistent(&path).expect("open store");
        assert!(store.get().is_none());
        let credential = credential_expiring_in(3600);
        store.set(credential.clone());

        let reopened = CredentialStore::persistent(&path).expect("reopen store");
        let loaded = reopened.get().expect("credential persisted");
        assert_eq!(loaded.access_token, credential.access_token);
        assert_eq!(loaded.refresh_token, credential.refresh_token);
        assert_eq!(
            loaded.expires_at.unix_timestamp(),
            credential.expires_at.unix_timestamp()
        );

        reopened.clear();
        let emptied = CredentialStore::persistent(&path).expect("reopen store");
        assert!(emptied.get().is_none());
    }
}
