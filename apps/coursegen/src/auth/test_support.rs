use crate::auth::credentials::{Credential, TokenResponse};
use crate::auth::error::AuthError;
use crate::auth::gate::TokenRenewer;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use time::OffsetDateTime;
use tokio::sync::Notify;

pub(crate) fn credential_expiring_in(secs: i64) -> Credential {
    Credential::new(
        "access-0",
        Some("refresh-0".into()),
        OffsetDateTime::now_utc() + time::Duration::seconds(secs),
    )
}

/// Renewer that counts calls and can be held until the test opens its gate.
pub(crate) struct ScriptedRenewer {
    calls: AtomicUsize,
    gate: Option<Notify>,
    fail: bool,
}

impl ScriptedRenewer {
    fn build(gated: bool, fail: bool) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            gate: gated.then(Notify::new),
            fail,
        })
    }

    pub(crate) fn succeeding() -> Arc<Self> {
        Self::build(false, false)
    }

    pub(crate) fn gated() -> Arc<Self> {
        Self::build(true, false)
    }

    pub(crate) fn failing_gated() -> Arc<Self> {
        Self::build(true, true)
    }

    pub(crate) fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenRenewer for ScriptedRenewer {
    async fn renew(&self, _current: &Credential) -> Result<TokenResponse, AuthError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.fail {
            return Err(AuthError::Gateway("refresh endpoint unavailable".into()));
        }
        Ok(TokenResponse {
            access_token: format!("renewed-{call}"),
            refresh_token: None,
            expires_in: Some(3600),
            token_type: Some("bearer".into()),
        })
    }
}
