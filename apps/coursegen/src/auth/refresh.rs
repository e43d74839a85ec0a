//! Single-flight credential renewal.
//!
//! At most one renewal is outstanding at any time. Callers that arrive while
//! it runs park on a oneshot and are released together with the same outcome.
//! The renewal itself runs in its own task so a caller that gives up cannot
//! strand the in-flight marker or the other waiters.

use crate::auth::credentials::{Credential, CredentialStore, TokenResponse};
use crate::auth::error::{AuthError, LogoutReason, RefreshError};
use crate::auth::gate::TokenRenewer;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

type Outcome = Result<Credential, RefreshError>;

#[derive(Default)]
struct RefreshState {
    in_flight: bool,
    /// Bumped by every login and logout. A renewal started under an older
    /// epoch must not write the store.
    epoch: u64,
    waiters: Vec<oneshot::Sender<Outcome>>,
}

struct Inner {
    store: Arc<CredentialStore>,
    renewer: Arc<dyn TokenRenewer>,
    default_ttl: Duration,
    state: Mutex<RefreshState>,
    logout_tx: broadcast::Sender<LogoutReason>,
}

#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<CredentialStore>,
        renewer: Arc<dyn TokenRenewer>,
        default_ttl: Duration,
    ) -> Self {
        let (logout_tx, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(Inner {
                store,
                renewer,
                default_ttl,
                state: Mutex::new(RefreshState::default()),
                logout_tx,
            }),
        }
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.inner.store
    }

    pub fn subscribe_logout(&self) -> broadcast::Receiver<LogoutReason> {
        self.inner.logout_tx.subscribe()
    }

    /// Installs a credential obtained from a login.
    pub fn install(&self, credential: Credential) {
        let mut state = self.inner.state.lock();
        state.epoch += 1;
        self.inner.store.set(credential);
    }

    /// Clears the credential. A renewal still in flight is discarded when it
    /// completes; its waiters get `NotLoggedIn`.
    pub fn logout(&self, reason: LogoutReason) {
        {
            let mut state = self.inner.state.lock();
            state.epoch += 1;
            self.inner.store.clear();
        }
        self.inner.signal_logout(reason);
    }

    /// Returns a credential valid for at least `buffer`, renewing it first if
    /// needed. While a renewal is outstanding every caller waits for it, even
    /// if the credential it read earlier would still be acceptable.
    pub async fn ensure_fresh(&self, buffer: Duration) -> Outcome {
        let rx = {
            let mut state = self.inner.state.lock();
            if state.in_flight {
                park(&mut state)
            } else {
                let current = self.inner.store.get().ok_or(RefreshError::NotLoggedIn)?;
                if !current.expires_within(buffer) {
                    return Ok(current);
                }
                debug!(
                    target: "coursegen::auth",
                    expires_at = %current.expires_at,
                    "credential near expiry; renewing"
                );
                self.start_renewal(&mut state, current)
            }
        };
        wait(rx).await
    }

    /// Renewal triggered by the server rejecting `rejected`. If another
    /// caller already replaced that credential, the replacement is returned
    /// without a second renewal.
    pub async fn reactive_refresh(&self, rejected: &Credential) -> Outcome {
        let rx = {
            let mut state = self.inner.state.lock();
            if state.in_flight {
                park(&mut state)
            } else {
                let current = self.inner.store.get().ok_or(RefreshError::NotLoggedIn)?;
                if current.access_token != rejected.access_token {
                    return Ok(current);
                }
                debug!(target: "coursegen::auth", "credential rejected; renewing");
                self.start_renewal(&mut state, current)
            }
        };
        wait(rx).await
    }

    fn start_renewal(
        &self,
        state: &mut RefreshState,
        current: Credential,
    ) -> oneshot::Receiver<Outcome> {
        state.in_flight = true;
        let rx = park(state);
        let mut task = RenewalTask {
            inner: self.inner.clone(),
            epoch: state.epoch,
            settled: false,
        };
        tokio::spawn(async move {
            let outcome = task.inner.renewer.renew(&current).await;
            task.settle(current, outcome);
        });
        rx
    }
}

fn park(state: &mut RefreshState) -> oneshot::Receiver<Outcome> {
    let (tx, rx) = oneshot::channel();
    state.waiters.push(tx);
    rx
}

async fn wait(rx: oneshot::Receiver<Outcome>) -> Outcome {
    rx.await.unwrap_or(Err(RefreshError::Abandoned))
}

impl Inner {
    fn signal_logout(&self, reason: LogoutReason) {
        info!(target: "coursegen::auth", ?reason, "session logged out");
        // No subscribers is fine.
        let _ = self.logout_tx.send(reason);
    }

    fn release(&self, waiters: Vec<oneshot::Sender<Outcome>>, outcome: Outcome) {
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
    }
}

/// Owns the in-flight marker for one renewal; if the task dies before
/// settling, waiters are released with `Abandoned` and the marker cleared.
struct RenewalTask {
    inner: Arc<Inner>,
    epoch: u64,
    settled: bool,
}

impl RenewalTask {
    fn settle(&mut self, previous: Credential, outcome: Result<TokenResponse, AuthError>) {
        self.settled = true;
        let inner = &self.inner;
        let mut state = inner.state.lock();
        state.in_flight = false;
        let waiters = std::mem::take(&mut state.waiters);

        if state.epoch != self.epoch {
            // A login or logout landed while the renewal ran; the store
            // already holds the newer decision.
            let current = inner.store.get().ok_or(RefreshError::NotLoggedIn);
            drop(state);
            info!(
                target: "coursegen::auth",
                waiters = waiters.len(),
                renewal_ok = outcome.is_ok(),
                "renewal superseded by login or logout; result discarded"
            );
            inner.release(waiters, current);
            return;
        }

        match outcome {
            Ok(tokens) => {
                let credential = Credential::from_token_response(
                    tokens,
                    previous.refresh_token,
                    inner.default_ttl,
                );
                // Stored before anyone is released so no waiter can race
                // ahead with the old credential.
                inner.store.set(credential.clone());
                drop(state);
                info!(
                    target: "coursegen::auth",
                    waiters = waiters.len(),
                    expires_at = %credential.expires_at,
                    "credential renewed"
                );
                inner.release(waiters, Ok(credential));
            }
            Err(err) => {
                inner.store.clear();
                state.epoch += 1;
                drop(state);
                warn!(
                    target: "coursegen::auth",
                    error = %err,
                    "credential renewal failed"
                );
                inner.release(waiters, Err(RefreshError::RenewalFailed(err.to_string())));
                inner.signal_logout(LogoutReason::RenewalFailed);
            }
        }
    }
}

impl Drop for RenewalTask {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let waiters = {
            let mut state = self.inner.state.lock();
            state.in_flight = false;
            std::mem::take(&mut state.waiters)
        };
        warn!(
            target: "coursegen::auth",
            waiters = waiters.len(),
            "credential renewal abandoned"
        );
        self.inner.release(waiters, Err(RefreshError::Abandoned));
    }
}
