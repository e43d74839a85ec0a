use crate::api::{CourseApi, GatewayError, RequestGateway};
use crate::auth::{
    AuthError, Credential, CredentialStore, HttpTokenRenewer, LogoutReason, RefreshCoordinator,
    TokenRenewer, credential_from_login, open_store,
};
use crate::config::{Config, ConfigError};
use crate::session::AuditSession;
use crate::transport::Connector;
use crate::transport::websocket::{ConnectionManager, WebSocketConnector};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// One client instance: a credential store, its refresh coordinator and the
/// API gateway that shares them. Sessions opened from it share the same
/// credential and logout signal.
#[derive(Clone)]
pub struct CourseClient {
    config: Config,
    coordinator: RefreshCoordinator,
    api: CourseApi,
}

impl CourseClient {
    /// Uses the credential file from the config, or the default location.
    pub fn new(config: Config) -> Result<Self, ClientError> {
        let store = open_store(config.credentials_path.clone())?;
        Self::with_store(config, Arc::new(store))
    }

    pub fn with_store(config: Config, store: Arc<CredentialStore>) -> Result<Self, ClientError> {
        let renewer = HttpTokenRenewer::new(config.auth_config()?)?;
        Self::with_parts(config, store, Arc::new(renewer))
    }

    pub fn with_parts(
        config: Config,
        store: Arc<CredentialStore>,
        renewer: Arc<dyn TokenRenewer>,
    ) -> Result<Self, ClientError> {
        let coordinator = RefreshCoordinator::new(store, renewer, config.access_token_ttl);
        let gateway = RequestGateway::new(
            config.api_base()?,
            coordinator.clone(),
            config.refresh_buffer,
            config.http_timeout,
        )?;
        Ok(Self {
            config,
            coordinator,
            api: CourseApi::new(gateway),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    pub fn api(&self) -> &CourseApi {
        &self.api
    }

    pub fn gateway(&self) -> &RequestGateway {
        self.api.gateway()
    }

    pub fn login(
        &self,
        access_token: &str,
        refresh_token: Option<String>,
    ) -> Result<Credential, ClientError> {
        let credential =
            credential_from_login(access_token, refresh_token, self.config.access_token_ttl)?;
        info!(
            target: "coursegen::auth",
            expires_at = %credential.expires_at,
            "credential installed"
        );
        self.coordinator.install(credential.clone());
        Ok(credential)
    }

    pub fn logout(&self) {
        self.coordinator.logout(LogoutReason::SignedOut);
    }

    pub fn open_session(
        &self,
        connector: Arc<dyn Connector>,
        session_id: Option<String>,
    ) -> AuditSession {
        let (manager, events) = ConnectionManager::new(connector, self.config.reconnect_delay);
        AuditSession::new(
            manager,
            events,
            self.api.clone(),
            self.config.ws_host.clone(),
            session_id,
        )
    }

    pub fn open_websocket_session(&self, session_id: Option<String>) -> AuditSession {
        self.open_session(Arc::new(WebSocketConnector), session_id)
    }
}
