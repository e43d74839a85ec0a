use crate::api::error::GatewayError;
use crate::auth::{Credential, LogoutReason, RefreshCoordinator, RefreshError};
use reqwest::{Client, Method, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Everything needed to issue one API call. Kept as plain data so a retry
/// rebuilds the exact same request with a different credential.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, serde_json::Error> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }
}

/// Sends API calls with the session's bearer credential, renewing it ahead
/// of expiry and retrying exactly once after a 401.
#[derive(Clone)]
pub struct RequestGateway {
    http: Client,
    api_base: Url,
    coordinator: RefreshCoordinator,
    refresh_buffer: Duration,
}

impl RequestGateway {
    pub fn new(
        api_base: Url,
        coordinator: RefreshCoordinator,
        refresh_buffer: Duration,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            api_base,
            coordinator,
            refresh_buffer,
        })
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    pub fn api_base(&self) -> &Url {
        &self.api_base
    }

    pub async fn authenticated_call(&self, request: &ApiRequest) -> Result<Response, GatewayError> {
        // Without a stored credential the call goes out anonymously.
        let mut credential = match self.coordinator.ensure_fresh(self.refresh_buffer).await {
            Ok(credential) => Some(credential),
            Err(RefreshError::NotLoggedIn) => None,
            Err(err) => return Err(err.into()),
        };
        let mut retried = false;

        loop {
            let response = self.execute(request, credential.as_ref()).await?;
            if response.status() != StatusCode::UNAUTHORIZED {
                return Ok(response);
            }

            let Some(rejected) = credential.take() else {
                debug!(
                    target: "coursegen::gateway",
                    path = %request.path,
                    "anonymous request unauthorized"
                );
                return Err(GatewayError::Unauthorized);
            };

            if retried {
                warn!(
                    target: "coursegen::gateway",
                    path = %request.path,
                    "renewed credential rejected; logging out"
                );
                self.coordinator.logout(LogoutReason::Rejected);
                return Err(GatewayError::Unauthorized);
            }
            retried = true;

            debug!(
                target: "coursegen::gateway",
                path = %request.path,
                "request unauthorized; refreshing credential"
            );
            credential = match self.coordinator.reactive_refresh(&rejected).await {
                Ok(renewed) => Some(renewed),
                // Logged out while this call was in flight.
                Err(RefreshError::NotLoggedIn) => return Err(GatewayError::Unauthorized),
                Err(err) => return Err(err.into()),
            };
        }
    }

    pub async fn get_json<T>(&self, path: &str, query: &[(&str, &str)]) -> Result<T, GatewayError>
    where
        T: DeserializeOwned,
    {
        let mut request = ApiRequest::get(path);
        for (key, value) in query {
            request = request.query(*key, *value);
        }
        let response = self.authenticated_call(&request).await?;
        decode_json(response).await
    }

    pub async fn post_json<T, B>(&self, path: &str, body: &B) -> Result<T, GatewayError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let request = ApiRequest::post(path).json(body)?;
        let response = self.authenticated_call(&request).await?;
        decode_json(response).await
    }

    async fn execute(
        &self,
        request: &ApiRequest,
        credential: Option<&Credential>,
    ) -> Result<Response, GatewayError> {
        let url = self.api_base.join(request.path.trim_start_matches('/'))?;
        let mut builder = self.http.request(request.method.clone(), url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(credential) = credential {
            builder = builder.bearer_auth(&credential.access_token);
        }
        Ok(builder.send().await?)
    }
}

async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T, GatewayError> {
    if response.status().is_success() {
        Ok(response.json::<T>().await?)
    } else {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(GatewayError::UnexpectedStatus { status, body })
    }
}
