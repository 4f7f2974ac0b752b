// REST client for the chat backend
// Endpoints are grouped by concern, each file adds methods to ApiClient

use log::{debug, warn};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::{Arc, RwLock};

use crate::config::ClientConfig;
use crate::error::{ChatError, Result};
use crate::models::{Credential, ErrorDetail};

pub mod auth;
pub mod directory;
pub mod history;
pub mod send;

/// Fallback shown when the backend does not explain a failure
pub const GENERIC_ERROR: &str = "An error occurred";

/// Thin wrapper over `reqwest::Client` that knows the backend layout and
/// attaches the session credential to authenticated calls.
///
/// Cloning is cheap and clones share the credential, so background tasks
/// always see the current session.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    config: Arc<ClientConfig>,
    credential: Arc<RwLock<Option<Credential>>>,
}

impl ApiClient {
    pub fn new(config: Arc<ClientConfig>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.request_timeout)
            .build()?;
        Ok(ApiClient {
            http,
            config,
            credential: Arc::new(RwLock::new(None)),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn set_credential(&self, credential: Option<Credential>) {
        let mut guard = self.credential.write().unwrap_or_else(|e| e.into_inner());
        *guard = credential;
    }

    pub fn has_credential(&self) -> bool {
        self.credential
            .read()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    fn get(&self, path: &str) -> Result<RequestBuilder> {
        let url = self.config.api_url(path);
        debug!("GET {}", url);
        self.authorize(self.http.get(url))
    }

    fn post(&self, path: &str) -> RequestBuilder {
        let url = self.config.api_url(path);
        debug!("POST {}", url);
        self.http.post(url)
    }

    fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        let guard = self.credential.read().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(credential) => Ok(request.header(reqwest::header::AUTHORIZATION, credential.bearer())),
            None => Err(ChatError::NotAuthenticated),
        }
    }
}

/// Decode a successful response, or turn an error status into a `ChatError`
pub(crate) async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<T>().await?);
    }

    let detail = error_detail(response).await;
    warn!("Request failed with {}: {}", status, detail);
    if status == StatusCode::UNAUTHORIZED {
        return Err(ChatError::Unauthorized);
    }
    Err(ChatError::Http {
        status: status.as_u16(),
        detail,
    })
}

/// Extract `{"detail": ...}` from an error body
pub(crate) async fn error_detail(response: Response) -> String {
    match response.text().await {
        Ok(body) => serde_json::from_str::<ErrorDetail>(&body)
            .map(|e| e.detail)
            .unwrap_or_else(|_| GENERIC_ERROR.to_string()),
        Err(_) => GENERIC_ERROR.to_string(),
    }
}
