//! OAuth2 token endpoint transport.
//!
//! Both grant types end in a form-encoded POST to the identity provider's
//! token endpoint. This module owns that POST and its error taxonomy; the
//! broker decides what goes into the form.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::types::AvtaleError;

/// Failure talking to a token endpoint
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// Connection, timeout or body read failure
    #[error("token endpoint unreachable: {0}")]
    Transport(String),

    /// The provider answered with a non-success status
    #[error("token endpoint returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("invalid token response: {0}")]
    InvalidResponse(String),

    #[error("could not sign assertion: {0}")]
    Signing(String),
}

impl TokenError {
    /// Transport failures and provider-side 5xx are worth another attempt.
    /// A 4xx means the request itself is wrong and will stay wrong.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Rejected { status, .. } => *status >= 500,
            Self::InvalidResponse(_) | Self::Signing(_) => false,
        }
    }
}

impl From<TokenError> for AvtaleError {
    fn from(err: TokenError) -> Self {
        AvtaleError::AuthBroker(err.to_string())
    }
}

/// Successful token endpoint response
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: i64,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// A token endpoint that accepts form-encoded grants
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// URL of the endpoint, also the `aud` of TokenX client assertions
    fn url(&self) -> &str;

    async fn request(&self, form: Vec<(&'static str, String)>) -> Result<TokenResponse, TokenError>;
}

/// Token endpoint reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpTokenEndpoint {
    client: Client,
    url: String,
}

impl HttpTokenEndpoint {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    /// Build with a dedicated client and request timeout
    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self, TokenError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TokenError::Transport(format!("client build: {e}")))?;
        Ok(Self::new(client, url))
    }
}

#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    fn url(&self) -> &str {
        &self.url
    }

    async fn request(&self, form: Vec<(&'static str, String)>) -> Result<TokenResponse, TokenError> {
        let grant = form
            .iter()
            .find(|(k, _)| *k == "grant_type")
            .map(|(_, v)| v.as_str())
            .unwrap_or("unknown");
        debug!(url = %self.url, grant_type = grant, "Requesting token");

        let response = self
            .client
            .post(&self.url)
            .form(&form)
            .send()
            .await
            .map_err(|e| TokenError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TokenError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| TokenError::Transport(e.to_string()))?;

        serde_json::from_slice(&bytes).map_err(|e| TokenError::InvalidResponse(e.to_string()))
    }
}
