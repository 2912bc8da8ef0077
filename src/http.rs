//! HTTP client that carries the session token.
//!
//! Every request gets `Authorization: Bearer <token>`.  A 401 triggers
//! one token refresh and one replay of the identical request; a second
//! 401, or a failed refresh, is returned to the caller as is.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Method, Request, Response, StatusCode};
use serde::Serialize;

use crate::error::{ApiError, ProtocolError};

/// Anything that can hand out and refresh bearer tokens.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn get_token(&self) -> Result<String, ProtocolError>;
    async fn refresh_token(&self) -> Result<String, ProtocolError>;
}

/// Where the client's bearer token comes from.
#[derive(Clone)]
pub enum TokenSource {
    /// Fixed token supplied at startup; never refreshed.
    Static(String),
    Provider(Arc<dyn TokenProvider>),
}

impl TokenSource {
    async fn current(&self) -> Result<String, ProtocolError> {
        match self {
            TokenSource::Static(token) => Ok(token.clone()),
            TokenSource::Provider(provider) => provider.get_token().await,
        }
    }
}

#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    tokens: TokenSource,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, tokens: TokenSource) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self::with_client(client, base_url, tokens))
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        tokens: TokenSource,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
        }
    }

    /// A static token, when present, takes precedence over the provider.
    pub fn from_parts(
        base_url: impl Into<String>,
        static_token: Option<String>,
        provider: Arc<dyn TokenProvider>,
    ) -> Result<Self, ApiError> {
        let tokens = match static_token {
            Some(token) => TokenSource::Static(token),
            None => TokenSource::Provider(provider),
        };
        Self::new(base_url, tokens)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub async fn get(&self, path: &str) -> Result<Response, ApiError> {
        let request = self.client.request(Method::GET, self.url(path)).build()?;
        self.execute(request).await
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<Response, ApiError> {
        let request = self
            .client
            .request(Method::POST, self.url(path))
            .json(body)
            .build()?;
        self.execute(request).await
    }

    /// Send `request` with the current token, refreshing and replaying
    /// once on 401.
    pub async fn execute(&self, mut request: Request) -> Result<Response, ApiError> {
        let token = self.tokens.current().await?;
        attach_bearer(&mut request, &token)?;
        let replay = request.try_clone();

        let response = self.client.execute(request).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response.error_for_status()?);
        }

        let (provider, mut replay) = match (&self.tokens, replay) {
            (TokenSource::Provider(provider), Some(replay)) => (provider, replay),
            (TokenSource::Static(_), _) => {
                tracing::debug!(url = %response.url(), "401 with static token; not refreshing");
                return Ok(response.error_for_status()?);
            }
            (_, None) => {
                tracing::debug!(url = %response.url(), "401 on a request that cannot be replayed");
                return Ok(response.error_for_status()?);
            }
        };

        tracing::info!(url = %response.url(), "401 received, refreshing token once");
        let fresh = provider.refresh_token().await?;
        attach_bearer(&mut replay, &fresh)?;
        let retried = self.client.execute(replay).await?;
        Ok(retried.error_for_status()?)
    }
}

fn attach_bearer(request: &mut Request, token: &str) -> Result<(), ApiError> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|_| ApiError::InvalidToken)?;
    value.set_sensitive(true);
    request.headers_mut().insert(AUTHORIZATION, value);
    Ok(())
}
