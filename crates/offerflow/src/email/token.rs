//! Access-token collaborator.
//!
//! Callers ask for a token whenever they need one; refreshing is invisible to them.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::error::{EmailError, Result};
use crate::config::{OAuth2Credentials, TokenAuth};

/// Cap on error-body length in messages, so token endpoints cannot flood the logs.
const MAX_ERROR_BODY_LENGTH: usize = 200;

/// Tokens are refreshed this long before the server-side expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Used when the token endpoint omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<SecretString>;
}

/// A fixed token, e.g. an API key for the extraction service.
pub struct StaticTokenProvider {
    token: SecretString,
}

impl StaticTokenProvider {
    pub fn new(token: SecretString) -> Self {
        Self { token }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<SecretString> {
        Ok(self.token.clone())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    token: SecretString,
    refresh_at: Instant,
}

/// OAuth2 `refresh_token` grant with an in-memory cache.
pub struct RefreshingTokenProvider {
    client: Client,
    token_url: String,
    client_id: SecretString,
    client_secret: SecretString,
    refresh_token: SecretString,
    cached: Mutex<Option<CachedToken>>,
}

impl RefreshingTokenProvider {
    pub fn new(
        token_url: impl Into<String>,
        client_id: SecretString,
        client_secret: SecretString,
        refresh_token: SecretString,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| EmailError::OAuth2Error(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            token_url: token_url.into(),
            client_id,
            client_secret,
            refresh_token,
            cached: Mutex::new(None),
        })
    }

    pub fn from_credentials(credentials: &OAuth2Credentials) -> Result<Self> {
        let resolve = |source: &crate::secrets::SecretSource, label: &str| {
            source
                .resolve(label)
                .map_err(|e| EmailError::CredentialsNotFound(e.to_string()))
        };
        Self::new(
            credentials.token_url.clone(),
            resolve(&credentials.client_id, "oauth2 client_id")?,
            resolve(&credentials.client_secret, "oauth2 client_secret")?,
            resolve(&credentials.refresh_token, "oauth2 refresh_token")?,
        )
    }

    async fn refresh(&self) -> Result<CachedToken> {
        info!("Refreshing access token");

        let params = [
            ("client_id", self.client_id.expose_secret()),
            ("client_secret", self.client_secret.expose_secret()),
            ("refresh_token", self.refresh_token.expose_secret()),
            ("grant_type", "refresh_token"),
        ];

        let response = self
            .client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| EmailError::OAuth2Error(format!("Token refresh failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmailError::OAuth2Error(format!(
                "Token refresh failed ({}): {}",
                status,
                truncate_error_body(&body)
            )));
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            EmailError::OAuth2Error(format!("Failed to parse refresh response: {}", e))
        })?;

        let lifetime = token
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_LIFETIME);
        debug!("Access token valid for {}s", lifetime.as_secs());

        Ok(CachedToken {
            token: SecretString::from(token.access_token),
            refresh_at: Instant::now() + lifetime.saturating_sub(EXPIRY_MARGIN),
        })
    }
}

#[async_trait]
impl TokenProvider for RefreshingTokenProvider {
    async fn access_token(&self) -> Result<SecretString> {
        // Held across the refresh so concurrent callers share one request.
        let mut cached = self.cached.lock().await;
        if let Some(current) = cached.as_ref() {
            if Instant::now() < current.refresh_at {
                return Ok(current.token.clone());
            }
        }

        let fresh = self.refresh().await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }
}

/// Builds the provider a [`TokenAuth`] section describes.
pub fn token_provider_from_config(auth: &TokenAuth) -> Result<Box<dyn TokenProvider>> {
    match auth {
        TokenAuth::Static { token } => {
            let token = token
                .resolve("static token")
                .map_err(|e| EmailError::CredentialsNotFound(e.to_string()))?;
            Ok(Box::new(StaticTokenProvider::new(token)))
        }
        TokenAuth::Oauth2(credentials) => Ok(Box::new(
            RefreshingTokenProvider::from_credentials(credentials)?,
        )),
    }
}

fn truncate_error_body(body: &str) -> String {
    if body.chars().count() > MAX_ERROR_BODY_LENGTH {
        let truncated: String = body.chars().take(MAX_ERROR_BODY_LENGTH).collect();
        format!("{}... (truncated)", truncated)
    } else {
        body.to_string()
    }
}
