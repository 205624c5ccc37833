//! Offline-token exchange against the identity provider's token endpoint.

use crate::error::{AuthError, ConfigError};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Trades a long-lived refresh/offline token for a short-lived access token.
///
/// One attempt per call; a failed exchange is a rejection, never retried.
pub struct TokenExchange {
    token_uri: Url,
    client_id: String,
    client_secret: String,
    http_client: reqwest::Client,
}

impl TokenExchange {
    pub fn new(
        token_uri: Url,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::invalid("oauth2-access-token-uri", e.to_string()))?;
        Ok(Self {
            token_uri,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            http_client,
        })
    }

    pub async fn exchange(&self, offline_token: &str) -> Result<String, AuthError> {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "refresh_token")
            .append_pair("client_id", &self.client_id)
            .append_pair("client_secret", &self.client_secret)
            .append_pair("refresh_token", offline_token)
            .finish();

        let response = self
            .http_client
            .post(self.token_uri.clone())
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(body)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!("token exchange request failed: {}", e);
                AuthError::ExchangeRejected
            })?;

        if !response.status().is_success() {
            tracing::debug!("token exchange rejected with status {}", response.status());
            return Err(AuthError::ExchangeRejected);
        }

        let token = response.json::<TokenResponse>().await.map_err(|e| {
            tracing::debug!("unreadable token exchange response: {}", e);
            AuthError::ExchangeRejected
        })?;

        if token.access_token.is_empty() {
            return Err(AuthError::ExchangeRejected);
        }
        Ok(token.access_token)
    }
}
