//! Bearer-token validation for the OAuth2 resource-server mode.

use super::exchange::TokenExchange;
use super::identity::Identity;
use super::jwt::{self, TokenExpectations};
use super::{KeyProvider, unix_now};
use crate::error::AuthError;
use std::sync::Arc;

pub struct BearerValidator {
    key_provider: Arc<dyn KeyProvider>,
    expectations: TokenExpectations,
    exchange: Option<TokenExchange>,
}

impl BearerValidator {
    pub fn new(key_provider: Arc<dyn KeyProvider>, expectations: TokenExpectations) -> Self {
        Self {
            key_provider,
            expectations,
            exchange: None,
        }
    }

    /// Treat presented tokens as offline tokens to exchange before validation.
    pub fn with_exchange(mut self, exchange: TokenExchange) -> Self {
        self.exchange = Some(exchange);
        self
    }

    pub async fn validate(&self, token: &str) -> Result<Identity, AuthError> {
        self.validate_at(token, unix_now()).await
    }

    /// Validate a presented token at time `now` (Unix seconds).
    pub async fn validate_at(&self, presented: &str, now: u64) -> Result<Identity, AuthError> {
        let exchanged;
        let token = match &self.exchange {
            Some(exchange) => {
                exchanged = exchange.exchange(presented).await?;
                exchanged.as_str()
            }
            None => presented,
        };

        // Decode header to get key ID
        let header = jwt::decode_header(token)?;

        // Get the decoding key
        let key = self.key_provider.get_key(header.kid.as_deref()).await?;

        let claims = jwt::validate_token(token, &header, &key, &self.expectations, now)?;
        Identity::from_claims(claims)
    }
}
