//! JWKS (JSON Web Key Set) fetching and caching.
//!
//! The key set is the only state shared between requests. Reads go through a
//! moka cache; a miss runs one fetch for all concurrent callers
//! (`try_get_with` coalesces them). Fetches are retried with exponential
//! backoff a bounded number of times before surfacing as `KeyFetchFailed`.

use crate::error::{AuthError, ConfigError};
use jsonwebtoken::DecodingKey;
use moka::future::Cache;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::KeyProvider;

const CACHE_KEY: &str = "jwks";

/// Bounded retry schedule for key-set fetches.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Tuning for [`JwksKeyProvider`].
#[derive(Debug, Clone)]
pub struct JwksOptions {
    /// How long a fetched key set is trusted.
    pub cache_ttl: Duration,
    /// Per-attempt HTTP timeout.
    pub fetch_timeout: Duration,
    /// Minimum key-set age before an unknown `kid` forces a refetch.
    pub min_refresh_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for JwksOptions {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(3600),
            fetch_timeout: Duration::from_secs(5),
            min_refresh_interval: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

/// A fetched key set and when it was fetched.
pub struct CachedKeySet {
    pub jwks: Jwks,
    pub fetched_at: Instant,
}

/// JWKS key provider with caching.
pub struct JwksKeyProvider {
    jwks_url: String,
    cache: Cache<String, Arc<CachedKeySet>>,
    http_client: reqwest::Client,
    options: JwksOptions,
}

impl JwksKeyProvider {
    /// Create a new JWKS key provider.
    ///
    /// # Arguments
    /// * `jwks_url` - URL to fetch JWKS from (e.g., `https://idp.example.org/realms/cbio/protocol/openid-connect/certs`)
    pub fn new(jwks_url: impl Into<String>, options: JwksOptions) -> Result<Self, ConfigError> {
        let cache = Cache::builder()
            .time_to_live(options.cache_ttl)
            .max_capacity(1)
            .build();

        let http_client = reqwest::Client::builder()
            .timeout(options.fetch_timeout)
            .build()
            .map_err(|e| ConfigError::invalid("oauth2-jwk-url", e.to_string()))?;

        Ok(Self {
            jwks_url: jwks_url.into(),
            cache,
            http_client,
            options,
        })
    }

    /// Fetch JWKS from the remote URL once.
    async fn fetch_jwks(&self) -> Result<Jwks, String> {
        tracing::debug!("fetching JWKS from {}", self.jwks_url);

        let response = self
            .http_client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| format!("failed to fetch JWKS: {}", e))?;

        if !response.status().is_success() {
            return Err(format!("JWKS fetch failed with status: {}", response.status()));
        }

        response
            .json::<Jwks>()
            .await
            .map_err(|e| format!("failed to parse JWKS: {}", e))
    }

    /// Fetch with bounded retries and exponential backoff.
    async fn fetch_with_retry(&self) -> Result<Arc<CachedKeySet>, AuthError> {
        let attempts = self.options.retry.attempts.max(1);
        for attempt in 1..=attempts {
            match self.fetch_jwks().await {
                Ok(jwks) => {
                    return Ok(Arc::new(CachedKeySet {
                        jwks,
                        fetched_at: Instant::now(),
                    }));
                }
                Err(reason) if attempt < attempts => {
                    let delay = self.options.retry.backoff(attempt);
                    tracing::warn!(
                        "JWKS attempt {}/{} failed: {}; retrying in {:?}",
                        attempt,
                        attempts,
                        reason,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(reason) => {
                    tracing::warn!("JWKS attempt {}/{} failed: {}", attempt, attempts, reason);
                }
            }
        }
        Err(AuthError::KeyFetchFailed)
    }

    /// Get JWKS, using cache if available.
    async fn get_jwks(&self) -> Result<Arc<CachedKeySet>, AuthError> {
        self.cache
            .try_get_with(CACHE_KEY.to_string(), self.fetch_with_retry())
            .await
            .map_err(|e: Arc<AuthError>| (*e).clone())
    }
}

#[async_trait::async_trait]
impl KeyProvider for JwksKeyProvider {
    async fn get_key(&self, kid: Option<&str>) -> Result<DecodingKey, AuthError> {
        let mut keys = self.get_jwks().await?;

        if let Some(kid) = kid {
            // Unknown kid: the issuer may have rotated keys.
            if keys.jwks.find(Some(kid)).is_none()
                && keys.fetched_at.elapsed() >= self.options.min_refresh_interval
            {
                tracing::debug!("kid {} not in cached JWKS, refreshing", kid);
                // Drop only the set we looked at; another caller may have replaced it.
                let current = self.cache.get(CACHE_KEY).await;
                if current.is_none_or(|current| Arc::ptr_eq(&current, &keys)) {
                    self.cache.invalidate(CACHE_KEY).await;
                }
                keys = self.get_jwks().await?;
            }
        }

        let key = keys.jwks.find(kid).ok_or_else(|| {
            tracing::debug!("no matching key found in JWKS for kid: {:?}", kid);
            AuthError::SignatureInvalid
        })?;

        key.to_decoding_key().map_err(|e| {
            tracing::warn!("unusable key in JWKS: {}", e);
            AuthError::SignatureInvalid
        })
    }
}

/// JSON Web Key Set.
#[derive(Debug, Deserialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

impl Jwks {
    /// The key with the given id, or the only signing key when no id is given.
    pub fn find(&self, kid: Option<&str>) -> Option<&Jwk> {
        let mut signing = self
            .keys
            .iter()
            .filter(|k| k.use_.as_deref().is_none_or(|u| u == "sig"));
        match kid {
            Some(kid) => signing.find(|k| k.kid.as_deref() == Some(kid)),
            None => {
                let first = signing.next();
                // Ambiguous without a kid.
                if signing.next().is_some() { None } else { first }
            }
        }
    }
}

/// JSON Web Key.
#[derive(Debug, Deserialize)]
pub struct Jwk {
    /// Key type (e.g., "RSA", "EC").
    pub kty: String,
    /// Key ID.
    pub kid: Option<String>,
    /// Algorithm (e.g., "RS256").
    pub alg: Option<String>,
    /// Key use (e.g., "sig").
    #[serde(rename = "use")]
    pub use_: Option<String>,

    // RSA key components
    /// RSA modulus (base64url).
    pub n: Option<String>,
    /// RSA exponent (base64url).
    pub e: Option<String>,

    // EC key components
    /// EC curve (e.g., "P-256").
    pub crv: Option<String>,
    /// EC x coordinate (base64url).
    pub x: Option<String>,
    /// EC y coordinate (base64url).
    pub y: Option<String>,
}

impl Jwk {
    /// Convert JWK to a DecodingKey.
    pub fn to_decoding_key(&self) -> Result<DecodingKey, String> {
        match self.kty.as_str() {
            "RSA" => {
                let n = self.n.as_ref().ok_or("RSA key missing 'n'")?;
                let e = self.e.as_ref().ok_or("RSA key missing 'e'")?;

                DecodingKey::from_rsa_components(n, e)
                    .map_err(|e| format!("invalid RSA key: {}", e))
            }
            "EC" => {
                let x = self.x.as_ref().ok_or("EC key missing 'x'")?;
                let y = self.y.as_ref().ok_or("EC key missing 'y'")?;

                DecodingKey::from_ec_components(x, y)
                    .map_err(|e| format!("invalid EC key: {}", e))
            }
            _ => Err(format!("unsupported key type: {}", self.kty)),
        }
    }
}
