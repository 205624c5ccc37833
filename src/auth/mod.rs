//! Authentication and authorization for the portal API.
//!
//! Exactly one strategy is active per process, chosen at startup:
//! - none: every request is permitted
//! - SAML: browser login through an external IdP, then a signed session cookie
//! - OAuth2: JWT bearer tokens validated against the issuer's JWKS,
//!   optionally exchanged from offline tokens first
//!
//! Every request passes the [`SecurityChain`] before any handler runs:
//! validator, then claim mapper, then access policy.

pub mod claims;
pub mod exchange;
mod extractor;
pub mod identity;
pub mod jwks;
pub mod jwt;
mod middleware;
pub mod oauth2;
pub mod policy;
pub mod saml;
#[cfg(feature = "saml")]
pub mod saml_samael;
pub mod session;
pub mod setup;

pub use claims::{ClaimMapper, ClaimPath, FileUserRoles, RoleSource, UserRoleService};
pub use extractor::Secured;
pub use identity::{Claims, Identity};
pub use middleware::security_filter;
pub use oauth2::BearerValidator;
pub use policy::{AccessPolicy, Decision, PermissionSet, Resource};
pub use saml::{SamlAuthenticator, SamlBinding};
pub use setup::build_security_chain;

use crate::error::{AuthError, ConfigError};
use axum::http::{HeaderMap, header::AUTHORIZATION};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Trait for JWT key providers.
#[async_trait::async_trait]
pub trait KeyProvider: Send + Sync {
    /// Get the decoding key, optionally using the key ID from the token header.
    async fn get_key(&self, kid: Option<&str>) -> Result<jsonwebtoken::DecodingKey, AuthError>;
}

/// Static public key provider (PEM format).
pub struct StaticKeyProvider {
    key: jsonwebtoken::DecodingKey,
}

impl StaticKeyProvider {
    /// Create a new static key provider from a PEM-encoded RSA public key.
    pub fn from_rsa_pem(pem: &[u8]) -> Result<Self, ConfigError> {
        let key = jsonwebtoken::DecodingKey::from_rsa_pem(pem)
            .map_err(|e| ConfigError::invalid("public-key", format!("invalid RSA PEM key: {}", e)))?;
        Ok(Self { key })
    }
}

#[async_trait::async_trait]
impl KeyProvider for StaticKeyProvider {
    async fn get_key(&self, _kid: Option<&str>) -> Result<jsonwebtoken::DecodingKey, AuthError> {
        Ok(self.key.clone())
    }
}

/// Paths reachable without credentials.
#[derive(Debug, Clone, Default)]
pub struct PublicPaths(HashSet<String>);

impl PublicPaths {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(paths.into_iter().map(Into::into).collect())
    }

    pub fn insert(&mut self, path: impl Into<String>) {
        self.0.insert(path.into());
    }

    /// Check if a path is public (doesn't require auth).
    ///
    /// Only canonical paths can match, so `/api/info/../studies` and
    /// percent-encoded variants always require authentication.
    pub fn is_public(&self, path: &str) -> bool {
        if !is_canonical(path) {
            return false;
        }

        // Exact match
        if self.0.contains(path) {
            return true;
        }

        // Prefix match (for entries like "/static/" that should match "/static/app.js")
        self.0
            .iter()
            .any(|p| p != "/" && p.ends_with('/') && path.starts_with(p.as_str()))
    }
}

fn is_canonical(path: &str) -> bool {
    let Some(rest) = path.strip_prefix('/') else {
        return false;
    };
    !path.contains('%')
        && !path.contains('\\')
        && (rest.is_empty()
            || rest
                .split('/')
                .all(|segment| !segment.is_empty() && segment != "." && segment != ".."))
}

/// Authorization state handed to resource handlers.
#[derive(Debug, Clone)]
pub enum SecurityContext {
    /// Authentication disabled: everything is visible.
    PermitAll,
    Authenticated {
        identity: Arc<Identity>,
        permissions: Arc<PermissionSet>,
        policy: Arc<AccessPolicy>,
    },
}

impl SecurityContext {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            SecurityContext::PermitAll => None,
            SecurityContext::Authenticated { identity, .. } => Some(identity),
        }
    }

    pub fn can_read_study(&self, study_id: &str) -> bool {
        match self {
            SecurityContext::PermitAll => true,
            SecurityContext::Authenticated {
                permissions,
                policy,
                ..
            } => policy.can_read_study(permissions, study_id),
        }
    }

    pub fn decide(&self, resource: &Resource) -> Decision {
        match self {
            SecurityContext::PermitAll => Decision::Allow,
            SecurityContext::Authenticated {
                permissions,
                policy,
                ..
            } => policy.decide(permissions, resource),
        }
    }
}

/// Credential checker for the active mode.
pub enum Validator {
    Bearer(BearerValidator),
    Saml(SamlAuthenticator),
}

impl Validator {
    async fn authenticate(&self, headers: &HeaderMap) -> Result<Identity, AuthError> {
        match self {
            Validator::Bearer(validator) => {
                let token = extract_bearer_token(headers)?;
                validator.validate(token).await
            }
            Validator::Saml(saml) => saml.authenticate(headers),
        }
    }
}

/// Extract Bearer token from Authorization header.
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let header = headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingCredentials)?;

    let value = header.to_str().map_err(|_| AuthError::MalformedToken)?;

    let (scheme, token) = value.split_once(' ').ok_or(AuthError::MalformedToken)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::MissingCredentials);
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::MalformedToken);
    }
    Ok(token)
}

/// Terminal states of the per-request chain.
#[derive(Debug)]
pub enum ChainOutcome {
    /// Mode none.
    Permitted(SecurityContext),
    /// Public path in an authenticated mode; no identity attached.
    Public,
    Authorized(SecurityContext),
    /// Authenticated but not allowed (403).
    Forbidden,
    /// No valid credentials (401), or role lookup failure.
    Rejected(AuthError),
}

struct Enforcement {
    validator: Validator,
    mapper: ClaimMapper,
    policy: Arc<AccessPolicy>,
    public_paths: PublicPaths,
}

/// The security filter chain, bound once at startup.
pub struct SecurityChain {
    enforcement: Option<Enforcement>,
}

impl SecurityChain {
    pub fn permit_all() -> Self {
        Self { enforcement: None }
    }

    pub fn enforcing(
        validator: Validator,
        mapper: ClaimMapper,
        policy: AccessPolicy,
        public_paths: PublicPaths,
    ) -> Self {
        Self {
            enforcement: Some(Enforcement {
                validator,
                mapper,
                policy: Arc::new(policy),
                public_paths,
            }),
        }
    }

    /// Name of the active mode, as configured.
    pub fn mode(&self) -> &'static str {
        match &self.enforcement {
            None => "none",
            Some(e) => match e.validator {
                Validator::Bearer(_) => "oauth2",
                Validator::Saml(_) => "saml",
            },
        }
    }

    pub fn saml(&self) -> Option<&SamlAuthenticator> {
        match &self.enforcement {
            Some(Enforcement {
                validator: Validator::Saml(saml),
                ..
            }) => Some(saml),
            _ => None,
        }
    }

    /// Run the chain for one request.
    pub async fn evaluate(&self, path: &str, headers: &HeaderMap) -> ChainOutcome {
        let Some(enforcement) = &self.enforcement else {
            return ChainOutcome::Permitted(SecurityContext::PermitAll);
        };

        if enforcement.public_paths.is_public(path) {
            return ChainOutcome::Public;
        }

        let identity = match enforcement.validator.authenticate(headers).await {
            Ok(identity) => identity,
            Err(e) => {
                tracing::debug!("rejected request to {}: {}", path, e);
                return ChainOutcome::Rejected(e);
            }
        };

        let permissions = match enforcement.mapper.permissions(&identity).await {
            Ok(permissions) => permissions,
            Err(e) => return ChainOutcome::Rejected(e),
        };

        let context = SecurityContext::Authenticated {
            identity: Arc::new(identity),
            permissions: Arc::new(permissions),
            policy: enforcement.policy.clone(),
        };

        match context.decide(&Resource::from_path(path)) {
            Decision::Allow => ChainOutcome::Authorized(context),
            Decision::Deny => {
                tracing::debug!(
                    "forbidden: {} for {}",
                    path,
                    context.identity().map(Identity::subject).unwrap_or_default()
                );
                ChainOutcome::Forbidden
            }
        }
    }
}
