//! Assembly of the [`SecurityChain`] from validated settings.

use super::claims::{ClaimMapper, ClaimPath, FileUserRoles, RoleSource};
use super::exchange::TokenExchange;
use super::jwks::JwksKeyProvider;
use super::jwt::TokenExpectations;
use super::oauth2::BearerValidator;
use super::policy::AccessPolicy;
use super::saml::{AssertionValidator, SamlAuthenticator, SamlBinding};
use super::session::SessionSigner;
use super::{PublicPaths, SecurityChain, Validator};
use crate::config::{AccessSettings, AuthenticationMode, OAuth2Settings, SamlSettings, SecuritySettings};
use crate::error::ConfigError;
use std::sync::Arc;

/// Paths served by the SAML login flow; always reachable.
pub const SAML_PUBLIC_PATHS: [&str; 4] = ["/saml/login", "/saml/acs", "/saml/logout", "/login-error"];

/// Claim the SAML mode reads roles from unless a user-roles file is set.
pub const SAML_ROLES_CLAIM: &str = "roles";

/// Build the chain for the configured mode. Any failure is fatal at startup.
pub async fn build_security_chain(settings: &SecuritySettings) -> Result<SecurityChain, ConfigError> {
    match &settings.mode {
        AuthenticationMode::None => {
            tracing::warn!("authentication disabled: every request is permitted");
            Ok(SecurityChain::permit_all())
        }
        AuthenticationMode::OAuth2(oauth2) => build_oauth2_chain(oauth2, &settings.access),
        AuthenticationMode::Saml(saml) => {
            let binding = load_saml_binding(saml).await?;
            build_saml_chain(saml, &settings.access, binding)
        }
    }
}

pub fn build_oauth2_chain(
    oauth2: &OAuth2Settings,
    access: &AccessSettings,
) -> Result<SecurityChain, ConfigError> {
    let keys = JwksKeyProvider::new(oauth2.jwk_url.as_str(), oauth2.jwks.clone())?;
    let mut validator = BearerValidator::new(
        Arc::new(keys),
        TokenExpectations {
            issuer: oauth2.issuer.clone(),
            audience: oauth2.audience.clone(),
            leeway: oauth2.leeway_secs,
        },
    );
    if let Some(exchange) = &oauth2.exchange {
        validator = validator.with_exchange(TokenExchange::new(
            exchange.token_uri.clone(),
            oauth2.client_id.clone(),
            exchange.client_secret.clone(),
            exchange.timeout,
        )?);
    }

    tracing::info!(
        "OAuth2 mode: issuer={}, audience={}, jwks={}",
        oauth2.issuer,
        oauth2.audience,
        oauth2.jwk_url
    );

    Ok(SecurityChain::enforcing(
        Validator::Bearer(validator),
        claim_mapper(access, oauth2.roles_path.clone())?,
        AccessPolicy::new(access.all_studies_role.clone()),
        PublicPaths::new(access.public_paths.iter().cloned()),
    ))
}

/// SAML chain around an already loaded binding.
pub fn build_saml_chain(
    saml: &SamlSettings,
    access: &AccessSettings,
    binding: Arc<dyn SamlBinding>,
) -> Result<SecurityChain, ConfigError> {
    let secret = match &saml.session_secret {
        Some(secret) => secret.clone(),
        None => {
            tracing::warn!("no session secret configured; sessions end with this process");
            SessionSigner::generate_secret()
        }
    };

    let authenticator = SamlAuthenticator::new(
        binding,
        AssertionValidator {
            entity_id: saml.entity_id.clone(),
            signature: saml.signature,
            clock_skew: saml.clock_skew_secs,
            email_attribute: saml.email_attribute.clone(),
            attribute_claims: saml.attribute_claims.clone(),
        },
        SessionSigner::new(secret, saml.session_max_age_secs),
        saml.logout.clone(),
    );

    let mut public_paths = PublicPaths::new(access.public_paths.iter().cloned());
    for path in SAML_PUBLIC_PATHS {
        public_paths.insert(path);
    }

    tracing::info!("SAML mode: entity_id={}, acs={}", saml.entity_id, saml.acs_url);

    Ok(SecurityChain::enforcing(
        Validator::Saml(authenticator),
        claim_mapper(access, ClaimPath::parse(SAML_ROLES_CLAIM)?)?,
        AccessPolicy::new(access.all_studies_role.clone()),
        public_paths,
    ))
}

fn claim_mapper(access: &AccessSettings, roles_path: ClaimPath) -> Result<ClaimMapper, ConfigError> {
    let source = match &access.user_roles_file {
        Some(path) => {
            tracing::info!("Roles from user roles file: {:?}", path);
            RoleSource::UserService(Arc::new(FileUserRoles::from_json_file(path)?))
        }
        None => RoleSource::ClaimPath(roles_path),
    };
    let mapper = ClaimMapper::new(source);
    Ok(match &access.role_prefix {
        Some(prefix) => mapper.with_role_prefix(prefix.clone()),
        None => mapper,
    })
}

#[cfg(feature = "saml")]
async fn load_saml_binding(saml: &SamlSettings) -> Result<Arc<dyn SamlBinding>, ConfigError> {
    let binding = super::saml_samael::SamaelBinding::load(saml).await?;
    Ok(Arc::new(binding))
}

#[cfg(not(feature = "saml"))]
async fn load_saml_binding(_saml: &SamlSettings) -> Result<Arc<dyn SamlBinding>, ConfigError> {
    Err(ConfigError::invalid(
        "authenticate",
        "saml support is not compiled in; rebuild with `--features saml`",
    ))
}
