//! [`SamlBinding`] backed by samael (xmlsec signature verification).

use super::saml::{LoginRedirect, SamlAssertion, SamlBinding};
use crate::config::{KeystoreSettings, SamlSettings};
use crate::error::{AuthError, ConfigError};
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::x509::X509;
use samael::metadata::{EntityDescriptor, HTTP_REDIRECT_BINDING};
use samael::schema::Assertion;
use samael::service_provider::{ServiceProvider, ServiceProviderBuilder};
use std::collections::HashMap;

pub struct SamaelBinding {
    provider: ServiceProvider,
    sso_url: String,
    slo_url: Option<String>,
    /// samael checks response signatures only when the IdP lists signing certs.
    signature_verified: bool,
}

impl SamaelBinding {
    /// Load IdP metadata and the SP keystore, and bind them together.
    pub async fn load(settings: &SamlSettings) -> Result<Self, ConfigError> {
        let metadata = read_metadata(&settings.idp_metadata_location).await?;
        let idp: EntityDescriptor = metadata.parse().map_err(|e| ConfigError::Load {
            option: "saml-idp-metadata-location",
            location: settings.idp_metadata_location.clone(),
            reason: format!("{}", e),
        })?;
        let (key, certificate) = read_keystore(&settings.keystore)?;

        let provider = ServiceProviderBuilder::default()
            .entity_id(settings.entity_id.clone())
            .acs_url(settings.acs_url.clone())
            .key(key)
            .certificate(certificate)
            .idp_metadata(idp)
            .build()
            .map_err(|e| ConfigError::invalid("saml-entity-id", e.to_string()))?;

        let sso_url = provider
            .sso_binding_location(HTTP_REDIRECT_BINDING)
            .ok_or_else(|| {
                ConfigError::invalid(
                    "saml-idp-metadata-location",
                    "IdP metadata has no HTTP-Redirect SingleSignOnService",
                )
            })?;
        let slo_url = provider.slo_binding_location(HTTP_REDIRECT_BINDING);

        let signing_certs = provider
            .idp_signing_certs()
            .map_err(|e| ConfigError::invalid("saml-idp-metadata-location", e.to_string()))?;
        let signature_verified = settings
            .signature
            .verifies_with(signing_certs.is_some_and(|certs| !certs.is_empty()))?;

        Ok(Self {
            provider,
            sso_url,
            slo_url,
            signature_verified,
        })
    }
}

impl SamlBinding for SamaelBinding {
    fn login_redirect(&self, relay_state: &str) -> Result<LoginRedirect, AuthError> {
        let request = self
            .provider
            .make_authentication_request(&self.sso_url)
            .map_err(|e| {
                tracing::error!("failed to build AuthnRequest: {}", e);
                AuthError::AssertionInvalid
            })?;
        let url = request
            .redirect(relay_state)
            .map_err(|e| {
                tracing::error!("failed to encode AuthnRequest: {}", e);
                AuthError::AssertionInvalid
            })?
            .ok_or(AuthError::AssertionInvalid)?;

        Ok(LoginRedirect {
            request_id: request.id.clone(),
            url: url.to_string(),
        })
    }

    fn decode_response(
        &self,
        encoded: &str,
        request_id: &str,
    ) -> Result<SamlAssertion, AuthError> {
        // With IdP signing certs, samael rejects responses lacking a valid signature.
        let assertion = self
            .provider
            .parse_base64_response(encoded, Some(&[request_id]))
            .map_err(|e| {
                tracing::debug!("SAML response rejected: {}", e);
                AuthError::AssertionInvalid
            })?;
        Ok(to_assertion(assertion, self.signature_verified))
    }

    fn single_logout_url(&self) -> Option<String> {
        self.slo_url.clone()
    }
}

fn to_assertion(assertion: Assertion, signature_verified: bool) -> SamlAssertion {
    let name_id = assertion
        .subject
        .as_ref()
        .and_then(|s| s.name_id.as_ref())
        .map(|n| n.value.clone());

    let (not_before, not_on_or_after, audiences) = match &assertion.conditions {
        Some(conditions) => (
            conditions.not_before.map(|t| t.timestamp().max(0) as u64),
            conditions.not_on_or_after.map(|t| t.timestamp().max(0) as u64),
            conditions
                .audience_restrictions
                .iter()
                .flatten()
                .flat_map(|r| r.audience.iter().cloned())
                .collect(),
        ),
        None => (None, None, Vec::new()),
    };

    let mut attributes: HashMap<String, Vec<String>> = HashMap::new();
    for statement in assertion.attribute_statements.iter().flatten() {
        for attribute in &statement.attributes {
            let values = attribute
                .values
                .iter()
                .filter_map(|v| v.value.clone())
                .collect::<Vec<_>>();
            // Reachable by either name or friendly name.
            for name in [&attribute.name, &attribute.friendly_name].into_iter().flatten() {
                attributes
                    .entry(name.clone())
                    .or_default()
                    .extend(values.iter().cloned());
            }
        }
    }

    SamlAssertion {
        name_id,
        issuer: assertion.issuer.value.clone(),
        audiences,
        not_before,
        not_on_or_after,
        signature_verified,
        attributes,
    }
}

async fn read_metadata(location: &str) -> Result<String, ConfigError> {
    let load_error = |reason: String| ConfigError::Load {
        option: "saml-idp-metadata-location",
        location: location.to_string(),
        reason,
    };

    if location.starts_with("http://") || location.starts_with("https://") {
        let response = reqwest::get(location)
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| load_error(e.to_string()))?;
        response.text().await.map_err(|e| load_error(e.to_string()))
    } else {
        tokio::fs::read_to_string(location)
            .await
            .map_err(|e| load_error(e.to_string()))
    }
}

fn read_keystore(keystore: &KeystoreSettings) -> Result<(PKey<Private>, X509), ConfigError> {
    let load_error = |reason: String| ConfigError::Load {
        option: "saml-keystore-location",
        location: keystore.location.display().to_string(),
        reason,
    };

    let der = std::fs::read(&keystore.location).map_err(|e| load_error(e.to_string()))?;
    let parsed = Pkcs12::from_der(&der)
        .and_then(|p| p.parse2(&keystore.password))
        .map_err(|e| load_error(e.to_string()))?;

    let key = parsed
        .pkey
        .ok_or_else(|| load_error("keystore has no private key".to_string()))?;
    let certificate = parsed
        .cert
        .ok_or_else(|| load_error("keystore has no certificate".to_string()))?;

    match certificate.alias() {
        Some(alias) if alias != keystore.key_alias.as_bytes() => {
            return Err(ConfigError::invalid(
                "saml-key-alias",
                format!(
                    "keystore entry is `{}`, not `{}`",
                    String::from_utf8_lossy(alias),
                    keystore.key_alias
                ),
            ));
        }
        Some(_) => {}
        None => tracing::warn!("keystore entry has no alias; using its only key"),
    }

    Ok((key, certificate))
}
