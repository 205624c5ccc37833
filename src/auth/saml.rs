//! SAML relying-party flow.
//!
//! XML parsing and signature checking belong to a [`SamlBinding`]; this module
//! enforces policy on the decoded assertion (signature requirement, validity
//! window, audience), maps attributes to claims, correlates the IdP callback
//! with the login that started it, and issues the session cookie.

use super::identity::{Claims, Identity};
use super::session::{SESSION_COOKIE, SessionSigner, random_bytes};
use super::unix_now;
use crate::error::{AuthError, ConfigError};
use axum::http::HeaderMap;
use axum_extra::extract::cookie::CookieJar;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use moka::future::Cache;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Lifetime of a pending login's correlation token.
pub const CORRELATION_TTL: Duration = Duration::from_secs(300);

/// Assertion contents as reported by a binding, before policy checks.
#[derive(Debug, Clone, Default)]
pub struct SamlAssertion {
    pub name_id: Option<String>,
    pub issuer: Option<String>,
    pub audiences: Vec<String>,
    /// Unix seconds.
    pub not_before: Option<u64>,
    /// Unix seconds.
    pub not_on_or_after: Option<u64>,
    /// The binding verified an XML signature over the assertion.
    pub signature_verified: bool,
    pub attributes: HashMap<String, Vec<String>>,
}

/// Where to send the browser to start a login.
#[derive(Debug, Clone)]
pub struct LoginRedirect {
    /// Id of the AuthnRequest, echoed back as `InResponseTo`.
    pub request_id: String,
    pub url: String,
}

/// Protocol plumbing supplied by a SAML library.
pub trait SamlBinding: Send + Sync {
    fn login_redirect(&self, relay_state: &str) -> Result<LoginRedirect, AuthError>;

    /// Decode a base64 `SAMLResponse` answering `request_id`.
    fn decode_response(&self, encoded: &str, request_id: &str)
    -> Result<SamlAssertion, AuthError>;

    /// IdP single-logout endpoint, if the IdP advertises one.
    fn single_logout_url(&self) -> Option<String> {
        None
    }
}

/// Whether assertions must carry a verified signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignaturePolicy {
    Required,
    /// Accept unsigned assertions. Test builds only.
    #[cfg(any(test, feature = "insecure-saml"))]
    Unverified,
}

impl SignaturePolicy {
    /// Whether decoded responses will carry a checked signature, given if the
    /// IdP metadata lists signing certificates.
    pub fn verifies_with(self, idp_signing_certs: bool) -> Result<bool, ConfigError> {
        match (self, idp_signing_certs) {
            (_, true) => Ok(true),
            (SignaturePolicy::Required, false) => Err(ConfigError::invalid(
                "saml-idp-metadata-location",
                "IdP metadata has no signing certificate to verify assertions with",
            )),
            #[cfg(any(test, feature = "insecure-saml"))]
            (SignaturePolicy::Unverified, false) => {
                tracing::warn!("IdP metadata has no signing certificate; assertions are unverified");
                Ok(false)
            }
        }
    }
}

/// Policy checks and attribute mapping for decoded assertions.
#[derive(Debug, Clone)]
pub struct AssertionValidator {
    pub entity_id: String,
    pub signature: SignaturePolicy,
    /// Tolerance for the validity window, in seconds.
    pub clock_skew: u64,
    /// Attribute carrying the user's email (claim `email`).
    pub email_attribute: String,
    /// Further attribute name to claim name mappings.
    pub attribute_claims: Vec<(String, String)>,
}

impl AssertionValidator {
    pub fn validate_at(&self, assertion: &SamlAssertion, now: u64) -> Result<Identity, AuthError> {
        let invalid = |reason: &str| {
            tracing::debug!("rejecting SAML assertion: {}", reason);
            AuthError::AssertionInvalid
        };

        if self.signature == SignaturePolicy::Required && !assertion.signature_verified {
            return Err(invalid("missing verified signature"));
        }

        if let Some(not_before) = assertion.not_before {
            if now.saturating_add(self.clock_skew) < not_before {
                return Err(invalid("not yet valid"));
            }
        }
        match assertion.not_on_or_after {
            Some(end) if now >= end.saturating_add(self.clock_skew) => {
                return Err(invalid("expired"));
            }
            Some(_) => {}
            None => return Err(invalid("no validity window")),
        }

        if !assertion.audiences.is_empty()
            && !assertion.audiences.iter().any(|a| *a == self.entity_id)
        {
            return Err(invalid("audience mismatch"));
        }

        let mut claims = Claims::new();
        if let Some(email) = single_value(assertion, &self.email_attribute) {
            claims.insert("email".to_string(), Value::String(email.to_string()));
        }
        for (attribute, claim) in &self.attribute_claims {
            if let Some(values) = assertion.attributes.get(attribute) {
                // A list even for a single value.
                let values = values.iter().cloned().map(Value::String).collect();
                claims.insert(claim.clone(), Value::Array(values));
            }
        }

        let subject = assertion
            .name_id
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| claims.get("email").and_then(Value::as_str).map(str::to_string))
            .ok_or_else(|| invalid("no subject"))?;
        claims.insert("sub".to_string(), Value::String(subject.clone()));
        if let Some(issuer) = &assertion.issuer {
            claims.insert("iss".to_string(), Value::String(issuer.clone()));
        }

        Ok(Identity::new(subject, claims))
    }
}

fn single_value<'a>(assertion: &'a SamlAssertion, attribute: &str) -> Option<&'a str> {
    assertion
        .attributes
        .get(attribute)
        .and_then(|v| v.first())
        .map(String::as_str)
        .filter(|s| !s.is_empty())
}

/// A login waiting for the IdP callback.
#[derive(Debug, Clone)]
pub struct PendingLogin {
    pub request_id: String,
    pub return_to: String,
}

/// Short-lived, single-use relay-state tokens.
#[derive(Clone)]
pub struct CorrelationStore {
    pending: Cache<String, PendingLogin>,
}

impl CorrelationStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            pending: Cache::builder()
                .time_to_live(ttl)
                .max_capacity(100_000)
                .build(),
        }
    }

    pub fn new_token() -> String {
        URL_SAFE_NO_PAD.encode(random_bytes(24))
    }

    pub async fn insert(&self, token: String, login: PendingLogin) {
        self.pending.insert(token, login).await;
    }

    /// Consume a token; a second call with the same token finds nothing.
    pub async fn take(&self, token: &str) -> Option<PendingLogin> {
        self.pending.remove(token).await
    }
}

/// Post-logout behaviour.
#[derive(Debug, Clone)]
pub struct LogoutSettings {
    /// Only drop the local session, never redirect to the IdP.
    pub local: bool,
    pub url: String,
}

/// The SAML-mode validator chain.
pub struct SamlAuthenticator {
    binding: Arc<dyn SamlBinding>,
    validator: AssertionValidator,
    correlations: CorrelationStore,
    sessions: SessionSigner,
    logout: LogoutSettings,
}

impl SamlAuthenticator {
    pub fn new(
        binding: Arc<dyn SamlBinding>,
        validator: AssertionValidator,
        sessions: SessionSigner,
        logout: LogoutSettings,
    ) -> Self {
        Self {
            binding,
            validator,
            correlations: CorrelationStore::new(CORRELATION_TTL),
            sessions,
            logout,
        }
    }

    pub fn sessions(&self) -> &SessionSigner {
        &self.sessions
    }

    /// Start a login; returns the IdP URL to redirect the browser to.
    pub async fn begin_login(&self, return_to: Option<&str>) -> Result<String, AuthError> {
        let token = CorrelationStore::new_token();
        let redirect = self.binding.login_redirect(&token)?;
        self.correlations
            .insert(
                token,
                PendingLogin {
                    request_id: redirect.request_id,
                    return_to: local_return_path(return_to),
                },
            )
            .await;
        Ok(redirect.url)
    }

    /// Finish a login from the IdP callback; returns the session token and
    /// the local path to continue at.
    pub async fn complete_login(
        &self,
        saml_response: &str,
        relay_state: Option<&str>,
    ) -> Result<(String, String), AuthError> {
        let relay_state = relay_state.ok_or_else(|| {
            tracing::debug!("SAML callback without relay state");
            AuthError::AssertionInvalid
        })?;
        let pending = self.correlations.take(relay_state).await.ok_or_else(|| {
            tracing::debug!("unknown, expired or replayed relay state");
            AuthError::AssertionInvalid
        })?;

        let assertion = self
            .binding
            .decode_response(saml_response, &pending.request_id)?;
        let now = unix_now();
        let identity = self.validator.validate_at(&assertion, now)?;
        tracing::info!("SAML login for {}", identity.subject());

        let session = self.sessions.issue(&identity, now)?;
        Ok((session, pending.return_to))
    }

    /// Authenticate a request by its session cookie.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<Identity, AuthError> {
        let jar = CookieJar::from_headers(headers);
        let cookie = jar
            .get(SESSION_COOKIE)
            .ok_or(AuthError::MissingCredentials)?;
        self.sessions.verify(cookie.value(), unix_now())
    }

    /// Where to send the browser after dropping the local session.
    pub fn logout_target(&self) -> String {
        if !self.logout.local {
            if let Some(url) = self.binding.single_logout_url() {
                return url;
            }
        }
        self.logout.url.clone()
    }
}

/// Accept only same-site absolute paths as post-login destinations.
fn local_return_path(requested: Option<&str>) -> String {
    match requested {
        Some(p) if p.starts_with('/') && !p.starts_with("//") && !p.contains('\\') => {
            p.to_string()
        }
        _ => "/".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn validator() -> AssertionValidator {
        AssertionValidator {
            entity_id: "cbioportal".to_string(),
            signature: SignaturePolicy::Required,
            clock_skew: 0,
            email_attribute: "User.email".to_string(),
            attribute_claims: vec![("Role".to_string(), "roles".to_string())],
        }
    }

    fn assertion() -> SamlAssertion {
        SamlAssertion {
            name_id: None,
            issuer: Some("idp".to_string()),
            audiences: vec!["cbioportal".to_string()],
            not_before: Some(100),
            not_on_or_after: Some(200),
            signature_verified: true,
            attributes: HashMap::from([
                ("User.email".to_string(), vec!["jd@example.org".to_string()]),
                (
                    "Role".to_string(),
                    vec!["study_a".to_string(), "study_b".to_string()],
                ),
            ]),
        }
    }

    #[test]
    fn test_valid_assertion_maps_attributes() {
        let identity = validator().validate_at(&assertion(), 150).unwrap();
        assert_eq!(identity.subject(), "jd@example.org");
        assert_eq!(identity.email(), Some("jd@example.org"));
        assert_eq!(
            identity.claim("roles").unwrap(),
            &serde_json::json!(["study_a", "study_b"])
        );
    }

    #[tokio::test]
    async fn test_single_valued_role_grants_access() {
        use crate::auth::claims::{ClaimMapper, ClaimPath, RoleSource};
        use crate::auth::policy::PermissionSet;

        let mut a = assertion();
        a.attributes
            .insert("Role".to_string(), vec!["study_a".to_string()]);
        let identity = validator().validate_at(&a, 150).unwrap();
        assert_eq!(
            identity.claim("roles").unwrap(),
            &serde_json::json!(["study_a"])
        );

        let mapper = ClaimMapper::new(RoleSource::ClaimPath(ClaimPath::parse("roles").unwrap()));
        assert_eq!(
            mapper.permissions(&identity).await.unwrap(),
            PermissionSet::new(["study_a"])
        );
    }

    #[test]
    fn test_unsigned_assertion_rejected_when_required() {
        let mut a = assertion();
        a.signature_verified = false;
        assert_eq!(
            validator().validate_at(&a, 150),
            Err(AuthError::AssertionInvalid)
        );
    }

    #[test]
    fn test_unsigned_assertion_allowed_when_unverified() {
        let mut a = assertion();
        a.signature_verified = false;
        let mut v = validator();
        v.signature = SignaturePolicy::Unverified;
        assert!(v.validate_at(&a, 150).is_ok());
    }

    #[test]
    fn test_required_signature_needs_idp_certificates() {
        assert!(SignaturePolicy::Required.verifies_with(true).unwrap());
        assert!(matches!(
            SignaturePolicy::Required.verifies_with(false),
            Err(ConfigError::Invalid {
                option: "saml-idp-metadata-location",
                ..
            })
        ));
        assert!(!SignaturePolicy::Unverified.verifies_with(false).unwrap());
    }

    #[test]
    fn test_validity_window() {
        let v = validator();
        assert!(v.validate_at(&assertion(), 99).is_err());
        assert!(v.validate_at(&assertion(), 100).is_ok());
        assert!(v.validate_at(&assertion(), 199).is_ok());
        assert!(v.validate_at(&assertion(), 200).is_err());

        let mut open_ended = assertion();
        open_ended.not_on_or_after = None;
        assert!(v.validate_at(&open_ended, 150).is_err());
    }

    #[test]
    fn test_audience_mismatch() {
        let mut a = assertion();
        a.audiences = vec!["someone-else".to_string()];
        assert!(validator().validate_at(&a, 150).is_err());
    }

    #[test]
    fn test_no_subject() {
        let mut a = assertion();
        a.attributes.clear();
        assert!(validator().validate_at(&a, 150).is_err());
    }

    #[test]
    fn test_local_return_path() {
        assert_eq!(local_return_path(Some("/api/studies")), "/api/studies");
        assert_eq!(local_return_path(Some("//evil.example")), "/");
        assert_eq!(local_return_path(Some("https://evil.example")), "/");
        assert_eq!(local_return_path(None), "/");
    }

    /// Binding that accepts any response for the last issued request id.
    struct FakeBinding {
        issued: Mutex<Vec<String>>,
    }

    impl SamlBinding for FakeBinding {
        fn login_redirect(&self, relay_state: &str) -> Result<LoginRedirect, AuthError> {
            let id = format!("req-{}", self.issued.lock().unwrap().len());
            self.issued.lock().unwrap().push(id.clone());
            Ok(LoginRedirect {
                request_id: id,
                url: format!("https://idp.example/sso?RelayState={}", relay_state),
            })
        }

        fn decode_response(
            &self,
            encoded: &str,
            request_id: &str,
        ) -> Result<SamlAssertion, AuthError> {
            if encoded != request_id {
                return Err(AuthError::AssertionInvalid);
            }
            let now = unix_now();
            Ok(SamlAssertion {
                not_before: Some(now - 10),
                not_on_or_after: Some(now + 300),
                ..assertion()
            })
        }
    }

    fn authenticator() -> SamlAuthenticator {
        SamlAuthenticator::new(
            Arc::new(FakeBinding {
                issued: Mutex::new(Vec::new()),
            }),
            validator(),
            SessionSigner::new(b"secret".to_vec(), 3600),
            LogoutSettings {
                local: false,
                url: "/".to_string(),
            },
        )
    }

    fn relay_state(url: &str) -> String {
        url.split("RelayState=").nth(1).unwrap().to_string()
    }

    #[tokio::test]
    async fn test_login_round_trip_and_replay() {
        let auth = authenticator();
        let url = auth.begin_login(Some("/api/studies")).await.unwrap();
        let state = relay_state(&url);

        let (session, return_to) = auth.complete_login("req-0", Some(&state)).await.unwrap();
        assert_eq!(return_to, "/api/studies");
        let identity = auth.sessions().verify(&session, unix_now()).unwrap();
        assert_eq!(identity.subject(), "jd@example.org");

        // Relay state is single use.
        assert_eq!(
            auth.complete_login("req-0", Some(&state)).await,
            Err(AuthError::AssertionInvalid)
        );
    }

    #[tokio::test]
    async fn test_callback_without_matching_login() {
        let auth = authenticator();
        assert_eq!(
            auth.complete_login("req-0", Some("forged")).await,
            Err(AuthError::AssertionInvalid)
        );
        assert_eq!(
            auth.complete_login("req-0", None).await,
            Err(AuthError::AssertionInvalid)
        );
    }

    #[tokio::test]
    async fn test_response_for_other_request_rejected() {
        let auth = authenticator();
        let url = auth.begin_login(None).await.unwrap();
        assert!(
            auth.complete_login("req-99", Some(&relay_state(&url)))
                .await
                .is_err()
        );
    }

    #[test]
    fn test_authenticate_requires_cookie() {
        let auth = authenticator();
        assert_eq!(
            auth.authenticate(&HeaderMap::new()),
            Err(AuthError::MissingCredentials)
        );
    }

    #[test]
    fn test_logout_falls_back_to_configured_url() {
        assert_eq!(authenticator().logout_target(), "/");
    }
}
