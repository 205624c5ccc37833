//! The authenticated principal of a single request.

use crate::error::AuthError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Claim name to value(s), as carried by a token or mapped from a SAML assertion.
pub type Claims = serde_json::Map<String, Value>;

/// Subject plus claims, produced once per request by the active validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    subject: String,
    claims: Claims,
}

impl Identity {
    pub fn new(subject: impl Into<String>, claims: Claims) -> Self {
        Self {
            subject: subject.into(),
            claims,
        }
    }

    /// Build an identity from validated token claims; `sub` is mandatory.
    pub fn from_claims(claims: Claims) -> Result<Self, AuthError> {
        let subject = claims
            .get("sub")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                tracing::debug!("token has no subject");
                AuthError::MalformedToken
            })?
            .to_string();
        Ok(Self { subject, claims })
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    pub fn email(&self) -> Option<&str> {
        self.claim("email").and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims(value: Value) -> Claims {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_from_claims_requires_subject() {
        assert_eq!(
            Identity::from_claims(claims(json!({"name": "John"}))),
            Err(AuthError::MalformedToken)
        );
        assert_eq!(
            Identity::from_claims(claims(json!({"sub": ""}))),
            Err(AuthError::MalformedToken)
        );
    }

    #[test]
    fn test_email_claim() {
        let identity =
            Identity::from_claims(claims(json!({"sub": "42", "email": "jd@example.org"}))).unwrap();
        assert_eq!(identity.subject(), "42");
        assert_eq!(identity.email(), Some("jd@example.org"));
    }
}
