//! HMAC-signed session tokens for the SAML login flow.
//!
//! After a verified assertion the identity is handed back to the browser as a
//! signed, expiring cookie value, so no server-side session store is needed.
//! Token layout: `base64url(json payload) "." base64url(hmac-sha256)`.

use super::identity::Identity;
use crate::error::AuthError;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "portal_session";

#[derive(Serialize, Deserialize)]
struct SessionPayload {
    identity: Identity,
    expires: u64,
}

/// Session signer using HMAC-SHA256.
#[derive(Clone)]
pub struct SessionSigner {
    secret: Vec<u8>,
    max_age_secs: u64,
}

impl SessionSigner {
    /// Create a new session signer.
    ///
    /// # Arguments
    /// * `secret` - HMAC secret key
    /// * `max_age_secs` - How long a session is valid (seconds)
    pub fn new(secret: impl Into<Vec<u8>>, max_age_secs: u64) -> Self {
        Self {
            secret: secret.into(),
            max_age_secs,
        }
    }

    pub fn max_age_secs(&self) -> u64 {
        self.max_age_secs
    }

    /// Generate a random secret key.
    pub fn generate_secret() -> Vec<u8> {
        random_bytes(32)
    }

    /// Issue a session token for `identity`, valid from `now`.
    pub fn issue(&self, identity: &Identity, now: u64) -> Result<String, AuthError> {
        let payload = SessionPayload {
            identity: identity.clone(),
            expires: now.saturating_add(self.max_age_secs),
        };
        let json = serde_json::to_vec(&payload).map_err(|_| AuthError::AssertionInvalid)?;
        let body = URL_SAFE_NO_PAD.encode(json);
        let signature = URL_SAFE_NO_PAD.encode(self.mac(body.as_bytes()).finalize().into_bytes());
        Ok(format!("{}.{}", body, signature))
    }

    /// Verify a session token at time `now`.
    pub fn verify(&self, token: &str, now: u64) -> Result<Identity, AuthError> {
        let (body, signature) = token.split_once('.').ok_or(AuthError::MalformedToken)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| AuthError::MalformedToken)?;

        self.mac(body.as_bytes())
            .verify_slice(&signature)
            .map_err(|_| {
                tracing::debug!("invalid session signature");
                AuthError::SignatureInvalid
            })?;

        let json = URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|_| AuthError::MalformedToken)?;
        let payload: SessionPayload =
            serde_json::from_slice(&json).map_err(|_| AuthError::MalformedToken)?;

        if now >= payload.expires {
            tracing::debug!("session expired: now={}, expires={}", now, payload.expires);
            return Err(AuthError::Expired);
        }
        Ok(payload.identity)
    }

    fn mac(&self, message: &[u8]) -> HmacSha256 {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC can take key of any size");
        mac.update(message);
        mac
    }
}

/// Bytes from the operating system CSPRNG.
pub(crate) fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn identity() -> Identity {
        Identity::new(
            "jd@example.org",
            json!({"email": "jd@example.org"}).as_object().cloned().unwrap(),
        )
    }

    #[test]
    fn test_issue_and_verify() {
        let signer = SessionSigner::new(b"test-secret".to_vec(), 3600);
        let token = signer.issue(&identity(), 1000).unwrap();
        assert_eq!(signer.verify(&token, 1001).unwrap(), identity());
    }

    #[test]
    fn test_expired_session() {
        let signer = SessionSigner::new(b"test-secret".to_vec(), 60);
        let token = signer.issue(&identity(), 1000).unwrap();
        assert!(signer.verify(&token, 1059).is_ok());
        assert_eq!(signer.verify(&token, 1060), Err(AuthError::Expired));
    }

    #[test]
    fn test_wrong_secret() {
        let token = SessionSigner::new(b"a".to_vec(), 60)
            .issue(&identity(), 0)
            .unwrap();
        let other = SessionSigner::new(b"b".to_vec(), 60);
        assert_eq!(other.verify(&token, 1), Err(AuthError::SignatureInvalid));
    }

    #[test]
    fn test_tampered_payload() {
        let signer = SessionSigner::new(b"test-secret".to_vec(), 3600);
        let token = signer.issue(&identity(), 0).unwrap();
        let (_, sig) = token.split_once('.').unwrap();
        let forged = URL_SAFE_NO_PAD.encode(
            json!({"identity": {"subject": "admin", "claims": {}}, "expires": u64::MAX})
                .to_string(),
        );
        assert_eq!(
            signer.verify(&format!("{}.{}", forged, sig), 1),
            Err(AuthError::SignatureInvalid)
        );
    }

    #[test]
    fn test_garbage_token() {
        let signer = SessionSigner::new(b"test-secret".to_vec(), 3600);
        assert_eq!(signer.verify("garbage", 0), Err(AuthError::MalformedToken));
    }

    #[test]
    fn test_generate_secret() {
        let secret1 = SessionSigner::generate_secret();
        let secret2 = SessionSigner::generate_secret();

        assert_eq!(secret1.len(), 32);
        assert_ne!(secret1, secret2);
    }

    #[test]
    fn test_random_bytes_are_fresh() {
        let tokens: std::collections::HashSet<Vec<u8>> = (0..64).map(|_| random_bytes(24)).collect();
        assert_eq!(tokens.len(), 64);
        assert!(tokens.iter().all(|t| t.len() == 24 && t.iter().any(|b| *b != 0)));
        assert!(random_bytes(0).is_empty());
    }
}
