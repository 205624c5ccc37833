//! JWT validation logic.

use super::identity::Claims;
use crate::error::AuthError;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Header, Validation};
use serde_json::Value;

/// Asymmetric algorithms a resource server may accept.
const ACCEPTED_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
];

/// What a token must assert to be accepted.
#[derive(Debug, Clone)]
pub struct TokenExpectations {
    pub issuer: String,
    pub audience: String,
    /// Grace window for `exp`/`nbf`, in seconds.
    pub leeway: u64,
}

/// Decode a JWT header without validation to extract the key ID.
pub fn decode_header(token: &str) -> Result<Header, AuthError> {
    let header = jsonwebtoken::decode_header(token).map_err(|e| {
        tracing::debug!("failed to decode JWT header: {}", e);
        AuthError::MalformedToken
    })?;

    if !ACCEPTED_ALGORITHMS.contains(&header.alg) {
        tracing::debug!("rejecting token signed with {:?}", header.alg);
        return Err(AuthError::SignatureInvalid);
    }
    Ok(header)
}

/// Validate a JWT at time `now` (Unix seconds) and return its claims.
pub fn validate_token(
    token: &str,
    header: &Header,
    key: &DecodingKey,
    expected: &TokenExpectations,
    now: u64,
) -> Result<Claims, AuthError> {
    let mut validation = Validation::new(header.alg);
    validation.set_issuer(&[expected.issuer.as_str()]);
    validation.set_audience(&[expected.audience.as_str()]);
    // Time claims are checked below against the caller's clock.
    validation.validate_exp = false;
    validation.validate_nbf = false;
    // Issuer and audience are only compared when present, so demand them.
    validation.set_required_spec_claims(&["iss", "aud"]);
    validation.leeway = 0;

    let data = jsonwebtoken::decode::<Claims>(token, key, &validation).map_err(|e| {
        tracing::debug!("JWT validation failed: {}", e);
        match e.kind() {
            ErrorKind::InvalidSignature
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidAlgorithmName
            | ErrorKind::InvalidKeyFormat
            | ErrorKind::InvalidRsaKey(_)
            | ErrorKind::InvalidEcdsaKey => AuthError::SignatureInvalid,
            ErrorKind::ExpiredSignature | ErrorKind::ImmatureSignature => AuthError::Expired,
            ErrorKind::InvalidIssuer => AuthError::IssuerMismatch,
            ErrorKind::InvalidAudience => AuthError::AudienceMismatch,
            ErrorKind::MissingRequiredClaim(claim) if claim == "iss" => AuthError::IssuerMismatch,
            ErrorKind::MissingRequiredClaim(claim) if claim == "aud" => AuthError::AudienceMismatch,
            _ => AuthError::MalformedToken,
        }
    })?;

    check_validity_window(&data.claims, expected.leeway, now)?;
    Ok(data.claims)
}

/// A token is valid strictly before `exp`, and not before `nbf`.
pub fn check_validity_window(claims: &Claims, leeway: u64, now: u64) -> Result<(), AuthError> {
    let exp = numeric_date(claims, "exp")?.ok_or_else(|| {
        tracing::debug!("token has no exp claim");
        AuthError::MalformedToken
    })?;
    if now >= exp.saturating_add(leeway) {
        tracing::debug!("token expired: now={}, exp={}", now, exp);
        return Err(AuthError::Expired);
    }

    if let Some(nbf) = numeric_date(claims, "nbf")? {
        if now.saturating_add(leeway) < nbf {
            tracing::debug!("token not yet valid: now={}, nbf={}", now, nbf);
            return Err(AuthError::Expired);
        }
    }
    Ok(())
}

fn numeric_date(claims: &Claims, name: &str) -> Result<Option<u64>, AuthError> {
    match claims.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .map(Some)
            .ok_or(AuthError::MalformedToken),
        Some(_) => Err(AuthError::MalformedToken),
    }
}
