//! Axum extractor for the request's security context.

use super::SecurityContext;
use crate::Error;
use crate::error::AuthError;
use axum::{extract::FromRequestParts, http::request::Parts};

/// The security context computed by [`security_filter`](super::security_filter).
///
/// Handlers taking this extractor cannot run unless the chain has approved
/// the request; a missing context is treated as unauthenticated.
///
/// # Example
///
/// ```ignore
/// async fn protected_handler(Secured(ctx): Secured) -> impl IntoResponse {
///     format!("Hello, {:?}", ctx.identity().map(|i| i.subject()))
/// }
/// ```
pub struct Secured(pub SecurityContext);

impl<S> FromRequestParts<S> for Secured
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<SecurityContext>()
            .cloned()
            .map(Secured)
            .ok_or_else(|| {
                tracing::error!("handler reached without security context: {}", parts.uri.path());
                Error::InvalidAuthentication(AuthError::MissingCredentials)
            })
    }
}
