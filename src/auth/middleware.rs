//! Security filter middleware.

use super::{ChainOutcome, SecurityChain};
use crate::Error;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

/// Security filter middleware.
///
/// Runs the [`SecurityChain`] for every request, including unmatched paths:
/// - mode none and authorized requests proceed with a `SecurityContext` extension
/// - public paths proceed without one
/// - missing or invalid credentials are answered with 401, denied studies with 403
pub async fn security_filter(
    State(chain): State<Arc<SecurityChain>>,
    request: Request,
    next: Next,
) -> Response {
    // The body is not Sync; only borrow the parts across the await.
    let (parts, body) = request.into_parts();
    let outcome = chain.evaluate(parts.uri.path(), &parts.headers).await;
    let mut request = Request::from_parts(parts, body);

    match outcome {
        ChainOutcome::Permitted(context) | ChainOutcome::Authorized(context) => {
            request.extensions_mut().insert(context);
            next.run(request).await
        }
        ChainOutcome::Public => next.run(request).await,
        ChainOutcome::Forbidden => Error::PermissionDenied.into_response(),
        ChainOutcome::Rejected(e) => Error::from(e).into_response(),
    }
}
