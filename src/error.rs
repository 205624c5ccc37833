use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid authentication: {0}")]
    InvalidAuthentication(#[from] AuthError),

    #[error("permission denied")]
    PermissionDenied,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Request-level authentication failures.
///
/// Messages name the failure kind only; they never echo claim contents.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("no credentials supplied")]
    MissingCredentials,

    #[error("malformed token")]
    MalformedToken,

    #[error("token signature invalid")]
    SignatureInvalid,

    #[error("token expired")]
    Expired,

    #[error("token issuer mismatch")]
    IssuerMismatch,

    #[error("token audience mismatch")]
    AudienceMismatch,

    #[error("identity provider keys unavailable")]
    KeyFetchFailed,

    #[error("token exchange rejected")]
    ExchangeRejected,

    #[error("SAML assertion invalid")]
    AssertionInvalid,

    #[error("role lookup failed")]
    RoleLookupFailed,
}

impl AuthError {
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::MissingCredentials => "MissingCredentials",
            AuthError::MalformedToken => "MalformedToken",
            AuthError::SignatureInvalid => "SignatureInvalid",
            AuthError::Expired => "Expired",
            AuthError::IssuerMismatch => "IssuerMismatch",
            AuthError::AudienceMismatch => "AudienceMismatch",
            AuthError::KeyFetchFailed => "KeyFetchFailed",
            AuthError::ExchangeRejected => "ExchangeRejected",
            AuthError::AssertionInvalid => "AssertionInvalid",
            AuthError::RoleLookupFailed => "RoleLookupFailed",
        }
    }
}

/// Fatal startup errors. Never produced while serving requests.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting `{0}`")]
    Missing(&'static str),

    #[error("invalid value for `{option}`: {reason}")]
    Invalid { option: &'static str, reason: String },

    #[error("failed to load `{option}` from {location}: {reason}")]
    Load {
        option: &'static str,
        location: String,
        reason: String,
    },
}

impl ConfigError {
    pub fn invalid(option: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            option,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

impl Error {
    fn error_type(&self) -> &'static str {
        match self {
            Error::InvalidAuthentication(AuthError::RoleLookupFailed) => "InternalError",
            Error::InvalidAuthentication(e) => e.kind(),
            Error::PermissionDenied => "Forbidden",
            Error::NotFound(_) => "NotFound",
            Error::InvalidInput(_) => "InvalidInput",
            Error::Io(_) | Error::Internal(_) => "InternalError",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidAuthentication(AuthError::RoleLookupFailed) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Error::InvalidAuthentication(_) => StatusCode::UNAUTHORIZED,
            Error::PermissionDenied => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::Io(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn public_message(&self) -> String {
        match self {
            Error::Io(_) | Error::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        if let Error::Io(_) | Error::Internal(_) = self {
            tracing::error!("request failed: {}", self);
        }
        let body = ErrorBody {
            error: self.error_type(),
            message: self.public_message(),
        };
        (self.status_code(), axum::Json(body)).into_response()
    }
}
