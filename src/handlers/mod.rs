mod info;
mod saml;
mod studies;

pub use info::portal_info;
pub use saml::{login_error, saml_acs, saml_login, saml_logout};
pub use studies::{get_study, list_studies};

use crate::auth::{SecurityChain, security_filter};
use crate::config::{AuthenticationMode, SecuritySettings};
use crate::store::StudyStore;
use crate::Error;
use axum::{
    Router,
    http::Uri,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use std::sync::Arc;
use url::Url;
use tower_http::trace::TraceLayer;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn StudyStore>,
    pub security: Arc<SecurityChain>,
    /// Advertised by `/api/info` in OAuth2 mode.
    pub authorization_uri: Option<String>,
    /// Advertised by `/api/info` in OAuth2 mode.
    pub redirect_uri: Option<String>,
    /// Mark session cookies `Secure` (HTTPS deployments).
    pub secure_cookies: bool,
}

impl AppState {
    pub fn new(
        store: Arc<dyn StudyStore>,
        security: Arc<SecurityChain>,
        settings: &SecuritySettings,
        secure_cookies: bool,
    ) -> Self {
        let (authorization_uri, redirect_uri) = match &settings.mode {
            AuthenticationMode::OAuth2(oauth2) => (
                oauth2.authorization_uri.as_ref().map(Url::to_string),
                oauth2.redirect_uri.as_ref().map(Url::to_string),
            ),
            _ => (None, None),
        };
        Self {
            store,
            security,
            authorization_uri,
            redirect_uri,
            secure_cookies,
        }
    }
}

/// Create the application router with all routes.
///
/// The security filter wraps every route and the fallback, so unknown paths
/// are authenticated like any other.
pub fn create_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/api/info", get(portal_info))
        .route("/api/studies", get(list_studies))
        .route("/api/studies/{studyId}", get(get_study));

    if state.security.saml().is_some() {
        router = router
            .route("/saml/login", get(saml_login))
            .route("/saml/acs", post(saml_acs))
            .route("/saml/logout", post(saml_logout))
            .route(saml::LOGIN_ERROR_PATH, get(login_error));
    }

    router
        .fallback(not_found)
        .layer(from_fn_with_state(state.security.clone(), security_filter))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn not_found(uri: Uri) -> Error {
    Error::NotFound(uri.path().to_string())
}
