use super::AppState;
use crate::types::PortalInfo;
use axum::{Json, extract::State};

pub async fn portal_info(State(state): State<AppState>) -> Json<PortalInfo> {
    Json(PortalInfo {
        name: "portal-guard".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        authenticate: state.security.mode(),
        authorization_uri: state.authorization_uri.clone(),
        redirect_uri: state.redirect_uri.clone(),
        login_uri: state.security.saml().map(|_| "/saml/login".to_string()),
    })
}
