//! Browser endpoints of the SAML login flow.

use super::AppState;
use crate::auth::SamlAuthenticator;
use crate::auth::session::SESSION_COOKIE;
use crate::error::ErrorBody;
use crate::{Error, Result};
use axum::{
    Form, Json,
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;

pub const LOGIN_ERROR_PATH: &str = "/login-error";

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    /// Local path to return to after login.
    pub redirect: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AcsForm {
    #[serde(rename = "SAMLResponse")]
    pub saml_response: String,
    #[serde(rename = "RelayState")]
    pub relay_state: Option<String>,
}

fn authenticator(state: &AppState) -> Result<&SamlAuthenticator> {
    state
        .security
        .saml()
        .ok_or_else(|| Error::Internal("SAML route without SAML mode".to_string()))
}

/// Redirect the browser to the IdP.
pub async fn saml_login(
    State(state): State<AppState>,
    Query(query): Query<LoginQuery>,
) -> Result<Response> {
    let url = authenticator(&state)?
        .begin_login(query.redirect.as_deref())
        .await?;
    Ok(Redirect::to(&url).into_response())
}

/// Assertion consumer service: the IdP posts the SAML response here.
pub async fn saml_acs(State(state): State<AppState>, Form(form): Form<AcsForm>) -> Result<Response> {
    let saml = authenticator(&state)?;
    match saml
        .complete_login(&form.saml_response, form.relay_state.as_deref())
        .await
    {
        Ok((session, return_to)) => {
            let cookie = session_cookie(
                &session,
                saml.sessions().max_age_secs(),
                state.secure_cookies,
            );
            Ok(([(header::SET_COOKIE, cookie)], Redirect::to(&return_to)).into_response())
        }
        Err(e) => {
            tracing::warn!("SAML login failed: {}", e);
            Ok(Redirect::to(LOGIN_ERROR_PATH).into_response())
        }
    }
}

/// Drop the local session, then continue at the IdP or the configured URL.
pub async fn saml_logout(State(state): State<AppState>) -> Result<Response> {
    let target = authenticator(&state)?.logout_target();
    let cookie = session_cookie("", 0, state.secure_cookies);
    Ok(([(header::SET_COOKIE, cookie)], Redirect::to(&target)).into_response())
}

pub async fn login_error() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorBody {
            error: "LoginFailed",
            message: "SAML login failed".to_string(),
        }),
    )
        .into_response()
}

fn session_cookie(value: &str, max_age_secs: u64, secure: bool) -> String {
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}{}",
        SESSION_COOKIE,
        value,
        max_age_secs,
        if secure { "; Secure" } else { "" }
    )
}
