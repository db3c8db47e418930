//! Authentication routes for sign-in, callback, and sign-out.

use axum::{
    Router,
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
    routing::get,
};
use axum_extra::extract::PrivateCookieJar;
use chrono::Utc;
use oidc_gate_access::{
    AuthenticationError, CallbackParams, OidcClientConfig, sanitize_return_url,
};
use serde::Deserialize;

use super::AppState;
use crate::error::AuthFailure;

/// Path that starts a challenge explicitly.
pub const SIGN_IN_PATH: &str = "/signin";

/// Routes served outside the pipeline's access checks.
pub fn router(config: &OidcClientConfig) -> Router<AppState> {
    Router::new()
        .route(SIGN_IN_PATH, get(sign_in))
        .route(config.callback_path(), get(callback))
        .route(config.sign_out_path(), get(sign_out))
}

/// Query parameters for an explicit sign-in.
#[derive(Debug, Default, Deserialize)]
pub struct SignInQuery {
    #[serde(rename = "returnUrl")]
    return_url: Option<String>,
}

/// Redirects to the authority, remembering the challenge in a cookie.
pub fn challenge_response(state: &AppState, jar: PrivateCookieJar, return_url: &str) -> Response {
    let (auth_url, pending) = state.auth.oidc().challenge(return_url);
    match state.auth.cookies().store_challenge(jar, &pending) {
        Ok(jar) => (jar, Redirect::to(&auth_url)).into_response(),
        Err(e) => AuthFailure::new(e, state.environment).into_response(),
    }
}

/// Starts the OIDC flow by redirecting to the identity provider.
pub async fn sign_in(
    State(state): State<AppState>,
    Query(query): Query<SignInQuery>,
    jar: PrivateCookieJar,
) -> Response {
    let return_url = sanitize_return_url(query.return_url.as_deref()).to_string();
    challenge_response(&state, jar, &return_url)
}

/// Handles the authority's redirect back after the user authenticates.
///
/// Cookies are only written once every check has passed: the session
/// cookie is issued and the challenge cookie removed in the same response.
pub async fn callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
    jar: PrivateCookieJar,
) -> Result<Response, AuthFailure> {
    let failure = |e: AuthenticationError| AuthFailure::new(e, state.environment);

    let (code, presented_state) = params.into_code_and_state().map_err(failure)?;

    let pending = state
        .auth
        .cookies()
        .load_challenge(&jar, &presented_state)
        .ok_or_else(|| {
            failure(AuthenticationError::InvalidState {
                reason: "no pending challenge for this browser".to_string(),
            })
        })?;
    pending
        .verify_state(&presented_state, Utc::now())
        .map_err(failure)?;

    let principal = state
        .auth
        .oidc()
        .complete(&pending, code, state.auth.session())
        .await
        .map_err(failure)?;

    let jar = state.auth.cookies().issue(jar, &principal).map_err(failure)?;
    let jar = state.auth.cookies().clear_challenge(jar, pending.state());

    tracing::info!(
        flow_id = %pending.flow_id(),
        session_id = %principal.id(),
        expires_at = %principal.expires_at(),
        "session issued"
    );

    Ok((jar, Redirect::to(pending.return_url())).into_response())
}

/// Signs the user out by removing the session cookie.
pub async fn sign_out(State(state): State<AppState>, jar: PrivateCookieJar) -> impl IntoResponse {
    if let Some(principal) = state.auth.cookies().validate(&jar) {
        tracing::info!(session_id = %principal.id(), "session signed out");
    }
    (state.auth.cookies().sign_out(jar), Redirect::to("/"))
}
