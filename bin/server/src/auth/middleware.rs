//! Authentication and authorization middleware and extractors for Axum.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::PrivateCookieJar;
use oidc_gate_access::{Decision, SessionPrincipal};
use std::sync::Arc;

use super::AppState;
use super::routes::{SIGN_IN_PATH, challenge_response};
use crate::error;
use crate::pipeline::ResolvedEndpoint;

/// The principal the authentication stage resolved, if any.
///
/// Present on every request that passed the authentication stage.
#[derive(Debug, Clone)]
pub struct CurrentPrincipal(pub Option<Arc<SessionPrincipal>>);

/// Authentication stage: resolves the session cookie into a principal.
pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let jar = PrivateCookieJar::from_headers(request.headers(), state.cookie_key.clone());
    let principal = state.auth.cookies().validate(&jar).map(Arc::new);
    if let Some(principal) = &principal {
        tracing::debug!(session_id = %principal.id(), "session authenticated");
    }
    request.extensions_mut().insert(CurrentPrincipal(principal));
    next.run(request).await
}

/// Authorization stage: applies the endpoint's access requirement.
///
/// Fails closed when the earlier stages left nothing to decide on.
pub async fn authorize(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(endpoint) = request.extensions().get::<ResolvedEndpoint>().cloned() else {
        return error::pipeline_fault("no route values recorded before authorization");
    };
    let Some(CurrentPrincipal(principal)) = request.extensions().get::<CurrentPrincipal>().cloned()
    else {
        return error::pipeline_fault("authentication did not run before authorization");
    };

    match endpoint.access.evaluate(principal.as_deref()) {
        Decision::Allow => next.run(request).await,
        Decision::Challenge => {
            let return_url = request
                .uri()
                .path_and_query()
                .map_or("/", |pq| pq.as_str())
                .to_string();
            tracing::debug!(
                controller = %endpoint.values.controller,
                action = %endpoint.values.action,
                "no session, challenging"
            );
            let jar = PrivateCookieJar::from_headers(request.headers(), state.cookie_key.clone());
            challenge_response(&state, jar, &return_url)
        }
        Decision::Forbid => {
            tracing::info!(
                controller = %endpoint.values.controller,
                action = %endpoint.values.action,
                requirement = %endpoint.access,
                "access denied"
            );
            error::forbidden()
        }
    }
}

/// Extractor for requiring an authenticated principal.
///
/// Endpoints mapped with `Access::Authenticated` always have one; elsewhere
/// the extractor redirects to sign-in.
pub struct RequireAuth(pub Arc<SessionPrincipal>);

impl<S> FromRequestParts<S> for RequireAuth
where
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.extensions.get::<CurrentPrincipal>() {
            Some(CurrentPrincipal(Some(principal))) => Ok(RequireAuth(Arc::clone(principal))),
            Some(CurrentPrincipal(None)) => Err(AuthRejection::NotAuthenticated {
                return_url: parts
                    .uri
                    .path_and_query()
                    .map_or("/", |pq| pq.as_str())
                    .to_string(),
            }),
            None => Err(AuthRejection::PipelineMisconfigured),
        }
    }
}

/// Extractor for optionally getting the authenticated principal.
///
/// Returns None if the request has no valid session.
pub struct OptionalAuth(pub Option<Arc<SessionPrincipal>>);

impl<S> FromRequestParts<S> for OptionalAuth
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(OptionalAuth(
            parts
                .extensions
                .get::<CurrentPrincipal>()
                .and_then(|current| current.0.clone()),
        ))
    }
}

/// Rejection type for authentication extractors.
#[derive(Debug)]
pub enum AuthRejection {
    /// No session; sign-in returns the caller to `return_url`.
    NotAuthenticated { return_url: String },
    PipelineMisconfigured,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        match self {
            Self::NotAuthenticated { return_url } => {
                let query = url::form_urlencoded::Serializer::new(String::new())
                    .append_pair("returnUrl", &return_url)
                    .finish();
                Redirect::to(&format!("{SIGN_IN_PATH}?{query}")).into_response()
            }
            Self::PipelineMisconfigured => {
                error::pipeline_fault("principal extractor used outside the authentication stage")
            }
        }
    }
}
