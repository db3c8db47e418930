//! oidc-gate web server.
//!
//! Wires the cookie session handler and the OIDC challenge handler into a
//! routing, authentication, authorization pipeline and serves the Home
//! controller behind it.

pub mod auth;
pub mod config;
pub mod error;
pub mod home;
pub mod pipeline;
pub mod views;

use oidc_gate_access::{AuthenticationOptions, ConfigurationError};
use rootcause::Report;
use std::sync::Arc;

use auth::{AppState, Authentication, CookieSessionHandler, JwksCache, OidcChallengeHandler};
use config::ServerConfig;
use pipeline::Pipeline;

/// Name of the convention route.
pub const DEFAULT_ROUTE_NAME: &str = "default";

/// Pattern of the convention route.
pub const DEFAULT_ROUTE_PATTERN: &str = "{controller=Home}/{action=Index}/{id?}";

/// Startup output: the state every request shares and the key cache to keep
/// fresh.
pub struct Bootstrap {
    pub state: AppState,
    pub jwks: Arc<JwksCache>,
}

/// Resolves secrets, discovers the authority and registers the handlers.
///
/// # Errors
///
/// Returns a `ConfigurationError` for missing or invalid settings, failed
/// discovery, or invalid scheme options. The server must not start then.
pub async fn bootstrap(config: &ServerConfig) -> Result<Bootstrap, Report<ConfigurationError>> {
    let cookie_key = config.cookie_key()?;
    let client_config = config.oidc.clone().into_client_config()?;
    let secure_cookies = client_config.require_https_metadata();

    let oidc = OidcChallengeHandler::discover(
        client_config,
        &config.jwks,
        config.oidc.backchannel_timeout(),
    )
    .await?;
    let jwks = Arc::clone(oidc.jwks());

    let cookies = CookieSessionHandler::new(config.session.cookie_name.clone(), secure_cookies);
    let auth = Authentication::new(
        AuthenticationOptions::default(),
        cookies,
        oidc,
        config.session.clone(),
    )?;

    Ok(Bootstrap {
        state: AppState::new(auth, cookie_key, config.environment),
        jwks,
    })
}

/// Assembles the standard pipeline: routing, authentication, authorization,
/// the default convention route and the Home controller.
///
/// # Errors
///
/// Returns a `ConfigurationError` if the pipeline cannot be assembled.
pub fn assemble_pipeline(
    state: AppState,
    config: &ServerConfig,
) -> Result<Pipeline, Report<ConfigurationError>> {
    let assembled = Pipeline::new(state)
        .use_routing()
        .and_then(Pipeline::use_authentication)
        .and_then(Pipeline::use_authorization)
        .and_then(|p| p.register_route(DEFAULT_ROUTE_NAME, DEFAULT_ROUTE_PATTERN))
        .map_err(|e| ConfigurationError::invalid("pipeline", e.to_string()))?;

    let mut assembled = home::map(assembled);
    if let Some(dir) = &config.static_dir {
        assembled = assembled.use_static_files(dir.clone());
    }
    if let Some(origin) = config.public_origin()? {
        assembled = assembled.use_public_origin(origin);
    }
    Ok(assembled)
}
