//! Authentication for the oidc-gate server.
//!
//! This module provides:
//! - The cookie session handler (default scheme)
//! - The OIDC challenge handler (default challenge scheme)
//! - A signing key cache with refresh on unknown key ids
//! - Pipeline middleware and extractors for Axum routes
//! - The callback, sign-in and sign-out endpoints
//!
//! Sessions are self-contained: the encrypted cookie is the only record of
//! a signed-in user, so there is nothing to clean up server-side.

pub mod cookie;
pub mod jwks;
pub mod middleware;
pub mod oidc;
pub mod routes;

pub use cookie::{CHALLENGE_COOKIE_PREFIX, CookieSessionHandler};
pub use jwks::{HttpKeySetSource, JwksCache, KeySetError, KeySetSource};
pub use middleware::{CurrentPrincipal, OptionalAuth, RequireAuth};
pub use oidc::OidcChallengeHandler;

use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;
use oidc_gate_access::{
    AuthenticationOptions, COOKIE_SCHEME, ConfigurationError, OIDC_SCHEME, SchemeKind,
    SchemeRegistry,
};
use rootcause::Report;
use std::sync::Arc;

use crate::config::{Environment, SessionConfig};

/// The registered authentication handlers and the options choosing between
/// them.
pub struct Authentication {
    options: AuthenticationOptions,
    cookies: CookieSessionHandler,
    oidc: OidcChallengeHandler,
    session: SessionConfig,
}

impl Authentication {
    /// Registers the cookie and OIDC handlers and validates the options.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if the options name an unregistered
    /// scheme or a scheme that cannot fill its role.
    pub fn new(
        options: AuthenticationOptions,
        cookies: CookieSessionHandler,
        oidc: OidcChallengeHandler,
        session: SessionConfig,
    ) -> Result<Self, Report<ConfigurationError>> {
        let mut registry = SchemeRegistry::new();
        registry.register(COOKIE_SCHEME, SchemeKind::Cookie)?;
        registry.register(OIDC_SCHEME, SchemeKind::OpenIdConnect)?;
        registry.validate(&options, oidc.config().sign_in_scheme())?;

        tracing::info!(
            default_scheme = %options.default_scheme,
            default_challenge_scheme = %options.default_challenge_scheme,
            "authentication schemes registered"
        );

        Ok(Self {
            options,
            cookies,
            oidc,
            session,
        })
    }

    /// Returns the validated options.
    pub fn options(&self) -> &AuthenticationOptions {
        &self.options
    }

    /// Returns the cookie session handler.
    pub fn cookies(&self) -> &CookieSessionHandler {
        &self.cookies
    }

    /// Returns the OIDC challenge handler.
    pub fn oidc(&self) -> &OidcChallengeHandler {
        &self.oidc
    }

    /// Returns the session lifetime settings.
    pub fn session(&self) -> &SessionConfig {
        &self.session
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Authentication handlers.
    pub auth: Arc<Authentication>,
    /// Key encrypting session and challenge cookies.
    pub cookie_key: Key,
    /// Hosting environment.
    pub environment: Environment,
}

impl AppState {
    /// Creates a new application state.
    pub fn new(auth: Authentication, cookie_key: Key, environment: Environment) -> Self {
        Self {
            auth: Arc::new(auth),
            cookie_key,
            environment,
        }
    }
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}
