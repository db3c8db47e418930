//! Authentication scheme registration.
//!
//! A scheme is a named handler. The cookie handler resolves an established
//! session; the OIDC handler runs when a protected endpoint is reached
//! without one. [`AuthenticationOptions`] picks which registered scheme fills
//! each role and [`SchemeRegistry::validate`] checks the choice at startup.

use crate::error::ConfigurationError;
use rootcause::Report;

/// Scheme name of the cookie session handler.
pub const COOKIE_SCHEME: &str = "Cookies";

/// Scheme name of the OpenID Connect challenge handler.
pub const OIDC_SCHEME: &str = "OpenIdConnect";

/// What a registered handler is able to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemeKind {
    /// Reads and writes the local session (can authenticate and sign in).
    Cookie,
    /// Redirects to a remote authority (can challenge).
    OpenIdConnect,
}

impl SchemeKind {
    /// Returns true if the handler can resolve a principal from a request.
    #[must_use]
    pub fn can_authenticate(&self) -> bool {
        matches!(self, Self::Cookie)
    }

    /// Returns true if the handler can start a challenge.
    #[must_use]
    pub fn can_challenge(&self) -> bool {
        matches!(self, Self::OpenIdConnect)
    }
}

/// Which registered handlers fill the default roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationOptions {
    /// Scheme that resolves an established session.
    pub default_scheme: String,
    /// Scheme that runs when a session is required but absent.
    pub default_challenge_scheme: String,
}

impl Default for AuthenticationOptions {
    fn default() -> Self {
        Self {
            default_scheme: COOKIE_SCHEME.to_string(),
            default_challenge_scheme: OIDC_SCHEME.to_string(),
        }
    }
}

/// The set of registered handlers, in registration order.
#[derive(Debug, Clone, Default)]
pub struct SchemeRegistry {
    schemes: Vec<(String, SchemeKind)>,
}

impl SchemeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler under a scheme name.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is already registered.
    pub fn register(
        &mut self,
        name: &str,
        kind: SchemeKind,
    ) -> Result<(), Report<ConfigurationError>> {
        if self.kind_of(name).is_some() {
            return Err(ConfigurationError::invalid(
                "authentication.schemes",
                format!("scheme '{name}' is registered twice"),
            )
            .into());
        }
        self.schemes.push((name.to_string(), kind));
        Ok(())
    }

    /// Returns the kind of a registered scheme.
    #[must_use]
    pub fn kind_of(&self, name: &str) -> Option<SchemeKind> {
        self.schemes
            .iter()
            .find(|(registered, _)| registered == name)
            .map(|(_, kind)| *kind)
    }

    /// Checks that the options reference registered handlers able to fill
    /// their roles, and that the OIDC sign-in scheme can hold a session.
    ///
    /// # Errors
    ///
    /// Returns `SchemeNotRegistered` or `SchemeMismatch`.
    pub fn validate(
        &self,
        options: &AuthenticationOptions,
        sign_in_scheme: &str,
    ) -> Result<(), Report<ConfigurationError>> {
        let checks: [(&str, &'static str, fn(&SchemeKind) -> bool); 3] = [
            (
                options.default_scheme.as_str(),
                "default scheme",
                SchemeKind::can_authenticate,
            ),
            (
                options.default_challenge_scheme.as_str(),
                "default challenge scheme",
                SchemeKind::can_challenge,
            ),
            (
                sign_in_scheme,
                "sign-in scheme",
                SchemeKind::can_authenticate,
            ),
        ];

        for (scheme, role, capable) in checks {
            let kind = self
                .kind_of(scheme)
                .ok_or_else(|| ConfigurationError::SchemeNotRegistered {
                    scheme: scheme.to_string(),
                })?;
            if !capable(&kind) {
                return Err(ConfigurationError::SchemeMismatch {
                    scheme: scheme.to_string(),
                    role,
                }
                .into());
            }
        }

        Ok(())
    }
}
