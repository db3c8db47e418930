//! Error types for the access crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `AuthenticationError`: failures of a single sign-in attempt
//! - `ConfigurationError`: invalid or incomplete startup configuration

use std::fmt;

/// Errors from one pass through the challenge/callback flow.
///
/// None of these are fatal to the process. The web layer turns each one into
/// an error page and never issues a session cookie alongside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationError {
    /// The callback's `state` did not match a pending challenge.
    InvalidState { reason: String },
    /// The ID token or token response failed verification.
    TokenValidation { reason: String },
    /// The identity provider could not be reached.
    Network { reason: String },
    /// The identity provider answered with an OAuth2 error.
    ProviderError {
        error: String,
        description: Option<String>,
    },
    /// The session payload does not fit in a single cookie.
    SessionTooLarge { size: usize, limit: usize },
    /// Local state could not be encoded. Nothing the user or the authority
    /// did caused it.
    Internal { reason: String },
}

impl AuthenticationError {
    /// Returns true if starting a fresh challenge may succeed without any
    /// change on either side.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network { .. })
    }

    /// Short stable name of the variant, for structured logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidState { .. } => "invalid_state",
            Self::TokenValidation { .. } => "token_validation",
            Self::Network { .. } => "network",
            Self::ProviderError { .. } => "provider_error",
            Self::SessionTooLarge { .. } => "session_too_large",
            Self::Internal { .. } => "internal",
        }
    }
}

impl fmt::Display for AuthenticationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidState { reason } => {
                write!(f, "invalid state: {reason}")
            }
            Self::TokenValidation { reason } => {
                write!(f, "token validation failed: {reason}")
            }
            Self::Network { reason } => {
                write!(f, "identity provider unreachable: {reason}")
            }
            Self::ProviderError { error, description } => match description {
                Some(description) => {
                    write!(f, "identity provider returned '{error}': {description}")
                }
                None => write!(f, "identity provider returned '{error}'"),
            },
            Self::SessionTooLarge { size, limit } => {
                write!(
                    f,
                    "session cookie of {size} bytes exceeds the {limit} byte limit"
                )
            }
            Self::Internal { reason } => write!(f, "internal error: {reason}"),
        }
    }
}

impl std::error::Error for AuthenticationError {}

/// Errors found while assembling authentication at startup.
///
/// Any of these must stop the process before it serves authenticated routes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// A required value was not supplied.
    MissingValue { key: String },
    /// A value was supplied but is unusable.
    InvalidValue { key: String, reason: String },
    /// A default scheme names a handler that was never registered.
    SchemeNotRegistered { scheme: String },
    /// A registered scheme cannot fill the role it was assigned.
    SchemeMismatch { scheme: String, role: &'static str },
    /// Provider metadata could not be discovered.
    Discovery { authority: String, reason: String },
}

impl ConfigurationError {
    /// A required value is absent.
    #[must_use]
    pub fn missing(key: &str) -> Self {
        Self::MissingValue {
            key: key.to_string(),
        }
    }

    /// A value is present but unusable.
    #[must_use]
    pub fn invalid(key: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingValue { key } => {
                write!(f, "missing required configuration value '{key}'")
            }
            Self::InvalidValue { key, reason } => {
                write!(f, "invalid configuration value '{key}': {reason}")
            }
            Self::SchemeNotRegistered { scheme } => {
                write!(f, "authentication scheme '{scheme}' is not registered")
            }
            Self::SchemeMismatch { scheme, role } => {
                write!(f, "authentication scheme '{scheme}' cannot act as {role}")
            }
            Self::Discovery { authority, reason } => {
                write!(f, "OIDC discovery against '{authority}' failed: {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigurationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_state_display() {
        let err = AuthenticationError::InvalidState {
            reason: "state mismatch".to_string(),
        };
        assert!(err.to_string().contains("invalid state"));
        assert!(err.to_string().contains("state mismatch"));
        assert_eq!(err.kind(), "invalid_state");
    }

    #[test]
    fn only_network_errors_are_transient() {
        let network = AuthenticationError::Network {
            reason: "connection refused".to_string(),
        };
        let token = AuthenticationError::TokenValidation {
            reason: "bad signature".to_string(),
        };
        assert!(network.is_transient());
        assert!(!token.is_transient());
    }

    #[test]
    fn provider_error_display_with_and_without_description() {
        let bare = AuthenticationError::ProviderError {
            error: "access_denied".to_string(),
            description: None,
        };
        assert_eq!(
            bare.to_string(),
            "identity provider returned 'access_denied'"
        );

        let described = AuthenticationError::ProviderError {
            error: "invalid_grant".to_string(),
            description: Some("code already used".to_string()),
        };
        assert!(described.to_string().contains("code already used"));
    }

    #[test]
    fn session_too_large_display() {
        let err = AuthenticationError::SessionTooLarge {
            size: 5000,
            limit: 4096,
        };
        assert!(err.to_string().contains("5000"));
        assert!(err.to_string().contains("4096"));
    }

    #[test]
    fn configuration_error_display() {
        let err = ConfigurationError::missing("oidc.client_id");
        assert!(err.to_string().contains("oidc.client_id"));

        let err = ConfigurationError::SchemeMismatch {
            scheme: "Cookies".to_string(),
            role: "default challenge scheme",
        };
        assert!(err.to_string().contains("Cookies"));
        assert!(err.to_string().contains("default challenge scheme"));
    }
}
