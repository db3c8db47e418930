//! Endpoint access requirements.

use crate::session::SessionPrincipal;
use std::fmt;

/// What an endpoint requires of the caller.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Access {
    /// Anyone may call the endpoint.
    #[default]
    Anonymous,
    /// A valid session is required.
    Authenticated,
    /// A valid session holding a claim of this type (and value, if given).
    Claim {
        claim_type: String,
        value: Option<String>,
    },
}

impl Access {
    /// Requires a claim type with any value.
    #[must_use]
    pub fn claim(claim_type: impl Into<String>) -> Self {
        Self::Claim {
            claim_type: claim_type.into(),
            value: None,
        }
    }

    /// Requires a claim type with a specific value.
    #[must_use]
    pub fn claim_value(claim_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Claim {
            claim_type: claim_type.into(),
            value: Some(value.into()),
        }
    }

    /// Decides what to do with a request given its resolved principal.
    #[must_use]
    pub fn evaluate(&self, principal: Option<&SessionPrincipal>) -> Decision {
        match (self, principal) {
            (Self::Anonymous, _) => Decision::Allow,
            (_, None) => Decision::Challenge,
            (Self::Authenticated, Some(_)) => Decision::Allow,
            (Self::Claim { claim_type, value }, Some(principal)) => {
                if principal.has_claim(claim_type, value.as_deref()) {
                    Decision::Allow
                } else {
                    Decision::Forbid
                }
            }
        }
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => write!(f, "anonymous"),
            Self::Authenticated => write!(f, "authenticated"),
            Self::Claim {
                claim_type,
                value: Some(value),
            } => write!(f, "claim {claim_type}={value}"),
            Self::Claim {
                claim_type,
                value: None,
            } => write!(f, "claim {claim_type}"),
        }
    }
}

/// Outcome of evaluating an [`Access`] requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Continue to the endpoint.
    Allow,
    /// No session: run the default challenge scheme.
    Challenge,
    /// A session exists but lacks what the endpoint requires.
    Forbid,
}
