//! State carried between an OIDC challenge and its callback.
//!
//! A challenge moves the browser from unauthenticated to pending-callback:
//! the anti-forgery `state`, the ID-token `nonce` and the PKCE verifier are
//! generated, sent (or hashed) to the authority, and remembered here. The
//! callback is only accepted if it presents the same `state` before the
//! pending challenge lapses.

use crate::error::AuthenticationError;
use chrono::{DateTime, Duration, Utc};
use oidc_gate_core::FlowId;
use serde::{Deserialize, Serialize};

/// How long a pending challenge may wait for its callback.
pub const CHALLENGE_LIFETIME_MINUTES: i64 = 15;

/// A challenge awaiting its callback.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingChallenge {
    flow_id: FlowId,
    state: String,
    nonce: String,
    pkce_verifier: String,
    return_url: String,
    created_at: DateTime<Utc>,
}

impl PendingChallenge {
    /// Records a freshly issued challenge.
    #[must_use]
    pub fn new(state: String, nonce: String, pkce_verifier: String, return_url: &str) -> Self {
        Self {
            flow_id: FlowId::new(),
            state,
            nonce,
            pkce_verifier,
            return_url: sanitize_return_url(Some(return_url)).to_string(),
            created_at: Utc::now(),
        }
    }

    /// Returns the flow ID.
    #[must_use]
    pub fn flow_id(&self) -> FlowId {
        self.flow_id
    }

    /// Returns the anti-forgery state value sent to the authority.
    #[must_use]
    pub fn state(&self) -> &str {
        &self.state
    }

    /// Returns the nonce the ID token must echo.
    #[must_use]
    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    /// Returns the PKCE code verifier.
    #[must_use]
    pub fn pkce_verifier(&self) -> &str {
        &self.pkce_verifier
    }

    /// Returns the local URL to land on after sign-in.
    #[must_use]
    pub fn return_url(&self) -> &str {
        &self.return_url
    }

    /// Returns when the challenge was issued.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns true if the callback window has closed at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.created_at + Duration::minutes(CHALLENGE_LIFETIME_MINUTES)
    }

    /// Checks a callback's `state` against this challenge.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the challenge has expired or the values
    /// differ.
    pub fn verify_state(
        &self,
        presented: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AuthenticationError> {
        if self.is_expired_at(now) {
            return Err(AuthenticationError::InvalidState {
                reason: format!("challenge {} expired", self.flow_id),
            });
        }
        if !constant_time_eq(self.state.as_bytes(), presented.as_bytes()) {
            return Err(AuthenticationError::InvalidState {
                reason: format!("state does not match challenge {}", self.flow_id),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for PendingChallenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingChallenge")
            .field("flow_id", &self.flow_id)
            .field("return_url", &self.return_url)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Query parameters the authority sends to the callback path.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Splits the callback into an authorization code and its state.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError` when the authority reported an error,
    /// `InvalidState` when no state came back, and `TokenValidation` when the
    /// code is missing.
    pub fn into_code_and_state(self) -> Result<(String, String), AuthenticationError> {
        if let Some(error) = self.error {
            return Err(AuthenticationError::ProviderError {
                error,
                description: self.error_description,
            });
        }
        let state = self
            .state
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AuthenticationError::InvalidState {
                reason: "callback carried no state".to_string(),
            })?;
        let code = self
            .code
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AuthenticationError::TokenValidation {
                reason: "callback carried no authorization code".to_string(),
            })?;
        Ok((code, state))
    }
}

/// Returns `candidate` if it is a local absolute path, otherwise `/`.
///
/// Rejects absolute URLs, protocol-relative `//host` forms and backslash
/// variants browsers treat as `//`.
#[must_use]
pub fn sanitize_return_url(candidate: Option<&str>) -> &str {
    match candidate {
        Some(url)
            if url.starts_with('/')
                && !url.starts_with("//")
                && !url.starts_with("/\\")
                && !url.chars().any(char::is_control) =>
        {
            url
        }
        _ => "/",
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
