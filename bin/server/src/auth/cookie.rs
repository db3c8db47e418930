//! Cookie session handler.
//!
//! Sessions live entirely in an encrypted, authenticated cookie. A cookie
//! that fails decryption, does not parse, or has expired is treated as if it
//! were absent.

use axum_extra::extract::PrivateCookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use oidc_gate_access::{AuthenticationError, PendingChallenge, SessionPrincipal};
use oidc_gate_access::challenge::CHALLENGE_LIFETIME_MINUTES;
use time::Duration as TimeDuration;
use tracing::debug;

/// Prefix of the cookies holding pending challenges between redirect and
/// callback. Each flow gets its own cookie, suffixed with its `state`, so
/// concurrent sign-ins from one browser do not overwrite each other.
pub const CHALLENGE_COOKIE_PREFIX: &str = "oidc_challenge.";

/// Longest `state` accepted as a cookie name suffix.
const MAX_STATE_LEN: usize = 128;

/// Largest `Set-Cookie` name plus value browsers reliably accept.
pub const MAX_COOKIE_BYTES: usize = 4096;

/// Bytes the private jar adds around the plaintext: 12-byte nonce, 16-byte tag.
const ENCRYPTION_OVERHEAD: usize = 12 + 16;

/// Issues and validates session cookies.
#[derive(Debug, Clone)]
pub struct CookieSessionHandler {
    cookie_name: String,
    secure: bool,
}

impl CookieSessionHandler {
    /// Creates a handler writing cookies under `cookie_name`.
    ///
    /// `secure` marks cookies HTTPS-only.
    pub fn new(cookie_name: impl Into<String>, secure: bool) -> Self {
        Self {
            cookie_name: cookie_name.into(),
            secure,
        }
    }

    /// Returns the session cookie name.
    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Serializes the principal into the session cookie.
    ///
    /// # Errors
    ///
    /// Returns `SessionTooLarge` if the encrypted cookie would exceed
    /// [`MAX_COOKIE_BYTES`]. The jar is not modified in that case.
    pub fn issue(
        &self,
        jar: PrivateCookieJar,
        principal: &SessionPrincipal,
    ) -> Result<PrivateCookieJar, AuthenticationError> {
        let payload =
            serde_json::to_string(principal).map_err(|e| AuthenticationError::Internal {
                reason: format!("failed to serialize session: {e}"),
            })?;

        let size = self.cookie_name.len() + 1 + encrypted_len(payload.len());
        if size > MAX_COOKIE_BYTES {
            return Err(AuthenticationError::SessionTooLarge {
                size,
                limit: MAX_COOKIE_BYTES,
            });
        }

        let max_age = TimeDuration::seconds(principal.remaining().num_seconds());
        let cookie = Cookie::build((self.cookie_name.clone(), payload))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .max_age(max_age);

        Ok(jar.add(cookie))
    }

    /// Reads the principal from the session cookie.
    ///
    /// Returns `None` for a missing, tampered, unreadable or expired cookie.
    /// Reading does not change the jar, so repeated calls agree.
    pub fn validate(&self, jar: &PrivateCookieJar) -> Option<SessionPrincipal> {
        let cookie = jar.get(&self.cookie_name)?;
        let principal: SessionPrincipal = match serde_json::from_str(cookie.value()) {
            Ok(principal) => principal,
            Err(e) => {
                debug!(error = %e, "session cookie did not parse");
                return None;
            }
        };
        if principal.is_expired() {
            debug!(session_id = %principal.id(), "session cookie expired");
            return None;
        }
        Some(principal)
    }

    /// Removes the session cookie.
    pub fn sign_out(&self, jar: PrivateCookieJar) -> PrivateCookieJar {
        jar.remove(Cookie::build((self.cookie_name.clone(), "")).path("/"))
    }

    /// Stores a pending challenge for the callback to pick up.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the challenge cannot be serialized or its
    /// `state` is not usable as a cookie name.
    pub fn store_challenge(
        &self,
        jar: PrivateCookieJar,
        pending: &PendingChallenge,
    ) -> Result<PrivateCookieJar, AuthenticationError> {
        let name = challenge_cookie_name(pending.state()).ok_or_else(|| {
            AuthenticationError::Internal {
                reason: "challenge state is not a valid cookie name".to_string(),
            }
        })?;
        let payload = serde_json::to_string(pending).map_err(|e| AuthenticationError::Internal {
            reason: format!("failed to serialize challenge: {e}"),
        })?;

        let cookie = Cookie::build((name, payload))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .max_age(TimeDuration::minutes(CHALLENGE_LIFETIME_MINUTES));

        Ok(jar.add(cookie))
    }

    /// Reads the pending challenge started with `state`, if one is present
    /// and intact.
    pub fn load_challenge(&self, jar: &PrivateCookieJar, state: &str) -> Option<PendingChallenge> {
        let cookie = jar.get(&challenge_cookie_name(state)?)?;
        serde_json::from_str(cookie.value())
            .inspect_err(|e| debug!(error = %e, "challenge cookie did not parse"))
            .ok()
    }

    /// Removes the pending challenge cookie for `state`, leaving other flows
    /// alone.
    pub fn clear_challenge(&self, jar: PrivateCookieJar, state: &str) -> PrivateCookieJar {
        match challenge_cookie_name(state) {
            Some(name) => jar.remove(Cookie::build((name, "")).path("/")),
            None => jar,
        }
    }
}

/// Cookie name for the challenge started with `state`.
///
/// Returns `None` unless `state` is non-empty URL-safe base64 text.
fn challenge_cookie_name(state: &str) -> Option<String> {
    let usable = !state.is_empty()
        && state.len() <= MAX_STATE_LEN
        && state
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    usable.then(|| format!("{CHALLENGE_COOKIE_PREFIX}{state}"))
}

/// Length of the base64 value the private jar writes for `plaintext_len` bytes.
fn encrypted_len(plaintext_len: usize) -> usize {
    (plaintext_len + ENCRYPTION_OVERHEAD).div_ceil(3) * 4
}
