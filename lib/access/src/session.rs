//! Session principals for authenticated users.
//!
//! A `SessionPrincipal` is created after a successful OIDC callback, travels
//! inside the protected session cookie, and is read back on every request
//! until it expires or the user signs out. There is no server-side store.

use chrono::{DateTime, Duration, Utc};
use oidc_gate_core::SessionId;
use serde::{Deserialize, Serialize};

/// Well-known claim types produced from ID tokens.
pub mod claim_types {
    pub const SUBJECT: &str = "sub";
    pub const ISSUER: &str = "iss";
    pub const NAME: &str = "name";
    pub const PREFERRED_USERNAME: &str = "preferred_username";
    pub const EMAIL: &str = "email";
    pub const EMAIL_VERIFIED: &str = "email_verified";
    pub const GIVEN_NAME: &str = "given_name";
    pub const FAMILY_NAME: &str = "family_name";
    pub const LOCALE: &str = "locale";
}

/// A single `(type, value)` statement about the principal.
///
/// Keys are shortened on the wire because the whole principal has to fit in
/// one cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    #[serde(rename = "t")]
    pub claim_type: String,
    #[serde(rename = "v")]
    pub value: String,
}

impl Claim {
    /// Creates a claim.
    #[must_use]
    pub fn new(claim_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            claim_type: claim_type.into(),
            value: value.into(),
        }
    }
}

/// Appends claims whose type is not already present, keeping order.
///
/// Used to fold user-info claims into the ID-token claims without letting
/// the user-info response override what the signed token asserted.
pub fn merge_unique_claims(claims: &mut Vec<Claim>, extra: impl IntoIterator<Item = Claim>) {
    for claim in extra {
        if !claims.iter().any(|c| c.claim_type == claim.claim_type) {
            claims.push(claim);
        }
    }
}

/// Raw tokens kept for downstream calls when `save_tokens` is enabled.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedTokens {
    access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id_token: Option<String>,
}

impl SavedTokens {
    /// Creates a saved token set.
    #[must_use]
    pub fn new(
        access_token: String,
        refresh_token: Option<String>,
        id_token: Option<String>,
    ) -> Self {
        Self {
            access_token,
            refresh_token,
            id_token,
        }
    }

    /// Returns the OAuth2 access token.
    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Returns the OAuth2 refresh token, if one was issued.
    #[must_use]
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    /// Returns the raw ID token.
    #[must_use]
    pub fn id_token(&self) -> Option<&str> {
        self.id_token.as_deref()
    }
}

impl std::fmt::Debug for SavedTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SavedTokens")
            .field("access_token", &"[redacted]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[redacted]"))
            .field("id_token", &self.id_token.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

/// The authenticated principal carried by the session cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPrincipal {
    /// Identifier of this session, for log correlation.
    id: SessionId,
    /// Claims in the order they were asserted.
    claims: Vec<Claim>,
    /// When the session was issued.
    issued_at: DateTime<Utc>,
    /// When the session stops being accepted.
    expires_at: DateTime<Utc>,
    /// Provider tokens, only when saving tokens is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tokens: Option<SavedTokens>,
}

impl SessionPrincipal {
    /// Creates a principal valid from now for the given lifetime.
    #[must_use]
    pub fn new(claims: Vec<Claim>, lifetime: Duration) -> Self {
        let now = Utc::now();
        Self::with_times(claims, now, now + lifetime)
    }

    /// Creates a principal with explicit issue and expiry instants.
    #[must_use]
    pub fn with_times(
        claims: Vec<Claim>,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SessionId::new(),
            claims,
            issued_at,
            expires_at,
            tokens: None,
        }
    }

    /// Attaches saved provider tokens.
    #[must_use]
    pub fn with_tokens(mut self, tokens: SavedTokens) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Returns the session ID.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Returns all claims in assertion order.
    #[must_use]
    pub fn claims(&self) -> &[Claim] {
        &self.claims
    }

    /// Returns the value of the first claim of the given type.
    #[must_use]
    pub fn find_first(&self, claim_type: &str) -> Option<&str> {
        self.claims
            .iter()
            .find(|c| c.claim_type == claim_type)
            .map(|c| c.value.as_str())
    }

    /// Returns true if a claim of the given type exists, optionally with a
    /// specific value.
    #[must_use]
    pub fn has_claim(&self, claim_type: &str, value: Option<&str>) -> bool {
        self.claims
            .iter()
            .any(|c| c.claim_type == claim_type && value.is_none_or(|v| c.value == v))
    }

    /// Returns the subject identifier.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.find_first(claim_types::SUBJECT)
    }

    /// Returns a display name: `name`, then `preferred_username`, then `email`.
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.find_first(claim_types::NAME)
            .or_else(|| self.find_first(claim_types::PREFERRED_USERNAME))
            .or_else(|| self.find_first(claim_types::EMAIL))
    }

    /// Returns when the session was issued.
    #[must_use]
    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// Returns when the session expires.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Returns the saved provider tokens.
    #[must_use]
    pub fn tokens(&self) -> Option<&SavedTokens> {
        self.tokens.as_ref()
    }

    /// Returns true if the session has expired at the given instant.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Returns true if the session has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Returns the remaining lifetime, zero once expired.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        (self.expires_at - Utc::now()).max(Duration::zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims() -> Vec<Claim> {
        vec![
            Claim::new(claim_types::SUBJECT, "user-123"),
            Claim::new(claim_types::ISSUER, "https://auth.example.com"),
            Claim::new(claim_types::PREFERRED_USERNAME, "alice"),
            Claim::new("role", "reader"),
            Claim::new("role", "writer"),
        ]
    }

    #[test]
    fn new_principal_has_correct_fields() {
        let before = Utc::now();
        let principal = SessionPrincipal::new(claims(), Duration::hours(1));
        let after = Utc::now();

        assert!(principal.issued_at() >= before);
        assert!(principal.issued_at() <= after);
        assert!(principal.expires_at() > principal.issued_at());
        assert!(principal.tokens().is_none());
        assert_eq!(principal.subject(), Some("user-123"));
        assert!(principal.id().to_string().starts_with("sess_"));
    }

    #[test]
    fn claims_keep_assertion_order() {
        let principal = SessionPrincipal::new(claims(), Duration::hours(1));
        let roles: Vec<&str> = principal
            .claims()
            .iter()
            .filter(|c| c.claim_type == "role")
            .map(|c| c.value.as_str())
            .collect();
        assert_eq!(roles, vec!["reader", "writer"]);
        assert_eq!(principal.find_first("role"), Some("reader"));
    }

    #[test]
    fn has_claim_with_and_without_value() {
        let principal = SessionPrincipal::new(claims(), Duration::hours(1));
        assert!(principal.has_claim("role", None));
        assert!(principal.has_claim("role", Some("writer")));
        assert!(!principal.has_claim("role", Some("admin")));
        assert!(!principal.has_claim("email", None));
    }

    #[test]
    fn display_name_falls_back_to_preferred_username() {
        let principal = SessionPrincipal::new(claims(), Duration::hours(1));
        assert_eq!(principal.display_name(), Some("alice"));
    }

    #[test]
    fn principal_expiration() {
        let expired = SessionPrincipal::new(claims(), Duration::seconds(-1));
        assert!(expired.is_expired());
        assert_eq!(expired.remaining(), Duration::zero());

        let live = SessionPrincipal::new(claims(), Duration::hours(1));
        assert!(!live.is_expired());
        assert!(live.remaining() > Duration::minutes(59));
    }

    #[test]
    fn expiry_boundary_is_exclusive() {
        let issued = Utc::now();
        let expires = issued + Duration::minutes(5);
        let principal = SessionPrincipal::with_times(claims(), issued, expires);
        assert!(!principal.is_expired_at(expires - Duration::seconds(1)));
        assert!(principal.is_expired_at(expires));
    }

    #[test]
    fn merge_skips_existing_claim_types() {
        let mut merged = claims();
        merge_unique_claims(
            &mut merged,
            vec![
                Claim::new(claim_types::SUBJECT, "someone-else"),
                Claim::new(claim_types::EMAIL, "alice@example.com"),
            ],
        );
        assert_eq!(merged.len(), 6);
        assert_eq!(merged[0].value, "user-123");
        assert_eq!(merged[5], Claim::new(claim_types::EMAIL, "alice@example.com"));
    }

    #[test]
    fn saved_tokens_are_redacted_in_debug() {
        let principal = SessionPrincipal::new(claims(), Duration::hours(1)).with_tokens(
            SavedTokens::new(
                "access-abc".to_string(),
                Some("refresh-def".to_string()),
                None,
            ),
        );
        let debug = format!("{principal:?}");
        assert!(!debug.contains("access-abc"));
        assert!(!debug.contains("refresh-def"));
        assert_eq!(
            principal.tokens().map(SavedTokens::access_token),
            Some("access-abc")
        );
    }

    #[test]
    fn principal_survives_cookie_serialization() {
        let principal = SessionPrincipal::new(claims(), Duration::hours(1)).with_tokens(
            SavedTokens::new("access".to_string(), None, Some("id.token.sig".to_string())),
        );

        let json = serde_json::to_string(&principal).expect("serialize");
        assert!(json.contains("\"t\":\"sub\""));
        let parsed: SessionPrincipal = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(principal, parsed);
    }
}
