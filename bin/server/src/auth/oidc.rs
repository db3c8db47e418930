//! OIDC challenge handler using the openidconnect crate.
//!
//! Provider metadata is discovered once at startup. Signing keys come from
//! the [`JwksCache`] so a rotated key is picked up without a restart.

use base64::Engine;
use chrono::{Duration, Utc};
use oidc_gate_access::{
    AuthenticationError, Claim, ConfigurationError, OidcClientConfig, PendingChallenge,
    SavedTokens, SessionPrincipal, claim_types, merge_unique_claims,
};
use openidconnect::core::{
    CoreAuthenticationFlow, CoreClient, CoreJsonWebKeySet, CoreProviderMetadata,
    CoreUserInfoClaims,
};
use openidconnect::{
    AuthorizationCode, ClientId, ClientSecret, CsrfToken, ErrorResponse, IssuerUrl, Nonce,
    OAuth2TokenResponse, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, RequestTokenError,
    Scope, TokenResponse, UserInfoError,
};
use rootcause::Report;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{debug, info, instrument, warn};

use super::jwks::{HttpKeySetSource, JwksCache};
use crate::config::{JwksConfig, SessionConfig};

/// ID token claims that describe the token rather than the user.
const PROTOCOL_CLAIMS: &[&str] = &[
    "nonce", "aud", "azp", "acr", "iat", "nbf", "exp", "at_hash", "c_hash", "auth_time",
];

/// Runs the authorization code flow against one authority.
pub struct OidcChallengeHandler {
    provider_metadata: CoreProviderMetadata,
    client_id: ClientId,
    client_secret: ClientSecret,
    redirect_url: RedirectUrl,
    http_client: reqwest::Client,
    jwks: Arc<JwksCache>,
    config: OidcClientConfig,
}

impl OidcChallengeHandler {
    /// Discovers the authority's metadata and signing keys.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if the HTTP client cannot be built or
    /// discovery fails.
    pub async fn discover(
        config: OidcClientConfig,
        jwks_config: &JwksConfig,
        timeout: StdDuration,
    ) -> Result<Self, Report<ConfigurationError>> {
        let issuer_url = IssuerUrl::new(config.authority().to_string())
            .map_err(|e| ConfigurationError::invalid("oidc.authority", e.to_string()))?;

        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .build()
            .map_err(|e| {
                ConfigurationError::invalid("oidc.backchannel_timeout_seconds", e.to_string())
            })?;

        let provider_metadata = CoreProviderMetadata::discover_async(issuer_url, &http_client)
            .await
            .map_err(|e| ConfigurationError::Discovery {
                authority: config.authority().to_string(),
                reason: e.to_string(),
            })?;

        let jwks_url = provider_metadata.jwks_uri().url().to_string();
        let initial = provider_metadata.jwks().clone();
        info!(
            authority = %config.authority(),
            keys = initial.keys().len(),
            "discovered OIDC provider"
        );

        let source = HttpKeySetSource::new(jwks_url, http_client.clone());
        let jwks = Arc::new(JwksCache::new(
            initial,
            Box::new(source),
            jwks_config.min_refresh_interval(),
        ));

        Self::from_metadata(config, provider_metadata, jwks, http_client)
    }

    /// Builds a handler from already discovered metadata.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if the redirect URI is not a URL.
    pub fn from_metadata(
        config: OidcClientConfig,
        provider_metadata: CoreProviderMetadata,
        jwks: Arc<JwksCache>,
        http_client: reqwest::Client,
    ) -> Result<Self, Report<ConfigurationError>> {
        let redirect_url = RedirectUrl::new(config.redirect_uri().to_string())
            .map_err(|e| ConfigurationError::invalid("oidc.redirect_uri", e.to_string()))?;

        Ok(Self {
            provider_metadata,
            client_id: ClientId::new(config.client_id().to_string()),
            client_secret: ClientSecret::new(config.client_secret().secret().to_string()),
            redirect_url,
            http_client,
            jwks,
            config,
        })
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &OidcClientConfig {
        &self.config
    }

    /// Returns the signing key cache.
    pub fn jwks(&self) -> &Arc<JwksCache> {
        &self.jwks
    }

    /// Starts a challenge: builds the authorization URL and the state to
    /// remember until the callback.
    ///
    /// Every call generates a fresh state, nonce and PKCE verifier.
    pub fn challenge(&self, return_url: &str) -> (String, PendingChallenge) {
        let client = CoreClient::from_provider_metadata(
            self.provider_metadata.clone(),
            self.client_id.clone(),
            Some(self.client_secret.clone()),
        )
        .set_redirect_uri(self.redirect_url.clone());

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        let mut auth_request = client
            .authorize_url(
                CoreAuthenticationFlow::AuthorizationCode,
                CsrfToken::new_random,
                Nonce::new_random,
            )
            .set_pkce_challenge(pkce_challenge);

        for scope in self.config.scopes() {
            auth_request = auth_request.add_scope(Scope::new(scope.clone()));
        }

        let (auth_url, csrf_token, nonce) = auth_request.url();

        let pending = PendingChallenge::new(
            csrf_token.secret().clone(),
            nonce.secret().clone(),
            pkce_verifier.secret().clone(),
            return_url,
        );
        debug!(flow_id = %pending.flow_id(), "issued OIDC challenge");

        (auth_url.to_string(), pending)
    }

    /// Completes a challenge whose state has already been verified.
    ///
    /// Exchanges the code, validates the ID token against the cached signing
    /// keys and the challenge nonce, optionally merges user-info claims, and
    /// builds the session principal.
    ///
    /// # Errors
    ///
    /// Returns `Network` when the authority cannot be reached,
    /// `ProviderError` when it rejects the exchange, and `TokenValidation`
    /// when the ID token fails validation.
    #[instrument(skip_all, fields(flow_id = %pending.flow_id()))]
    pub async fn complete(
        &self,
        pending: &PendingChallenge,
        code: String,
        session: &SessionConfig,
    ) -> Result<SessionPrincipal, AuthenticationError> {
        let client = CoreClient::from_provider_metadata(
            self.provider_metadata.clone(),
            self.client_id.clone(),
            Some(self.client_secret.clone()),
        )
        .set_redirect_uri(self.redirect_url.clone());

        let token_response = client
            .exchange_code(AuthorizationCode::new(code))
            .map_err(|e| AuthenticationError::TokenValidation {
                reason: format!("token endpoint not available: {e}"),
            })?
            .set_pkce_verifier(PkceCodeVerifier::new(pending.pkce_verifier().to_string()))
            .request_async(&self.http_client)
            .await
            .map_err(token_error)?;

        let id_token = token_response
            .id_token()
            .ok_or_else(|| AuthenticationError::TokenValidation {
                reason: "no ID token in token response".to_string(),
            })?;

        // The raw token is needed for its header kid, its full payload and
        // for saving.
        let raw_id_token = raw_id_token(&token_response)?;
        let (header, payload) = decode_jwt(&raw_id_token)?;
        let kid = header.get("kid").and_then(|v| v.as_str());

        let keys = self
            .jwks
            .key_set_for(kid)
            .await
            .map_err(|e| AuthenticationError::Network {
                reason: e.to_string(),
            })?;
        let verifying_client = CoreClient::from_provider_metadata(
            self.provider_metadata.clone().set_jwks(CoreJsonWebKeySet::clone(&keys)),
            self.client_id.clone(),
            Some(self.client_secret.clone()),
        );

        let nonce = Nonce::new(pending.nonce().to_string());
        let verifier = verifying_client.id_token_verifier();
        let id_claims = id_token.claims(&verifier, &nonce).map_err(|e| {
            AuthenticationError::TokenValidation {
                reason: format!("ID token validation failed: {e}"),
            }
        })?;

        let subject = id_claims.subject().clone();
        let token_expiry = id_claims.expiration();
        let mut claims = claims_from_json(&payload);

        if self.config.get_claims_from_user_info_endpoint() {
            if self.provider_metadata.userinfo_endpoint().is_some() {
                let user_info: CoreUserInfoClaims = client
                    .user_info(token_response.access_token().clone(), Some(subject))
                    .map_err(|e| AuthenticationError::TokenValidation {
                        reason: format!("user-info endpoint not available: {e}"),
                    })?
                    .request_async(&self.http_client)
                    .await
                    .map_err(user_info_error)?;
                let extra = serde_json::to_value(&user_info).map_err(|e| {
                    AuthenticationError::TokenValidation {
                        reason: format!("unreadable user-info claims: {e}"),
                    }
                })?;
                merge_unique_claims(&mut claims, claims_from_json(&extra));
            } else {
                debug!("provider advertises no user-info endpoint, skipping");
            }
        }

        let now = Utc::now();
        let expires_at = if session.use_token_lifetime {
            token_expiry
        } else {
            now + Duration::minutes(session.duration_minutes)
        };
        let mut principal = SessionPrincipal::with_times(claims, now, expires_at);

        if self.config.save_tokens() {
            principal = principal.with_tokens(SavedTokens::new(
                token_response.access_token().secret().clone(),
                token_response.refresh_token().map(|t| t.secret().clone()),
                Some(raw_id_token),
            ));
        }

        info!(
            flow_id = %pending.flow_id(),
            session_id = %principal.id(),
            subject = principal.subject().unwrap_or_default(),
            "OIDC sign-in completed"
        );
        Ok(principal)
    }
}

/// Pulls the raw `id_token` string out of a token response.
fn raw_id_token<TR>(token_response: &TR) -> Result<String, AuthenticationError>
where
    TR: serde::Serialize,
{
    let response_json =
        serde_json::to_value(token_response).map_err(|e| AuthenticationError::TokenValidation {
            reason: format!("failed to serialize token response: {e}"),
        })?;

    response_json
        .get("id_token")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| AuthenticationError::TokenValidation {
            reason: "no id_token in token response".to_string(),
        })
}

/// Decodes a compact JWT's header and payload without verifying it.
fn decode_jwt(jwt: &str) -> Result<(serde_json::Value, serde_json::Value), AuthenticationError> {
    let parts: Vec<&str> = jwt.split('.').collect();
    if parts.len() != 3 {
        return Err(AuthenticationError::TokenValidation {
            reason: "ID token is not a compact JWT".to_string(),
        });
    }

    let decode = |part: &str, what: &str| -> Result<serde_json::Value, AuthenticationError> {
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(part)
            .map_err(|e| AuthenticationError::TokenValidation {
                reason: format!("failed to decode JWT {what}: {e}"),
            })?;
        serde_json::from_slice(&bytes).map_err(|e| AuthenticationError::TokenValidation {
            reason: format!("failed to parse JWT {what}: {e}"),
        })
    };

    Ok((decode(parts[0], "header")?, decode(parts[1], "payload")?))
}

/// Flattens a JSON claims object into claims.
///
/// Arrays become one claim per element; nested objects are kept as JSON
/// text. Protocol claims are dropped.
pub fn claims_from_json(value: &serde_json::Value) -> Vec<Claim> {
    let Some(object) = value.as_object() else {
        return Vec::new();
    };

    let mut claims = Vec::new();
    // `sub` and `iss` first so they lead the principal's claim list.
    for key in [claim_types::SUBJECT, claim_types::ISSUER] {
        if let Some(text) = object.get(key).and_then(scalar_text) {
            claims.push(Claim::new(key, text));
        }
    }

    for (key, value) in object {
        if PROTOCOL_CLAIMS.contains(&key.as_str())
            || key == claim_types::SUBJECT
            || key == claim_types::ISSUER
        {
            continue;
        }
        match value {
            serde_json::Value::Null => {}
            serde_json::Value::Array(items) => {
                claims.extend(
                    items
                        .iter()
                        .filter_map(scalar_text)
                        .map(|text| Claim::new(key.as_str(), text)),
                );
            }
            serde_json::Value::Object(_) => {
                claims.push(Claim::new(key.as_str(), value.to_string()));
            }
            other => {
                if let Some(text) = scalar_text(other) {
                    claims.push(Claim::new(key.as_str(), text));
                }
            }
        }
    }
    claims
}

fn scalar_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn token_error<RE, T>(err: RequestTokenError<RE, T>) -> AuthenticationError
where
    RE: std::error::Error + 'static,
    T: ErrorResponse + 'static,
{
    match err {
        RequestTokenError::ServerResponse(response) => {
            warn!(error = %response, "token endpoint rejected the code");
            AuthenticationError::ProviderError {
                error: response.to_string(),
                description: None,
            }
        }
        RequestTokenError::Request(e) => AuthenticationError::Network {
            reason: format!("token request failed: {e}"),
        },
        RequestTokenError::Parse(e, _) => AuthenticationError::TokenValidation {
            reason: format!("malformed token response: {e}"),
        },
        RequestTokenError::Other(reason) => AuthenticationError::TokenValidation { reason },
    }
}

fn user_info_error<RE>(err: UserInfoError<RE>) -> AuthenticationError
where
    RE: std::error::Error + 'static,
{
    match err {
        UserInfoError::Request(e) => AuthenticationError::Network {
            reason: format!("user-info request failed: {e}"),
        },
        other => AuthenticationError::TokenValidation {
            reason: format!("user-info response rejected: {other}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwks::KeySetSource;
    use crate::auth::jwks::KeySetError;
    use async_trait::async_trait;
    use oidc_gate_access::ClientSecret as ConfiguredSecret;

    struct NoKeys;

    #[async_trait]
    impl KeySetSource for NoKeys {
        async fn fetch(&self) -> Result<CoreJsonWebKeySet, KeySetError> {
            Err(KeySetError::Empty {
                url: "none".to_string(),
            })
        }

        fn location(&self) -> &str {
            "none"
        }
    }

    fn metadata() -> CoreProviderMetadata {
        serde_json::from_value(serde_json::json!({
            "issuer": "https://auth.example.com",
            "authorization_endpoint": "https://auth.example.com/authorize",
            "token_endpoint": "https://auth.example.com/token",
            "jwks_uri": "https://auth.example.com/jwks",
            "response_types_supported": ["code"],
            "subject_types_supported": ["public"],
            "id_token_signing_alg_values_supported": ["RS256"],
        }))
        .expect("metadata")
    }

    fn handler() -> OidcChallengeHandler {
        let config = OidcClientConfig::builder(
            "https://auth.example.com".to_string(),
            "client-id".to_string(),
            ConfiguredSecret::new("client-secret".to_string()),
            "https://app.example.com/signin-oidc".to_string(),
        )
        .scopes(vec!["profile".to_string(), "offline".to_string()])
        .build()
        .expect("config");
        let keys: CoreJsonWebKeySet =
            serde_json::from_value(serde_json::json!({ "keys": [] })).expect("keys");
        let jwks = Arc::new(JwksCache::new(keys, Box::new(NoKeys), StdDuration::ZERO));
        OidcChallengeHandler::from_metadata(config, metadata(), jwks, reqwest::Client::new())
            .expect("handler")
    }

    fn query_param(url: &str, name: &str) -> Option<String> {
        let parsed = reqwest::Url::parse(url).ok()?;
        parsed
            .query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    #[test]
    fn challenge_url_carries_the_code_flow_parameters() {
        let (url, pending) = handler().challenge("/Home/Claims");

        assert!(url.starts_with("https://auth.example.com/authorize?"));
        assert_eq!(query_param(&url, "response_type").as_deref(), Some("code"));
        assert_eq!(query_param(&url, "client_id").as_deref(), Some("client-id"));
        assert_eq!(
            query_param(&url, "redirect_uri").as_deref(),
            Some("https://app.example.com/signin-oidc")
        );
        assert_eq!(query_param(&url, "state").as_deref(), Some(pending.state()));
        assert_eq!(query_param(&url, "nonce").as_deref(), Some(pending.nonce()));
        assert_eq!(query_param(&url, "code_challenge_method").as_deref(), Some("S256"));

        let scope = query_param(&url, "scope").expect("scope");
        let scopes: Vec<&str> = scope.split(' ').collect();
        assert_eq!(scopes.first(), Some(&"openid"));
        assert!(scopes.contains(&"profile"));
        assert!(scopes.contains(&"offline"));

        assert_eq!(pending.return_url(), "/Home/Claims");
    }

    #[test]
    fn every_challenge_is_fresh() {
        let handler = handler();
        let (_, first) = handler.challenge("/");
        let (_, second) = handler.challenge("/");

        assert_ne!(first.state(), second.state());
        assert_ne!(first.nonce(), second.nonce());
        assert_ne!(first.pkce_verifier(), second.pkce_verifier());
        assert_ne!(first.flow_id(), second.flow_id());
    }

    #[test]
    fn claims_are_flattened_without_protocol_claims() {
        let payload = serde_json::json!({
            "iss": "https://auth.example.com",
            "aud": "client-id",
            "exp": 1_700_000_000,
            "nonce": "n-1",
            "name": "Alice",
            "sub": "user-123",
            "email_verified": true,
            "roles": ["reader", "editor"],
            "address": { "country": "NL" },
            "middle_name": null,
        });

        let claims = claims_from_json(&payload);

        assert_eq!(claims[0], Claim::new("sub", "user-123"));
        assert_eq!(claims[1], Claim::new("iss", "https://auth.example.com"));
        assert!(claims.contains(&Claim::new("name", "Alice")));
        assert!(claims.contains(&Claim::new("email_verified", "true")));
        assert!(claims.contains(&Claim::new("roles", "reader")));
        assert!(claims.contains(&Claim::new("roles", "editor")));
        assert!(claims.contains(&Claim::new("address", r#"{"country":"NL"}"#)));
        assert!(!claims.iter().any(|c| ["aud", "exp", "nonce", "middle_name"]
            .contains(&c.claim_type.as_str())));
    }

    #[test]
    fn malformed_jwt_is_a_validation_error() {
        let err = decode_jwt("not-a-jwt").unwrap_err();
        assert!(matches!(err, AuthenticationError::TokenValidation { .. }));

        let err = decode_jwt("a.b.c").unwrap_err();
        assert!(matches!(err, AuthenticationError::TokenValidation { .. }));
    }

    #[test]
    fn jwt_header_and_payload_decode() {
        let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
        let jwt = format!(
            "{}.{}.sig",
            engine.encode(r#"{"alg":"RS256","kid":"k1"}"#),
            engine.encode(r#"{"sub":"user-123"}"#)
        );

        let (header, payload) = decode_jwt(&jwt).expect("decode");

        assert_eq!(header["kid"], "k1");
        assert_eq!(payload["sub"], "user-123");
    }
}
