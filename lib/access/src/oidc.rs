//! OIDC (OpenID Connect) client configuration.
//!
//! This module provides the immutable configuration for talking to an
//! external identity provider with the authorization-code flow.

use crate::error::ConfigurationError;
use crate::options::COOKIE_SCHEME;
use rootcause::Report;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use url::Url;

/// The scope every OIDC authentication request carries.
pub const OPENID_SCOPE: &str = "openid";

/// Default path the identity provider redirects back to.
pub const DEFAULT_CALLBACK_PATH: &str = "/signin-oidc";

/// Default path that ends the local session.
pub const DEFAULT_SIGN_OUT_PATH: &str = "/signout";

/// OAuth2 client secret.
///
/// `Debug` never prints the value, so configuration structs holding one can
/// be logged safely.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct ClientSecret(String);

impl ClientSecret {
    /// Wraps a secret value.
    #[must_use]
    pub fn new(secret: String) -> Self {
        Self(secret)
    }

    /// Returns the secret value.
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.0
    }

    /// Returns true if the secret is empty or only whitespace.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for ClientSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ClientSecret([redacted])")
    }
}

/// OAuth2 response type requested from the authorize endpoint.
///
/// Only the authorization-code flow is supported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    #[default]
    Code,
}

impl ResponseType {
    /// Returns the wire value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
        }
    }
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResponseType {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "code" => Ok(Self::Code),
            other => Err(ConfigurationError::invalid(
                "oidc.response_type",
                format!("unsupported response type '{other}', only 'code' is supported"),
            )),
        }
    }
}

/// Configuration for the OIDC relying party.
///
/// Built once at startup through [`OidcClientConfigBuilder`] and never
/// modified afterwards. There is deliberately no `Serialize` implementation:
/// this value holds the client secret and must not reach a client.
#[derive(Debug, Clone)]
pub struct OidcClientConfig {
    authority: String,
    client_id: String,
    client_secret: ClientSecret,
    redirect_uri: String,
    response_type: ResponseType,
    scopes: Vec<String>,
    save_tokens: bool,
    require_https_metadata: bool,
    get_claims_from_user_info_endpoint: bool,
    callback_path: String,
    sign_out_path: String,
    sign_in_scheme: String,
}

impl OidcClientConfig {
    /// Creates a configuration builder with the required values.
    #[must_use]
    pub fn builder(
        authority: String,
        client_id: String,
        client_secret: ClientSecret,
        redirect_uri: String,
    ) -> OidcClientConfigBuilder {
        OidcClientConfigBuilder::new(authority, client_id, client_secret, redirect_uri)
    }

    /// Returns the authority (issuer) URL used for discovery.
    #[must_use]
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Returns the OAuth2 client ID.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Returns the OAuth2 client secret.
    #[must_use]
    pub fn client_secret(&self) -> &ClientSecret {
        &self.client_secret
    }

    /// Returns the absolute redirect URI registered with the provider.
    #[must_use]
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Returns the response type.
    #[must_use]
    pub fn response_type(&self) -> ResponseType {
        self.response_type
    }

    /// Returns the scopes requested in addition to `openid`.
    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// Returns every scope sent to the authorize endpoint, `openid` first.
    #[must_use]
    pub fn requested_scopes(&self) -> Vec<&str> {
        std::iter::once(OPENID_SCOPE)
            .chain(self.scopes.iter().map(String::as_str))
            .collect()
    }

    /// Returns true if raw tokens are kept in the session.
    #[must_use]
    pub fn save_tokens(&self) -> bool {
        self.save_tokens
    }

    /// Returns true if the authority must be served over HTTPS.
    #[must_use]
    pub fn require_https_metadata(&self) -> bool {
        self.require_https_metadata
    }

    /// Returns true if claims are enriched from the user-info endpoint.
    #[must_use]
    pub fn get_claims_from_user_info_endpoint(&self) -> bool {
        self.get_claims_from_user_info_endpoint
    }

    /// Returns the local path the provider redirects back to.
    #[must_use]
    pub fn callback_path(&self) -> &str {
        &self.callback_path
    }

    /// Returns the local sign-out path.
    #[must_use]
    pub fn sign_out_path(&self) -> &str {
        &self.sign_out_path
    }

    /// Returns the scheme that receives the principal after a callback.
    #[must_use]
    pub fn sign_in_scheme(&self) -> &str {
        &self.sign_in_scheme
    }
}

/// Builder for `OidcClientConfig`.
#[derive(Debug)]
pub struct OidcClientConfigBuilder {
    authority: String,
    client_id: String,
    client_secret: ClientSecret,
    redirect_uri: String,
    response_type: ResponseType,
    scopes: Vec<String>,
    save_tokens: bool,
    require_https_metadata: bool,
    get_claims_from_user_info_endpoint: bool,
    callback_path: String,
    sign_out_path: String,
    sign_in_scheme: String,
}

impl OidcClientConfigBuilder {
    /// Creates a new builder with required fields.
    #[must_use]
    pub fn new(
        authority: String,
        client_id: String,
        client_secret: ClientSecret,
        redirect_uri: String,
    ) -> Self {
        Self {
            authority,
            client_id,
            client_secret,
            redirect_uri,
            response_type: ResponseType::Code,
            scopes: vec!["profile".to_string()],
            save_tokens: false,
            require_https_metadata: true,
            get_claims_from_user_info_endpoint: false,
            callback_path: DEFAULT_CALLBACK_PATH.to_string(),
            sign_out_path: DEFAULT_SIGN_OUT_PATH.to_string(),
            sign_in_scheme: COOKIE_SCHEME.to_string(),
        }
    }

    /// Replaces the requested scopes.
    #[must_use]
    pub fn scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = Vec::new();
        for scope in scopes {
            self = self.add_scope(scope);
        }
        self
    }

    /// Adds a scope to the list of scopes to request.
    ///
    /// Blank scopes, duplicates and `openid` (always sent) are ignored.
    #[must_use]
    pub fn add_scope(mut self, scope: String) -> Self {
        let scope = scope.trim().to_string();
        if !scope.is_empty() && scope != OPENID_SCOPE && !self.scopes.contains(&scope) {
            self.scopes.push(scope);
        }
        self
    }

    /// Sets the response type.
    #[must_use]
    pub fn response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    /// Sets whether raw tokens are kept in the session.
    #[must_use]
    pub fn save_tokens(mut self, save: bool) -> Self {
        self.save_tokens = save;
        self
    }

    /// Sets whether the authority must use HTTPS.
    #[must_use]
    pub fn require_https_metadata(mut self, require: bool) -> Self {
        self.require_https_metadata = require;
        self
    }

    /// Sets whether claims are fetched from the user-info endpoint.
    #[must_use]
    pub fn get_claims_from_user_info_endpoint(mut self, enabled: bool) -> Self {
        self.get_claims_from_user_info_endpoint = enabled;
        self
    }

    /// Sets the callback path.
    #[must_use]
    pub fn callback_path(mut self, path: String) -> Self {
        self.callback_path = path;
        self
    }

    /// Sets the sign-out path.
    #[must_use]
    pub fn sign_out_path(mut self, path: String) -> Self {
        self.sign_out_path = path;
        self
    }

    /// Sets the scheme that receives the principal after a callback.
    #[must_use]
    pub fn sign_in_scheme(mut self, scheme: String) -> Self {
        self.sign_in_scheme = scheme;
        self
    }

    /// Validates and builds the `OidcClientConfig`.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if a required value is blank, a URL is
    /// malformed, the authority is not HTTPS while HTTPS metadata is
    /// required, or the redirect URI does not end in the callback path.
    pub fn build(self) -> Result<OidcClientConfig, Report<ConfigurationError>> {
        if self.authority.trim().is_empty() {
            return Err(ConfigurationError::missing("oidc.authority").into());
        }
        if self.client_id.trim().is_empty() {
            return Err(ConfigurationError::missing("oidc.client_id").into());
        }
        if self.client_secret.is_blank() {
            return Err(ConfigurationError::missing("oidc.client_secret").into());
        }
        if self.redirect_uri.trim().is_empty() {
            return Err(ConfigurationError::missing("oidc.redirect_uri").into());
        }

        let authority = parse_http_url("oidc.authority", &self.authority)?;
        if self.require_https_metadata && authority.scheme() != "https" {
            return Err(ConfigurationError::invalid(
                "oidc.authority",
                "HTTPS is required for metadata; \
                 set require_https_metadata=false for local development",
            )
            .into());
        }

        let redirect_uri = parse_http_url("oidc.redirect_uri", &self.redirect_uri)?;

        for (key, path) in [
            ("oidc.callback_path", &self.callback_path),
            ("oidc.sign_out_path", &self.sign_out_path),
        ] {
            if !path.starts_with('/') {
                return Err(ConfigurationError::invalid(key, "must start with '/'").into());
            }
        }
        if self.callback_path == self.sign_out_path {
            return Err(ConfigurationError::invalid(
                "oidc.sign_out_path",
                "must differ from the callback path",
            )
            .into());
        }

        if redirect_uri.path() != self.callback_path {
            return Err(ConfigurationError::invalid(
                "oidc.redirect_uri",
                format!("path must equal the callback path '{}'", self.callback_path),
            )
            .into());
        }

        Ok(OidcClientConfig {
            authority: self.authority,
            client_id: self.client_id,
            client_secret: self.client_secret,
            redirect_uri: self.redirect_uri,
            response_type: self.response_type,
            scopes: self.scopes,
            save_tokens: self.save_tokens,
            require_https_metadata: self.require_https_metadata,
            get_claims_from_user_info_endpoint: self.get_claims_from_user_info_endpoint,
            callback_path: self.callback_path,
            sign_out_path: self.sign_out_path,
            sign_in_scheme: self.sign_in_scheme,
        })
    }
}

/// Parses an absolute `http` or `https` URL with a host.
fn parse_http_url(key: &str, value: &str) -> Result<Url, Report<ConfigurationError>> {
    let url = Url::parse(value.trim())
        .map_err(|e| ConfigurationError::invalid(key, format!("not an absolute URL: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigurationError::invalid(
            key,
            format!("unsupported scheme '{}'", url.scheme()),
        )
        .into());
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(ConfigurationError::invalid(key, "URL has no host").into());
    }
    Ok(url)
}
