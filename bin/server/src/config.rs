//! Centralized server configuration.
//!
//! This module provides strongly-typed configuration for the server,
//! loaded via the `config` crate from environment variables. Nested keys use
//! a double underscore, e.g. `OIDC__CLIENT_ID` or `SESSION__DURATION_MINUTES`.
//!
//! Secrets are never compiled in: the client secret comes from
//! `OIDC__CLIENT_SECRET` or a mounted file named by `OIDC__CLIENT_SECRET_FILE`,
//! and the cookie key from `COOKIE_KEY`.

use axum_extra::extract::cookie::Key;
use base64::Engine;
use oidc_gate_access::{ClientSecret, ConfigurationError, OidcClientConfig, ResponseType};
use rootcause::Report;
use serde::Deserialize;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Hosting environment.
///
/// Development relaxes HTTPS enforcement and shows error details; production
/// adds HSTS and serves generic error pages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    #[default]
    Production,
}

impl Environment {
    /// Returns true in development.
    #[must_use]
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }
}

/// A configuration value that must not appear in logs.
#[derive(Clone, Deserialize)]
#[serde(transparent)]
pub struct SecretValue(String);

impl SecretValue {
    /// Returns the value.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[redacted]")
    }
}

impl From<&str> for SecretValue {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Server configuration composed from library configs.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Hosting environment.
    #[serde(default)]
    pub environment: Environment,

    /// Address to listen on.
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Directory served for paths no route matches.
    #[serde(default)]
    pub static_dir: Option<PathBuf>,

    /// Public `https://` origin plain-HTTP requests are redirected to in
    /// production. Defaults to the request's host.
    #[serde(default)]
    pub public_origin: Option<String>,

    /// Base64 encoded 64-byte key protecting cookies.
    /// Optional in development, where an ephemeral key is generated.
    #[serde(default)]
    pub cookie_key: Option<SecretValue>,

    /// Session configuration.
    #[serde(default)]
    pub session: SessionConfig,

    /// OIDC authentication configuration.
    #[serde(default)]
    pub oidc: OidcSettings,

    /// Signing key cache configuration.
    #[serde(default)]
    pub jwks: JwksConfig,
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5000))
}

/// Session-related configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Session duration in minutes when the token lifetime is not used.
    #[serde(default = "default_session_duration_minutes")]
    pub duration_minutes: i64,

    /// Expire the session together with the ID token instead.
    #[serde(default)]
    pub use_token_lifetime: bool,

    /// Name of the session cookie.
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
}

fn default_session_duration_minutes() -> i64 {
    60
}

fn default_cookie_name() -> String {
    "session".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            duration_minutes: default_session_duration_minutes(),
            use_token_lifetime: false,
            cookie_name: default_cookie_name(),
        }
    }
}

/// JWKS cache configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct JwksConfig {
    /// Interval between scheduled key set refreshes, in seconds.
    #[serde(default = "default_jwks_refresh_interval_seconds")]
    pub refresh_interval_seconds: u64,

    /// Minimum spacing between refreshes triggered by unknown key IDs.
    #[serde(default = "default_jwks_min_refresh_interval_seconds")]
    pub min_refresh_interval_seconds: u64,
}

fn default_jwks_refresh_interval_seconds() -> u64 {
    3600
}

fn default_jwks_min_refresh_interval_seconds() -> u64 {
    300
}

impl Default for JwksConfig {
    fn default() -> Self {
        Self {
            refresh_interval_seconds: default_jwks_refresh_interval_seconds(),
            min_refresh_interval_seconds: default_jwks_min_refresh_interval_seconds(),
        }
    }
}

impl JwksConfig {
    /// Returns the scheduled refresh interval.
    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_seconds)
    }

    /// Returns the minimum interval between on-demand refreshes.
    #[must_use]
    pub fn min_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.min_refresh_interval_seconds)
    }
}

/// Raw OIDC settings as read from the environment.
///
/// Converted into the validated, immutable [`OidcClientConfig`] by
/// [`OidcSettings::into_client_config`].
#[derive(Debug, Clone, Deserialize)]
pub struct OidcSettings {
    #[serde(default)]
    pub authority: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<SecretValue>,
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub response_type: ResponseType,
    /// Comma-separated scopes requested in addition to `openid`.
    #[serde(default = "default_scopes")]
    pub scopes: String,
    #[serde(default = "default_true")]
    pub save_tokens: bool,
    #[serde(default = "default_true")]
    pub require_https_metadata: bool,
    #[serde(default = "default_true")]
    pub get_claims_from_user_info_endpoint: bool,
    #[serde(default = "default_callback_path")]
    pub callback_path: String,
    #[serde(default = "default_sign_out_path")]
    pub sign_out_path: String,
    /// Timeout for discovery, token and user-info calls, in seconds.
    #[serde(default = "default_backchannel_timeout_seconds")]
    pub backchannel_timeout_seconds: u64,
}

fn default_scopes() -> String {
    "profile,offline".to_string()
}

fn default_true() -> bool {
    true
}

fn default_callback_path() -> String {
    oidc_gate_access::oidc::DEFAULT_CALLBACK_PATH.to_string()
}

fn default_sign_out_path() -> String {
    oidc_gate_access::oidc::DEFAULT_SIGN_OUT_PATH.to_string()
}

fn default_backchannel_timeout_seconds() -> u64 {
    60
}

impl Default for OidcSettings {
    fn default() -> Self {
        Self {
            authority: None,
            client_id: None,
            client_secret: None,
            client_secret_file: None,
            redirect_uri: None,
            response_type: ResponseType::default(),
            scopes: default_scopes(),
            save_tokens: true,
            require_https_metadata: true,
            get_claims_from_user_info_endpoint: true,
            callback_path: default_callback_path(),
            sign_out_path: default_sign_out_path(),
            backchannel_timeout_seconds: default_backchannel_timeout_seconds(),
        }
    }
}

impl OidcSettings {
    /// Returns the back-channel HTTP timeout.
    #[must_use]
    pub fn backchannel_timeout(&self) -> Duration {
        Duration::from_secs(self.backchannel_timeout_seconds)
    }

    /// Resolves secrets and validates the settings.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if a required value is missing, the
    /// secret file cannot be read, or validation fails.
    pub fn into_client_config(self) -> Result<OidcClientConfig, Report<ConfigurationError>> {
        let authority = self
            .authority
            .ok_or_else(|| ConfigurationError::missing("oidc.authority"))?;
        let client_id = self
            .client_id
            .ok_or_else(|| ConfigurationError::missing("oidc.client_id"))?;
        let redirect_uri = self
            .redirect_uri
            .ok_or_else(|| ConfigurationError::missing("oidc.redirect_uri"))?;

        let client_secret = match (self.client_secret, self.client_secret_file) {
            (Some(secret), _) => ClientSecret::new(secret.expose().to_string()),
            (None, Some(path)) => {
                let secret = std::fs::read_to_string(&path).map_err(|e| {
                    ConfigurationError::InvalidValue {
                        key: "oidc.client_secret_file".to_string(),
                        reason: format!("cannot read {}: {e}", path.display()),
                    }
                })?;
                ClientSecret::new(secret.trim().to_string())
            }
            (None, None) => return Err(ConfigurationError::missing("oidc.client_secret").into()),
        };

        OidcClientConfig::builder(authority, client_id, client_secret, redirect_uri)
            .response_type(self.response_type)
            .scopes(self.scopes.split(',').map(str::to_string).collect())
            .save_tokens(self.save_tokens)
            .require_https_metadata(self.require_https_metadata)
            .get_claims_from_user_info_endpoint(self.get_claims_from_user_info_endpoint)
            .callback_path(self.callback_path)
            .sign_out_path(self.sign_out_path)
            .build()
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is malformed.
    pub fn from_env() -> Result<Self, Report<ConfigurationError>> {
        Self::from_environment(config::Environment::default())
    }

    /// Loads configuration from an explicit environment source.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is malformed.
    pub fn from_environment(
        environment: config::Environment,
    ) -> Result<Self, Report<ConfigurationError>> {
        config::Config::builder()
            .add_source(environment.separator("__").try_parsing(true))
            .build()
            .and_then(|config| config.try_deserialize())
            .map_err(|e| {
                ConfigurationError::InvalidValue {
                    key: "environment".to_string(),
                    reason: e.to_string(),
                }
                .into()
            })
    }

    /// Returns the validated public origin, serialized as
    /// `https://host[:port]`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not an absolute `https` URL with a
    /// host.
    pub fn public_origin(&self) -> Result<Option<String>, Report<ConfigurationError>> {
        let Some(raw) = &self.public_origin else {
            return Ok(None);
        };
        let url = url::Url::parse(raw.trim())
            .map_err(|e| ConfigurationError::invalid("public_origin", e.to_string()))?;
        if url.scheme() != "https" || url.host_str().is_none() {
            return Err(ConfigurationError::invalid(
                "public_origin",
                "must be an https:// URL with a host",
            )
            .into());
        }
        Ok(Some(url.origin().ascii_serialization()))
    }

    /// Returns the key protecting session and challenge cookies.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured key is not base64 or shorter than
    /// 64 bytes, or if no key is configured outside development.
    pub fn cookie_key(&self) -> Result<Key, Report<ConfigurationError>> {
        let Some(encoded) = &self.cookie_key else {
            if self.environment.is_development() {
                tracing::warn!("COOKIE_KEY not set, generating an ephemeral key");
                return Ok(Key::generate());
            }
            return Err(ConfigurationError::missing("cookie_key").into());
        };

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.expose().trim())
            .map_err(|e| ConfigurationError::InvalidValue {
                key: "cookie_key".to_string(),
                reason: format!("not valid base64: {e}"),
            })?;

        Key::try_from(bytes.as_slice()).map_err(|_| {
            ConfigurationError::InvalidValue {
                key: "cookie_key".to_string(),
                reason: format!("expected at least 64 bytes, got {}", bytes.len()),
            }
            .into()
        })
    }
}
