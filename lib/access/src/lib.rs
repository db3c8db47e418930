//! Authentication domain types for oidc-gate.
//!
//! This crate provides the framework-independent half of the authentication
//! bootstrap:
//! - OIDC client configuration (`OidcClientConfig`, built once and immutable)
//! - Scheme registration and default-scheme validation (`AuthenticationOptions`)
//! - The session principal stored in the session cookie (`SessionPrincipal`)
//! - Challenge state carried between redirect and callback (`PendingChallenge`)
//! - Endpoint access requirements (`Access`)
//! - The error taxonomy for sign-in attempts and startup configuration
//!
//! # Example
//!
//! ```
//! use oidc_gate_access::{Access, Claim, Decision, SessionPrincipal};
//! use chrono::Duration;
//!
//! let principal = SessionPrincipal::new(
//!     vec![Claim::new("sub", "auth0|123456"), Claim::new("role", "editor")],
//!     Duration::hours(1),
//! );
//!
//! assert_eq!(Access::Authenticated.evaluate(Some(&principal)), Decision::Allow);
//! assert_eq!(Access::claim_value("role", "admin").evaluate(Some(&principal)), Decision::Forbid);
//! assert_eq!(Access::Authenticated.evaluate(None), Decision::Challenge);
//! ```

pub mod challenge;
pub mod error;
pub mod oidc;
pub mod options;
pub mod policy;
pub mod session;

// Re-export main types at crate root
pub use challenge::{CallbackParams, PendingChallenge, sanitize_return_url};
pub use error::{AuthenticationError, ConfigurationError};
pub use oidc::{ClientSecret, OidcClientConfig, OidcClientConfigBuilder, ResponseType};
pub use options::{AuthenticationOptions, COOKIE_SCHEME, OIDC_SCHEME, SchemeKind, SchemeRegistry};
pub use policy::{Access, Decision};
pub use session::{Claim, SavedTokens, SessionPrincipal, claim_types, merge_unique_claims};
