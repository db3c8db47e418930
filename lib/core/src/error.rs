//! Error handling foundation for oidc-gate.
//!
//! This module provides only the `Result` type alias using rootcause.
//! Each crate defines its own domain-specific error types in their own
//! error modules, using rootcause's `.context()` to add layer-appropriate
//! context as errors propagate up the stack.

use rootcause::Report;

/// A Result type alias using rootcause's Report for error handling.
///
/// Startup paths (configuration, discovery, pipeline assembly) return this;
/// per-request authentication returns plain domain enums instead.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;
