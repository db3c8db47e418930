//! Core types and utilities for oidc-gate.
//!
//! This crate provides the identifiers and error handling shared by the
//! access domain crate and the web server.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{FlowId, ParseIdError, SessionId};
