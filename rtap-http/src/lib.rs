//! HTTP transport layer for payment-gated tiered access.
//!
//! Provides header constants and (feature-gated) the two outbound HTTP
//! collaborators of the gateway: the upstream proxy and the remote
//! settlement verifier.
//!
//! # Modules
//!
//! - [`constants`] - HTTP header names and the forwarding allow-list
//! - [`error`] - HTTP transport error types
//! - [`proxy`] - Upstream proxy (feature: `proxy`)
//! - [`settlement`] - Remote settlement verifier (feature: `settlement`)

pub mod constants;
pub mod error;

#[cfg(feature = "proxy")]
pub mod proxy;

#[cfg(feature = "settlement")]
pub mod settlement;
