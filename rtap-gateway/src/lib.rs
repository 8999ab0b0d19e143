//! Payment-gated tiered access gateway server.
//!
//! Sells single-use access tokens for payment proofs and fronts a static set
//! of upstream endpoints with them, using Axum route handlers.
//!
//! # Modules
//!
//! - [`handlers`] - Axum route handlers and router builder
//! - [`error`] - Gateway error types and their HTTP mapping
//! - [`config`] - Server configuration with environment variable expansion
//! - [`sweeper`] - Background removal of expired tokens
//! - [`util`] - Graceful shutdown signal handling

pub mod config;
pub mod error;
pub mod handlers;
pub mod sweeper;
pub mod util;

pub use handlers::{GatewayState, SharedState, gateway_router};
