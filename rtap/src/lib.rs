#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Core types for payment-gated tiered access.
//!
//! A caller pays, presents a payment proof, and receives a short-lived,
//! single-use access token whose tier fixes its lifespan, priority and
//! feature set. Presenting the token later authorizes exactly one request
//! against a static set of upstream endpoints.
//!
//! This crate is transport-agnostic. HTTP proxying and remote settlement live
//! in `rtap-http`, and the gateway binary in `rtap-gateway`.
//!
//! # Modules
//!
//! - [`tier`] - Tier policies and the immutable policy table
//! - [`proof`] - Payment proofs parsed from loosely typed JSON
//! - [`validator`] - Policy check of a proof against a tier
//! - [`settlement`] - Ledger confirmation trait
//! - [`token`] - Access token records and identifiers
//! - [`store`] - Concurrent TTL store with at-most-once consumption
//! - [`issuance`] - Minting tokens for valid payments
//! - [`consumption`] - Redeeming tokens
//! - [`registry`] - Endpoint table and routing
//! - [`timestamp`] - Millisecond timestamps and injectable clocks
//! - [`error`] - Error taxonomy
//!
//! # Feature Flags
//!
//! - `telemetry` - Enables tracing instrumentation for debugging and monitoring

pub mod consumption;
pub mod error;
pub mod issuance;
pub mod proof;
pub mod registry;
pub mod settlement;
pub mod store;
pub mod tier;
pub mod timestamp;
pub mod token;
pub mod validator;
