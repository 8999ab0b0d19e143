//! Error types for tiered access operations.
//!
//! [`TapError`] is the taxonomy returned across component boundaries. Lower
//! layers ([`StoreError`]) and startup validation ([`PolicyError`],
//! [`RegistryError`]) have their own enums.

use rust_decimal::Decimal;

use crate::tier::Priority;
use crate::token::TokenId;

/// Literal message returned when a presented token does not exist.
pub const TOKEN_NOT_FOUND_MESSAGE: &str = "Access token not found.";

/// Literal message returned when a presented token was already used.
///
/// Expired tokens that were already purged report [`TOKEN_NOT_FOUND_MESSAGE`]
/// instead; the two cases share this wording only while the record is still
/// present.
pub const TOKEN_USED_MESSAGE: &str = "Access token expired or already used.";

/// Errors returned by issuance, consumption, routing, and proxying.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TapError {
    /// The payment proof is missing a required field or has a wrong type.
    #[error("Malformed payment proof: {0}")]
    MalformedProof(String),

    /// The proof amount is below the tier's minimum payment.
    #[error("Payment validation failed. Required: {required}, provided: {provided}")]
    InsufficientPayment {
        /// Minimum payment for the requested tier.
        required: Decimal,
        /// Amount carried by the proof.
        provided: Decimal,
    },

    /// The requested tier does not exist in the policy table.
    #[error("Invalid tier: {0}")]
    UnknownTier(String),

    /// The settlement verifier rejected the proof.
    #[error("Payment could not be verified: {0}")]
    PaymentUnverified(String),

    /// The token store is full.
    #[error("Token store capacity exceeded")]
    CapacityExceeded,

    /// The token could not be stored.
    #[error("Token store unavailable")]
    StoreUnavailable,

    /// The token does not exist or has expired and been purged.
    #[error("{}", TOKEN_NOT_FOUND_MESSAGE)]
    NotFound,

    /// The token was already consumed.
    #[error("{}", TOKEN_USED_MESSAGE)]
    AlreadyConsumed,

    /// No endpoint is registered for the path.
    #[error("No route for path '{0}'")]
    RouteNotFound(String),

    /// The endpoint exists but does not accept the method.
    #[error("Method {method} not allowed for '{path}'")]
    MethodNotAllowed {
        /// Requested path.
        path: String,
        /// Rejected method.
        method: String,
    },

    /// The token's tier ranks below the endpoint's required tier.
    #[error("Tier '{actual}' does not grant access; '{required}' or higher is required")]
    InsufficientTier {
        /// Tier required by the endpoint.
        required: String,
        /// Tier carried by the token.
        actual: String,
    },

    /// The upstream could not be reached or timed out.
    #[error("Upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    /// The upstream answered with a body that does not match its content type.
    #[error("Upstream returned a malformed response: {0}")]
    UpstreamMalformed(String),
}

/// Errors raised by [`TokenStore`](crate::store::TokenStore) insertion.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// A record with the same id already exists.
    ///
    /// Token ids come from a CSPRNG seed, so this means the generator is
    /// broken.
    #[error("duplicate token id {0}")]
    DuplicateToken(TokenId),

    /// The store holds `capacity` live records.
    #[error("token store is full ({capacity} records)")]
    CapacityExceeded {
        /// Configured capacity.
        capacity: usize,
    },
}

/// Invalid tier policy table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    /// The table has no tiers.
    #[error("tier policy table is empty")]
    Empty,

    /// A tier has an empty name.
    #[error("tier name must not be empty")]
    EmptyName,

    /// Two tiers share a name.
    #[error("duplicate tier '{0}'")]
    DuplicateTier(String),

    /// Two tiers share a priority, so their rank is ambiguous.
    #[error("tiers '{first}' and '{second}' share priority {priority}")]
    DuplicatePriority {
        /// The shared priority.
        priority: Priority,
        /// First tier with this priority.
        first: String,
        /// Second tier with this priority.
        second: String,
    },

    /// A higher-priority tier does not cost strictly more.
    #[error("tier '{higher}' must require more than '{lower}'")]
    NonIncreasingPayment {
        /// Lower-ranked tier.
        lower: String,
        /// Higher-ranked tier.
        higher: String,
    },

    /// A tier has a negative minimum payment.
    #[error("tier '{0}' has a negative minimum payment")]
    NegativePayment(String),
}

/// Invalid endpoint registry definition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Two endpoints share a path.
    #[error("duplicate endpoint path '{0}'")]
    DuplicatePath(String),

    /// The path does not start with `/`.
    #[error("endpoint path '{0}' must start with '/'")]
    InvalidPath(String),

    /// The endpoint accepts no methods.
    #[error("endpoint '{0}' allows no methods")]
    NoMethods(String),

    /// The endpoint requires a tier that is not in the policy table.
    #[error("endpoint '{path}' requires unknown tier '{tier}'")]
    UnknownTier {
        /// Endpoint path.
        path: String,
        /// Missing tier name.
        tier: String,
    },
}
