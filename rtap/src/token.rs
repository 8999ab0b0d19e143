//! Access token records and identifiers.

use rand::RngExt;
use rand::rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::timestamp::UnixTimestamp;

/// Opaque token identifier: `hex(sha256(seed ‖ payer))`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(String);

impl TokenId {
    /// Mints a fresh id for `payer` from a 32-byte CSPRNG seed.
    #[must_use]
    pub fn generate(payer: &str) -> Self {
        let seed: [u8; 32] = rng().random();
        Self::derive(&seed, payer)
    }

    /// Derives the id for a given seed and payer.
    #[must_use]
    pub fn derive(seed: &[u8; 32], payer: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(seed);
        hasher.update(payer.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// The id as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 characters, for logs.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TokenId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for TokenId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Lifecycle state of a stored token.
///
/// Moves `Active → Consumed` on first use. Expiry is not stored: once the
/// clock reaches `expires_at` the record is removed under the same per-key
/// lock that guards consumption, so an expired token is simply absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum TokenState {
    /// Issued and not used yet.
    Active,
    /// Used once.
    Consumed {
        /// When the token was used.
        at: UnixTimestamp,
    },
}

/// A single-use, time-bounded credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    /// Unique identifier.
    pub token_id: TokenId,
    /// Name of the tier that was paid for.
    pub tier: String,
    /// Sender address of the funding payment.
    pub payer: String,
    /// Amount of the funding payment.
    pub amount: Decimal,
    /// Issuance time.
    pub issued_at: UnixTimestamp,
    /// `issued_at + tier.lifespan`.
    pub expires_at: UnixTimestamp,
    /// Current lifecycle state.
    #[serde(flatten)]
    pub state: TokenState,
}

impl AccessToken {
    /// Returns `true` once `now` reaches `expires_at`.
    #[must_use]
    pub fn is_expired_at(&self, now: UnixTimestamp) -> bool {
        now >= self.expires_at
    }

    /// Returns `true` if the token has been used.
    #[must_use]
    pub const fn is_consumed(&self) -> bool {
        matches!(self.state, TokenState::Consumed { .. })
    }

    /// When the token was used, if it was.
    #[must_use]
    pub const fn consumed_at(&self) -> Option<UnixTimestamp> {
        match self.state {
            TokenState::Consumed { at } => Some(at),
            TokenState::Active => None,
        }
    }
}
