//! Ledger confirmation of payment proofs.
//!
//! Issuance only checks proofs against policy. Whether the transaction really
//! exists is answered by an injected [`SettlementVerifier`], typically a
//! remote x402 validation service (see `rtap-http`). This core never moves
//! funds.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::proof::PaymentProof;
use crate::tier::TierPolicy;

/// Outcome of a settlement check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    /// The ledger confirms the payment.
    Verified,
    /// The ledger rejects the payment.
    Unverified,
    /// The ledger could not be asked or gave no usable answer.
    Unknown,
}

/// Confirms payment proofs against an external ledger.
#[async_trait]
pub trait SettlementVerifier: Debug + Send + Sync {
    /// Checks whether `proof` settles a payment for `tier`.
    ///
    /// Failures to reach the ledger are reported as
    /// [`SettlementStatus::Unknown`], not as errors.
    async fn verify(&self, proof: &PaymentProof, tier: &TierPolicy) -> SettlementStatus;
}

/// Verifier used when no settlement service is configured. Always answers
/// [`SettlementStatus::Unknown`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSettlement;

#[async_trait]
impl SettlementVerifier for NoSettlement {
    async fn verify(&self, _proof: &PaymentProof, _tier: &TierPolicy) -> SettlementStatus {
        SettlementStatus::Unknown
    }
}

/// Verifier that always returns the same status.
#[derive(Debug, Clone, Copy)]
pub struct StaticSettlement(pub SettlementStatus);

#[async_trait]
impl SettlementVerifier for StaticSettlement {
    async fn verify(&self, _proof: &PaymentProof, _tier: &TierPolicy) -> SettlementStatus {
        self.0
    }
}
