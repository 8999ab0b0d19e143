//! Minting access tokens in exchange for payment proofs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::{StoreError, TapError};
use crate::proof::PaymentProof;
use crate::settlement::{NoSettlement, SettlementStatus, SettlementVerifier};
use crate::store::TokenStore;
use crate::tier::{Priority, TierPolicyTable};
use crate::timestamp::UnixTimestamp;
use crate::token::{AccessToken, TokenId, TokenState};
use crate::validator;

#[cfg(feature = "telemetry")]
use tracing::instrument;

/// What the caller learns about a freshly issued token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedToken {
    /// Identifier to present on use.
    pub token_id: TokenId,
    /// Tier name.
    pub tier: String,
    /// Priority granted by the tier.
    pub priority: Priority,
    /// Features unlocked by the tier.
    pub features: BTreeSet<String>,
    /// Instant after which the token is no longer accepted.
    pub expires_at: UnixTimestamp,
}

/// Validates payment proofs and stores the resulting tokens.
#[derive(Debug, Clone)]
pub struct IssuanceService {
    table: Arc<TierPolicyTable>,
    store: Arc<TokenStore>,
    verifier: Arc<dyn SettlementVerifier>,
    reject_unknown: bool,
}

impl IssuanceService {
    /// Creates a service that skips ledger confirmation.
    #[must_use]
    pub fn new(table: Arc<TierPolicyTable>, store: Arc<TokenStore>) -> Self {
        Self {
            table,
            store,
            verifier: Arc::new(NoSettlement),
            reject_unknown: false,
        }
    }

    /// Uses `verifier` to confirm payments before issuing.
    #[must_use]
    pub fn with_verifier(mut self, verifier: Arc<dyn SettlementVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    /// Treats [`SettlementStatus::Unknown`] as a rejection.
    #[must_use]
    pub const fn reject_unknown_settlement(mut self, reject: bool) -> Self {
        self.reject_unknown = reject;
        self
    }

    /// The tier table this service issues against.
    #[must_use]
    pub fn table(&self) -> &TierPolicyTable {
        &self.table
    }

    /// Issues a single-use token for `tier_name`.
    ///
    /// Every call mints a new token, so submitting the same proof twice
    /// yields two independent tokens.
    ///
    /// # Errors
    ///
    /// - Validation failures from [`validator::validate`], unchanged.
    /// - [`TapError::PaymentUnverified`] if the settlement verifier rejects
    ///   the proof, or cannot answer while unknown results are rejected.
    /// - [`TapError::CapacityExceeded`] if the store is full.
    /// - [`TapError::StoreUnavailable`] if the token could not be stored.
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "rtap.issue", skip_all, fields(tier = %tier_name), err)
    )]
    pub async fn issue(
        &self,
        tier_name: &str,
        proof: &PaymentProof,
    ) -> Result<IssuedToken, TapError> {
        let tier = validator::validate(&self.table, tier_name, proof)?;

        match self.verifier.verify(proof, tier).await {
            SettlementStatus::Verified => {}
            SettlementStatus::Unverified => {
                return Err(TapError::PaymentUnverified(
                    "settlement service rejected the transaction".into(),
                ));
            }
            SettlementStatus::Unknown if self.reject_unknown => {
                return Err(TapError::PaymentUnverified(
                    "settlement status could not be determined".into(),
                ));
            }
            SettlementStatus::Unknown => {
                #[cfg(feature = "telemetry")]
                tracing::warn!(
                    tx_signature = %proof.tx_signature,
                    "settlement status unknown, issuing on policy validation alone"
                );
            }
        }

        let issued_at = self.store.now();
        let token = AccessToken {
            token_id: TokenId::generate(&proof.sender_address),
            tier: tier.name.clone(),
            payer: proof.sender_address.clone(),
            amount: proof.amount,
            issued_at,
            expires_at: issued_at + tier.lifespan,
            state: TokenState::Active,
        };
        let issued = IssuedToken {
            token_id: token.token_id.clone(),
            tier: tier.name.clone(),
            priority: tier.priority,
            features: tier.features.clone(),
            expires_at: token.expires_at,
        };

        self.store.put(token).map_err(store_failure)?;

        #[cfg(feature = "telemetry")]
        tracing::info!(
            token = %issued.token_id.short(),
            tier = %issued.tier,
            expires_at = %issued.expires_at,
            "access token issued"
        );

        Ok(issued)
    }
}

fn store_failure(err: StoreError) -> TapError {
    match err {
        StoreError::CapacityExceeded { .. } => TapError::CapacityExceeded,
        StoreError::DuplicateToken(_) => {
            #[cfg(feature = "telemetry")]
            tracing::error!(error = %err, "token id collision, refusing to overwrite");
            TapError::StoreUnavailable
        }
    }
}
