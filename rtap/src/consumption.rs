//! Redeeming access tokens.
//!
//! A successful redemption yields an [`AuthorizedRequest`]: proof that this
//! caller, and no other, used the token, together with the tier it grants.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::TapError;
use crate::store::TokenStore;
use crate::tier::{TierPolicy, TierPolicyTable};
use crate::timestamp::UnixTimestamp;
use crate::token::TokenId;

#[cfg(feature = "telemetry")]
use tracing::instrument;

/// What the token is being redeemed for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RequestContext {
    /// Service or path being accessed.
    pub service: String,
    /// Free-form caller metadata.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl RequestContext {
    /// Creates a context for `service`.
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A request whose token was consumed by this caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizedRequest {
    /// The consumed token.
    pub token_id: TokenId,
    /// Tier granted by the token.
    pub tier: TierPolicy,
    /// Payer recorded at issuance.
    pub payer: String,
    /// Moment of consumption.
    pub consumed_at: UnixTimestamp,
    /// Moment the token record expires.
    pub expires_at: UnixTimestamp,
    /// What the token was redeemed for.
    pub context: RequestContext,
}

/// Turns tokens into authorized requests, at most once per token.
#[derive(Debug, Clone)]
pub struct ConsumptionService {
    table: Arc<TierPolicyTable>,
    store: Arc<TokenStore>,
}

impl ConsumptionService {
    /// Creates a service over `store`, resolving tiers from `table`.
    #[must_use]
    pub const fn new(table: Arc<TierPolicyTable>, store: Arc<TokenStore>) -> Self {
        Self { table, store }
    }

    /// Consumes `token_id` for `context`.
    ///
    /// # Errors
    ///
    /// - [`TapError::NotFound`] if the token is unknown or expired.
    /// - [`TapError::AlreadyConsumed`] if it was used before.
    pub fn use_token(
        &self,
        token_id: &TokenId,
        context: RequestContext,
    ) -> Result<AuthorizedRequest, TapError> {
        self.use_token_with(token_id, context, |_| Ok(()))
    }

    /// Consumes `token_id` only if `check` accepts the token's tier.
    ///
    /// When `check` fails its error is returned and the token remains
    /// usable.
    ///
    /// # Errors
    ///
    /// As [`Self::use_token`], plus whatever `check` returns.
    #[cfg_attr(
        feature = "telemetry",
        instrument(
            name = "rtap.use_token",
            skip_all,
            fields(token = %token_id.short(), service = %context.service),
            err
        )
    )]
    pub fn use_token_with<F>(
        &self,
        token_id: &TokenId,
        context: RequestContext,
        check: F,
    ) -> Result<AuthorizedRequest, TapError>
    where
        F: FnOnce(&TierPolicy) -> Result<(), TapError>,
    {
        let mut granted = None;
        let token = self.store.try_consume_if(token_id, |token| {
            // Tables are immutable, so a stored tier name always resolves.
            let tier = self
                .table
                .get(&token.tier)
                .ok_or(TapError::StoreUnavailable)?;
            check(tier)?;
            granted = Some(tier);
            Ok(())
        })?;
        let tier = granted.ok_or(TapError::StoreUnavailable)?.clone();
        let consumed_at = token.consumed_at().ok_or(TapError::StoreUnavailable)?;

        #[cfg(feature = "telemetry")]
        tracing::info!(tier = %tier.name, priority = %tier.priority, "access token consumed");

        Ok(AuthorizedRequest {
            token_id: token.token_id,
            tier,
            payer: token.payer,
            consumed_at,
            expires_at: token.expires_at,
            context,
        })
    }
}
