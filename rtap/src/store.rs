//! Concurrent, TTL-aware store of access tokens.
//!
//! [`TokenStore`] exclusively owns every [`AccessToken`]. Records leave the
//! store only through expiry, either lazily when a lookup finds them expired
//! or in bulk through [`TokenStore::sweep_expired`]. Consumption flips the
//! record's state but keeps it, so a second use reports
//! [`TapError::AlreadyConsumed`] until the record expires.
//!
//! # Atomicity
//!
//! The map is a [`DashMap`]. Consumption and expiry-driven removal of a key
//! both run while holding that key's shard write lock through the entry API,
//! so a token can never be read as available after it was consumed or
//! purged. Inserts of distinct keys proceed concurrently.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{StoreError, TapError};
use crate::timestamp::{Clock, SystemClock, UnixTimestamp};
use crate::token::{AccessToken, TokenId, TokenState};

/// Default maximum number of live tokens.
pub const DEFAULT_CAPACITY: usize = 100_000;

/// In-memory token store.
#[derive(Debug)]
pub struct TokenStore {
    tokens: DashMap<TokenId, AccessToken>,
    capacity: usize,
    clock: Arc<dyn Clock>,
}

/// Per-tier token counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierStats {
    /// Live tokens of this tier.
    pub total: usize,
    /// Live tokens not yet used.
    pub active: usize,
    /// Live tokens already used.
    pub consumed: usize,
}

/// Snapshot of the store's contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Live tokens.
    pub total_tokens: usize,
    /// Live tokens not yet used.
    pub active_tokens: usize,
    /// Live tokens already used.
    pub consumed_tokens: usize,
    /// Counts per tier name.
    pub by_tier: BTreeMap<String, TierStats>,
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl TokenStore {
    /// Creates a store reading wall-clock time.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_clock(capacity, Arc::new(SystemClock))
    }

    /// Creates a store reading time from `clock`.
    #[must_use]
    pub fn with_clock(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            tokens: DashMap::new(),
            capacity: capacity.max(1),
            clock,
        }
    }

    /// Current time according to the store's clock.
    #[must_use]
    pub fn now(&self) -> UnixTimestamp {
        self.clock.now()
    }

    /// Maximum number of live tokens.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of stored records, including expired ones not yet swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Returns `true` if no records are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Inserts a freshly issued token.
    ///
    /// When the store is full, expired records are swept first. The capacity
    /// check and the insert are not one atomic step, so concurrent inserts
    /// may overshoot the bound by a few records.
    ///
    /// # Errors
    ///
    /// - [`StoreError::CapacityExceeded`] if the store is still full after
    ///   sweeping.
    /// - [`StoreError::DuplicateToken`] if the id is already present.
    pub fn put(&self, token: AccessToken) -> Result<(), StoreError> {
        if self.tokens.len() >= self.capacity {
            self.sweep_expired();
            if self.tokens.len() >= self.capacity {
                return Err(StoreError::CapacityExceeded {
                    capacity: self.capacity,
                });
            }
        }
        match self.tokens.entry(token.token_id.clone()) {
            Entry::Occupied(entry) => Err(StoreError::DuplicateToken(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(token);
                Ok(())
            }
        }
    }

    /// Returns a copy of a live token.
    ///
    /// The expiry time is checked on every call, so a token is unreachable
    /// from the instant it expires even if no sweep has run yet. Expired
    /// records found here are removed.
    #[must_use]
    pub fn get(&self, token_id: &TokenId) -> Option<AccessToken> {
        let now = self.clock.now();
        let live = self
            .tokens
            .get(token_id)
            .map(|token| (!token.is_expired_at(now)).then(|| token.clone()))?;
        if live.is_none() {
            self.tokens
                .remove_if(token_id, |_, token| token.is_expired_at(now));
        }
        live
    }

    /// Consumes a token exactly once.
    ///
    /// # Errors
    ///
    /// - [`TapError::NotFound`] if the token does not exist or has expired.
    /// - [`TapError::AlreadyConsumed`] if it was used before.
    pub fn try_consume(&self, token_id: &TokenId) -> Result<AccessToken, TapError> {
        self.try_consume_if(token_id, |_| Ok(()))
    }

    /// Consumes a token exactly once, provided `check` accepts it.
    ///
    /// `check` runs inside the critical section. If it fails, its error is
    /// returned and the token stays unused.
    ///
    /// # Errors
    ///
    /// [`TapError::NotFound`], [`TapError::AlreadyConsumed`], or the error
    /// returned by `check`.
    pub fn try_consume_if<F>(&self, token_id: &TokenId, check: F) -> Result<AccessToken, TapError>
    where
        F: FnOnce(&AccessToken) -> Result<(), TapError>,
    {
        let now = self.clock.now();
        match self.tokens.entry(token_id.clone()) {
            Entry::Vacant(_) => Err(TapError::NotFound),
            Entry::Occupied(entry) if entry.get().is_expired_at(now) => {
                entry.remove();
                Err(TapError::NotFound)
            }
            Entry::Occupied(mut entry) => {
                if entry.get().is_consumed() {
                    return Err(TapError::AlreadyConsumed);
                }
                check(entry.get())?;
                let token = entry.get_mut();
                token.state = TokenState::Consumed { at: now };
                Ok(token.clone())
            }
        }
    }

    /// Removes every expired record, consumed or not. Returns how many were
    /// removed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut removed = 0;
        self.tokens.retain(|_, token| {
            let keep = !token.is_expired_at(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    /// Counts live tokens overall and per tier. Expired records awaiting a
    /// sweep are skipped.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        let now = self.clock.now();
        let mut stats = StoreStats::default();
        for entry in &self.tokens {
            let token = entry.value();
            if token.is_expired_at(now) {
                continue;
            }
            let tier = stats.by_tier.entry(token.tier.clone()).or_default();
            stats.total_tokens += 1;
            tier.total += 1;
            if token.is_consumed() {
                stats.consumed_tokens += 1;
                tier.consumed += 1;
            } else {
                stats.active_tokens += 1;
                tier.active += 1;
            }
        }
        stats
    }
}
