//! Tier policies: what each access level costs and grants.
//!
//! A [`TierPolicyTable`] is built once at startup and never mutated. Its
//! constructor enforces that names are unique, that every tier has its own
//! [`Priority`], and that a higher priority always costs strictly more.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::time::Duration;

use crate::error::PolicyError;

/// Scheduling priority granted by a tier. Ordered `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Best-effort access.
    Low,
    /// Preferred over low-priority traffic.
    Medium,
    /// Served first.
    High,
}

impl Priority {
    /// Lowercase wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named access level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierPolicy {
    /// Unique tier name (e.g. `"enhanced"`).
    pub name: String,
    /// Minimum accepted payment amount.
    pub min_payment: Decimal,
    /// How long an issued token stays valid.
    #[serde(rename = "lifespan_secs", with = "duration_secs")]
    pub lifespan: Duration,
    /// Scheduling priority attached to consumed requests.
    pub priority: Priority,
    /// Feature flags unlocked by this tier.
    pub features: BTreeSet<String>,
}

impl TierPolicy {
    /// Creates a tier policy.
    pub fn new<N, I, F>(
        name: N,
        min_payment: Decimal,
        lifespan: Duration,
        priority: Priority,
        features: I,
    ) -> Self
    where
        N: Into<String>,
        I: IntoIterator<Item = F>,
        F: Into<String>,
    {
        Self {
            name: name.into(),
            min_payment,
            lifespan,
            priority,
            features: features.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns `true` if this tier ranks at least as high as `other`.
    #[must_use]
    pub fn satisfies(&self, other: &Self) -> bool {
        self.priority >= other.priority
    }
}

/// Immutable lookup table of tier policies, ordered by priority.
#[derive(Debug, Clone)]
pub struct TierPolicyTable {
    tiers: Vec<TierPolicy>,
    by_name: HashMap<String, usize>,
}

impl TierPolicyTable {
    /// Builds a table, checking its invariants.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] if the table is empty, a name is blank or
    /// repeated, two tiers share a priority, a payment floor is negative, or
    /// payment floors do not strictly increase with priority.
    pub fn new(mut tiers: Vec<TierPolicy>) -> Result<Self, PolicyError> {
        if tiers.is_empty() {
            return Err(PolicyError::Empty);
        }
        tiers.sort_by_key(|t| t.priority);

        let mut by_name = HashMap::with_capacity(tiers.len());
        for (idx, tier) in tiers.iter().enumerate() {
            if tier.name.trim().is_empty() {
                return Err(PolicyError::EmptyName);
            }
            if tier.min_payment.is_sign_negative() {
                return Err(PolicyError::NegativePayment(tier.name.clone()));
            }
            if by_name.insert(tier.name.clone(), idx).is_some() {
                return Err(PolicyError::DuplicateTier(tier.name.clone()));
            }
        }

        for pair in tiers.windows(2) {
            let (lower, higher) = (&pair[0], &pair[1]);
            if lower.priority == higher.priority {
                return Err(PolicyError::DuplicatePriority {
                    priority: lower.priority,
                    first: lower.name.clone(),
                    second: higher.name.clone(),
                });
            }
            if lower.min_payment >= higher.min_payment {
                return Err(PolicyError::NonIncreasingPayment {
                    lower: lower.name.clone(),
                    higher: higher.name.clone(),
                });
            }
        }

        Ok(Self { tiers, by_name })
    }

    /// Looks up a tier by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&TierPolicy> {
        self.by_name.get(name).map(|&idx| &self.tiers[idx])
    }

    /// Returns `true` if a tier with this name exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Iterates tiers from lowest to highest priority.
    pub fn iter(&self) -> impl Iterator<Item = &TierPolicy> {
        self.tiers.iter()
    }

    /// Number of tiers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    /// Always `false`; an empty table cannot be constructed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }
}

impl Default for TierPolicyTable {
    /// The basic / enhanced / premium table of the Tiered Access Protocol.
    fn default() -> Self {
        Self::new(default_tiers()).expect("default tiers are valid")
    }
}

/// The three stock tiers.
#[must_use]
pub fn default_tiers() -> Vec<TierPolicy> {
    const HOUR: u64 = 3600;
    vec![
        TierPolicy::new(
            "basic",
            Decimal::new(1, 2),
            Duration::from_secs(HOUR),
            Priority::Low,
            ["standard_processing", "basic_data"],
        ),
        TierPolicy::new(
            "enhanced",
            Decimal::new(5, 2),
            Duration::from_secs(6 * HOUR),
            Priority::Medium,
            ["higher_priority", "bundled_data", "extended_responses"],
        ),
        TierPolicy::new(
            "premium",
            Decimal::new(10, 2),
            Duration::from_secs(24 * HOUR),
            Priority::High,
            [
                "highest_priority",
                "persistent_logging",
                "premium_resources",
                "alpha_insights",
            ],
        ),
    ]
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
