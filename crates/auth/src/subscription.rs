use core::str::FromStr;

use serde::{Deserialize, Serialize};

use tidyops_core::DomainError;

/// Subscription tier of a tenant.
///
/// Ordering: `basic(0) < trial(1) < pro(2) < enterprise(3)`.
///
/// Note that `trial` ranks above the paid `basic` plan. This is the current
/// product policy and is kept as-is; it is not a typo.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Basic,
    Trial,
    Pro,
    Enterprise,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Basic, Tier::Trial, Tier::Pro, Tier::Enterprise];

    pub fn ordinal(self) -> u8 {
        match self {
            Tier::Basic => 0,
            Tier::Trial => 1,
            Tier::Pro => 2,
            Tier::Enterprise => 3,
        }
    }

    /// A missing tier is treated as `basic`.
    pub fn or_basic(tier: Option<Tier>) -> Tier {
        tier.unwrap_or(Tier::Basic)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Basic => "basic",
            Tier::Trial => "trial",
            Tier::Pro => "pro",
            Tier::Enterprise => "enterprise",
        }
    }
}

impl core::fmt::Display for Tier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tier::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DomainError::unknown("subscription tier", s))
    }
}

/// Billing status of a tenant's subscription.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    PastDue,
    Canceled,
    Trialing,
}

impl SubscriptionStatus {
    pub const ALL: [SubscriptionStatus; 4] = [
        SubscriptionStatus::Active,
        SubscriptionStatus::PastDue,
        SubscriptionStatus::Canceled,
        SubscriptionStatus::Trialing,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Trialing => "trialing",
        }
    }

    /// Status a newly onboarded tenant starts in for the given plan.
    pub fn initial_for(tier: Tier) -> Self {
        match tier {
            Tier::Trial => SubscriptionStatus::Trialing,
            _ => SubscriptionStatus::Active,
        }
    }
}

impl core::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SubscriptionStatus::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DomainError::unknown("subscription status", s))
    }
}
