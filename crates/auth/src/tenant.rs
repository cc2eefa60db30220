use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tidyops_core::{DomainError, TenantId, UserId};

use crate::{SubscriptionStatus, Tier};

/// Independently toggleable feature area.
///
/// - `shield`: video evidence for dispute protection
/// - `route`: route planning
/// - `fill`: waitlist / marketplace revenue recovery
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Module {
    Shield,
    Route,
    Fill,
}

impl Module {
    pub const ALL: [Module; 3] = [Module::Shield, Module::Route, Module::Fill];

    pub fn as_str(self) -> &'static str {
        match self {
            Module::Shield => "shield",
            Module::Route => "route",
            Module::Fill => "fill",
        }
    }
}

impl core::fmt::Display for Module {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Module {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Module::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| DomainError::unknown("module", s))
    }
}

/// A cleaning company: owns subscription and module state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    pub phone: Option<String>,
    pub subscription_tier: Option<Tier>,
    pub subscription_status: Option<SubscriptionStatus>,
    pub shield_enabled: bool,
    pub route_enabled: bool,
    pub fill_enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl Tenant {
    /// Raw flag for a module. Callers making access decisions should go through
    /// [`crate::policy::module_enabled`], which also handles the no-tenant case.
    pub fn module_flag(&self, module: Module) -> bool {
        match module {
            Module::Shield => self.shield_enabled,
            Module::Route => self.route_enabled,
            Module::Fill => self.fill_enabled,
        }
    }

    /// Apply a partial settings update in place.
    pub fn apply_patch(&mut self, patch: &TenantPatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(phone) = &patch.phone {
            self.phone = Some(phone.clone());
        }
        if let Some(tier) = patch.subscription_tier {
            self.subscription_tier = Some(tier);
        }
        if let Some(status) = patch.subscription_status {
            self.subscription_status = Some(status);
        }
        if let Some(v) = patch.shield_enabled {
            self.shield_enabled = v;
        }
        if let Some(v) = patch.route_enabled {
            self.route_enabled = v;
        }
        if let Some(v) = patch.fill_enabled {
            self.fill_enabled = v;
        }
    }
}

/// Fields required to create a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTenant {
    pub name: String,
    pub phone: Option<String>,
    pub subscription_tier: Tier,
    pub subscription_status: SubscriptionStatus,
}

impl NewTenant {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("company name cannot be empty"));
        }
        Ok(())
    }
}

/// Partial tenant update (absent fields are left untouched).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub subscription_tier: Option<Tier>,
    #[serde(default)]
    pub subscription_status: Option<SubscriptionStatus>,
    #[serde(default)]
    pub shield_enabled: Option<bool>,
    #[serde(default)]
    pub route_enabled: Option<bool>,
    #[serde(default)]
    pub fill_enabled: Option<bool>,
}

impl TenantPatch {
    pub fn status(status: SubscriptionStatus) -> Self {
        Self {
            subscription_status: Some(status),
            ..Default::default()
        }
    }

    pub fn module(module: Module, enabled: bool) -> Self {
        let mut patch = Self::default();
        match module {
            Module::Shield => patch.shield_enabled = Some(enabled),
            Module::Route => patch.route_enabled = Some(enabled),
            Module::Fill => patch.fill_enabled = Some(enabled),
        }
        patch
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Profile row linking an identity to its tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: UserId,
    pub tenant_id: Option<TenantId>,
    pub full_name: Option<String>,
    pub phone: Option<String>,
}
