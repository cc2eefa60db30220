//! Route Guard Chain.
//!
//! One navigation attempt is evaluated against a snapshot of the caller's
//! resolution state and produces a [`GuardState`]:
//!
//! ```text
//! no session ──────────────────────────────────────────────▶ Denied(sign-in)
//! role unresolved ─────────────────────────────────────────▶ Loading
//! index route ─────────────────────────────────────────────▶ Landing(role view)
//! role ∉ allowed_roles ────────────────────────────────────▶ Denied(fallback)
//! tenant unresolved ───────────────────────────────────────▶ Loading
//! module disabled ─────────────────────────────────────────▶ Denied(upgrade?upgrade=<module>)
//! tier too low ────────────────────────────────────────────▶ Denied(upgrade?plan=<tier>)
//! otherwise ───────────────────────────────────────────────▶ Permitted
//! ```
//!
//! The role check runs before any tenant check, so an identity without
//! role-level access learns nothing about the tenant's modules.

use serde::Serialize;

use crate::{
    Module, Role, RouteRule, RouteTable, Tenant, Tier, landing_path,
    policy::{module_enabled, role_allowed, tier_sufficient},
};

/// Progress of one asynchronous resolution (role or tenant).
///
/// `Refreshing` carries the previous value: a cache refresh must not revoke
/// access that was already granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution<T> {
    Unresolved,
    Refreshing(T),
    Resolved(T),
}

impl<T> Resolution<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Resolution::Unresolved => None,
            Resolution::Refreshing(v) | Resolution::Resolved(v) => Some(v),
        }
    }

    pub fn as_ref(&self) -> Resolution<&T> {
        match self {
            Resolution::Unresolved => Resolution::Unresolved,
            Resolution::Refreshing(v) => Resolution::Refreshing(v),
            Resolution::Resolved(v) => Resolution::Resolved(v),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Resolution<U> {
        match self {
            Resolution::Unresolved => Resolution::Unresolved,
            Resolution::Refreshing(v) => Resolution::Refreshing(f(v)),
            Resolution::Resolved(v) => Resolution::Resolved(f(v)),
        }
    }

    pub fn is_unresolved(&self) -> bool {
        matches!(self, Resolution::Unresolved)
    }
}

/// Everything the guard needs to know about the caller at one instant.
#[derive(Debug, Clone, Copy)]
pub struct AccessSnapshot<'a> {
    pub authenticated: bool,
    pub role: Resolution<Role>,
    /// `Resolved(None)` = the identity has no tenant (fail closed on tenant gates).
    pub tenant: Resolution<Option<&'a Tenant>>,
}

impl<'a> AccessSnapshot<'a> {
    pub fn signed_out() -> Self {
        Self {
            authenticated: false,
            role: Resolution::Unresolved,
            tenant: Resolution::Unresolved,
        }
    }

    pub fn resolved(role: Role, tenant: Option<&'a Tenant>) -> Self {
        Self {
            authenticated: true,
            role: Resolution::Resolved(role),
            tenant: Resolution::Resolved(tenant),
        }
    }
}

/// Where to send an identity that fails a role check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum Fallback {
    /// The caller's own landing view.
    RoleLanding,
    Path(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuardConfig {
    pub sign_in_path: String,
    /// Settings/billing surface where a tenant can enable modules or upgrade.
    pub upgrade_path: String,
    pub fallback: Fallback,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            sign_in_path: "/auth".to_string(),
            upgrade_path: "/settings/billing".to_string(),
            fallback: Fallback::RoleLanding,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RedirectReason {
    SignInRequired,
    UnknownRoute,
    RoleNotAllowed,
    ModuleDisabled(Module),
    TierInsufficient(Tier),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Redirect {
    pub to: String,
    pub reason: RedirectReason,
}

/// Outcome of one navigation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GuardState {
    /// Not enough data yet; render a non-interactive loading indicator.
    Loading,
    Denied(Redirect),
    /// Index route: forward to the role's landing view (not a denial).
    Landing { to: String },
    Permitted,
}

impl GuardState {
    pub fn is_permitted(&self) -> bool {
        matches!(self, GuardState::Permitted)
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, GuardState::Denied(_))
    }

    /// Navigation target, if this state is a redirect of any kind.
    pub fn redirect_to(&self) -> Option<&str> {
        match self {
            GuardState::Denied(r) => Some(&r.to),
            GuardState::Landing { to } => Some(to),
            _ => None,
        }
    }
}

/// Generic interpreter of a [`RouteTable`].
#[derive(Debug, Clone)]
pub struct RouteGuard {
    table: RouteTable,
    config: GuardConfig,
}

impl RouteGuard {
    pub fn new(table: RouteTable, config: GuardConfig) -> Self {
        Self { table, config }
    }

    pub fn with_defaults() -> Self {
        Self::new(RouteTable::default_routes(), GuardConfig::default())
    }

    pub fn table(&self) -> &RouteTable {
        &self.table
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn evaluate(&self, path: &str, snapshot: &AccessSnapshot<'_>) -> GuardState {
        let state = self.decide(path, snapshot);
        if let GuardState::Denied(redirect) = &state {
            tracing::debug!(path, to = %redirect.to, reason = ?redirect.reason, "navigation denied");
        }
        state
    }

    fn decide(&self, path: &str, snapshot: &AccessSnapshot<'_>) -> GuardState {
        if !snapshot.authenticated {
            return self.deny(self.config.sign_in_path.clone(), RedirectReason::SignInRequired);
        }

        let Some(role) = snapshot.role.value().copied() else {
            return GuardState::Loading;
        };

        let Some(rule) = self.table.lookup(path) else {
            return self.deny(self.fallback_for(role), RedirectReason::UnknownRoute);
        };

        if rule.index {
            return GuardState::Landing {
                to: landing_path(role).to_string(),
            };
        }

        if !role_allowed(role, &rule.requirement.allowed_roles) {
            return self.deny(self.fallback_for(role), RedirectReason::RoleNotAllowed);
        }

        let Some(tenant) = snapshot.tenant.value().copied() else {
            return GuardState::Loading;
        };

        self.check_tenant_gates(rule, tenant)
    }

    fn check_tenant_gates(&self, rule: &RouteRule, tenant: Option<&Tenant>) -> GuardState {
        let req = &rule.requirement;

        if let Some(module) = req.required_module {
            if !module_enabled(tenant, Some(module)) {
                return self.deny(
                    format!("{}?upgrade={}", self.config.upgrade_path, module),
                    RedirectReason::ModuleDisabled(module),
                );
            }
        }

        if let Some(tier) = req.required_tier {
            if !tier_sufficient(tenant, Some(tier)) {
                return self.deny(
                    format!("{}?plan={}", self.config.upgrade_path, tier),
                    RedirectReason::TierInsufficient(tier),
                );
            }
        }

        GuardState::Permitted
    }

    fn fallback_for(&self, role: Role) -> String {
        match &self.config.fallback {
            Fallback::RoleLanding => landing_path(role).to_string(),
            Fallback::Path(p) => p.clone(),
        }
    }

    fn deny(&self, to: String, reason: RedirectReason) -> GuardState {
        GuardState::Denied(Redirect { to, reason })
    }

    /// Audit view of a decision: every check with its outcome.
    ///
    /// Checks after a failed role check are reported as skipped, never evaluated.
    pub fn explain(&self, path: &str, snapshot: &AccessSnapshot<'_>) -> AccessExplanation {
        let state = self.decide(path, snapshot);
        let rule = self.table.lookup(path);
        let mut checks = Vec::new();

        let mut record = |check: CheckKind, outcome: CheckOutcome, detail: String| {
            checks.push(CheckRecord { check, outcome, detail });
        };

        record(
            CheckKind::Session,
            if snapshot.authenticated { CheckOutcome::Passed } else { CheckOutcome::Failed },
            if snapshot.authenticated { "session present" } else { "no session" }.to_string(),
        );

        let role = snapshot.role.value().copied();
        let mut blocked = !snapshot.authenticated;

        match (rule, blocked) {
            (_, true) => record(CheckKind::Route, CheckOutcome::Skipped, String::new()),
            (Some(r), false) => record(CheckKind::Route, CheckOutcome::Passed, format!("matched '{}'", r.path)),
            (None, false) => {
                blocked = true;
                record(CheckKind::Route, CheckOutcome::Failed, "no route rule".to_string());
            }
        }

        match (rule, role) {
            (Some(r), Some(role)) if !blocked => {
                let allowed = &r.requirement.allowed_roles;
                if role_allowed(role, allowed) {
                    let detail = if allowed.is_empty() {
                        format!("'{role}' admitted (any authenticated role)")
                    } else {
                        format!("'{role}' is listed")
                    };
                    record(CheckKind::Role, CheckOutcome::Passed, detail);
                } else {
                    blocked = true;
                    let names: Vec<&str> = allowed.iter().map(|r| r.as_str()).collect();
                    record(
                        CheckKind::Role,
                        CheckOutcome::Failed,
                        format!("'{role}' is not one of {names:?}"),
                    );
                }
            }
            (_, None) if !blocked => {
                blocked = true;
                record(CheckKind::Role, CheckOutcome::Pending, "role not resolved".to_string());
            }
            _ => record(CheckKind::Role, CheckOutcome::Skipped, String::new()),
        }

        let tenant = snapshot.tenant.value().copied();
        let req = rule.map(|r| r.requirement.clone()).unwrap_or_default();
        if rule.is_some_and(|r| r.index) {
            blocked = true;
        }

        let gates: [(CheckKind, Option<String>); 2] = [
            (CheckKind::Module, req.required_module.map(|m| m.to_string())),
            (CheckKind::Tier, req.required_tier.map(|t| t.to_string())),
        ];
        for (kind, gate) in gates {
            let Some(gate) = gate else {
                record(kind, CheckOutcome::Skipped, String::new());
                continue;
            };
            if blocked {
                record(kind, CheckOutcome::Skipped, String::new());
                continue;
            }
            let Some(tenant) = tenant else {
                blocked = true;
                record(kind, CheckOutcome::Pending, "tenant not resolved".to_string());
                continue;
            };
            let ok = match kind {
                CheckKind::Module => module_enabled(tenant, req.required_module),
                _ => tier_sufficient(tenant, req.required_tier),
            };
            let outcome = if ok {
                CheckOutcome::Passed
            } else {
                blocked = true;
                CheckOutcome::Failed
            };
            record(kind, outcome, format!("requires {gate}"));
        }

        AccessExplanation {
            path: path.to_string(),
            route: rule.map(|r| r.path.clone()),
            state,
            checks,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Session,
    Route,
    Role,
    Module,
    Tier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckOutcome {
    Passed,
    Failed,
    /// Waiting on an unresolved role/tenant.
    Pending,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckRecord {
    pub check: CheckKind,
    pub outcome: CheckOutcome,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub detail: String,
}

/// Serializable account of a guard decision (debug/audit surface).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessExplanation {
    pub path: String,
    pub route: Option<String>,
    pub state: GuardState,
    pub checks: Vec<CheckRecord>,
}
