//! Access Policy Engine.
//!
//! Three pure predicates over already-resolved state:
//! - No IO
//! - No panics
//! - Every default (missing tenant, missing tier) is decided here and nowhere else
//!
//! # Role gating is set membership
//!
//! [`role_allowed`] checks `role ∈ allowed_roles`. It does **not** compare ranks.
//! A route listing `[owner, admin, manager]` rejects `team_lead` even though
//! `team_lead` sits right below `manager` in the hierarchy. Each route must
//! enumerate every role it accepts, so inserting a new role into the hierarchy
//! never silently widens access to existing routes.

use crate::{Module, Role, Tenant, Tier};

/// `true` if `allowed_roles` is empty (any authenticated role) or contains `role`.
pub fn role_allowed(role: Role, allowed_roles: &[Role]) -> bool {
    allowed_roles.is_empty() || allowed_roles.contains(&role)
}

/// Is `module` enabled for the tenant?
///
/// - no module requested: `true` (nothing to gate)
/// - no tenant: `false` (fail closed)
/// - otherwise the tenant's flag for that module
pub fn module_enabled(tenant: Option<&Tenant>, module: Option<Module>) -> bool {
    let Some(module) = module else {
        return true;
    };
    match tenant {
        Some(t) => t.module_flag(module),
        None => false,
    }
}

/// Does the tenant's tier reach `required_tier`?
///
/// - no tenant: `false` (fail closed)
/// - a missing tier on either side counts as `basic`
pub fn tier_sufficient(tenant: Option<&Tenant>, required_tier: Option<Tier>) -> bool {
    let Some(tenant) = tenant else {
        return false;
    };
    Tier::or_basic(tenant.subscription_tier).ordinal() >= Tier::or_basic(required_tier).ordinal()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;
    use tidyops_core::TenantId;

    fn tenant(tier: Option<Tier>) -> Tenant {
        Tenant {
            id: TenantId::new(),
            name: "Fresh Homes".to_string(),
            phone: None,
            subscription_tier: tier,
            subscription_status: None,
            shield_enabled: false,
            route_enabled: true,
            fill_enabled: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn empty_allow_list_admits_everyone() {
        for role in Role::HIERARCHY {
            assert!(role_allowed(role, &[]));
        }
    }

    #[test]
    fn role_gate_is_membership_not_hierarchy() {
        let allowed = [Role::Owner, Role::Admin, Role::Manager];
        assert!(role_allowed(Role::Manager, &allowed));
        assert!(!role_allowed(Role::TeamLead, &allowed));
        assert!(!role_allowed(Role::Cleaner, &allowed));

        // A list that skips a middle role does not let it through either.
        let gapped = [Role::Owner, Role::Manager];
        assert!(!role_allowed(Role::Admin, &gapped));
    }

    #[test]
    fn module_gate_fails_closed_without_tenant() {
        for module in Module::ALL {
            assert!(!module_enabled(None, Some(module)));
        }
    }

    #[test]
    fn module_gate_reads_the_matching_flag() {
        let t = tenant(Some(Tier::Pro));
        assert!(!module_enabled(Some(&t), Some(Module::Shield)));
        assert!(module_enabled(Some(&t), Some(Module::Route)));
    }

    #[test]
    fn no_module_requested_is_vacuously_enabled() {
        assert!(module_enabled(None, None));
    }

    #[test]
    fn tier_examples() {
        assert!(tier_sufficient(Some(&tenant(None)), Some(Tier::Basic)));
        assert!(!tier_sufficient(Some(&tenant(Some(Tier::Basic))), Some(Tier::Pro)));
        assert!(tier_sufficient(Some(&tenant(Some(Tier::Trial))), Some(Tier::Basic)));
        assert!(tier_sufficient(Some(&tenant(Some(Tier::Enterprise))), Some(Tier::Pro)));
        assert!(tier_sufficient(Some(&tenant(Some(Tier::Basic))), None));
        assert!(!tier_sufficient(None, Some(Tier::Basic)));
    }

    proptest! {
        #[test]
        fn tier_check_matches_ordinals(
            have in prop::sample::select(Tier::ALL.to_vec()),
            need in prop::sample::select(Tier::ALL.to_vec()),
        ) {
            let t = tenant(Some(have));
            prop_assert_eq!(tier_sufficient(Some(&t), Some(need)), have.ordinal() >= need.ordinal());
        }
    }
}
