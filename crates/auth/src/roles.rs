use core::str::FromStr;

use serde::{Deserialize, Serialize};

use tidyops_core::DomainError;

/// Role within a tenant.
///
/// Roles form a fixed total order, most-privileged first:
/// `owner < admin < manager < team_lead < cleaner`.
///
/// The order is only used to *reduce* several assignments to one effective role.
/// Route gating never compares ranks; see [`crate::policy::role_allowed`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Admin,
    Manager,
    TeamLead,
    Cleaner,
}

impl Role {
    /// Every role, most-privileged first.
    pub const HIERARCHY: [Role; 5] = [
        Role::Owner,
        Role::Admin,
        Role::Manager,
        Role::TeamLead,
        Role::Cleaner,
    ];

    /// Effective role of an identity with no role assignment.
    pub const LEAST_PRIVILEGED: Role = Role::Cleaner;

    /// Position in [`Role::HIERARCHY`] (0 = most privileged).
    pub fn rank(self) -> usize {
        match self {
            Role::Owner => 0,
            Role::Admin => 1,
            Role::Manager => 2,
            Role::TeamLead => 3,
            Role::Cleaner => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::TeamLead => "team_lead",
            Role::Cleaner => "cleaner",
        }
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::HIERARCHY
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| DomainError::unknown("role", s))
    }
}

/// One role-assignment row as stored by the backend (`user_roles`).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub role: Role,
}

impl RoleAssignment {
    pub fn new(role: Role) -> Self {
        Self { role }
    }
}

/// Reduce an identity's role assignments to exactly one effective role.
///
/// - No assignments is a valid state and yields [`Role::LEAST_PRIVILEGED`].
/// - Otherwise the most-privileged assigned role wins; input order and
///   duplicates are irrelevant.
pub fn effective_role(assignments: &[RoleAssignment]) -> Role {
    assignments
        .iter()
        .map(|a| a.role)
        .min_by_key(|r| r.rank())
        .unwrap_or(Role::LEAST_PRIVILEGED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn assignments(roles: &[Role]) -> Vec<RoleAssignment> {
        roles.iter().copied().map(RoleAssignment::new).collect()
    }

    #[test]
    fn no_assignments_defaults_to_cleaner() {
        assert_eq!(effective_role(&[]), Role::Cleaner);
    }

    #[test]
    fn most_privileged_assignment_wins() {
        let roles = assignments(&[Role::Cleaner, Role::Manager, Role::TeamLead]);
        assert_eq!(effective_role(&roles), Role::Manager);
    }

    #[test]
    fn duplicate_assignments_are_harmless() {
        let roles = assignments(&[Role::Admin, Role::Admin, Role::Cleaner]);
        assert_eq!(effective_role(&roles), Role::Admin);
    }

    #[test]
    fn parses_wire_names() {
        assert_eq!("team_lead".parse::<Role>().unwrap(), Role::TeamLead);
        assert!("superuser".parse::<Role>().is_err());
        for role in Role::HIERARCHY {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
    }

    #[test]
    fn hierarchy_is_ordered_by_rank() {
        for (i, role) in Role::HIERARCHY.iter().enumerate() {
            assert_eq!(role.rank(), i);
        }
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&RoleAssignment::new(Role::TeamLead)).unwrap();
        assert_eq!(json, r#"{"role":"team_lead"}"#);
    }

    fn any_role() -> impl Strategy<Value = Role> {
        prop::sample::select(Role::HIERARCHY.to_vec())
    }

    proptest! {
        #[test]
        fn effective_role_ignores_ordering(
            roles in prop::collection::vec(any_role(), 1..12),
            seed in any::<u64>(),
        ) {
            let forward = assignments(&roles);
            let mut shuffled = roles.clone();
            // Deterministic rotation + reversal keyed off the seed.
            let k = (seed as usize) % shuffled.len();
            shuffled.rotate_left(k);
            if seed % 2 == 0 {
                shuffled.reverse();
            }

            prop_assert_eq!(effective_role(&forward), effective_role(&assignments(&shuffled)));
        }

        #[test]
        fn effective_role_is_the_minimum_rank_member(
            roles in prop::collection::vec(any_role(), 1..12),
        ) {
            let effective = effective_role(&assignments(&roles));
            prop_assert!(roles.contains(&effective));
            prop_assert!(roles.iter().all(|r| effective.rank() <= r.rank()));
        }
    }
}
