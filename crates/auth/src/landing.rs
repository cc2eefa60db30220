//! Landing Redirector: where a role goes after sign-in.

use crate::Role;

/// Canonical default view for a role. Total over [`Role`].
pub fn landing_path(role: Role) -> &'static str {
    match role {
        Role::Owner => "/platform/companies",
        Role::Admin => "/dashboard",
        Role::Manager => "/schedule",
        Role::TeamLead => "/team",
        Role::Cleaner => "/my-jobs",
    }
}

/// Landing view for a raw role name; unknown names land with the least-privileged role.
pub fn landing_path_for_name(role: &str) -> &'static str {
    let role = role.parse::<Role>().unwrap_or(Role::LEAST_PRIVILEGED);
    landing_path(role)
}
