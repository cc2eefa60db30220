//! Provisioning RPCs: `complete-onboarding` and `manage-company`.
//!
//! Multi-step writes register a compensation after every successful step. On
//! failure the compensations run in reverse order; if any of them fails too,
//! the caller gets [`ProvisioningError::IncompleteRollback`] listing what is
//! left behind. Nothing is retried automatically.

use std::sync::Arc;

use thiserror::Error;

use tidyops_auth::Role;
use tidyops_core::{DomainError, TenantId, UserId};

use crate::backend::{AuthError, AuthProvider, BackendError, Directory};
use crate::resolver::{RoleResolver, TenantResolver};

pub mod company;
pub mod onboarding;

pub use company::{CompanyAction, CompanyOutcome, CreatedCompany};
pub use onboarding::{OnboardingOutcome, OnboardingRequest};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProvisioningError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("company not found: {0}")]
    NotFound(TenantId),

    #[error("{step} failed and was rolled back: {cause}")]
    Failed { step: &'static str, cause: String },

    #[error("{step} failed and rollback is incomplete (manual remediation required): {cause}; left behind: {left_behind:?}")]
    IncompleteRollback {
        step: &'static str,
        cause: String,
        left_behind: Vec<String>,
    },

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl From<DomainError> for ProvisioningError {
    fn from(e: DomainError) -> Self {
        ProvisioningError::Validation(e.to_string())
    }
}

/// Shared handle for both RPCs.
pub struct ProvisioningService {
    auth: Arc<dyn AuthProvider>,
    directory: Arc<dyn Directory>,
    roles: Arc<RoleResolver>,
    tenants: Arc<TenantResolver>,
    onboarding_gate: tokio::sync::Mutex<()>,
}

impl ProvisioningService {
    pub fn new(
        auth: Arc<dyn AuthProvider>,
        directory: Arc<dyn Directory>,
        roles: Arc<RoleResolver>,
        tenants: Arc<TenantResolver>,
    ) -> Self {
        Self {
            auth,
            directory,
            roles,
            tenants,
            onboarding_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Fresh role check; provisioning never trusts a cached role.
    async fn require_role(&self, caller: UserId, allowed: &[Role]) -> Result<Role, ProvisioningError> {
        let role = self.roles.resolve_fresh(caller).await?;
        if !tidyops_auth::role_allowed(role, allowed) {
            tracing::warn!(user_id = %caller, role = %role, "provisioning call rejected");
            return Err(ProvisioningError::Forbidden(format!(
                "role '{role}' may not perform this action"
            )));
        }
        Ok(role)
    }

    fn forget_identity(&self, user_id: UserId) {
        self.roles.invalidate(user_id);
        self.tenants.invalidate(user_id);
    }
}

#[derive(Debug, Clone)]
enum Compensation {
    DeleteTenant(TenantId),
    DeleteIdentity(UserId),
    DeleteProfile(UserId),
    DeleteRole(UserId, Role),
}

impl Compensation {
    fn describe(&self) -> String {
        match self {
            Compensation::DeleteTenant(id) => format!("company {id}"),
            Compensation::DeleteIdentity(id) => format!("identity {id}"),
            Compensation::DeleteProfile(id) => format!("profile {id}"),
            Compensation::DeleteRole(id, role) => format!("role '{role}' for {id}"),
        }
    }
}

/// Undo log for one provisioning call.
struct Rollback<'a> {
    auth: &'a dyn AuthProvider,
    directory: &'a dyn Directory,
    steps: Vec<Compensation>,
}

impl<'a> Rollback<'a> {
    fn new(auth: &'a dyn AuthProvider, directory: &'a dyn Directory) -> Self {
        Self {
            auth,
            directory,
            steps: Vec::new(),
        }
    }

    fn push(&mut self, step: Compensation) {
        self.steps.push(step);
    }

    /// Run compensations newest-first and turn `cause` into the caller-visible error.
    async fn unwind(self, step: &'static str, cause: impl std::fmt::Display) -> ProvisioningError {
        let cause = cause.to_string();
        tracing::warn!(step, cause = %cause, pending = self.steps.len(), "rolling back");

        let mut left_behind = Vec::new();
        for compensation in self.steps.iter().rev() {
            if let Err(e) = self.apply(compensation).await {
                tracing::error!(what = %compensation.describe(), error = %e, "compensation failed");
                left_behind.push(compensation.describe());
            }
        }

        if left_behind.is_empty() {
            ProvisioningError::Failed { step, cause }
        } else {
            ProvisioningError::IncompleteRollback {
                step,
                cause,
                left_behind,
            }
        }
    }

    async fn apply(&self, compensation: &Compensation) -> Result<(), BackendError> {
        match compensation {
            Compensation::DeleteTenant(id) => self.directory.delete_tenant(*id).await,
            Compensation::DeleteIdentity(id) => self.auth.delete_identity(*id).await,
            Compensation::DeleteProfile(id) => self.directory.delete_profile(*id).await,
            Compensation::DeleteRole(id, role) => self.directory.delete_role_assignment(*id, *role).await,
        }
    }
}
