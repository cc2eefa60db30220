//! `manage-company`: platform-owner console actions, plus tenant settings updates.

use serde::{Deserialize, Serialize};
use tracing::instrument;

use tidyops_auth::{Identity, NewTenant, Profile, Role, SubscriptionStatus, Tenant, TenantPatch, Tier};
use tidyops_core::{TenantId, UserId};

use super::{Compensation, ProvisioningError, ProvisioningService, Rollback};
use crate::backend::BackendError;
use crate::password::generate_one_time_password;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CompanyAction {
    Create {
        company_name: String,
        #[serde(default)]
        phone: Option<String>,
        #[serde(default)]
        plan: Option<Tier>,
        admin_email: String,
        #[serde(default)]
        admin_full_name: Option<String>,
    },
    Suspend {
        company_id: TenantId,
    },
    Reactivate {
        company_id: TenantId,
    },
    List,
}

impl CompanyAction {
    pub fn name(&self) -> &'static str {
        match self {
            CompanyAction::Create { .. } => "create",
            CompanyAction::Suspend { .. } => "suspend",
            CompanyAction::Reactivate { .. } => "reactivate",
            CompanyAction::List => "list",
        }
    }
}

/// Result of `create`. The temporary password exists only in this value.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct CreatedCompany {
    pub company: Tenant,
    pub admin: Identity,
    pub temporary_password: String,
}

impl core::fmt::Debug for CreatedCompany {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CreatedCompany")
            .field("company", &self.company)
            .field("admin", &self.admin)
            .field("temporary_password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompanyOutcome {
    Created(CreatedCompany),
    Updated(Tenant),
    Listed(Vec<Tenant>),
}

const PLATFORM_ROLES: &[Role] = &[Role::Owner];
const SETTINGS_ROLES: &[Role] = &[Role::Owner, Role::Admin];

impl ProvisioningService {
    #[instrument(skip(self, action), fields(user_id = %caller, action = action.name()), err)]
    pub async fn manage_company(
        &self,
        caller: UserId,
        action: CompanyAction,
    ) -> Result<CompanyOutcome, ProvisioningError> {
        self.require_role(caller, PLATFORM_ROLES).await?;

        match action {
            CompanyAction::Create {
                company_name,
                phone,
                plan,
                admin_email,
                admin_full_name,
            } => {
                let tier = Tier::or_basic(plan);
                let new_tenant = NewTenant {
                    name: company_name.trim().to_string(),
                    phone,
                    subscription_tier: tier,
                    subscription_status: SubscriptionStatus::initial_for(tier),
                };
                self.create_company(new_tenant, &admin_email, admin_full_name)
                    .await
                    .map(CompanyOutcome::Created)
            }
            CompanyAction::Suspend { company_id } => self
                .set_status(company_id, SubscriptionStatus::Canceled)
                .await
                .map(CompanyOutcome::Updated),
            CompanyAction::Reactivate { company_id } => self
                .set_status(company_id, SubscriptionStatus::Active)
                .await
                .map(CompanyOutcome::Updated),
            CompanyAction::List => Ok(CompanyOutcome::Listed(self.directory.list_tenants().await?)),
        }
    }

    async fn create_company(
        &self,
        new_tenant: NewTenant,
        admin_email: &str,
        admin_full_name: Option<String>,
    ) -> Result<CreatedCompany, ProvisioningError> {
        new_tenant.validate()?;
        if admin_email.trim().is_empty() {
            return Err(ProvisioningError::Validation("admin_email is required".to_string()));
        }

        let mut rollback = Rollback::new(self.auth.as_ref(), self.directory.as_ref());

        let company = match self.directory.insert_tenant(&new_tenant).await {
            Ok(t) => t,
            Err(e) => return Err(rollback.unwind("create company", e).await),
        };
        rollback.push(Compensation::DeleteTenant(company.id));

        let temporary_password = generate_one_time_password();
        let admin = match self.auth.create_identity(admin_email, &temporary_password).await {
            Ok(identity) => identity,
            Err(e) => return Err(rollback.unwind("create admin identity", e).await),
        };
        rollback.push(Compensation::DeleteIdentity(admin.id));

        let profile = Profile {
            user_id: admin.id,
            tenant_id: Some(company.id),
            full_name: admin_full_name,
            phone: None,
        };
        if let Err(e) = self.directory.upsert_profile(&profile).await {
            return Err(rollback.unwind("link admin profile", e).await);
        }
        rollback.push(Compensation::DeleteProfile(admin.id));

        if let Err(e) = self.directory.insert_role_assignment(admin.id, Role::Admin).await {
            return Err(rollback.unwind("assign admin role", e).await);
        }

        tracing::info!(tenant_id = %company.id, admin_id = %admin.id, "company provisioned");
        Ok(CreatedCompany {
            company,
            admin,
            temporary_password,
        })
    }

    async fn set_status(
        &self,
        company_id: TenantId,
        status: SubscriptionStatus,
    ) -> Result<Tenant, ProvisioningError> {
        let updated = self
            .directory
            .update_tenant(company_id, &TenantPatch::status(status))
            .await
            .map_err(|e| match e {
                BackendError::NotFound(_) => ProvisioningError::NotFound(company_id),
                other => ProvisioningError::Backend(other),
            })?;
        self.tenants.invalidate_tenant(company_id);
        tracing::info!(tenant_id = %company_id, status = %status, "company status changed");
        Ok(updated)
    }

    /// Settings/billing update of the caller's own company (owner or admin).
    #[instrument(skip(self, patch), fields(user_id = %caller), err)]
    pub async fn update_settings(&self, caller: UserId, patch: TenantPatch) -> Result<Tenant, ProvisioningError> {
        if patch.is_empty() {
            return Err(ProvisioningError::Validation("no fields to update".to_string()));
        }
        if patch.subscription_status.is_some() {
            return Err(ProvisioningError::Forbidden(
                "subscription status changes go through manage-company".to_string(),
            ));
        }
        if patch.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(ProvisioningError::Validation("company name cannot be empty".to_string()));
        }
        self.require_role(caller, SETTINGS_ROLES).await?;

        self.tenants.invalidate(caller);
        let Some(tenant) = self.tenants.resolve(caller).await? else {
            return Err(ProvisioningError::Forbidden("caller has no company".to_string()));
        };

        let updated = self
            .directory
            .update_tenant(tenant.id, &patch)
            .await
            .map_err(|e| match e {
                BackendError::NotFound(_) => ProvisioningError::NotFound(tenant.id),
                other => ProvisioningError::Backend(other),
            })?;
        self.tenants.invalidate_tenant(tenant.id);
        tracing::info!(tenant_id = %tenant.id, "company settings updated");
        Ok(updated)
    }
}
