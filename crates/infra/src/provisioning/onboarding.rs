//! `complete-onboarding`: a freshly signed-up identity creates its company.

use serde::{Deserialize, Serialize};
use tracing::instrument;

use tidyops_auth::{Identity, NewTenant, Profile, Role, SubscriptionStatus, Tenant, Tier};

use super::{Compensation, ProvisioningError, ProvisioningService, Rollback};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnboardingRequest {
    pub company_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    /// Defaults to basic.
    #[serde(default)]
    pub selected_plan: Option<Tier>,
    #[serde(default)]
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OnboardingOutcome {
    pub company: Tenant,
    /// False when the caller was already onboarded.
    pub created: bool,
}

impl ProvisioningService {
    /// Create the caller's company, link their profile to it and make them its
    /// admin. Repeat calls return the existing company.
    #[instrument(skip(self, caller, request), fields(user_id = %caller.id), err)]
    pub async fn complete_onboarding(
        &self,
        caller: &Identity,
        request: OnboardingRequest,
    ) -> Result<OnboardingOutcome, ProvisioningError> {
        let tier = Tier::or_basic(request.selected_plan);
        let new_tenant = NewTenant {
            name: request.company_name.trim().to_string(),
            phone: request.phone.clone(),
            subscription_tier: tier,
            subscription_status: SubscriptionStatus::initial_for(tier),
        };
        new_tenant.validate()?;

        let _serialized = self.onboarding_gate.lock().await;

        let existing_profile = self.directory.fetch_profile(caller.id).await?;
        if let Some(tenant_id) = existing_profile.as_ref().and_then(|p| p.tenant_id) {
            if let Some(company) = self.directory.fetch_tenant(tenant_id).await? {
                tracing::info!(tenant_id = %company.id, "already onboarded");
                return Ok(OnboardingOutcome {
                    company,
                    created: false,
                });
            }
            tracing::warn!(%tenant_id, "profile links to a missing company; onboarding again");
        }

        let mut rollback = Rollback::new(self.auth.as_ref(), self.directory.as_ref());

        let company = match self.directory.insert_tenant(&new_tenant).await {
            Ok(t) => t,
            Err(e) => return Err(rollback.unwind("create company", e).await),
        };
        rollback.push(Compensation::DeleteTenant(company.id));

        // A pre-existing admin grant is not ours to undo.
        let already_admin = match self.directory.fetch_role_assignments(caller.id).await {
            Ok(assignments) => assignments.iter().any(|a| a.role == Role::Admin),
            Err(e) => return Err(rollback.unwind("read existing roles", e).await),
        };
        if let Err(e) = self.directory.insert_role_assignment(caller.id, Role::Admin).await {
            return Err(rollback.unwind("assign admin role", e).await);
        }
        if !already_admin {
            rollback.push(Compensation::DeleteRole(caller.id, Role::Admin));
        }

        // Linking the profile marks the caller as onboarded, so it goes last.
        let profile = Profile {
            user_id: caller.id,
            tenant_id: Some(company.id),
            full_name: request
                .full_name
                .clone()
                .or_else(|| existing_profile.as_ref().and_then(|p| p.full_name.clone())),
            phone: request
                .phone
                .clone()
                .or_else(|| existing_profile.as_ref().and_then(|p| p.phone.clone())),
        };
        if let Err(e) = self.directory.upsert_profile(&profile).await {
            return Err(rollback.unwind("link profile", e).await);
        }

        self.forget_identity(caller.id);
        tracing::info!(tenant_id = %company.id, tier = %tier, "company onboarded");
        Ok(OnboardingOutcome {
            company,
            created: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tidyops_auth::Hs256Jwt;

    use super::*;
    use crate::backend::{AuthProvider, Directory, InMemoryBackend, Operation};
    use crate::resolver::{RoleResolver, TenantResolver};

    fn setup() -> (Arc<InMemoryBackend>, ProvisioningService) {
        let backend = Arc::new(InMemoryBackend::new(
            Hs256Jwt::new(b"k"),
            chrono::Duration::minutes(5),
        ));
        let roles = Arc::new(RoleResolver::new(backend.clone(), Duration::from_secs(60)));
        let tenants = Arc::new(TenantResolver::new(backend.clone(), Duration::from_secs(60)));
        let svc = ProvisioningService::new(backend.clone(), backend.clone(), roles, tenants);
        (backend, svc)
    }

    fn request(plan: Option<Tier>) -> OnboardingRequest {
        OnboardingRequest {
            company_name: "Bright & Clean".to_string(),
            phone: Some("555-0100".to_string()),
            selected_plan: plan,
            full_name: Some("Robin Vega".to_string()),
        }
    }

    async fn signup(backend: &InMemoryBackend) -> Identity {
        backend
            .create_identity("robin@brightclean.test", "squeaky-clean")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn onboarding_creates_company_profile_and_admin_role() {
        let (backend, svc) = setup();
        let caller = signup(&backend).await;

        let out = svc.complete_onboarding(&caller, request(Some(Tier::Pro))).await.unwrap();
        assert!(out.created);
        assert_eq!(out.company.subscription_tier, Some(Tier::Pro));
        assert_eq!(out.company.subscription_status, Some(SubscriptionStatus::Active));

        let profile = backend.fetch_profile(caller.id).await.unwrap().unwrap();
        assert_eq!(profile.tenant_id, Some(out.company.id));
        let roles = backend.fetch_role_assignments(caller.id).await.unwrap();
        assert_eq!(roles.len(), 1);
        assert_eq!(roles[0].role, Role::Admin);
    }

    #[tokio::test]
    async fn onboarding_is_idempotent() {
        let (backend, svc) = setup();
        let caller = signup(&backend).await;

        let first = svc.complete_onboarding(&caller, request(None)).await.unwrap();
        let second = svc.complete_onboarding(&caller, request(Some(Tier::Enterprise))).await.unwrap();

        assert!(!second.created);
        assert_eq!(second.company.id, first.company.id);
        assert_eq!(backend.tenant_count(), 1);
        assert_eq!(backend.profile_count(), 1);
        assert_eq!(backend.role_assignment_count(caller.id), 1);
    }

    #[tokio::test]
    async fn trial_plan_starts_trialing() {
        let (backend, svc) = setup();
        let caller = signup(&backend).await;
        let out = svc.complete_onboarding(&caller, request(Some(Tier::Trial))).await.unwrap();
        assert_eq!(out.company.subscription_status, Some(SubscriptionStatus::Trialing));
        assert!(!out.company.shield_enabled);
    }

    #[tokio::test]
    async fn blank_company_name_is_rejected() {
        let (backend, svc) = setup();
        let caller = signup(&backend).await;
        let mut req = request(None);
        req.company_name = "   ".to_string();
        assert!(matches!(
            svc.complete_onboarding(&caller, req).await,
            Err(ProvisioningError::Validation(_))
        ));
        assert_eq!(backend.tenant_count(), 0);
    }

    #[tokio::test]
    async fn failed_role_assignment_rolls_back_company() {
        let (backend, svc) = setup();
        let caller = signup(&backend).await;
        backend.fail_on(Operation::InsertRole);

        let err = svc.complete_onboarding(&caller, request(None)).await.unwrap_err();
        assert!(matches!(err, ProvisioningError::Failed { step: "assign admin role", .. }));
        assert_eq!(backend.tenant_count(), 0);
        assert_eq!(backend.profile_count(), 0);
    }

    #[tokio::test]
    async fn failing_compensation_is_reported() {
        let (backend, svc) = setup();
        let caller = signup(&backend).await;
        backend.fail_on(Operation::InsertRole);
        backend.fail_on(Operation::DeleteTenant);

        let err = svc.complete_onboarding(&caller, request(None)).await.unwrap_err();
        match err {
            ProvisioningError::IncompleteRollback { left_behind, .. } => {
                assert_eq!(left_behind.len(), 1);
                assert!(left_behind[0].starts_with("company "));
            }
            other => panic!("expected incomplete rollback, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_profile_link_removes_granted_role() {
        let (backend, svc) = setup();
        let caller = signup(&backend).await;
        backend.fail_on(Operation::UpsertProfile);

        let err = svc.complete_onboarding(&caller, request(None)).await.unwrap_err();
        assert!(matches!(err, ProvisioningError::Failed { step: "link profile", .. }));
        assert_eq!(backend.tenant_count(), 0);
        assert_eq!(backend.role_assignment_count(caller.id), 0);
    }

    #[tokio::test]
    async fn rollback_keeps_an_admin_role_held_before_onboarding() {
        let (backend, svc) = setup();
        let caller = signup(&backend).await;
        backend.insert_role_assignment(caller.id, Role::Admin).await.unwrap();
        backend.fail_on(Operation::UpsertProfile);

        svc.complete_onboarding(&caller, request(None)).await.unwrap_err();
        assert_eq!(backend.role_assignment_count(caller.id), 1);
    }

    #[tokio::test]
    async fn failed_role_removal_is_left_behind() {
        let (backend, svc) = setup();
        let caller = signup(&backend).await;
        backend.fail_on(Operation::UpsertProfile);
        backend.fail_on(Operation::DeleteRole);

        match svc.complete_onboarding(&caller, request(None)).await.unwrap_err() {
            ProvisioningError::IncompleteRollback { step, left_behind, .. } => {
                assert_eq!(step, "link profile");
                assert_eq!(left_behind.len(), 1);
                assert!(left_behind[0].starts_with("role 'admin'"));
            }
            other => panic!("expected incomplete rollback, got {other:?}"),
        }
        assert_eq!(backend.tenant_count(), 0);
    }
}
