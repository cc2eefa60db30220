//! In-memory backend for tests/dev.
//!
//! Supports per-operation fault injection and artificial latency so callers can
//! exercise transport failures, rollbacks and in-flight races deterministically.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use tidyops_auth::{
    Hs256Jwt, Identity, JwtClaims, NewTenant, Profile, Role, RoleAssignment, Session, Tenant,
    TenantPatch,
};
use tidyops_core::{TenantId, UserId};

use super::{AuthError, AuthProvider, BackendError, Directory};
use crate::password::{hash_password, validate_password, verify_password};

/// Backend operations that can be made to fail.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Operation {
    SignIn,
    SignOut,
    CheckRevocation,
    CreateIdentity,
    DeleteIdentity,
    FetchRoles,
    InsertRole,
    DeleteRole,
    FetchProfile,
    UpsertProfile,
    DeleteProfile,
    FetchTenant,
    ListTenants,
    InsertTenant,
    UpdateTenant,
    DeleteTenant,
}

#[derive(Debug, Clone)]
struct IdentityRecord {
    identity: Identity,
    password_hash: String,
}

#[derive(Debug, Default)]
struct State {
    identities: HashMap<UserId, IdentityRecord>,
    user_roles: Vec<(UserId, Role)>,
    profiles: HashMap<UserId, Profile>,
    tenants: HashMap<TenantId, Tenant>,
    reset_requests: Vec<String>,
    /// Signed-out access tokens and when they would have expired.
    revoked: HashMap<String, DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct CallCounts {
    fetch_roles: AtomicUsize,
    fetch_profile: AtomicUsize,
    fetch_tenant: AtomicUsize,
}

pub struct InMemoryBackend {
    state: RwLock<State>,
    faults: RwLock<HashSet<Operation>>,
    latency: Option<Duration>,
    calls: CallCounts,
    jwt: Hs256Jwt,
    session_ttl: chrono::Duration,
}

impl core::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryBackend")
            .field("latency", &self.latency)
            .finish_non_exhaustive()
    }
}

impl InMemoryBackend {
    pub fn new(jwt: Hs256Jwt, session_ttl: chrono::Duration) -> Self {
        Self {
            state: RwLock::new(State::default()),
            faults: RwLock::new(HashSet::new()),
            latency: None,
            calls: CallCounts::default(),
            jwt,
            session_ttl,
        }
    }

    /// Delay every operation by `latency` (simulates a network round-trip).
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn fail_on(&self, op: Operation) {
        if let Ok(mut faults) = self.faults.write() {
            faults.insert(op);
        }
    }

    pub fn recover(&self, op: Operation) {
        if let Ok(mut faults) = self.faults.write() {
            faults.remove(&op);
        }
    }

    pub fn role_fetches(&self) -> usize {
        self.calls.fetch_roles.load(Ordering::SeqCst)
    }

    pub fn profile_fetches(&self) -> usize {
        self.calls.fetch_profile.load(Ordering::SeqCst)
    }

    pub fn tenant_fetches(&self) -> usize {
        self.calls.fetch_tenant.load(Ordering::SeqCst)
    }

    pub fn tenant_count(&self) -> usize {
        self.read(|s| s.tenants.len())
    }

    pub fn profile_count(&self) -> usize {
        self.read(|s| s.profiles.len())
    }

    pub fn identity_count(&self) -> usize {
        self.read(|s| s.identities.len())
    }

    pub fn role_assignment_count(&self, user_id: UserId) -> usize {
        self.read(|s| s.user_roles.iter().filter(|(u, _)| *u == user_id).count())
    }

    pub fn revoked_count(&self) -> usize {
        self.read(|s| s.revoked.len())
    }

    pub fn reset_requests(&self) -> Vec<String> {
        self.read(|s| s.reset_requests.clone())
    }

    fn read<T>(&self, f: impl FnOnce(&State) -> T) -> T
    where
        T: Default,
    {
        match self.state.read() {
            Ok(s) => f(&s),
            Err(_) => T::default(),
        }
    }

    fn write<T>(&self, f: impl FnOnce(&mut State) -> Result<T, BackendError>) -> Result<T, BackendError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| BackendError::unavailable("state lock poisoned"))?;
        f(&mut state)
    }

    async fn before(&self, op: Operation) -> Result<(), BackendError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let failing = self.faults.read().is_ok_and(|f| f.contains(&op));
        if failing {
            return Err(BackendError::unavailable(format!("injected fault: {op:?}")));
        }
        Ok(())
    }
}

#[async_trait]
impl AuthProvider for InMemoryBackend {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        self.before(Operation::SignIn).await?;
        let email = email.trim().to_lowercase();

        let record = self.read(|s| {
            s.identities
                .values()
                .find(|r| r.identity.email == email)
                .cloned()
        });
        let Some(record) = record else {
            return Err(AuthError::InvalidCredentials);
        };
        if !verify_password(&record.password_hash, password) {
            return Err(AuthError::InvalidCredentials);
        }

        let now = Utc::now();
        let claims = JwtClaims::for_identity(&record.identity, now, self.session_ttl);
        let access_token = self.jwt.issue(&claims)?;
        Ok(Session {
            access_token,
            identity: record.identity,
            expires_at: claims.expires_at(),
        })
    }

    async fn sign_out(&self, session: &Session) -> Result<(), BackendError> {
        self.before(Operation::SignOut).await?;
        let now = Utc::now();
        self.write(|s| {
            s.revoked.retain(|_, expires_at| *expires_at > now);
            s.revoked.insert(session.access_token.clone(), session.expires_at);
            Ok(())
        })?;
        tracing::debug!(user_id = %session.user_id(), "session revoked");
        Ok(())
    }

    async fn is_revoked(&self, access_token: &str) -> Result<bool, BackendError> {
        self.before(Operation::CheckRevocation).await?;
        Ok(self.read(|s| s.revoked.contains_key(access_token)))
    }

    async fn reset_password_request(&self, email: &str) -> Result<(), BackendError> {
        let email = email.trim().to_lowercase();
        self.write(|s| {
            if s.identities.values().any(|r| r.identity.email == email) {
                s.reset_requests.push(email);
            }
            Ok(())
        })
    }

    async fn update_password(&self, user_id: UserId, new_password: &str) -> Result<(), AuthError> {
        validate_password(new_password)?;
        let hash = hash_password(new_password)?;
        self.write(|s| {
            let record = s
                .identities
                .get_mut(&user_id)
                .ok_or_else(|| BackendError::not_found(format!("identity {user_id}")))?;
            record.password_hash = hash;
            Ok(())
        })?;
        Ok(())
    }

    async fn create_identity(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        self.before(Operation::CreateIdentity).await?;
        validate_password(password)?;
        let email = email.trim().to_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err(AuthError::InvalidCredentials);
        }
        let password_hash = hash_password(password)?;

        let mut state = self
            .state
            .write()
            .map_err(|_| BackendError::unavailable("state lock poisoned"))?;
        if state.identities.values().any(|r| r.identity.email == email) {
            return Err(AuthError::EmailTaken);
        }
        let identity = Identity {
            id: UserId::new(),
            email,
        };
        state.identities.insert(
            identity.id,
            IdentityRecord {
                identity: identity.clone(),
                password_hash,
            },
        );
        Ok(identity)
    }

    async fn delete_identity(&self, user_id: UserId) -> Result<(), BackendError> {
        self.before(Operation::DeleteIdentity).await?;
        self.write(|s| {
            s.identities.remove(&user_id);
            Ok(())
        })
    }
}

#[async_trait]
impl Directory for InMemoryBackend {
    async fn fetch_role_assignments(&self, user_id: UserId) -> Result<Vec<RoleAssignment>, BackendError> {
        self.calls.fetch_roles.fetch_add(1, Ordering::SeqCst);
        self.before(Operation::FetchRoles).await?;
        Ok(self.read(|s| {
            s.user_roles
                .iter()
                .filter(|(u, _)| *u == user_id)
                .map(|(_, r)| RoleAssignment::new(*r))
                .collect()
        }))
    }

    async fn insert_role_assignment(&self, user_id: UserId, role: Role) -> Result<(), BackendError> {
        self.before(Operation::InsertRole).await?;
        self.write(|s| {
            if !s.user_roles.contains(&(user_id, role)) {
                s.user_roles.push((user_id, role));
            }
            Ok(())
        })
    }

    async fn delete_role_assignment(&self, user_id: UserId, role: Role) -> Result<(), BackendError> {
        self.before(Operation::DeleteRole).await?;
        self.write(|s| {
            s.user_roles.retain(|entry| *entry != (user_id, role));
            Ok(())
        })
    }

    async fn fetch_profile(&self, user_id: UserId) -> Result<Option<Profile>, BackendError> {
        self.calls.fetch_profile.fetch_add(1, Ordering::SeqCst);
        self.before(Operation::FetchProfile).await?;
        Ok(self.read(|s| s.profiles.get(&user_id).cloned()))
    }

    async fn upsert_profile(&self, profile: &Profile) -> Result<(), BackendError> {
        self.before(Operation::UpsertProfile).await?;
        self.write(|s| {
            s.profiles.insert(profile.user_id, profile.clone());
            Ok(())
        })
    }

    async fn delete_profile(&self, user_id: UserId) -> Result<(), BackendError> {
        self.before(Operation::DeleteProfile).await?;
        self.write(|s| {
            s.profiles.remove(&user_id);
            Ok(())
        })
    }

    async fn fetch_tenant(&self, tenant_id: TenantId) -> Result<Option<Tenant>, BackendError> {
        self.calls.fetch_tenant.fetch_add(1, Ordering::SeqCst);
        self.before(Operation::FetchTenant).await?;
        Ok(self.read(|s| s.tenants.get(&tenant_id).cloned()))
    }

    async fn list_tenants(&self) -> Result<Vec<Tenant>, BackendError> {
        self.before(Operation::ListTenants).await?;
        let mut tenants: Vec<Tenant> = self.read(|s| s.tenants.values().cloned().collect());
        tenants.sort_by_key(|t| t.created_at);
        Ok(tenants)
    }

    async fn insert_tenant(&self, tenant: &NewTenant) -> Result<Tenant, BackendError> {
        self.before(Operation::InsertTenant).await?;
        let record = Tenant {
            id: TenantId::new(),
            name: tenant.name.trim().to_string(),
            phone: tenant.phone.clone(),
            subscription_tier: Some(tenant.subscription_tier),
            subscription_status: Some(tenant.subscription_status),
            shield_enabled: false,
            route_enabled: false,
            fill_enabled: false,
            created_at: Utc::now(),
        };
        self.write(|s| {
            s.tenants.insert(record.id, record.clone());
            Ok(record)
        })
    }

    async fn update_tenant(&self, tenant_id: TenantId, patch: &TenantPatch) -> Result<Tenant, BackendError> {
        self.before(Operation::UpdateTenant).await?;
        self.write(|s| {
            let tenant = s
                .tenants
                .get_mut(&tenant_id)
                .ok_or_else(|| BackendError::not_found(format!("company {tenant_id}")))?;
            tenant.apply_patch(patch);
            Ok(tenant.clone())
        })
    }

    async fn delete_tenant(&self, tenant_id: TenantId) -> Result<(), BackendError> {
        self.before(Operation::DeleteTenant).await?;
        self.write(|s| {
            s.tenants.remove(&tenant_id);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidyops_auth::{JwtValidator, SubscriptionStatus, Tier};

    fn backend() -> InMemoryBackend {
        InMemoryBackend::new(Hs256Jwt::new(b"test-secret"), chrono::Duration::minutes(30))
    }

    #[tokio::test]
    async fn sign_in_issues_a_verifiable_token() {
        let b = backend();
        let identity = b.create_identity("Owner@Sparkle.test", "hunter2hunter2").await.unwrap();

        let session = b.sign_in("owner@sparkle.test", "hunter2hunter2").await.unwrap();
        assert_eq!(session.identity, identity);

        let claims = Hs256Jwt::new(b"test-secret")
            .validate(&session.access_token, Utc::now())
            .unwrap();
        assert_eq!(claims.sub, identity.id);
    }

    #[tokio::test]
    async fn revocations_outlive_only_their_token() {
        let b = backend();
        b.create_identity("a@b.test", "hunter2hunter2").await.unwrap();
        let session = b.sign_in("a@b.test", "hunter2hunter2").await.unwrap();
        let stale = Session {
            access_token: "already-expired".to_string(),
            expires_at: Utc::now() - chrono::Duration::seconds(1),
            ..session.clone()
        };

        b.sign_out(&stale).await.unwrap();
        b.sign_out(&session).await.unwrap();
        assert!(b.is_revoked(&session.access_token).await.unwrap());
        assert!(!b.is_revoked(&stale.access_token).await.unwrap());
        assert_eq!(b.revoked_count(), 1);
    }

    #[tokio::test]
    async fn wrong_password_is_invalid_credentials() {
        let b = backend();
        b.create_identity("a@b.test", "hunter2hunter2").await.unwrap();
        let err = b.sign_in("a@b.test", "nope-nope-nope").await.unwrap_err();
        assert_eq!(err, AuthError::InvalidCredentials);
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let b = backend();
        b.create_identity("a@b.test", "hunter2hunter2").await.unwrap();
        let err = b.create_identity("A@B.test", "hunter2hunter2").await.unwrap_err();
        assert_eq!(err, AuthError::EmailTaken);
    }

    #[tokio::test]
    async fn reset_request_is_silent_for_unknown_email() {
        let b = backend();
        b.create_identity("a@b.test", "hunter2hunter2").await.unwrap();
        b.reset_password_request("ghost@b.test").await.unwrap();
        b.reset_password_request("a@b.test").await.unwrap();
        assert_eq!(b.reset_requests(), vec!["a@b.test".to_string()]);
    }

    #[tokio::test]
    async fn updated_password_replaces_the_old_one() {
        let b = backend();
        let id = b.create_identity("a@b.test", "hunter2hunter2").await.unwrap();
        b.update_password(id.id, "brand-new-pass").await.unwrap();
        assert!(b.sign_in("a@b.test", "hunter2hunter2").await.is_err());
        assert!(b.sign_in("a@b.test", "brand-new-pass").await.is_ok());
    }

    #[tokio::test]
    async fn injected_fault_surfaces_as_unavailable() {
        let b = backend();
        b.fail_on(Operation::FetchRoles);
        let err = b.fetch_role_assignments(UserId::new()).await.unwrap_err();
        assert!(matches!(err, BackendError::Unavailable(_)));

        b.recover(Operation::FetchRoles);
        assert!(b.fetch_role_assignments(UserId::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_of_missing_tenant_is_not_found() {
        let b = backend();
        let err = b
            .update_tenant(TenantId::new(), &TenantPatch::status(SubscriptionStatus::Canceled))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::NotFound(_)));
    }

    #[tokio::test]
    async fn inserted_tenant_starts_with_modules_off() {
        let b = backend();
        let t = b
            .insert_tenant(&NewTenant {
                name: " Shine ".to_string(),
                phone: None,
                subscription_tier: Tier::Pro,
                subscription_status: SubscriptionStatus::Active,
            })
            .await
            .unwrap();
        assert_eq!(t.name, "Shine");
        assert!(!t.shield_enabled && !t.route_enabled && !t.fill_enabled);
        assert_eq!(b.fetch_tenant(t.id).await.unwrap(), Some(t));
    }
}
