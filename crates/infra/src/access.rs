//! Role/tenant resolution wired to the route guard.
//!
//! Two entry points:
//!
//! - [`AccessService`]: stateless per-request checks (HTTP surface). Role and
//!   tenant are resolved concurrently through the cached resolvers.
//! - [`AccessController`]: long-lived, session-scoped state for an interactive
//!   client. Keeps the last good role/tenant while a refresh is in flight and
//!   discards results that belong to a superseded session.
//!
//! Backend failures surface as [`AccessError`] only when they block the
//! decision; a role denial needs no tenant data, so a failing tenant lookup
//! cannot turn it into an error.

use std::sync::{Arc, Mutex};

use thiserror::Error;

use tidyops_auth::{
    AccessExplanation, AccessSnapshot, GuardState, Resolution, Role, RouteGuard, SessionContext,
    SessionSnapshot, Tenant,
};
use tidyops_core::UserId;

use crate::backend::BackendError;
use crate::resolver::{RoleResolver, TenantResolver};

const INDEX_PATH: &str = "/";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccessError {
    #[error("role lookup failed: {0}")]
    RoleLookup(BackendError),

    #[error("tenant lookup failed: {0}")]
    TenantLookup(BackendError),
}

#[derive(Clone)]
pub struct AccessService {
    roles: Arc<RoleResolver>,
    tenants: Arc<TenantResolver>,
    guard: Arc<RouteGuard>,
}

impl AccessService {
    pub fn new(roles: Arc<RoleResolver>, tenants: Arc<TenantResolver>, guard: Arc<RouteGuard>) -> Self {
        Self { roles, tenants, guard }
    }

    pub fn guard(&self) -> &RouteGuard {
        &self.guard
    }

    pub async fn check(&self, user_id: UserId, path: &str) -> Result<GuardState, AccessError> {
        let (role, tenant) = self.resolve(user_id).await?;
        let snapshot = snapshot_for(role, &tenant);
        let state = self.guard.evaluate(path, &snapshot);
        blocking_error(state, &tenant)
    }

    /// Canonical landing view for the caller's role (no tenant data needed).
    pub async fn landing(&self, user_id: UserId) -> Result<String, AccessError> {
        let role = self.roles.resolve(user_id).await.map_err(AccessError::RoleLookup)?;
        let state = self
            .guard
            .evaluate(INDEX_PATH, &AccessSnapshot::resolved(role, None));
        Ok(state
            .redirect_to()
            .map(str::to_string)
            .unwrap_or_else(|| tidyops_auth::landing_path(role).to_string()))
    }

    pub async fn explain(&self, user_id: UserId, path: &str) -> Result<AccessExplanation, AccessError> {
        let (role, tenant) = self.resolve(user_id).await?;
        let explanation = self.guard.explain(path, &snapshot_for(role, &tenant));
        if explanation.state == GuardState::Loading {
            if let Err(e) = tenant {
                return Err(AccessError::TenantLookup(e));
            }
        }
        Ok(explanation)
    }

    async fn resolve(
        &self,
        user_id: UserId,
    ) -> Result<(Role, Result<Option<Tenant>, BackendError>), AccessError> {
        let (role, tenant) = tokio::join!(self.roles.resolve(user_id), self.tenants.resolve(user_id));
        let role = role.map_err(|e| {
            tracing::warn!(%user_id, error = %e, "role resolution failed");
            AccessError::RoleLookup(e)
        })?;
        if let Err(e) = &tenant {
            tracing::warn!(%user_id, error = %e, "tenant resolution failed");
        }
        Ok((role, tenant))
    }
}

fn snapshot_for(role: Role, tenant: &Result<Option<Tenant>, BackendError>) -> AccessSnapshot<'_> {
    AccessSnapshot {
        authenticated: true,
        role: Resolution::Resolved(role),
        tenant: match tenant {
            Ok(t) => Resolution::Resolved(t.as_ref()),
            Err(_) => Resolution::Unresolved,
        },
    }
}

fn blocking_error(
    state: GuardState,
    tenant: &Result<Option<Tenant>, BackendError>,
) -> Result<GuardState, AccessError> {
    match (&state, tenant) {
        (GuardState::Loading, Err(e)) => Err(AccessError::TenantLookup(e.clone())),
        _ => Ok(state),
    }
}

/// Session-scoped resolution slot.
#[derive(Debug, Clone)]
enum Slot<T> {
    Unresolved,
    Ready { value: T, refreshing: bool },
    Failed(BackendError),
}

impl<T> Slot<T> {
    fn resolution(&self) -> Resolution<&T> {
        match self {
            Slot::Ready { value, refreshing: true } => Resolution::Refreshing(value),
            Slot::Ready { value, refreshing: false } => Resolution::Resolved(value),
            Slot::Unresolved | Slot::Failed(_) => Resolution::Unresolved,
        }
    }

    fn begin_refresh(&mut self) {
        if let Slot::Ready { refreshing, .. } = self {
            *refreshing = true;
        }
    }

    /// A failed refresh keeps the previous value.
    fn settle(&mut self, result: Result<T, BackendError>) {
        let previous = std::mem::replace(self, Slot::Unresolved);
        *self = match (result, previous) {
            (Ok(value), _) => Slot::Ready { value, refreshing: false },
            (Err(_), Slot::Ready { value, .. }) => Slot::Ready { value, refreshing: false },
            (Err(e), _) => Slot::Failed(e),
        };
    }

    fn error(&self) -> Option<&BackendError> {
        match self {
            Slot::Failed(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct ControllerState {
    owner: Option<SessionSnapshot>,
    role: Slot<Role>,
    tenant: Slot<Option<Tenant>>,
}

impl ControllerState {
    fn empty() -> Self {
        Self {
            owner: None,
            role: Slot::Unresolved,
            tenant: Slot::Unresolved,
        }
    }
}

/// Result of [`AccessController::refresh`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// No session; state was cleared.
    SignedOut,
    Applied,
    /// The session changed while resolving; results were dropped.
    Discarded,
}

pub struct AccessController {
    session: Arc<SessionContext>,
    roles: Arc<RoleResolver>,
    tenants: Arc<TenantResolver>,
    guard: Arc<RouteGuard>,
    state: Mutex<ControllerState>,
}

impl AccessController {
    pub fn new(
        session: Arc<SessionContext>,
        roles: Arc<RoleResolver>,
        tenants: Arc<TenantResolver>,
        guard: Arc<RouteGuard>,
    ) -> Self {
        Self {
            session,
            roles,
            tenants,
            guard,
            state: Mutex::new(ControllerState::empty()),
        }
    }

    /// Resolve role and tenant for the current session.
    ///
    /// On error the previous value (if any) stays in place and the error is
    /// returned to the caller.
    pub async fn refresh(&self) -> Result<RefreshOutcome, AccessError> {
        let Some(snapshot) = self.session.snapshot() else {
            self.with_state(|s| *s = ControllerState::empty());
            return Ok(RefreshOutcome::SignedOut);
        };

        self.with_state(|s| {
            if s.owner != Some(snapshot) {
                *s = ControllerState::empty();
                s.owner = Some(snapshot);
            }
            s.role.begin_refresh();
            s.tenant.begin_refresh();
        });

        let user_id = snapshot.user_id;
        let (role, tenant) = tokio::join!(self.roles.resolve(user_id), self.tenants.resolve(user_id));

        if !self.session.is_current(&snapshot) {
            tracing::debug!(%user_id, "session changed during resolution; discarding");
            return Ok(RefreshOutcome::Discarded);
        }

        let role_err = role.as_ref().err().cloned();
        let tenant_err = tenant.as_ref().err().cloned();

        let applied = self.with_state(|s| {
            if s.owner != Some(snapshot) {
                return false;
            }
            s.role.settle(role);
            s.tenant.settle(tenant);
            true
        });
        if !applied {
            return Ok(RefreshOutcome::Discarded);
        }

        if let Some(e) = role_err {
            tracing::warn!(%user_id, error = %e, "role refresh failed");
            return Err(AccessError::RoleLookup(e));
        }
        if let Some(e) = tenant_err {
            tracing::warn!(%user_id, error = %e, "tenant refresh failed");
            return Err(AccessError::TenantLookup(e));
        }
        Ok(RefreshOutcome::Applied)
    }

    /// Drop cached role/tenant for the current identity and resolve again.
    pub async fn invalidate_and_refresh(&self) -> Result<RefreshOutcome, AccessError> {
        if let Some(snapshot) = self.session.snapshot() {
            self.roles.invalidate(snapshot.user_id);
            self.tenants.invalidate(snapshot.user_id);
        }
        self.refresh().await
    }

    pub fn evaluate(&self, path: &str) -> Result<GuardState, AccessError> {
        self.decide(path, |guard, snapshot| guard.evaluate(path, snapshot), GuardState::clone)
            .map(|(state, _)| state)
    }

    pub fn explain(&self, path: &str) -> Result<AccessExplanation, AccessError> {
        self.decide(path, |guard, snapshot| guard.explain(path, snapshot), |e| e.state.clone())
            .map(|(explanation, _)| explanation)
    }

    /// Landing view for the current role; `Loading` until the role is known.
    pub fn landing(&self) -> Result<GuardState, AccessError> {
        self.evaluate(INDEX_PATH)
    }

    pub fn role(&self) -> Option<Role> {
        let current = self.session.snapshot()?;
        let state = self.state.lock().ok()?;
        if state.owner != Some(current) {
            return None;
        }
        state.role.resolution().value().map(|r| **r)
    }

    fn decide<R>(
        &self,
        path: &str,
        run: impl Fn(&RouteGuard, &AccessSnapshot<'_>) -> R,
        state_of: impl Fn(&R) -> GuardState,
    ) -> Result<(R, GuardState), AccessError> {
        let Some(current) = self.session.snapshot() else {
            let out = run(&self.guard, &AccessSnapshot::signed_out());
            let st = state_of(&out);
            return Ok((out, st));
        };

        let state = self
            .state
            .lock()
            .map_err(|_| AccessError::RoleLookup(BackendError::unavailable("access state lock poisoned")))?;

        let owned = state.owner == Some(current);
        let snapshot = if owned {
            AccessSnapshot {
                authenticated: true,
                role: state.role.resolution().map(|r| *r),
                tenant: state.tenant.resolution().map(|t| t.as_ref()),
            }
        } else {
            AccessSnapshot {
                authenticated: true,
                role: Resolution::Unresolved,
                tenant: Resolution::Unresolved,
            }
        };

        let out = run(&self.guard, &snapshot);
        let st = state_of(&out);
        if st == GuardState::Loading && owned {
            if let Some(e) = state.role.error() {
                return Err(AccessError::RoleLookup(e.clone()));
            }
            if let Some(e) = state.tenant.error() {
                tracing::debug!(path, "tenant unresolved after failed lookup");
                return Err(AccessError::TenantLookup(e.clone()));
            }
        }
        Ok((out, st))
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut ControllerState) -> T) -> T
    where
        T: Default,
    {
        match self.state.lock() {
            Ok(mut s) => f(&mut s),
            Err(_) => T::default(),
        }
    }
}
