//! Session Provider: backend auth calls bound to an explicit [`SessionContext`].

use std::sync::Arc;

use chrono::Utc;

use tidyops_auth::{Session, SessionContext};

use crate::backend::{AuthError, AuthProvider, BackendError};
use crate::resolver::{RoleResolver, TenantResolver};

pub struct SessionService {
    auth: Arc<dyn AuthProvider>,
    context: Arc<SessionContext>,
    roles: Arc<RoleResolver>,
    tenants: Arc<TenantResolver>,
}

impl SessionService {
    pub fn new(
        auth: Arc<dyn AuthProvider>,
        context: Arc<SessionContext>,
        roles: Arc<RoleResolver>,
        tenants: Arc<TenantResolver>,
    ) -> Self {
        Self {
            auth,
            context,
            roles,
            tenants,
        }
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.context
    }

    /// Sign in and install the session. A different identity than the current
    /// one supersedes any in-flight resolution.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let session = self.auth.sign_in(email, password).await.map_err(|e| {
            tracing::info!(error = %e, "sign-in rejected");
            e
        })?;
        tracing::info!(user_id = %session.user_id(), "signed in");
        self.context.set(session.clone());
        Ok(session)
    }

    /// Clear the local session first so nothing keeps acting on the old identity
    /// even if the backend call fails, then revoke the token.
    pub async fn sign_out(&self) -> Result<(), BackendError> {
        let Some(session) = self.context.current() else {
            return Ok(());
        };
        let user_id = session.user_id();
        self.context.clear();
        self.roles.invalidate(user_id);
        self.tenants.invalidate(user_id);
        self.auth.sign_out(&session).await?;
        tracing::info!(%user_id, "signed out");
        Ok(())
    }

    pub async fn reset_password_request(&self, email: &str) -> Result<(), BackendError> {
        self.auth.reset_password_request(email).await
    }

    pub async fn update_password(&self, new_password: &str) -> Result<(), AuthError> {
        let session = self.context.current().ok_or(AuthError::NotSignedIn)?;
        self.auth.update_password(session.user_id(), new_password).await?;
        tracing::info!(user_id = %session.user_id(), "password updated");
        Ok(())
    }

    /// The installed session, unless its token has expired.
    pub fn current(&self) -> Option<Session> {
        self.context
            .current()
            .filter(|session| !session.is_expired(Utc::now()))
    }
}
