//! Backend-as-a-service contract.
//!
//! The hosted backend is consumed through two traits:
//!
//! - [`AuthProvider`]: sign-in/out, password flows, identity provisioning
//! - [`Directory`]: role assignments, profiles and tenant records
//!
//! "Not found" on a read is a normal outcome and is modeled as `Ok(None)` (or an
//! empty list). `Err(BackendError)` always means the backend could not answer.

use async_trait::async_trait;
use thiserror::Error;

use tidyops_auth::{
    Identity, NewTenant, Profile, Role, RoleAssignment, Session, Tenant, TenantPatch,
    TokenValidationError,
};
use tidyops_core::{TenantId, UserId};

pub mod in_memory;
pub mod postgres;

pub use in_memory::{InMemoryBackend, Operation};
pub use postgres::PostgresBackend;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Transport failure / service unreachable.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// A write targeted a record that does not exist.
    #[error("record not found: {0}")]
    NotFound(String),

    /// Uniqueness or concurrency conflict.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Stored data could not be decoded.
    #[error("invalid stored data: {0}")]
    InvalidData(String),
}

impl BackendError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("password rejected: {0}")]
    WeakPassword(String),

    #[error("email already registered")]
    EmailTaken,

    #[error("not signed in")]
    NotSignedIn,

    #[error(transparent)]
    Token(#[from] TokenValidationError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError>;

    /// Revoke the session's access token for the rest of its lifetime.
    async fn sign_out(&self, session: &Session) -> Result<(), BackendError>;

    /// True once the token has been signed out.
    async fn is_revoked(&self, access_token: &str) -> Result<bool, BackendError>;

    /// Always succeeds for unknown emails (no account enumeration).
    async fn reset_password_request(&self, email: &str) -> Result<(), BackendError>;

    async fn update_password(&self, user_id: UserId, new_password: &str) -> Result<(), AuthError>;

    /// Admin API: create an identity with an initial password.
    async fn create_identity(&self, email: &str, password: &str) -> Result<Identity, AuthError>;

    async fn delete_identity(&self, user_id: UserId) -> Result<(), BackendError>;
}

#[async_trait]
pub trait Directory: Send + Sync {
    async fn fetch_role_assignments(&self, user_id: UserId) -> Result<Vec<RoleAssignment>, BackendError>;

    async fn insert_role_assignment(&self, user_id: UserId, role: Role) -> Result<(), BackendError>;

    async fn delete_role_assignment(&self, user_id: UserId, role: Role) -> Result<(), BackendError>;

    async fn fetch_profile(&self, user_id: UserId) -> Result<Option<Profile>, BackendError>;

    async fn upsert_profile(&self, profile: &Profile) -> Result<(), BackendError>;

    async fn delete_profile(&self, user_id: UserId) -> Result<(), BackendError>;

    async fn fetch_tenant(&self, tenant_id: TenantId) -> Result<Option<Tenant>, BackendError>;

    async fn list_tenants(&self) -> Result<Vec<Tenant>, BackendError>;

    async fn insert_tenant(&self, tenant: &NewTenant) -> Result<Tenant, BackendError>;

    /// Fails with [`BackendError::NotFound`] if the tenant does not exist.
    async fn update_tenant(&self, tenant_id: TenantId, patch: &TenantPatch) -> Result<Tenant, BackendError>;

    async fn delete_tenant(&self, tenant_id: TenantId) -> Result<(), BackendError>;
}
