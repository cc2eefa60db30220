//! Postgres-backed implementation of the backend contract.
//!
//! Tables:
//!
//! | Table | Key | Purpose |
//! |-------|-----|---------|
//! | `identities` | `id` (unique `email`) | credentials (argon2 PHC hash) |
//! | `user_roles` | `(user_id, role)` | role assignments, many per user |
//! | `profiles` | `user_id` | identity -> tenant link |
//! | `companies` | `id` | tenant record, subscription and module flags |
//! | `password_reset_requests` | `id` | queued reset mails |
//! | `revoked_sessions` | `access_token` | signed-out tokens until they expire |
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | BackendError |
//! |------------|----------------------|--------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (foreign key violation) | `23503` | `Conflict` |
//! | Database (other) | Any other | `Unavailable` |
//! | ColumnDecode / ColumnNotFound | N/A | `InvalidData` |
//! | PoolClosed, Io, other | N/A | `Unavailable` |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use tidyops_auth::{
    Hs256Jwt, Identity, JwtClaims, NewTenant, Profile, Role, RoleAssignment, Session,
    SubscriptionStatus, Tenant, TenantPatch, Tier,
};
use tidyops_core::{TenantId, UserId};

use super::{AuthError, AuthProvider, BackendError, Directory};
use crate::password::{hash_password, validate_password, verify_password};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS identities (
        id UUID PRIMARY KEY,
        email TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS companies (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL,
        phone TEXT,
        subscription_tier TEXT,
        subscription_status TEXT,
        shield_enabled BOOLEAN NOT NULL DEFAULT FALSE,
        route_enabled BOOLEAN NOT NULL DEFAULT FALSE,
        fill_enabled BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS profiles (
        user_id UUID PRIMARY KEY,
        company_id UUID REFERENCES companies(id),
        full_name TEXT,
        phone TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS user_roles (
        user_id UUID NOT NULL,
        role TEXT NOT NULL,
        PRIMARY KEY (user_id, role)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS password_reset_requests (
        id UUID PRIMARY KEY,
        email TEXT NOT NULL,
        requested_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS revoked_sessions (
        access_token TEXT PRIMARY KEY,
        user_id UUID NOT NULL,
        expires_at TIMESTAMPTZ NOT NULL
    )
    "#,
];

#[derive(Clone)]
pub struct PostgresBackend {
    pool: Arc<PgPool>,
    jwt: Hs256Jwt,
    session_ttl: chrono::Duration,
}

impl core::fmt::Debug for PostgresBackend {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PostgresBackend")
            .field("session_ttl", &self.session_ttl)
            .finish_non_exhaustive()
    }
}

impl PostgresBackend {
    pub fn new(pool: PgPool, jwt: Hs256Jwt, session_ttl: chrono::Duration) -> Self {
        Self {
            pool: Arc::new(pool),
            jwt,
            session_ttl,
        }
    }

    pub async fn connect(
        database_url: &str,
        jwt: Hs256Jwt,
        session_ttl: chrono::Duration,
    ) -> Result<Self, BackendError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool, jwt, session_ttl))
    }

    /// Create tables if they are missing.
    pub async fn ensure_schema(&self) -> Result<(), BackendError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl AuthProvider for PostgresBackend {
    #[instrument(skip(self, password), err)]
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let email = email.trim().to_lowercase();
        let row = sqlx::query("SELECT id, email, password_hash FROM identities WHERE email = $1")
            .bind(&email)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("sign_in", e))?;

        let Some(row) = row else {
            return Err(AuthError::InvalidCredentials);
        };
        let id: Uuid = row.try_get("id").map_err(|e| map_sqlx_error("sign_in", e))?;
        let stored_email: String = row.try_get("email").map_err(|e| map_sqlx_error("sign_in", e))?;
        let hash: String = row
            .try_get("password_hash")
            .map_err(|e| map_sqlx_error("sign_in", e))?;

        if !verify_password(&hash, password) {
            return Err(AuthError::InvalidCredentials);
        }

        let identity = Identity {
            id: UserId::from_uuid(id),
            email: stored_email,
        };
        let claims = JwtClaims::for_identity(&identity, Utc::now(), self.session_ttl);
        let access_token = self.jwt.issue(&claims)?;
        Ok(Session {
            access_token,
            identity,
            expires_at: claims.expires_at(),
        })
    }

    #[instrument(skip(self, session), fields(user_id = %session.user_id()), err)]
    async fn sign_out(&self, session: &Session) -> Result<(), BackendError> {
        sqlx::query("DELETE FROM revoked_sessions WHERE expires_at <= now()")
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("sign_out", e))?;
        sqlx::query(
            r#"
            INSERT INTO revoked_sessions (access_token, user_id, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (access_token) DO NOTHING
            "#,
        )
        .bind(&session.access_token)
        .bind(session.user_id().as_uuid())
        .bind(session.expires_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("sign_out", e))?;
        Ok(())
    }

    async fn is_revoked(&self, access_token: &str) -> Result<bool, BackendError> {
        let revoked: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM revoked_sessions WHERE access_token = $1)",
        )
        .bind(access_token)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("is_revoked", e))?;
        Ok(revoked)
    }

    #[instrument(skip(self), err)]
    async fn reset_password_request(&self, email: &str) -> Result<(), BackendError> {
        let email = email.trim().to_lowercase();
        sqlx::query(
            r#"
            INSERT INTO password_reset_requests (id, email)
            SELECT $1, email FROM identities WHERE email = $2
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(&email)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("reset_password_request", e))?;
        Ok(())
    }

    #[instrument(skip(self, new_password), fields(user_id = %user_id), err)]
    async fn update_password(&self, user_id: UserId, new_password: &str) -> Result<(), AuthError> {
        validate_password(new_password)?;
        let hash = hash_password(new_password)?;
        let result = sqlx::query("UPDATE identities SET password_hash = $2 WHERE id = $1")
            .bind(user_id.as_uuid())
            .bind(hash)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("update_password", e))?;
        if result.rows_affected() == 0 {
            return Err(BackendError::not_found(format!("identity {user_id}")).into());
        }
        Ok(())
    }

    #[instrument(skip(self, password), err)]
    async fn create_identity(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        validate_password(password)?;
        let email = email.trim().to_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err(AuthError::InvalidCredentials);
        }
        let hash = hash_password(password)?;
        let identity = Identity {
            id: UserId::new(),
            email,
        };

        sqlx::query("INSERT INTO identities (id, email, password_hash) VALUES ($1, $2, $3)")
            .bind(identity.id.as_uuid())
            .bind(&identity.email)
            .bind(hash)
            .execute(&*self.pool)
            .await
            .map_err(|e| match map_sqlx_error("create_identity", e) {
                BackendError::Conflict(_) => AuthError::EmailTaken,
                other => AuthError::Backend(other),
            })?;
        Ok(identity)
    }

    async fn delete_identity(&self, user_id: UserId) -> Result<(), BackendError> {
        sqlx::query("DELETE FROM identities WHERE id = $1")
            .bind(user_id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_identity", e))?;
        Ok(())
    }
}

#[async_trait]
impl Directory for PostgresBackend {
    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn fetch_role_assignments(&self, user_id: UserId) -> Result<Vec<RoleAssignment>, BackendError> {
        let rows = sqlx::query("SELECT role FROM user_roles WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_role_assignments", e))?;

        let raw = rows
            .iter()
            .map(|row| row.try_get::<String, _>("role"))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_sqlx_error("fetch_role_assignments", e))?;
        Ok(known_role_assignments(user_id, raw))
    }

    async fn insert_role_assignment(&self, user_id: UserId, role: Role) -> Result<(), BackendError> {
        sqlx::query("INSERT INTO user_roles (user_id, role) VALUES ($1, $2) ON CONFLICT DO NOTHING")
            .bind(user_id.as_uuid())
            .bind(role.as_str())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("insert_role_assignment", e))?;
        Ok(())
    }

    async fn delete_role_assignment(&self, user_id: UserId, role: Role) -> Result<(), BackendError> {
        sqlx::query("DELETE FROM user_roles WHERE user_id = $1 AND role = $2")
            .bind(user_id.as_uuid())
            .bind(role.as_str())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_role_assignment", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn fetch_profile(&self, user_id: UserId) -> Result<Option<Profile>, BackendError> {
        let row = sqlx::query("SELECT user_id, company_id, full_name, phone FROM profiles WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_profile", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let company_id: Option<Uuid> = row
            .try_get("company_id")
            .map_err(|e| map_sqlx_error("fetch_profile", e))?;
        Ok(Some(Profile {
            user_id,
            tenant_id: company_id.map(TenantId::from_uuid),
            full_name: row
                .try_get("full_name")
                .map_err(|e| map_sqlx_error("fetch_profile", e))?,
            phone: row.try_get("phone").map_err(|e| map_sqlx_error("fetch_profile", e))?,
        }))
    }

    async fn upsert_profile(&self, profile: &Profile) -> Result<(), BackendError> {
        sqlx::query(
            r#"
            INSERT INTO profiles (user_id, company_id, full_name, phone)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id) DO UPDATE
            SET company_id = EXCLUDED.company_id,
                full_name = EXCLUDED.full_name,
                phone = EXCLUDED.phone
            "#,
        )
        .bind(profile.user_id.as_uuid())
        .bind(profile.tenant_id.map(|t| *t.as_uuid()))
        .bind(&profile.full_name)
        .bind(&profile.phone)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_profile", e))?;
        Ok(())
    }

    async fn delete_profile(&self, user_id: UserId) -> Result<(), BackendError> {
        sqlx::query("DELETE FROM profiles WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_profile", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn fetch_tenant(&self, tenant_id: TenantId) -> Result<Option<Tenant>, BackendError> {
        let row = sqlx::query(&format!("SELECT {TENANT_COLUMNS} FROM companies WHERE id = $1"))
            .bind(tenant_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_tenant", e))?;
        row.as_ref().map(tenant_from_row).transpose()
    }

    async fn list_tenants(&self) -> Result<Vec<Tenant>, BackendError> {
        let rows = sqlx::query(&format!(
            "SELECT {TENANT_COLUMNS} FROM companies ORDER BY created_at ASC"
        ))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_tenants", e))?;
        rows.iter().map(tenant_from_row).collect()
    }

    #[instrument(skip(self, tenant), fields(name = %tenant.name), err)]
    async fn insert_tenant(&self, tenant: &NewTenant) -> Result<Tenant, BackendError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO companies (id, name, phone, subscription_tier, subscription_status)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {TENANT_COLUMNS}
            "#
        ))
        .bind(Uuid::now_v7())
        .bind(tenant.name.trim())
        .bind(&tenant.phone)
        .bind(tenant.subscription_tier.as_str())
        .bind(tenant.subscription_status.as_str())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_tenant", e))?;
        tenant_from_row(&row)
    }

    #[instrument(skip(self, patch), fields(tenant_id = %tenant_id), err)]
    async fn update_tenant(&self, tenant_id: TenantId, patch: &TenantPatch) -> Result<Tenant, BackendError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE companies SET
                name = COALESCE($2, name),
                phone = COALESCE($3, phone),
                subscription_tier = COALESCE($4, subscription_tier),
                subscription_status = COALESCE($5, subscription_status),
                shield_enabled = COALESCE($6, shield_enabled),
                route_enabled = COALESCE($7, route_enabled),
                fill_enabled = COALESCE($8, fill_enabled)
            WHERE id = $1
            RETURNING {TENANT_COLUMNS}
            "#
        ))
        .bind(tenant_id.as_uuid())
        .bind(&patch.name)
        .bind(&patch.phone)
        .bind(patch.subscription_tier.map(Tier::as_str))
        .bind(patch.subscription_status.map(SubscriptionStatus::as_str))
        .bind(patch.shield_enabled)
        .bind(patch.route_enabled)
        .bind(patch.fill_enabled)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_tenant", e))?;

        match row {
            Some(row) => tenant_from_row(&row),
            None => Err(BackendError::not_found(format!("company {tenant_id}"))),
        }
    }

    async fn delete_tenant(&self, tenant_id: TenantId) -> Result<(), BackendError> {
        sqlx::query("DELETE FROM companies WHERE id = $1")
            .bind(tenant_id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_tenant", e))?;
        Ok(())
    }
}

const TENANT_COLUMNS: &str = "id, name, phone, subscription_tier, subscription_status, \
     shield_enabled, route_enabled, fill_enabled, created_at";

fn tenant_from_row(row: &PgRow) -> Result<Tenant, BackendError> {
    let get = |e: sqlx::Error| map_sqlx_error("decode company", e);

    let id: Uuid = row.try_get("id").map_err(get)?;
    let tier: Option<String> = row.try_get("subscription_tier").map_err(get)?;
    let status: Option<String> = row.try_get("subscription_status").map_err(get)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(get)?;

    Ok(Tenant {
        id: TenantId::from_uuid(id),
        name: row.try_get("name").map_err(get)?,
        phone: row.try_get("phone").map_err(get)?,
        subscription_tier: parse_lenient::<Tier>(id, "subscription_tier", tier),
        subscription_status: parse_lenient::<SubscriptionStatus>(id, "subscription_status", status),
        shield_enabled: row.try_get("shield_enabled").map_err(get)?,
        route_enabled: row.try_get("route_enabled").map_err(get)?,
        fill_enabled: row.try_get("fill_enabled").map_err(get)?,
        created_at,
    })
}

/// Rows naming a role this build does not know are skipped, so a user whose
/// only rows are unknown resolves like a user with none.
fn known_role_assignments(user_id: UserId, raw: Vec<String>) -> Vec<RoleAssignment> {
    raw.into_iter()
        .filter_map(|raw| match raw.parse::<Role>() {
            Ok(role) => Some(RoleAssignment::new(role)),
            Err(_) => {
                tracing::warn!(%user_id, role = %raw, "skipping unknown role assignment");
                None
            }
        })
        .collect()
}

/// Unrecognized values are treated as absent (a missing tier gates as basic).
fn parse_lenient<T: core::str::FromStr>(company_id: Uuid, column: &'static str, raw: Option<String>) -> Option<T> {
    let raw = raw?;
    match raw.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(%company_id, column, value = %raw, "ignoring unrecognized value");
            None
        }
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> BackendError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") | Some("23503") => BackendError::Conflict(msg),
                _ => BackendError::Unavailable(msg),
            }
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::ColumnNotFound(_) | sqlx::Error::Decode(_) => {
            BackendError::InvalidData(format!("{operation}: {err}"))
        }
        sqlx::Error::PoolClosed => BackendError::Unavailable(format!("connection pool closed in {operation}")),
        _ => BackendError::Unavailable(format!("sqlx error in {operation}: {err}")),
    }
}
