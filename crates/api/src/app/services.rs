//! Infrastructure wiring: backend choice, resolvers, access and provisioning services.

use std::sync::Arc;

use anyhow::Context;

use tidyops_auth::{Hs256Jwt, Role, RouteGuard, SessionContext};
use tidyops_infra::{
    AccessService, AuthError, AuthProvider, Directory, InMemoryBackend, PostgresBackend,
    ProvisioningService, RoleResolver, SessionService, TenantResolver,
};

use crate::config::{ApiConfig, OwnerBootstrap};
use crate::context::PrincipalContext;

pub struct AppServices {
    pub auth: Arc<dyn AuthProvider>,
    pub directory: Arc<dyn Directory>,
    pub roles: Arc<RoleResolver>,
    pub tenants: Arc<TenantResolver>,
    pub access: AccessService,
    pub provisioning: ProvisioningService,
    pub jwt: Arc<Hs256Jwt>,
}

/// Postgres when `DATABASE_URL` is set, otherwise the in-memory backend.
pub async fn build_services(config: &ApiConfig) -> anyhow::Result<AppServices> {
    let jwt = Hs256Jwt::new(config.jwt_secret.as_bytes());

    let services = match &config.database_url {
        Some(url) => {
            let backend = PostgresBackend::connect(url, jwt.clone(), config.session_ttl)
                .await
                .context("failed to connect to DATABASE_URL")?;
            backend.ensure_schema().await.context("failed to ensure schema")?;
            tracing::info!("using postgres backend");
            let backend = Arc::new(backend);
            wire(backend.clone(), backend, jwt, config)
        }
        None => {
            tracing::info!("DATABASE_URL not set; using in-memory backend");
            let backend = Arc::new(InMemoryBackend::new(jwt.clone(), config.session_ttl));
            wire(backend.clone(), backend, jwt, config)
        }
    };

    if let Some(owner) = &config.owner {
        services.bootstrap_owner(owner).await?;
    }
    Ok(services)
}

fn wire(
    auth: Arc<dyn AuthProvider>,
    directory: Arc<dyn Directory>,
    jwt: Hs256Jwt,
    config: &ApiConfig,
) -> AppServices {
    let roles = Arc::new(RoleResolver::new(directory.clone(), config.role_cache_ttl));
    let tenants = Arc::new(TenantResolver::new(directory.clone(), config.tenant_cache_ttl));
    let guard = Arc::new(RouteGuard::with_defaults());

    AppServices {
        access: AccessService::new(roles.clone(), tenants.clone(), guard),
        provisioning: ProvisioningService::new(auth.clone(), directory.clone(), roles.clone(), tenants.clone()),
        auth,
        directory,
        roles,
        tenants,
        jwt: Arc::new(jwt),
    }
}

impl AppServices {
    /// Session provider bound to this request's principal (or to no session).
    pub fn session_for(&self, principal: Option<&PrincipalContext>) -> SessionService {
        let context = Arc::new(SessionContext::new());
        context.init(principal.map(PrincipalContext::session));
        SessionService::new(self.auth.clone(), context, self.roles.clone(), self.tenants.clone())
    }

    /// Ensure the platform owner identity exists and holds the owner role.
    pub async fn bootstrap_owner(&self, owner: &OwnerBootstrap) -> anyhow::Result<()> {
        let identity = match self.auth.create_identity(&owner.email, &owner.password).await {
            Ok(identity) => identity,
            Err(AuthError::EmailTaken) => {
                self.auth
                    .sign_in(&owner.email, &owner.password)
                    .await
                    .context("platform owner exists with a different password")?
                    .identity
            }
            Err(e) => return Err(e).context("failed to create platform owner"),
        };
        self.directory
            .insert_role_assignment(identity.id, Role::Owner)
            .await
            .context("failed to assign owner role")?;
        self.roles.invalidate(identity.id);
        tracing::info!(user_id = %identity.id, "platform owner ready");
        Ok(())
    }
}
