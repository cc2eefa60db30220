//! Infrastructure layer: backend adapters, cached resolvers, provisioning RPCs.

pub mod access;
pub mod backend;
pub mod password;
pub mod provisioning;
pub mod resolver;
pub mod session;

pub use access::{AccessController, AccessError, AccessService, RefreshOutcome};
pub use backend::{AuthError, AuthProvider, BackendError, Directory, InMemoryBackend, Operation, PostgresBackend};
pub use provisioning::{
    CompanyAction, CompanyOutcome, CreatedCompany, OnboardingOutcome, OnboardingRequest, ProvisioningError,
    ProvisioningService,
};
pub use resolver::{ResolverCache, RoleResolver, TenantResolver};
pub use session::SessionService;
