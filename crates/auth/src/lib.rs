//! `tidyops-auth`: pure authorization boundary (roles, subscriptions, route gates).
//!
//! This crate is intentionally decoupled from HTTP and storage. Everything here is
//! a deterministic function of already-resolved role/tenant state; resolution
//! itself (network, caching) lives in `tidyops-infra`.

pub mod claims;
pub mod guard;
pub mod landing;
pub mod policy;
pub mod requirement;
pub mod roles;
pub mod session;
pub mod subscription;
pub mod tenant;

pub use claims::{Hs256Jwt, JwtClaims, JwtValidator, TokenValidationError, validate_claims};
pub use guard::{
    AccessExplanation, AccessSnapshot, CheckKind, CheckOutcome, CheckRecord, Fallback, GuardConfig,
    GuardState, Redirect, RedirectReason, Resolution, RouteGuard,
};
pub use landing::{landing_path, landing_path_for_name};
pub use policy::{module_enabled, role_allowed, tier_sufficient};
pub use requirement::{AccessRequirement, RouteRule, RouteTable};
pub use roles::{Role, RoleAssignment, effective_role};
pub use session::{Identity, Session, SessionContext, SessionSnapshot};
pub use subscription::{SubscriptionStatus, Tier};
pub use tenant::{Module, NewTenant, Profile, Tenant, TenantPatch};
