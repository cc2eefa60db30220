use chrono::{DateTime, Utc};

use tidyops_auth::{Identity, JwtClaims, Session};
use tidyops_core::UserId;

/// Principal context for a request (the identity behind the bearer token).
///
/// Role and tenant are not part of it: they are resolved per request so that
/// role changes take effect without waiting for token expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    identity: Identity,
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl PrincipalContext {
    pub fn from_claims(claims: &JwtClaims, access_token: impl Into<String>) -> Self {
        Self {
            identity: claims.identity(),
            access_token: access_token.into(),
            expires_at: claims.expires_at(),
        }
    }

    pub fn user_id(&self) -> UserId {
        self.identity.id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// The session this request is acting under.
    pub fn session(&self) -> Session {
        Session {
            access_token: self.access_token.clone(),
            identity: self.identity.clone(),
            expires_at: self.expires_at,
        }
    }
}
