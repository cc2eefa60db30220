use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tidyops_core::UserId;

use crate::Identity;

/// Access-token claims.
///
/// Role and tenant are deliberately absent: they are resolved from the backend
/// on demand so that a role change does not wait for token expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject / identity id.
    pub sub: UserId,

    pub email: String,

    /// Issued-at (seconds since epoch).
    pub iat: i64,

    /// Expiration (seconds since epoch).
    pub exp: i64,
}

impl JwtClaims {
    pub fn for_identity(identity: &Identity, issued_at: DateTime<Utc>, ttl: chrono::Duration) -> Self {
        Self {
            sub: identity.id,
            email: identity.email.clone(),
            iat: issued_at.timestamp(),
            exp: (issued_at + ttl).timestamp(),
        }
    }

    pub fn identity(&self) -> Identity {
        Identity {
            id: self.sub,
            email: self.email.clone(),
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0).single().unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid token time window (exp <= iat)")]
    InvalidTimeWindow,

    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("failed to sign token: {0}")]
    Signing(String),
}

/// Deterministically validate claim timestamps.
///
/// Signature verification happens in [`JwtValidator::validate`] before this.
pub fn validate_claims(claims: &JwtClaims, now: DateTime<Utc>) -> Result<(), TokenValidationError> {
    if claims.exp <= claims.iat {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    let now = now.timestamp();
    if now < claims.iat {
        return Err(TokenValidationError::NotYetValid);
    }
    if now >= claims.exp {
        return Err(TokenValidationError::Expired);
    }
    Ok(())
}

/// Verifies a bearer token and returns its claims.
pub trait JwtValidator: Send + Sync {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenValidationError>;
}

/// HS256 issuer/validator sharing one secret with the backend.
#[derive(Clone)]
pub struct Hs256Jwt {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl core::fmt::Debug for Hs256Jwt {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Hs256Jwt").finish_non_exhaustive()
    }
}

impl Hs256Jwt {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }

    pub fn issue(&self, claims: &JwtClaims) -> Result<String, TokenValidationError> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| TokenValidationError::Signing(e.to_string()))
    }
}

impl JwtValidator for Hs256Jwt {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenValidationError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Time checks are done against the injected clock below.
        validation.validate_exp = false;

        let data = jsonwebtoken::decode::<JwtClaims>(token, &self.decoding, &validation)
            .map_err(|e| TokenValidationError::Malformed(e.to_string()))?;

        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> Identity {
        Identity {
            id: UserId::new(),
            email: "owner@tidyops.test".to_string(),
        }
    }

    #[test]
    fn issued_token_validates() {
        let jwt = Hs256Jwt::new(b"secret");
        let now = Utc::now();
        let claims = JwtClaims::for_identity(&identity(), now, chrono::Duration::minutes(10));
        let token = jwt.issue(&claims).unwrap();

        assert_eq!(jwt.validate(&token, now).unwrap(), claims);
    }

    #[test]
    fn expired_token_is_rejected() {
        let jwt = Hs256Jwt::new(b"secret");
        let now = Utc::now();
        let claims = JwtClaims::for_identity(&identity(), now, chrono::Duration::minutes(10));
        let token = jwt.issue(&claims).unwrap();

        let later = now + chrono::Duration::minutes(11);
        assert_eq!(jwt.validate(&token, later), Err(TokenValidationError::Expired));
    }

    #[test]
    fn wrong_secret_is_malformed() {
        let now = Utc::now();
        let claims = JwtClaims::for_identity(&identity(), now, chrono::Duration::minutes(10));
        let token = Hs256Jwt::new(b"secret").issue(&claims).unwrap();

        let err = Hs256Jwt::new(b"other").validate(&token, now).unwrap_err();
        assert!(matches!(err, TokenValidationError::Malformed(_)));
    }

    #[test]
    fn inverted_window_is_rejected() {
        let mut claims = JwtClaims::for_identity(&identity(), Utc::now(), chrono::Duration::minutes(1));
        claims.exp = claims.iat;
        assert_eq!(
            validate_claims(&claims, Utc::now()),
            Err(TokenValidationError::InvalidTimeWindow)
        );
    }
}
