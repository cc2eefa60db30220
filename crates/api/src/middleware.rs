use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::Utc;

use tidyops_auth::JwtValidator;
use tidyops_infra::AuthProvider;

use crate::app::errors::json_error;
use crate::context::PrincipalContext;

#[derive(Clone)]
pub struct AuthState {
    pub jwt: Arc<dyn JwtValidator>,
    /// Consulted for signed-out tokens.
    pub sessions: Arc<dyn AuthProvider>,
}

pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let token = extract_bearer(req.headers())
        .ok_or_else(|| json_error(StatusCode::UNAUTHORIZED, "unauthorized", "missing bearer token"))?
        .to_string();

    let claims = state.jwt.validate(&token, Utc::now()).map_err(|e| {
        tracing::debug!(error = %e, "bearer token rejected");
        json_error(StatusCode::UNAUTHORIZED, "unauthorized", e.to_string())
    })?;

    match state.sessions.is_revoked(&token).await {
        Ok(false) => {}
        Ok(true) => {
            tracing::debug!(user_id = %claims.sub, "signed-out token presented");
            return Err(json_error(StatusCode::UNAUTHORIZED, "unauthorized", "session has been signed out"));
        }
        Err(e) => {
            tracing::warn!(error = %e, "revocation check failed");
            return Err(json_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "backend_unavailable",
                "could not verify session",
            ));
        }
    }

    let principal = PrincipalContext::from_claims(&claims, token);
    req.extensions_mut().insert(principal);

    Ok(next.run(req).await)
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let header = headers.get(axum::http::header::AUTHORIZATION)?;
    let header = header.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token)
}
