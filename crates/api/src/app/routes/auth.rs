use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::PrincipalContext;

pub async fn sign_in(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::SignInRequest>,
) -> axum::response::Response {
    let sessions = services.session_for(None);
    match sessions.sign_in(&body.email, &body.password).await {
        Ok(session) => Json(dto::SessionResponse::from(session)).into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// Always 202, whether or not the email is registered.
pub async fn reset_password(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::ResetPasswordRequest>,
) -> axum::response::Response {
    let sessions = services.session_for(None);
    match sessions.reset_password_request(&body.email).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "success": true })),
        )
            .into_response(),
        Err(e) => errors::backend_error_to_response(e),
    }
}

pub async fn sign_out(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    let sessions = services.session_for(Some(&principal));
    match sessions.sign_out().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::backend_error_to_response(e),
    }
}

pub async fn update_password(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::UpdatePasswordRequest>,
) -> axum::response::Response {
    let sessions = services.session_for(Some(&principal));
    match sessions.update_password(&body.password).await {
        Ok(()) => Json(serde_json::json!({ "success": true })).into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}
