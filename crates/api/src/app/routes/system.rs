use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use crate::app::{dto, errors};
use crate::app::services::AppServices;
use crate::context::PrincipalContext;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    let user_id = principal.user_id();
    let (role, company) = tokio::join!(services.roles.resolve(user_id), services.tenants.resolve(user_id));
    let role = match role {
        Ok(r) => r,
        Err(e) => return errors::backend_error_to_response(e),
    };
    let company = match company {
        Ok(c) => c,
        Err(e) => return errors::backend_error_to_response(e),
    };

    Json(dto::WhoAmIResponse {
        user: principal.identity().clone(),
        role,
        company,
    })
    .into_response()
}
