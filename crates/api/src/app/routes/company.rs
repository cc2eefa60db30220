//! The caller's own company: read and settings/billing updates.

use std::sync::Arc;

use axum::{extract::Extension, response::IntoResponse, Json};

use tidyops_auth::TenantPatch;

use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::PrincipalContext;

pub async fn get_company(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    match services.tenants.resolve(principal.user_id()).await {
        Ok(company) => Json(serde_json::json!({ "company": company })).into_response(),
        Err(e) => errors::backend_error_to_response(e),
    }
}

pub async fn update_company(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(patch): Json<TenantPatch>,
) -> axum::response::Response {
    match services.provisioning.update_settings(principal.user_id(), patch).await {
        Ok(company) => Json(serde_json::json!({ "success": true, "company": company })).into_response(),
        Err(e) => errors::provisioning_error_to_response(e),
    }
}
