//! Serverless-style RPC endpoints.

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};

use tidyops_infra::{CompanyAction, OnboardingRequest};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/complete-onboarding", post(complete_onboarding))
        .route("/manage-company", post(manage_company))
}

pub async fn complete_onboarding(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<OnboardingRequest>,
) -> axum::response::Response {
    match services
        .provisioning
        .complete_onboarding(principal.identity(), body)
        .await
    {
        Ok(outcome) => {
            let status = if outcome.created { StatusCode::CREATED } else { StatusCode::OK };
            (status, Json(dto::onboarding_json(outcome))).into_response()
        }
        Err(e) => errors::provisioning_error_to_response(e),
    }
}

pub async fn manage_company(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<CompanyAction>,
) -> axum::response::Response {
    match services.provisioning.manage_company(principal.user_id(), body).await {
        Ok(outcome) => Json(dto::company_outcome_json(outcome)).into_response(),
        Err(e) => errors::provisioning_error_to_response(e),
    }
}
