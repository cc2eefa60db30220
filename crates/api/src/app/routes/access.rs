//! Route guard decisions for the caller (client navigation support).

use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/landing", get(landing))
        .route("/check", get(check))
        .route("/explain", get(explain))
}

pub async fn landing(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    match services.access.landing(principal.user_id()).await {
        Ok(to) => Json(serde_json::json!({ "to": to })).into_response(),
        Err(e) => errors::access_error_to_response(e),
    }
}

/// Denials are ordinary 200 responses carrying the redirect target.
pub async fn check(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Query(query): Query<dto::PathQuery>,
) -> axum::response::Response {
    match services.access.check(principal.user_id(), &query.path).await {
        Ok(state) => Json(dto::AccessCheckResponse {
            path: query.path,
            state,
        })
        .into_response(),
        Err(e) => errors::access_error_to_response(e),
    }
}

pub async fn explain(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Query(query): Query<dto::PathQuery>,
) -> axum::response::Response {
    match services.access.explain(principal.user_id(), &query.path).await {
        Ok(explanation) => Json(explanation).into_response(),
        Err(e) => errors::access_error_to_response(e),
    }
}
