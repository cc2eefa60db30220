use axum::{
    Router,
    routing::{get, post},
};

pub mod access;
pub mod auth;
pub mod company;
pub mod functions;
pub mod system;

/// Endpoints reachable without a bearer token.
pub fn public_router() -> Router {
    Router::new()
        .route("/health", get(system::health))
        .route("/auth/sign-in", post(auth::sign_in))
        .route("/auth/reset-password", post(auth::reset_password))
}

/// Router for all authenticated endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/auth/sign-out", post(auth::sign_out))
        .route("/auth/update-password", post(auth::update_password))
        .route("/company", get(company::get_company).patch(company::update_company))
        .nest("/functions/v1", functions::router())
        .nest("/access", access::router())
}
