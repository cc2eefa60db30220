use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use tidyops_infra::{AccessError, AuthError, BackendError, ProvisioningError};

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "success": false,
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn backend_error_to_response(err: BackendError) -> axum::response::Response {
    match err {
        BackendError::Unavailable(msg) => json_error(StatusCode::SERVICE_UNAVAILABLE, "backend_unavailable", msg),
        BackendError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, "not_found", msg),
        BackendError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        BackendError::InvalidData(msg) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "invalid_data", msg),
    }
}

pub fn auth_error_to_response(err: AuthError) -> axum::response::Response {
    match err {
        AuthError::InvalidCredentials => json_error(
            StatusCode::UNAUTHORIZED,
            "invalid_credentials",
            "invalid email or password",
        ),
        AuthError::WeakPassword(msg) => json_error(StatusCode::BAD_REQUEST, "weak_password", msg),
        AuthError::EmailTaken => json_error(StatusCode::CONFLICT, "email_taken", "email already registered"),
        AuthError::NotSignedIn => json_error(StatusCode::UNAUTHORIZED, "unauthorized", "not signed in"),
        AuthError::Token(e) => json_error(StatusCode::UNAUTHORIZED, "invalid_token", e.to_string()),
        AuthError::Backend(e) => backend_error_to_response(e),
    }
}

/// Lookup failures are "I don't know", never a denial.
pub fn access_error_to_response(err: AccessError) -> axum::response::Response {
    let message = err.to_string();
    match err {
        AccessError::RoleLookup(_) => json_error(StatusCode::SERVICE_UNAVAILABLE, "role_lookup_failed", message),
        AccessError::TenantLookup(_) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "tenant_lookup_failed", message)
        }
    }
}

pub fn provisioning_error_to_response(err: ProvisioningError) -> axum::response::Response {
    let message = err.to_string();
    match err {
        ProvisioningError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        ProvisioningError::Forbidden(msg) => json_error(StatusCode::FORBIDDEN, "forbidden", msg),
        ProvisioningError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", message),
        ProvisioningError::Failed { .. } => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "provisioning_failed", message)
        }
        ProvisioningError::IncompleteRollback { .. } => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "partial_failure", message)
        }
        ProvisioningError::Auth(e) => auth_error_to_response(e),
        ProvisioningError::Backend(e) => backend_error_to_response(e),
    }
}
