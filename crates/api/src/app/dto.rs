use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tidyops_auth::{GuardState, Identity, Role, Session, Tenant};
use tidyops_infra::{CompanyOutcome, OnboardingOutcome};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePasswordRequest {
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    pub path: String,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_at: DateTime<Utc>,
    pub user: Identity,
}

impl From<Session> for SessionResponse {
    fn from(s: Session) -> Self {
        Self {
            access_token: s.access_token,
            token_type: "bearer",
            expires_at: s.expires_at,
            user: s.identity,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WhoAmIResponse {
    pub user: Identity,
    pub role: Role,
    pub company: Option<Tenant>,
}

#[derive(Debug, Serialize)]
pub struct AccessCheckResponse {
    pub path: String,
    #[serde(flatten)]
    pub state: GuardState,
}

pub fn onboarding_json(outcome: OnboardingOutcome) -> serde_json::Value {
    serde_json::json!({
        "success": true,
        "created": outcome.created,
        "company": outcome.company,
    })
}

pub fn company_outcome_json(outcome: CompanyOutcome) -> serde_json::Value {
    match outcome {
        CompanyOutcome::Created(created) => serde_json::json!({
            "success": true,
            "company": created.company,
            "admin": created.admin,
            "temporary_password": created.temporary_password,
        }),
        CompanyOutcome::Updated(company) => serde_json::json!({
            "success": true,
            "company": company,
        }),
        CompanyOutcome::Listed(companies) => serde_json::json!({
            "success": true,
            "companies": companies,
        }),
    }
}
